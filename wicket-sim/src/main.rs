//! Host simulator for the provisioning portal.
//!
//! Runs the full control plane against a scripted radio and a JSON-file
//! credential store, so the captive portal can be exercised with a normal
//! browser:
//!
//! ```text
//! cargo run -p wicket-sim -- --http-port 8080
//! ```
//!
//! then open http://127.0.0.1:8080/. Requests to 127.0.0.1 count as the AP
//! side (no auth); to exercise a LAN auth mode, browse via another local
//! address (e.g. your machine's LAN IP). The simulated networks accept the
//! password given with `--join-password`.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;
use md5::{Digest, Md5};
use wicket_core::auth::{LanAuthConfig, LanAuthType};
use wicket_core::{Config, Core};

mod file_nvs;
mod sim_radio;

use file_nvs::FileNvs;
use sim_radio::SimRadio;

#[derive(Parser)]
#[command(about = "Run the provisioning portal against a simulated radio")]
struct Args {
    /// TCP port for the captive HTTP server.
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// UDP port for the DNS hijack; 0 leaves it off (53 needs privileges).
    #[arg(long, default_value_t = 0)]
    dns_port: u16,

    /// Address treated as the AP interface IP.
    #[arg(long, default_value_t = Ipv4Addr::LOCALHOST)]
    ap_ip: Ipv4Addr,

    /// SSID the simulated access point advertises.
    #[arg(long, default_value = "wicket-sim")]
    ap_ssid: String,

    /// LAN auth mode: lan_auth_allow, lan_auth_basic, lan_auth_digest,
    /// lan_auth_ruuvi or lan_auth_deny.
    #[arg(long, default_value = "lan_auth_allow")]
    lan_auth: String,

    #[arg(long, default_value = "admin")]
    auth_user: String,

    /// Plaintext auth password for digest/ruuvi modes. For basic mode pass
    /// the pre-encoded base64("user:password") value instead.
    #[arg(long, default_value = "")]
    auth_pass: String,

    /// Password the simulated upstream networks accept.
    #[arg(long, default_value = "secret123")]
    join_password: String,

    /// Backing file for the credential store.
    #[arg(long, default_value = "wicket-nvs.json")]
    nvs_file: PathBuf,

    /// Skip the saved-credentials restore and go straight to the portal.
    #[arg(long)]
    ap_only: bool,
}

fn lan_auth_config(args: &Args) -> anyhow::Result<LanAuthConfig> {
    let auth_type = LanAuthType::from_str(&args.lan_auth)
        .map_err(|_| anyhow::anyhow!("unknown LAN auth mode: {}", args.lan_auth))?;
    let pass = match auth_type {
        LanAuthType::Digest | LanAuthType::Ruuvi => {
            // The stored pre-image is MD5("user:realm:password") in hex.
            let preimage = format!("{}:{}:{}", args.auth_user, args.ap_ssid, args.auth_pass);
            hex::encode(Md5::digest(preimage.as_bytes()))
        }
        _ => args.auth_pass.clone(),
    };
    Ok(LanAuthConfig {
        auth_type,
        user: args.auth_user.clone(),
        pass,
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = Config {
        ap_ssid: args.ap_ssid.clone(),
        ap_ip: args.ap_ip,
        ap_gateway: args.ap_ip,
        http_port: args.http_port,
        dns_port: args.dns_port,
        lan_auth: lan_auth_config(&args)?,
        start_ap_only: args.ap_only,
        ..Config::default()
    };

    let radio = Arc::new(SimRadio::new(args.join_password.clone()));
    let nvs = Arc::new(
        FileNvs::open(&args.nvs_file)
            .with_context(|| format!("opening {}", args.nvs_file.display()))?,
    );

    let core = Arc::new(Core::new(config, Arc::clone(&radio) as _, nvs as _));
    radio.set_sink(core.event_sink());
    core.start()?;

    info!(
        "portal up: http://{}:{}/ (join password for simulated networks: {:?})",
        args.ap_ip, args.http_port, args.join_password
    );

    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
