//! Helper for spawning named worker threads.
//!
//! Thread names show up in panic messages and debuggers; every long-lived
//! task in this crate gets one. Names are kept short in the embedded
//! tradition of 16-character task name limits.

use std::thread::JoinHandle;

/// Spawn a thread with the given name.
///
/// # Panics
/// Panics if the OS refuses to spawn a thread (critical system error).
pub fn spawn_named<F, T>(name: &str, f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .expect("failed to spawn thread")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_carries_its_name() {
        let handle = spawn_named("named_worker", || {
            std::thread::current().name().map(str::to_string)
        });
        assert_eq!(handle.join().unwrap().as_deref(), Some("named_worker"));
    }
}
