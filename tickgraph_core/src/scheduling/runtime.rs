//! Thread placement for the ticking loop
//!
//! On a dual-core device the control loop owns one core outright. Loading and
//! running on that same thread keeps the port block in that core's cache.

use crate::error::{TickError, TickResult};
use std::thread::JoinHandle;

/// Number of cores reported by the OS
pub fn get_core_count() -> usize {
    num_cpus::get()
}

/// Pin the calling thread to `core`
pub fn pin_current_thread(core: usize) -> TickResult<()> {
    let cores = core_affinity::get_core_ids()
        .ok_or_else(|| TickError::Other("core_affinity::get_core_ids() returned None".into()))?;
    let id = cores
        .into_iter()
        .find(|c| c.id == core)
        .ok_or_else(|| {
            TickError::config(format!(
                "core {} does not exist (this machine reports {} cores)",
                core,
                get_core_count()
            ))
        })?;
    if !core_affinity::set_for_current(id) {
        return Err(TickError::Other(format!(
            "failed to set affinity to core {}",
            core
        )));
    }
    log::debug!("[Engine] thread pinned to core {}", core);
    Ok(())
}

/// Run `f` on a named thread, optionally pinned to `core`.
///
/// Pinning failure is logged and the closure still runs unpinned.
///
/// ```rust,ignore
/// let stop = StopFlag::new();
/// let handle = spawn_engine_thread("engine", Some(1), move || {
///     let mut engine = Engine::new(registry);
///     engine.load(model)?;
///     engine.run(&stop)
/// })?;
/// handle.join().expect("engine thread panicked")?;
/// ```
pub fn spawn_engine_thread<F, T>(
    name: &str,
    core: Option<usize>,
    f: F,
) -> TickResult<JoinHandle<TickResult<T>>>
where
    F: FnOnce() -> TickResult<T> + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            if let Some(core) = core {
                if let Err(e) = pin_current_thread(core) {
                    log::warn!("[Engine] running unpinned: {}", e);
                }
            }
            f()
        })
        .map_err(TickError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_engine_thread_returns_result() {
        let handle = spawn_engine_thread("tg-test", None, || Ok(21 * 2)).unwrap();
        assert_eq!(handle.join().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_pin_to_missing_core_fails() {
        assert!(pin_current_thread(usize::MAX).is_err());
    }

    #[test]
    fn test_thread_is_named() {
        let handle = spawn_engine_thread("tg-named", Some(0), || {
            Ok(std::thread::current().name().map(|n| n.to_string()))
        })
        .unwrap();
        assert_eq!(handle.join().unwrap().unwrap().as_deref(), Some("tg-named"));
    }
}
