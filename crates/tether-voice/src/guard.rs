use std::any::Any;
use std::future::Future;
use tokio::task::AbortHandle;
use tracing::{debug, error};

/// Spawn `future` with a watcher that logs a panic instead of letting it go unnoticed.
///
/// A panic stays inside its own task. Shared state uses non-poisoning locks, so
/// the rest of the process keeps running.
pub fn spawn_guarded<F>(label: &'static str, future: F) -> AbortHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(future);
    let abort = task.abort_handle();
    tokio::spawn(async move {
        match task.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                let reason = panic_message(e.into_panic());
                error!(task = label, reason = %reason, "task panicked");
            }
            Err(_) => debug!(task = label, "task cancelled"),
        }
    });
    abort
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
