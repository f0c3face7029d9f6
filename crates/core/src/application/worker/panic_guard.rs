// Panic isolation: a processor panic fails the job, never the worker
use std::any::Any;
use std::future::Future;
use tracing::error;

/// Outcome of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    Success(T),
    Panicked(String),
}

/// Run a future on its own task so a panic is caught at the join
pub async fn execute_guarded_async<F, T>(future: F) -> PanicGuardResult<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn(future).await {
        Ok(value) => PanicGuardResult::Success(value),
        Err(join_err) if join_err.is_panic() => {
            let panic_msg = panic_message(join_err.into_panic());
            error!(panic_msg = %panic_msg, "Processor task panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
        Err(join_err) => PanicGuardResult::Panicked(format!("task cancelled: {}", join_err)),
    }
}

/// Extract the human-readable panic payload
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
