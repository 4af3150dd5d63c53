use log::{error, trace};
use tokio::task::JoinHandle;

/// await a spawned task, `None` if it panicked or was aborted
pub async fn wait<T>(handle: JoinHandle<T>, label: &str) -> Option<T> {
    match handle.await {
        Ok(output) => {
            trace!("{label} task exit successfully");
            Some(output)
        }
        Err(e) => {
            error!("{label} task panic: {e}");
            None
        }
    }
}
