use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs `action` every `interval` until `stop` is cancelled.
///
/// Each round sleeps for `interval` and then invokes `action` once. The stop
/// token is observed while sleeping, so cancellation never interrupts an
/// invocation already in progress. When `completions` is provided, the total
/// number of executions so far is sent after every round; a full channel
/// stalls the loop until a reader catches up.
///
/// Returns the number of times `action` ran.
pub async fn execute_repeatedly<F>(
    interval: Duration,
    mut action: F,
    stop: CancellationToken,
    completions: Option<mpsc::Sender<u64>>,
) -> u64
where
    F: FnMut(),
{
    let mut executions = 0u64;
    let mut completions = completions;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        action();
        executions += 1;

        if let Some(sender) = &completions {
            let delivered = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                sent = sender.send(executions) => sent.is_ok(),
            };
            if !delivered {
                warn!("⚠️ Completion receiver dropped, no longer reporting executions");
                completions = None;
            }
        }
    }

    debug!("💡 Repeated task stopped after {} executions", executions);
    executions
}
