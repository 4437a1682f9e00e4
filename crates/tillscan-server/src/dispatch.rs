//! Hand-off from HTTP workers to the host callback.
//!
//! Request handlers run on the runtime's worker threads, but host
//! applications want scans delivered one at a time from a single task.
//! Handlers therefore push into an unbounded channel and a dedicated
//! dispatcher task invokes the callback serially, in arrival order.

use tillscan_core::ScanSubmission;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::debug;

/// Callback receiving accepted scans, invoked serially from one task.
pub type ScanHandler = Box<dyn Fn(ScanSubmission) + Send + Sync>;

/// Runs until every sender is gone, then drains whatever is still queued.
/// Stopping the listener therefore never loses an already-accepted scan.
pub(crate) fn spawn_dispatcher(
    mut scans: UnboundedReceiver<ScanSubmission>,
    handler: ScanHandler,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(submission) = scans.recv().await {
            handler(submission);
        }
        debug!("scan dispatcher drained and stopped");
    })
}
