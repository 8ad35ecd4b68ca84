//! Main bridge worker loop.

use crate::bridge::request::BridgeRequest;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Run the bridge loop on the current (dedicated) thread.
/// This function blocks until `Shutdown` is received or every sender is gone.
///
/// Each unit of work becomes its own task on the current-thread runtime, so a
/// call suspended on remote I/O never stops the loop from accepting more work.
/// Work still pending when the loop ends is dropped, and its callers observe
/// `WorkerClosed`.
pub(crate) fn run_bridge_loop(runtime: Runtime, mut rx: mpsc::UnboundedReceiver<BridgeRequest>) {
    runtime.block_on(async move {
        while let Some(req) = rx.recv().await {
            match req {
                BridgeRequest::Run { work } => {
                    tokio::spawn(work);
                }
                BridgeRequest::Shutdown => {
                    info!("Bridge worker shutting down");
                    break;
                }
            }
        }
        debug!("Bridge request queue closed");
    });
    runtime.shutdown_background();
}
