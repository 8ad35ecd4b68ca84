//! Request types for the bridge worker.

use std::future::Future;
use std::pin::Pin;

/// A type-erased unit of work; it delivers its own result to the waiting caller.
pub type BoxedWork = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Messages accepted by the bridge worker loop.
pub enum BridgeRequest {
    Run { work: BoxedWork },
    Shutdown,
}
