//! Capability contracts between the host proxy and this crate.
//!
//! The host drives two kinds of callbacks: response-header inspection, where
//! a [`ResponseHook`] may attach a transform to the transaction, and body
//! streaming, where the attached [`BodyTransform`] receives input chunks and
//! writes output through an [`OutputSink`]. Callbacks for one transaction are
//! invoked sequentially; the sink may be called from a worker thread.

use crate::router::{Routing, Transaction};
use crate::transform::{Outcome, Phase, TransformError};
use bytes::Bytes;

/// A push-driven body transform.
pub trait BodyTransform: Send {
    /// Accept the next input chunk.
    fn consume(&mut self, chunk: &[u8]) -> Result<(), TransformError>;

    /// Input is finished; produce output through `sink`.
    ///
    /// May return before output is produced. `sink` receives zero or more
    /// chunks followed by exactly one [`OutputSink::output_complete`].
    fn on_input_complete(&mut self, sink: Box<dyn OutputSink>) -> Result<(), TransformError>;

    /// The transaction ended early. Discard buffered input.
    fn abort(&mut self);

    fn phase(&self) -> Phase;
}

/// Where a transform writes its output.
pub trait OutputSink: Send + 'static {
    fn produce(&mut self, chunk: Bytes);

    fn output_complete(&mut self, outcome: Outcome);
}

/// Inspects response headers and decides whether to transform the body.
pub trait ResponseHook {
    fn on_read_response_headers(&self, txn: &mut Transaction) -> Routing;
}
