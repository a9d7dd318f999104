//! The buffering body transform.
//!
//! Image codecs need the whole blob, so the body is collected before the
//! engine sees any of it:
//!
//! ```text
//! Open ──consume──▶ Consuming ──on_input_complete──▶ Processing ──▶ Producing ──▶ Complete
//!   └──────────────────────── abort ─────────────────────────────────────────────────▲
//! ```
//!
//! There are no back transitions. The engine runs on the [`WorkerPool`]; the
//! worker emits the single output chunk and then signals completion with an
//! [`Outcome`].
//!
//! ## Fault handling
//!
//! | Error | Outcome |
//! |---|---|
//! | acquisition, engine not ready | [`Outcome::Failed`], nothing emitted |
//! | engine fault, empty output | per [`FaultPolicy`]: original body or [`Outcome::Failed`] |
//!
//! A partially processed engine image is never emitted.

use crate::arguments::{ArgumentBuffer, ArgumentVector};
use crate::engine::{Engine, EngineError, EngineRuntime, invoke};
use crate::hook::{BodyTransform, OutputSink};
use crate::pool::WorkerPool;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    Open = 0,
    Consuming = 1,
    Processing = 2,
    Producing = 3,
    Complete = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Consuming,
            2 => Self::Processing,
            3 => Self::Producing,
            _ => Self::Complete,
        }
    }

    /// Input may still be appended.
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::Open | Self::Consuming)
    }
}

/// Phase shared between the transform and its worker job.
#[derive(Debug)]
struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn new() -> Self {
        Self(AtomicU8::new(Phase::Open as u8))
    }

    fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    /// Move to `to` if the current phase accepts input.
    fn advance_from_input(&self, to: Phase) -> Result<(), TransformError> {
        let current = self.get();
        if !current.accepts_input() {
            return Err(TransformError::InvalidState(current));
        }
        self.0
            .compare_exchange(current as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| TransformError::InvalidState(Phase::from_u8(actual)))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransformError {
    #[error("operation not allowed in phase {0:?}")]
    InvalidState(Phase),
}

/// What to emit when the engine faults on a readable request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultPolicy {
    /// Emit the original body unchanged.
    #[default]
    Passthrough,
    /// Emit nothing; the host answers with an error.
    Fail,
}

/// How a transform finished.
#[derive(Debug)]
pub enum Outcome {
    /// The engine's blob was emitted as the only chunk.
    Transformed {
        media_type: Option<&'static str>,
        length: usize,
    },
    /// The engine faulted and the original body was emitted instead.
    Passthrough { error: EngineError },
    /// Nothing usable was emitted.
    Failed { error: EngineError },
}

impl Outcome {
    pub fn is_transformed(&self) -> bool {
        matches!(self, Self::Transformed { .. })
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Transformed { .. } => None,
            Self::Passthrough { error } | Self::Failed { error } => Some(error),
        }
    }
}

/// Buffers a body, runs it through the engine once, emits one chunk.
pub struct BufferingTransform<E: Engine> {
    buffer: Vec<u8>,
    arguments: Option<ArgumentBuffer>,
    phase: Arc<PhaseCell>,
    runtime: Arc<EngineRuntime<E>>,
    pool: WorkerPool,
    policy: FaultPolicy,
}

impl<E: Engine> BufferingTransform<E> {
    pub fn new(
        runtime: Arc<EngineRuntime<E>>,
        pool: WorkerPool,
        arguments: ArgumentBuffer,
        policy: FaultPolicy,
    ) -> Self {
        Self {
            buffer: Vec::new(),
            arguments: Some(arguments),
            phase: Arc::new(PhaseCell::new()),
            runtime,
            pool,
            policy,
        }
    }

    /// Pre-size the buffer, e.g. from `Content-Length`.
    pub fn reserve(&mut self, additional: usize) {
        self.buffer.reserve(additional);
    }

    /// Bytes buffered so far.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The decoded command line, until the worker takes it.
    pub fn arguments(&self) -> Option<ArgumentVector<'_>> {
        self.arguments.as_ref().map(ArgumentBuffer::arguments)
    }
}

fn run_engine<E: Engine>(
    runtime: &EngineRuntime<E>,
    arguments: &ArgumentBuffer,
    input: &[u8],
) -> Result<crate::engine::EngineOutput, EngineError> {
    let engine = runtime.engine()?;
    catch_unwind(AssertUnwindSafe(|| invoke(&*engine, &arguments.arguments(), input)))
        .unwrap_or_else(|_| Err(EngineError::fault("engine panicked")))
}

impl<E: Engine> BodyTransform for BufferingTransform<E> {
    fn consume(&mut self, chunk: &[u8]) -> Result<(), TransformError> {
        match self.phase.get() {
            Phase::Open => self.phase.set(Phase::Consuming),
            Phase::Consuming => {}
            other => return Err(TransformError::InvalidState(other)),
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    fn on_input_complete(&mut self, mut sink: Box<dyn OutputSink>) -> Result<(), TransformError> {
        self.phase.advance_from_input(Phase::Processing)?;
        let input = std::mem::take(&mut self.buffer);
        let Some(arguments) = self.arguments.take() else {
            return Err(TransformError::InvalidState(self.phase.get()));
        };
        let runtime = Arc::clone(&self.runtime);
        let phase = Arc::clone(&self.phase);
        let policy = self.policy;
        tracing::debug!(bytes = input.len(), "body buffered, scheduling engine");

        self.pool.spawn(move || {
            let result = run_engine(&runtime, &arguments, &input);
            phase.set(Phase::Producing);

            let outcome = match result {
                Ok(output) => {
                    let length = output.blob.len();
                    tracing::debug!(length, media_type = ?output.media_type, "body transformed");
                    sink.produce(Bytes::from(output.blob));
                    Outcome::Transformed {
                        media_type: output.media_type,
                        length,
                    }
                }
                Err(error) if error.is_fatal() => {
                    tracing::error!(%error, "engine unavailable");
                    Outcome::Failed { error }
                }
                Err(error) => match policy {
                    FaultPolicy::Passthrough => {
                        tracing::warn!(%error, "engine fault, passing body through");
                        if !input.is_empty() {
                            sink.produce(Bytes::from(input));
                        }
                        Outcome::Passthrough { error }
                    }
                    FaultPolicy::Fail => {
                        tracing::warn!(%error, "engine fault");
                        Outcome::Failed { error }
                    }
                },
            };

            phase.set(Phase::Complete);
            sink.output_complete(outcome);
        });
        Ok(())
    }

    fn abort(&mut self) {
        if self.phase.advance_from_input(Phase::Complete).is_ok() {
            tracing::debug!(bytes = self.buffer.len(), "transform aborted");
            self.buffer = Vec::new();
            self.arguments = None;
        }
    }

    fn phase(&self) -> Phase {
        self.phase.get()
    }
}

/// Event delivered by a [`ChannelSink`].
#[derive(Debug)]
pub enum SinkEvent {
    Chunk(Bytes),
    Complete(Outcome),
}

/// An [`OutputSink`] that forwards everything over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn produce(&mut self, chunk: Bytes) {
        // The receiver going away means nobody wants the output.
        let _ = self.tx.send(SinkEvent::Chunk(chunk));
    }

    fn output_complete(&mut self, outcome: Outcome) {
        let _ = self.tx.send(SinkEvent::Complete(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Severity;
    use crate::engine::backend::tests::{Failure, MockEngine};
    use crate::test_helpers::{channel_sink, drain};

    fn runtime(engine: MockEngine) -> Arc<EngineRuntime<MockEngine>> {
        let runtime = Arc::new(EngineRuntime::new(engine));
        runtime.initialize().unwrap();
        runtime
    }

    fn transform(
        runtime: &Arc<EngineRuntime<MockEngine>>,
        policy: FaultPolicy,
    ) -> BufferingTransform<MockEngine> {
        let arguments =
            ArgumentBuffer::from_decoded(b"convert - -resize 50% webp:-".to_vec()).unwrap();
        BufferingTransform::new(
            Arc::clone(runtime),
            WorkerPool::new(1).unwrap(),
            arguments,
            policy,
        )
    }

    fn concat(chunks: &[Bytes]) -> Vec<u8> {
        chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }

    #[test]
    fn chunks_are_concatenated_in_order() {
        let rt = runtime(MockEngine::new());
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        assert_eq!(t.phase(), Phase::Open);
        t.consume(b"AB").unwrap();
        assert_eq!(t.phase(), Phase::Consuming);
        t.consume(b"CD").unwrap();
        t.consume(b"EF").unwrap();
        assert_eq!(t.buffered(), 6);

        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        let (chunks, outcome) = drain(&events);

        let engine = rt.engine().unwrap();
        assert_eq!(engine.recorded_blobs(), vec![b"ABCDEF".to_vec()]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(concat(&chunks), b"out:ABCDEF");
        assert!(matches!(
            outcome,
            Outcome::Transformed {
                media_type: Some("image/x-mock"),
                length: 10
            }
        ));
        assert_eq!(t.phase(), Phase::Complete);
        assert!(engine.balanced());
    }

    #[test]
    fn engine_sees_decoded_arguments() {
        let rt = runtime(MockEngine::new());
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        assert_eq!(t.arguments().unwrap().command(), Some("convert"));
        t.consume(b"x").unwrap();
        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        drain(&events);
        assert!(t.arguments().is_none());
        assert_eq!(
            rt.engine().unwrap().recorded_commands(),
            vec![vec!["convert", "-", "-resize", "50%", "webp:-"]]
        );
    }

    #[test]
    fn consume_after_input_complete_is_rejected() {
        let rt = runtime(MockEngine::new());
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        t.consume(b"data").unwrap();
        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        assert!(matches!(
            t.consume(b"more"),
            Err(TransformError::InvalidState(_))
        ));
        drain(&events);
        assert_eq!(
            t.consume(b"late"),
            Err(TransformError::InvalidState(Phase::Complete))
        );
    }

    #[test]
    fn input_complete_only_once() {
        let rt = runtime(MockEngine::new());
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        let (again, _rx) = channel_sink();
        assert!(t.on_input_complete(Box::new(again)).is_err());
        drain(&events);
        assert_eq!(rt.engine().unwrap().recorded_commands().len(), 1);
    }

    #[test]
    fn abort_skips_the_engine() {
        let rt = runtime(MockEngine::new());
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        t.consume(b"partial").unwrap();
        t.abort();
        assert_eq!(t.phase(), Phase::Complete);
        assert_eq!(t.buffered(), 0);
        let engine = rt.engine().unwrap();
        assert!(engine.recorded_commands().is_empty());
        assert_eq!(engine.total_acquired(), 0);

        let (sink, _rx) = channel_sink();
        assert!(t.on_input_complete(Box::new(sink)).is_err());
    }

    #[test]
    fn fault_passes_original_body_through() {
        let rt = runtime(MockEngine::failing(Failure::Command(Severity::Error)));
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        t.consume(b"ORIGINAL").unwrap();
        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        let (chunks, outcome) = drain(&events);
        assert_eq!(concat(&chunks), b"ORIGINAL");
        assert!(matches!(outcome, Outcome::Passthrough { .. }));
        assert!(rt.engine().unwrap().balanced());
    }

    #[test]
    fn fault_with_fail_policy_emits_nothing() {
        let rt = runtime(MockEngine::failing(Failure::Warning));
        let mut t = transform(&rt, FaultPolicy::Fail);
        t.consume(b"ORIGINAL").unwrap();
        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        let (chunks, outcome) = drain(&events);
        assert!(chunks.is_empty());
        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert_eq!(t.phase(), Phase::Complete);
        assert_eq!(
            t.consume(b"late"),
            Err(TransformError::InvalidState(Phase::Complete))
        );
    }

    #[test]
    fn fatal_fault_fails_even_under_passthrough() {
        let rt = runtime(MockEngine::failing(Failure::Command(Severity::Fatal)));
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        t.consume(b"ORIGINAL").unwrap();
        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        let (chunks, outcome) = drain(&events);
        assert!(chunks.is_empty());
        assert!(matches!(
            outcome,
            Outcome::Failed {
                error: EngineError::Fault {
                    severity: Severity::Fatal,
                    ..
                }
            }
        ));
        assert!(rt.engine().unwrap().balanced());
    }

    #[test]
    fn acquisition_failure_is_always_failed() {
        let rt = runtime(MockEngine::failing(Failure::AcquireImage));
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        t.consume(b"ORIGINAL").unwrap();
        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        let (chunks, outcome) = drain(&events);
        assert!(chunks.is_empty());
        assert!(matches!(
            outcome,
            Outcome::Failed {
                error: EngineError::Acquisition("image")
            }
        ));
        assert!(rt.engine().unwrap().balanced());
        assert_eq!(t.phase(), Phase::Complete);
        assert_eq!(
            t.consume(b"late"),
            Err(TransformError::InvalidState(Phase::Complete))
        );
    }

    #[test]
    fn torn_down_runtime_fails_the_request() {
        let rt = runtime(MockEngine::new());
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        t.consume(b"ORIGINAL").unwrap();
        rt.teardown();
        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        let (chunks, outcome) = drain(&events);
        assert!(chunks.is_empty());
        assert!(matches!(
            outcome,
            Outcome::Failed {
                error: EngineError::TornDown
            }
        ));
    }

    #[test]
    fn empty_output_uses_fault_policy() {
        let rt = runtime(MockEngine::failing(Failure::EmptyOutput));
        let mut t = transform(&rt, FaultPolicy::Passthrough);
        t.consume(b"ORIGINAL").unwrap();
        let (sink, events) = channel_sink();
        t.on_input_complete(Box::new(sink)).unwrap();
        let (chunks, outcome) = drain(&events);
        assert_eq!(concat(&chunks), b"ORIGINAL");
        assert!(matches!(
            outcome.error(),
            Some(EngineError::EmptyOutput)
        ));
    }

    #[test]
    fn phase_ordering() {
        assert!(Phase::Open < Phase::Consuming);
        assert!(Phase::Producing < Phase::Complete);
        assert!(Phase::Consuming.accepts_input());
        assert!(!Phase::Processing.accepts_input());
    }
}
