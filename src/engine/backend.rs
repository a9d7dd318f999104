//! Engine contract and shared types.
//!
//! The [`Engine`] trait is the boundary between the transform pipeline and
//! whatever does the pixel work. It is modelled on a command-style image API:
//!
//! - three kinds of per-request context (exception, options, image), each
//!   acquired from the engine and released back to it exactly once
//! - one command entry point taking options, image, an argv-style vector and
//!   the exception context, returning a success flag
//! - an exception context whose [`Severity`] is compared against
//!   [`Severity::Undefined`] after the call
//!
//! Callers never touch acquire/release directly; they go through the scoped
//! guards in [`guards`](super::guards).
//!
//! The production implementation is
//! [`RustEngine`](super::rust_engine::RustEngine).

use crate::arguments::ArgumentVector;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine failed to acquire {0} context")]
    Acquisition(&'static str),
    #[error("engine runtime is not initialized")]
    NotInitialized,
    #[error("engine runtime was torn down")]
    TornDown,
    #[error("{severity} exception: {reason}")]
    Fault { severity: Severity, reason: String },
    #[error("engine produced an empty output blob")]
    EmptyOutput,
}

impl EngineError {
    /// Whether the request cannot continue at all.
    ///
    /// Acquisition and lifecycle failures leave nothing to fall back on,
    /// and a `Fatal` exception means the engine itself is unusable. Other
    /// processing faults still have the original body.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Acquisition(_)
                | Self::NotInitialized
                | Self::TornDown
                | Self::Fault {
                    severity: Severity::Fatal,
                    ..
                }
        )
    }

    pub(crate) fn fault(reason: impl Into<String>) -> Self {
        Self::Fault {
            severity: Severity::Error,
            reason: reason.into(),
        }
    }
}

/// Exception severity, ordered from benign to fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// No exception raised.
    #[default]
    Undefined,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Undefined => "undefined",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        })
    }
}

/// Exception context filled in by the engine.
pub trait ExceptionContext {
    fn severity(&self) -> Severity;

    fn reason(&self) -> Option<&str>;

    /// Record an exception. The most severe one wins.
    fn throw(&mut self, severity: Severity, reason: String);
}

/// Plain exception record usable by any engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionInfo {
    severity: Severity,
    reason: Option<String>,
}

impl ExceptionContext for ExceptionInfo {
    fn severity(&self) -> Severity {
        self.severity
    }

    fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    fn throw(&mut self, severity: Severity, reason: String) {
        if severity > self.severity || self.reason.is_none() {
            self.severity = self.severity.max(severity);
            self.reason = Some(reason);
        }
    }
}

/// Transient image context: the engine's working image list.
pub trait ImageContext {
    /// Decode `blob` into the context.
    fn read_from_bytes(&mut self, blob: &[u8]) -> Result<(), EngineError>;

    /// Select an output target such as `-` or `webp:-`.
    fn write_to(&mut self, target: &str) -> Result<(), EngineError>;

    /// Move the image iterator back to the first frame.
    fn reset_iterator(&mut self);

    /// Encode the current image into a single blob.
    fn combined_blob(&mut self) -> Result<Vec<u8>, EngineError>;

    /// MIME type of what [`combined_blob`](Self::combined_blob) produces.
    fn media_type(&self) -> Option<&'static str>;
}

/// An image-processing engine.
///
/// `acquire_*` returning `None` means the engine could not allocate the
/// context; the guards turn that into [`EngineError::Acquisition`].
pub trait Engine: Send + Sync + 'static {
    type Exception: ExceptionContext;
    type Options;
    type Image: ImageContext;

    /// One-time process-wide initialization.
    fn genesis(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Process-wide teardown, the counterpart of [`genesis`](Self::genesis).
    fn terminus(&self) {}

    fn acquire_exception(&self) -> Option<Self::Exception>;
    fn release_exception(&self, exception: Self::Exception);

    fn acquire_options(&self) -> Option<Self::Options>;
    fn release_options(&self, options: Self::Options);

    fn acquire_image(&self) -> Option<Self::Image>;
    fn release_image(&self, image: Self::Image);

    /// Run a command line against `image`.
    ///
    /// Returns `false` on failure; details go into `exception`.
    fn image_command(
        &self,
        options: &mut Self::Options,
        image: &mut Self::Image,
        arguments: &ArgumentVector<'_>,
        exception: &mut Self::Exception,
    ) -> bool;
}
