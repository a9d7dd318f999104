//! One guarded engine invocation: buffer + arguments in, one blob out.

use super::backend::{Engine, EngineError, ExceptionContext, ImageContext, Severity};
use super::guards::{ExceptionGuard, ImageGuard, OptionsGuard};
use crate::arguments::ArgumentVector;

/// The single blob produced by an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    pub blob: Vec<u8>,
    pub media_type: Option<&'static str>,
}

/// Run `arguments` against `input`.
///
/// Any severity other than [`Severity::Undefined`] after the command,
/// including a warning, is reported as [`EngineError::Fault`]; the image the
/// engine was left with is discarded rather than returned.
pub fn invoke<E: Engine>(
    engine: &E,
    arguments: &ArgumentVector<'_>,
    input: &[u8],
) -> Result<EngineOutput, EngineError> {
    let mut exception = ExceptionGuard::acquire(engine)?;
    let mut options = OptionsGuard::acquire(engine)?;
    let mut image = ImageGuard::acquire(engine)?;

    image.read_from_bytes(input)?;

    let succeeded = engine.image_command(&mut options, &mut image, arguments, &mut exception);
    let severity = match (exception.severity(), succeeded) {
        // A bare `false` without an exception still counts as an error.
        (Severity::Undefined, false) => Severity::Error,
        (severity, _) => severity,
    };
    if severity != Severity::Undefined {
        return Err(EngineError::Fault {
            severity,
            reason: exception
                .reason()
                .unwrap_or("command reported failure")
                .to_string(),
        });
    }

    image.reset_iterator();
    let blob = image.combined_blob()?;
    if blob.is_empty() {
        return Err(EngineError::EmptyOutput);
    }
    Ok(EngineOutput {
        blob,
        media_type: image.media_type(),
    })
}
