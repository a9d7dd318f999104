//! Deciding which responses get a transform.
//!
//! [`MagickRouter`] runs when the host has read the response headers. It
//! attaches a [`BufferingTransform`] only when every gate passes:
//!
//! 1. the request query has a `magick` key with a non-empty value (the first
//!    such value is used)
//! 2. the response `Content-Type` is on the allowlist (if one is configured)
//! 3. the declared `Content-Length` is within `max_body_bytes` (if set; an
//!    undeclared length is not gated)
//! 4. the `magick` value decodes into at least one argument
//!
//! Otherwise the body flows through untouched. `magickSig` is read and logged
//! at debug level; nothing verifies it.

use crate::arguments::ArgumentBuffer;
use crate::config::{RouterConfig, TransformConfig};
use crate::engine::{Engine, EngineRuntime};
use crate::hook::{BodyTransform, ResponseHook};
use crate::pool::WorkerPool;
use crate::query::QueryMap;
use crate::transform::{BufferingTransform, FaultPolicy, Outcome};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Uri};
use std::sync::Arc;

/// The host's view of one proxied request/response pair.
pub struct Transaction {
    pub uri: Uri,
    pub response_headers: HeaderMap,
    transform: Option<Box<dyn BodyTransform>>,
}

impl Transaction {
    pub fn new(uri: Uri, response_headers: HeaderMap) -> Self {
        Self {
            uri,
            response_headers,
            transform: None,
        }
    }

    pub fn attach(&mut self, transform: Box<dyn BodyTransform>) {
        self.transform = Some(transform);
    }

    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    pub fn transform_mut(&mut self) -> Option<&mut (dyn BodyTransform + 'static)> {
        self.transform.as_deref_mut()
    }

    pub fn take_transform(&mut self) -> Option<Box<dyn BodyTransform>> {
        self.transform.take()
    }
}

/// Why a response was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No `magick` parameter, or an empty one.
    NoArguments,
    /// `Content-Type` missing or not on the allowlist.
    ContentType,
    /// `Content-Length` above the configured ceiling.
    TooLarge,
    /// The `magick` value did not decode.
    Decode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Attached,
    Skipped(SkipReason),
}

pub struct MagickRouter<E: Engine> {
    config: RouterConfig,
    policy: FaultPolicy,
    runtime: Arc<EngineRuntime<E>>,
    pool: WorkerPool,
}

impl<E: Engine> MagickRouter<E> {
    pub fn new(
        config: &TransformConfig,
        runtime: Arc<EngineRuntime<E>>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            config: config.router.clone(),
            policy: config.transform.on_fault,
            runtime,
            pool,
        }
    }

    fn content_type_allowed(&self, headers: &HeaderMap) -> bool {
        if self.config.content_types.is_empty() {
            return true;
        }
        headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                let ct = ct.to_ascii_lowercase();
                self.config
                    .content_types
                    .iter()
                    .any(|allowed| ct.contains(&allowed.to_ascii_lowercase()))
            })
    }

    fn declared_length(headers: &HeaderMap) -> Option<u64> {
        headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}

impl<E: Engine> ResponseHook for MagickRouter<E> {
    fn on_read_response_headers(&self, txn: &mut Transaction) -> Routing {
        let query = QueryMap::parse(txn.uri.query().unwrap_or(""));

        let values = query.get(&self.config.magick_param);
        let Some(token) = values.iter().find(|v| !v.is_empty()) else {
            return Routing::Skipped(SkipReason::NoArguments);
        };

        if let Some(signature) = query.first(&self.config.signature_param) {
            tracing::debug!(signature, "request signature present, not verified");
        }

        if !self.content_type_allowed(&txn.response_headers) {
            tracing::debug!(uri = %txn.uri, "content type not eligible");
            return Routing::Skipped(SkipReason::ContentType);
        }

        let length = Self::declared_length(&txn.response_headers);
        let max = self.config.max_body_bytes;
        if max > 0 && length.is_some_and(|len| len > max) {
            tracing::info!(uri = %txn.uri, ?length, max, "body too large to transform");
            return Routing::Skipped(SkipReason::TooLarge);
        }

        let arguments = match ArgumentBuffer::decode(token.as_bytes()) {
            Ok(arguments) => arguments,
            Err(error) => {
                tracing::warn!(uri = %txn.uri, %error, "magick argument rejected");
                return Routing::Skipped(SkipReason::Decode);
            }
        };

        tracing::info!(
            uri = %txn.uri,
            command = arguments.arguments().command(),
            argc = arguments.len(),
            "attaching transform"
        );
        let mut transform = BufferingTransform::new(
            Arc::clone(&self.runtime),
            self.pool.clone(),
            arguments,
            self.policy,
        );
        if let Some(len) = length.filter(|_| max > 0) {
            transform.reserve(len as usize);
        }
        txn.attach(Box::new(transform));
        Routing::Attached
    }
}

/// Bring response headers in line with what the transform emitted.
///
/// Only a [`Outcome::Transformed`] body differs from the origin's, so other
/// outcomes leave the headers untouched. `Vary` is not set: the output
/// depends on the URL alone, which caches already key on.
pub fn rewrite_headers(headers: &mut HeaderMap, outcome: &Outcome) {
    if let Outcome::Transformed { media_type, length } = outcome {
        if let Some(media_type) = *media_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(media_type));
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(*length));
    }
}
