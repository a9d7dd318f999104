//! # magick-transform
//!
//! A query-parameter-driven image transform for HTTP proxy response bodies.
//! The request URL carries an encoded command line; the proxy buffers the
//! origin's response body, runs it through an image engine and streams the
//! result back in place of the original.
//!
//! # Architecture: Headers, Body, Engine
//!
//! ```text
//! 1. Route      query + response headers  →  attached transform (or none)
//! 2. Buffer     body chunks               →  one contiguous blob
//! 3. Process    blob + argv               →  one output chunk (worker pool)
//! ```
//!
//! The host drives steps 1 and 2 through the capability traits in [`hook`];
//! step 3 runs on a [`pool::WorkerPool`] so the host's dispatch context
//! never blocks on decode, filter or encode.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`query`] | Zero-copy query string parsing into a multimap of spans |
//! | [`arguments`] | URL-safe base64 `magick` token → NUL-terminated argument vector |
//! | [`router`] | Response hook: attach a transform when `magick` is present and decodes |
//! | [`transform`] | Buffering state machine, fault policy, output sinks |
//! | [`engine`] | Engine contract, scoped context guards, lifecycle, pure Rust engine |
//! | [`hook`] | `BodyTransform` / `OutputSink` / `ResponseHook` capability traits |
//! | [`pool`] | Bounded rayon pool for engine invocations |
//! | [`config`] | `config.toml` loading, validation and merging |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Buffer Everything, Emit Once
//!
//! Image codecs need the whole file, so a transform collects every chunk
//! before the engine runs and emits exactly one output chunk. Streaming
//! partial output would mean emitting bytes before knowing whether the
//! engine succeeds.
//!
//! ## Spans, Not Pointers
//!
//! [`query::QueryMap`] owns the query string once and stores `(offset,
//! length)` spans; [`arguments::ArgumentVector`] borrows its buffer. No view
//! can outlive the bytes it points into, and nothing is copied per lookup.
//!
//! ## Scoped Engine Contexts
//!
//! Every engine invocation needs an exception, an options and an image
//! context. Each is wrapped in a [`engine::guards::Guard`] that releases it
//! in `Drop`, so every exit path, including `?` and faults, gives each
//! context back exactly once.
//!
//! ## Explicit Lifecycle
//!
//! Engine genesis and terminus are [`engine::EngineRuntime::initialize`] and
//! [`engine::EngineRuntime::teardown`], called by the host at startup and
//! shutdown. A request arriving outside that window fails fast instead of
//! touching an uninitialized engine.
//!
//! ## Fail Open
//!
//! A command the engine rejects costs the client its transform, not its
//! response: by default the original body is passed through. Only when the
//! engine cannot run at all (no contexts, not initialized) does the request
//! fail. See [`transform::FaultPolicy`].
//!
//! ## Pure-Rust Imaging
//!
//! [`engine::RustEngine`] uses the `image` crate for decoding, filtering and
//! encoding (rav1e for AVIF). No native image library, no system packages.

pub mod arguments;
pub mod config;
pub mod engine;
pub mod hook;
pub mod logging;
pub mod output;
pub mod pool;
pub mod query;
pub mod router;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_helpers;
