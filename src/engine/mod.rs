//! Image engine: contract, scoped contexts, lifecycle and a pure Rust implementation.
//!
//! | Piece | Role |
//! |---|---|
//! | **Contract** | [`Engine`] trait, exception/image contexts, [`Severity`] |
//! | **Guards** | [`ExceptionGuard`], [`OptionsGuard`], [`ImageGuard`] release on drop |
//! | **Invocation** | [`invoke`]: acquire, read, command, check severity, emit one blob |
//! | **Lifecycle** | [`EngineRuntime`]: explicit `initialize` / `teardown` |
//! | **Implementation** | [`RustEngine`] on the `image` crate |
//!
//! The module is split into:
//! - **Geometry**: pure functions for dimension math (unit testable)
//! - **Parameters**: quality, sigma and output format lookups
//! - **Command**: argv interpretation into operations
//! - **Backend**: [`Engine`] trait + mock for tests

pub mod backend;
pub mod command;
mod geometry;
pub mod guards;
pub mod invoke;
mod params;
pub mod runtime;
pub mod rust_engine;

pub use backend::{Engine, EngineError, ExceptionContext, ExceptionInfo, ImageContext, Severity};
pub use guards::{ExceptionGuard, ImageGuard, OptionsGuard};
pub use invoke::{EngineOutput, invoke};
pub use geometry::{Fit, Geometry};
pub use params::{Quality, Sigma};
pub use runtime::{EngineRuntime, Lifecycle, global};
pub use rust_engine::{EngineConfig, RustEngine};
