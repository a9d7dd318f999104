//! Process-wide engine lifecycle.
//!
//! An engine is initialized once before any request touches it and torn down
//! once at shutdown:
//!
//! ```text
//! Uninitialized ──initialize()──▶ Ready ──teardown()──▶ TornDown
//! ```
//!
//! `initialize` is idempotent while `Ready`; `teardown` is idempotent once
//! `TornDown`. An engine is never re-initialized after teardown, mirroring
//! command-style image libraries whose genesis may run once per process.

use super::backend::{Engine, EngineError};
use super::rust_engine::{EngineConfig, RustEngine};
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    TornDown,
}

pub struct EngineRuntime<E: Engine> {
    engine: Arc<E>,
    state: Mutex<Lifecycle>,
}

impl<E: Engine> EngineRuntime<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
            state: Mutex::new(Lifecycle::Uninitialized),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        // Lifecycle transitions cannot leave the state half-written.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the engine's genesis once. Later calls are no-ops.
    pub fn initialize(&self) -> Result<(), EngineError> {
        let mut state = self.lock();
        match *state {
            Lifecycle::Ready => Ok(()),
            Lifecycle::TornDown => Err(EngineError::TornDown),
            Lifecycle::Uninitialized => {
                self.engine.genesis()?;
                *state = Lifecycle::Ready;
                tracing::debug!("engine initialized");
                Ok(())
            }
        }
    }

    /// Run the engine's terminus once, if it was ever initialized.
    pub fn teardown(&self) {
        let mut state = self.lock();
        if *state == Lifecycle::Ready {
            self.engine.terminus();
            tracing::debug!("engine torn down");
        }
        *state = Lifecycle::TornDown;
    }

    pub fn state(&self) -> Lifecycle {
        *self.lock()
    }

    /// The engine, available only while `Ready`.
    pub fn engine(&self) -> Result<Arc<E>, EngineError> {
        match *self.lock() {
            Lifecycle::Ready => Ok(Arc::clone(&self.engine)),
            Lifecycle::Uninitialized => Err(EngineError::NotInitialized),
            Lifecycle::TornDown => Err(EngineError::TornDown),
        }
    }
}

static GLOBAL: OnceLock<Arc<EngineRuntime<RustEngine>>> = OnceLock::new();

/// The process-wide [`RustEngine`] runtime.
///
/// The first caller's `config` wins; the runtime still has to be
/// [`initialize`](EngineRuntime::initialize)d before use.
pub fn global(config: &EngineConfig) -> Arc<EngineRuntime<RustEngine>> {
    let runtime =
        GLOBAL.get_or_init(|| Arc::new(EngineRuntime::new(RustEngine::new(config.clone()))));
    Arc::clone(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::tests::MockEngine;
    use std::sync::atomic::Ordering;

    #[test]
    fn engine_unavailable_before_initialize() {
        let runtime = EngineRuntime::new(MockEngine::new());
        assert_eq!(runtime.state(), Lifecycle::Uninitialized);
        assert!(matches!(runtime.engine(), Err(EngineError::NotInitialized)));
    }

    #[test]
    fn initialize_is_idempotent() {
        let runtime = EngineRuntime::new(MockEngine::new());
        runtime.initialize().unwrap();
        runtime.initialize().unwrap();
        let engine = runtime.engine().unwrap();
        assert_eq!(engine.genesis_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn teardown_runs_terminus_once() {
        let runtime = EngineRuntime::new(MockEngine::new());
        runtime.initialize().unwrap();
        let engine = runtime.engine().unwrap();
        runtime.teardown();
        runtime.teardown();
        assert_eq!(engine.terminus_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.state(), Lifecycle::TornDown);
        assert!(matches!(runtime.engine(), Err(EngineError::TornDown)));
    }

    #[test]
    fn no_reinitialize_after_teardown() {
        let runtime = EngineRuntime::new(MockEngine::new());
        runtime.initialize().unwrap();
        runtime.teardown();
        assert!(matches!(runtime.initialize(), Err(EngineError::TornDown)));
    }

    #[test]
    fn teardown_without_initialize_skips_terminus() {
        let runtime = EngineRuntime::new(MockEngine::new());
        runtime.teardown();
        assert_eq!(runtime.state(), Lifecycle::TornDown);
        assert_eq!(
            runtime.engine.terminus_calls.load(Ordering::SeqCst),
            0
        );
    }

    #[test]
    fn global_runtime_is_shared() {
        let a = global(&EngineConfig::default());
        let b = global(&EngineConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
