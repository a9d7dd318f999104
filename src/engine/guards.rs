//! Scoped engine contexts.
//!
//! A [`Guard`] owns one context acquired from an [`Engine`] and hands it back
//! in `Drop`, so release happens exactly once on every exit path: normal
//! completion, `?` early return, or a fault reported by the engine. Guards
//! are neither `Clone` nor `Copy`.

use super::backend::{Engine, EngineError};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// One kind of engine context: how to acquire it and how to give it back.
pub trait ContextKind<E: Engine> {
    type Handle;
    const NAME: &'static str;

    fn acquire(engine: &E) -> Option<Self::Handle>;
    fn release(engine: &E, handle: Self::Handle);
}

pub struct Exception;
pub struct Options;
pub struct Image;

impl<E: Engine> ContextKind<E> for Exception {
    type Handle = E::Exception;
    const NAME: &'static str = "exception";

    fn acquire(engine: &E) -> Option<Self::Handle> {
        engine.acquire_exception()
    }

    fn release(engine: &E, handle: Self::Handle) {
        engine.release_exception(handle)
    }
}

impl<E: Engine> ContextKind<E> for Options {
    type Handle = E::Options;
    const NAME: &'static str = "options";

    fn acquire(engine: &E) -> Option<Self::Handle> {
        engine.acquire_options()
    }

    fn release(engine: &E, handle: Self::Handle) {
        engine.release_options(handle)
    }
}

impl<E: Engine> ContextKind<E> for Image {
    type Handle = E::Image;
    const NAME: &'static str = "image";

    fn acquire(engine: &E) -> Option<Self::Handle> {
        engine.acquire_image()
    }

    fn release(engine: &E, handle: Self::Handle) {
        engine.release_image(handle)
    }
}

pub struct Guard<'e, E: Engine, K: ContextKind<E>> {
    engine: &'e E,
    /// `Some` from `acquire` until `drop` hands it back.
    handle: Option<K::Handle>,
    kind: PhantomData<K>,
}

pub type ExceptionGuard<'e, E> = Guard<'e, E, Exception>;
pub type OptionsGuard<'e, E> = Guard<'e, E, Options>;
pub type ImageGuard<'e, E> = Guard<'e, E, Image>;

impl<'e, E: Engine, K: ContextKind<E>> Guard<'e, E, K> {
    /// Acquire a context. A `None` from the engine is an allocation failure
    /// and is not retried.
    pub fn acquire(engine: &'e E) -> Result<Self, EngineError> {
        match K::acquire(engine) {
            Some(handle) => Ok(Self {
                engine,
                handle: Some(handle),
                kind: PhantomData,
            }),
            None => {
                tracing::error!(context = K::NAME, "engine context acquisition failed");
                Err(EngineError::Acquisition(K::NAME))
            }
        }
    }
}

impl<E: Engine, K: ContextKind<E>> Deref for Guard<'_, E, K> {
    type Target = K::Handle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref().expect("guard handle is held until drop")
    }
}

impl<E: Engine, K: ContextKind<E>> DerefMut for Guard<'_, E, K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_mut().expect("guard handle is held until drop")
    }
}

impl<E: Engine, K: ContextKind<E>> Drop for Guard<'_, E, K> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            K::release(self.engine, handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::tests::{Failure, MockEngine};

    #[test]
    fn release_on_scope_exit() {
        let engine = MockEngine::new();
        {
            let _exception = ExceptionGuard::acquire(&engine).unwrap();
            let _options = OptionsGuard::acquire(&engine).unwrap();
            let _image = ImageGuard::acquire(&engine).unwrap();
            assert_eq!(engine.total_acquired(), 3);
            assert_eq!(engine.images.get(), (1, 0));
        }
        assert!(engine.balanced());
        assert_eq!(engine.images.get(), (1, 1));
    }

    #[test]
    fn release_on_early_return() {
        fn run(engine: &MockEngine) -> Result<(), EngineError> {
            let _exception = ExceptionGuard::acquire(engine)?;
            let _options = OptionsGuard::acquire(engine)?;
            Err(EngineError::fault("bail out"))
        }

        let engine = MockEngine::new();
        assert!(run(&engine).is_err());
        assert_eq!(engine.exceptions.get(), (1, 1));
        assert_eq!(engine.options.get(), (1, 1));
    }

    #[test]
    fn failed_acquisition_releases_earlier_guards() {
        fn run(engine: &MockEngine) -> Result<(), EngineError> {
            let _exception = ExceptionGuard::acquire(engine)?;
            let _options = OptionsGuard::acquire(engine)?;
            let _image = ImageGuard::acquire(engine)?;
            Ok(())
        }

        let engine = MockEngine::failing(Failure::AcquireImage);
        let err = run(&engine).unwrap_err();
        assert!(matches!(err, EngineError::Acquisition("image")));
        assert!(engine.balanced());
        assert_eq!(engine.images.get(), (0, 0));
    }

    #[test]
    fn guard_derefs_to_handle() {
        use crate::engine::backend::{ExceptionContext, Severity};

        let engine = MockEngine::new();
        let mut exception = ExceptionGuard::acquire(&engine).unwrap();
        exception.throw(Severity::Warning, "careful".into());
        assert_eq!(exception.severity(), Severity::Warning);
        drop(exception);
        assert!(engine.balanced());
        assert_eq!(engine.exceptions.get(), (1, 1));
    }
}
