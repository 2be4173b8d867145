//! Engine shared between threads.

use bytes::Bytes;
use ruleflow_core::{CoreError, CoreResult, DatumId, TransformId};
use ruleflow_xpt::{Checkpoint, LogStorage, Persistence};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::datum::DatumState;
use crate::engine::{Engine, EngineStats};
use crate::transform::{Transform, TransformSpec, TransformState};

/// Cloneable handle to one [`Engine`]
///
/// Every operation takes the engine lock for its whole duration, so
/// operations from different threads never interleave.
#[derive(Debug, Clone, Default)]
pub struct SharedEngine {
    inner: Arc<Mutex<Engine>>,
}

impl SharedEngine {
    /// Create a handle to a new, empty engine
    #[must_use]
    pub fn new() -> Self {
        Self::from_engine(Engine::new())
    }

    /// Share an existing engine
    #[must_use]
    pub fn from_engine(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, Engine>> {
        self.inner.lock().map_err(|_| CoreError::Internal {
            message: "engine lock poisoned".to_string(),
        })
    }

    /// Run `f` with exclusive access to the engine
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned, otherwise whatever `f` returns
    pub fn with<T>(&self, f: impl FnOnce(&mut Engine) -> CoreResult<T>) -> CoreResult<T> {
        f(&mut *self.lock()?)
    }

    /// See [`Engine::datum_create`]
    ///
    /// # Errors
    ///
    /// `OutOfMemory`, or a poisoned lock
    pub fn datum_create(&self) -> CoreResult<DatumId> {
        self.lock()?.datum_create()
    }

    /// See [`Engine::datum_create_file`]
    ///
    /// # Errors
    ///
    /// `OutOfMemory`, or a poisoned lock
    pub fn datum_create_file(&self, path: impl Into<PathBuf>) -> CoreResult<DatumId> {
        self.lock()?.datum_create_file(path)
    }

    /// See [`Engine::datum_create_set`]
    ///
    /// # Errors
    ///
    /// `OutOfMemory`, or a poisoned lock
    pub fn datum_create_set(&self, value: impl Into<Bytes>) -> CoreResult<DatumId> {
        self.lock()?.datum_create_set(value)
    }

    /// See [`Engine::datum_set`]
    ///
    /// # Errors
    ///
    /// `NotFound`, `DoubleWrite`, or a poisoned lock
    pub fn datum_set(&self, id: DatumId, value: impl Into<Bytes>) -> CoreResult<()> {
        self.lock()?.datum_set(id, value)
    }

    /// See [`Engine::datum_get`]
    ///
    /// # Errors
    ///
    /// `NotFound`, or a poisoned lock
    pub fn datum_get(&self, id: DatumId) -> CoreResult<Option<Bytes>> {
        self.lock()?.datum_get(id)
    }

    /// See [`Engine::datum_state`]
    ///
    /// # Errors
    ///
    /// `NotFound`, or a poisoned lock
    pub fn datum_state(&self, id: DatumId) -> CoreResult<DatumState> {
        self.lock()?.datum_state(id)
    }

    /// See [`Engine::datum_release`]
    ///
    /// # Errors
    ///
    /// `NotFound`, `Command`, or a poisoned lock
    pub fn datum_release(&self, id: DatumId) -> CoreResult<()> {
        self.lock()?.datum_release(id)
    }

    /// See [`Engine::rule_add`]
    ///
    /// # Errors
    ///
    /// `Command`, `NotFound`, `OutOfMemory`, or a poisoned lock
    pub fn rule_add(&self, spec: TransformSpec) -> CoreResult<TransformId> {
        self.lock()?.rule_add(spec)
    }

    /// See [`Engine::ready`]
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock is poisoned
    pub fn ready(&self, max: usize) -> CoreResult<Vec<TransformId>> {
        Ok(self.lock()?.ready(max))
    }

    /// See [`Engine::complete`]
    ///
    /// # Errors
    ///
    /// `NotFound`, `Command`, or a poisoned lock
    pub fn complete(&self, id: TransformId) -> CoreResult<Transform> {
        self.lock()?.complete(id)
    }

    /// Copy of a live transform
    ///
    /// # Errors
    ///
    /// `NotFound`, or a poisoned lock
    pub fn transform(&self, id: TransformId) -> CoreResult<Transform> {
        self.lock()?.transform(id).cloned()
    }

    /// See [`Engine::transform_state`]
    ///
    /// # Errors
    ///
    /// `NotFound`, or a poisoned lock
    pub fn transform_state(&self, id: TransformId) -> CoreResult<TransformState> {
        self.lock()?.transform_state(id)
    }

    /// See [`Engine::stats`]
    ///
    /// # Errors
    ///
    /// Returns an error only if the lock is poisoned
    pub fn stats(&self) -> CoreResult<EngineStats> {
        Ok(self.lock()?.stats())
    }

    /// See [`Engine::record_outputs`]
    ///
    /// The engine stays locked while the record is written.
    ///
    /// # Errors
    ///
    /// As [`Engine::record_outputs`], or a poisoned lock
    pub fn record_outputs<S: LogStorage>(
        &self,
        id: TransformId,
        outputs: Vec<Bytes>,
        xpt: &Checkpoint<S>,
        persistence: Persistence,
    ) -> CoreResult<Transform> {
        self.lock()?.record_outputs(id, outputs, xpt, persistence)
    }

    /// See [`Engine::restore`]
    ///
    /// # Errors
    ///
    /// As [`Engine::restore`], or a poisoned lock
    pub fn restore<S: LogStorage>(&self, id: TransformId, xpt: &Checkpoint<S>) -> CoreResult<bool> {
        self.lock()?.restore(id, xpt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleflow_core::ErrorKind;
    use std::collections::BTreeSet;

    #[test]
    fn test_shared_basic_flow() {
        let engine = SharedEngine::new();
        let a = engine.datum_create().unwrap();
        let t = engine.rule_add(TransformSpec::new("t").input(a)).unwrap();
        engine.datum_set(a, "x").unwrap();
        assert_eq!(engine.ready(4).unwrap(), vec![t]);
        assert_eq!(engine.transform(t).unwrap().name(), "t");
        engine.complete(t).unwrap();
        assert_eq!(engine.stats().unwrap().completed, 1);
    }

    #[test]
    fn test_shared_clones_see_same_engine() {
        let engine = SharedEngine::new();
        let other = engine.clone();
        let d = engine.datum_create().unwrap();
        other.datum_set(d, "v").unwrap();
        assert_eq!(engine.datum_state(d).unwrap(), DatumState::Set);
    }

    #[test]
    fn test_shared_with() {
        let engine = SharedEngine::new();
        let (a, t) = engine
            .with(|e| {
                let a = e.datum_create()?;
                let t = e.rule_add(TransformSpec::new("t").input(a))?;
                Ok((a, t))
            })
            .unwrap();
        engine.datum_set(a, "1").unwrap();
        assert_eq!(engine.transform_state(t).unwrap(), TransformState::Ready);
    }

    #[test]
    fn test_poisoned_lock_reports_unknown() {
        let engine = SharedEngine::new();
        let poisoner = engine.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the engine lock");
        })
        .join();

        let err = engine.datum_create().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_concurrent_setters_fire_each_rule_once() {
        let engine = SharedEngine::new();
        let inputs: Vec<DatumId> = (0..64).map(|_| engine.datum_create().unwrap()).collect();
        let mut join = TransformSpec::new("join");
        for d in &inputs {
            join = join.input(*d);
        }
        let join = engine.rule_add(join).unwrap();
        let singles: Vec<TransformId> = inputs
            .iter()
            .map(|d| engine.rule_add(TransformSpec::new("single").input(*d)).unwrap())
            .collect();

        std::thread::scope(|s| {
            for chunk in inputs.chunks(16) {
                let engine = engine.clone();
                s.spawn(move || {
                    for d in chunk {
                        engine.datum_set(*d, "v").unwrap();
                    }
                });
            }
        });

        let fired = engine.ready(usize::MAX).unwrap();
        let unique: BTreeSet<TransformId> = fired.iter().copied().collect();
        assert_eq!(fired.len(), unique.len());
        assert_eq!(fired.len(), singles.len() + 1);
        assert!(unique.contains(&join));
    }
}
