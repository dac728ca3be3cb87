//! One cancellable unit of work with a typed outcome.
//!
//! Each `run` opens a cancellation scope that lives until the run finishes (or
//! its future is dropped). Exactly one `Outcome` is produced per run, and the
//! scope is disposed afterwards in every case.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use engine_logging::{engine_debug, engine_error};
use futures_util::{FutureExt, Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::types::OperationStatus;

#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Cancelled,
    Failed(EngineError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn status(&self) -> OperationStatus {
        match self {
            Outcome::Success(_) => OperationStatus::Success,
            Outcome::Cancelled => OperationStatus::Cancelled,
            Outcome::Failed(_) => OperationStatus::Error,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::Failed(err) => Outcome::Failed(err),
        }
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("operation is already running")]
    AlreadyRunning,
}

#[derive(Debug, Default)]
struct ScopeState {
    token: Option<CancellationToken>,
    active: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CancellableOperation {
    scope: Arc<Mutex<ScopeState>>,
}

impl CancellableOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.lock().active > 0
    }

    /// Run a single-result unit of work.
    ///
    /// Fails with `StartError::AlreadyRunning` if a scope of this instance is
    /// still active.
    pub async fn run<F, Fut, T>(&self, factory: F) -> Result<Outcome<T>, StartError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let scope = self.try_enter()?;
        let token = scope.token.clone();
        let work = {
            let token = token.clone();
            async move { factory(token).await }
        };
        let result = AssertUnwindSafe(work).catch_unwind().await;
        Ok(settle(result, &token))
    }

    /// Run a multi-item unit of work, handing each item to `on_item`.
    ///
    /// Re-entry is allowed: concurrent runs share the scope, and `cancel`
    /// stops all of them. Cancellation is observed between items. On success
    /// the number of delivered items is returned.
    pub async fn run_each<F, S, T, G>(&self, factory: F, mut on_item: G) -> Outcome<usize>
    where
        F: FnOnce(CancellationToken) -> S,
        S: Stream<Item = Result<T, EngineError>>,
        G: FnMut(T),
    {
        let scope = self.enter_shared();
        let token = scope.token.clone();
        let work = {
            let token = token.clone();
            async move {
                let stream = factory(token.clone());
                futures_util::pin_mut!(stream);
                let mut delivered = 0usize;
                while let Some(item) = stream.next().await {
                    if token.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    on_item(item?);
                    delivered += 1;
                }
                Ok(delivered)
            }
        };
        let result = AssertUnwindSafe(work).catch_unwind().await;
        settle(result, &token)
    }

    /// Request cancellation of the active scope.
    ///
    /// Returns `false` when nothing is running or cancellation was already requested.
    pub fn cancel(&self) -> bool {
        let state = self.lock();
        match &state.token {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                engine_debug!("cancellation requested for {} active scope(s)", state.active);
                true
            }
            _ => false,
        }
    }

    fn try_enter(&self) -> Result<ScopeGuard, StartError> {
        let mut state = self.lock();
        if state.active > 0 {
            return Err(StartError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        state.token = Some(token.clone());
        state.active = 1;
        Ok(ScopeGuard {
            scope: self.scope.clone(),
            token,
        })
    }

    fn enter_shared(&self) -> ScopeGuard {
        let mut state = self.lock();
        let token = match &state.token {
            Some(token) if !token.is_cancelled() => token.clone(),
            _ => {
                let token = CancellationToken::new();
                state.token = Some(token.clone());
                token
            }
        };
        state.active += 1;
        ScopeGuard {
            scope: self.scope.clone(),
            token,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.scope.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Disposes the scope when the run ends or its future is dropped.
struct ScopeGuard {
    scope: Arc<Mutex<ScopeState>>,
    token: CancellationToken,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let mut state = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            state.token = None;
        }
    }
}

/// Phase-boundary checkpoint.
pub(crate) fn ensure_not_cancelled(token: &CancellationToken) -> Result<(), EngineError> {
    if token.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

fn settle<T>(
    result: Result<Result<T, EngineError>, Box<dyn Any + Send>>,
    token: &CancellationToken,
) -> Outcome<T> {
    match result {
        Ok(Ok(value)) => Outcome::Success(value),
        Ok(Err(err)) if err.is_cancelled() || token.is_cancelled() => Outcome::Cancelled,
        Ok(Err(err)) => Outcome::Failed(err),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            engine_error!("operation panicked: {}", message);
            Outcome::Failed(EngineError::Panicked(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
