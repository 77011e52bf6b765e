//! Purpose: Per-caller state records keyed by caller identity.
//! Exports: `StateRegistry`, `CallerState`, `AttachOptions`.
//! Role: Scratch state the wrapped library looks up on every call (errno, version, context).
//! Invariants: At most one record per caller; records are created only by `attach`.
//! Invariants: `sweep_all` closes the registry; later attaches fail with `ErrorKind::State`.
//! Invariants: Every operation holds the single registry mutex for its full duration
//! and never calls another registry operation while holding it.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::caller::{CallerId, ContextToken};
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CallerState {
    pub caller_id: CallerId,
    pub last_error: i32,
    pub env_selector: i64,
    pub context: ContextToken,
    pub stack: ContextToken,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AttachOptions {
    pub context: ContextToken,
    pub stack: ContextToken,
    /// Replaces the registry-wide version preference when present.
    pub version_app: Option<i64>,
}

impl AttachOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: ContextToken) -> Self {
        self.context = context;
        self
    }

    pub fn with_stack(mut self, stack: ContextToken) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_version_app(mut self, version_app: i64) -> Self {
        self.version_app = Some(version_app);
        self
    }
}

#[derive(Debug)]
pub struct StateRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    states: HashMap<CallerId, CallerState>,
    version_app: i64,
    closed: bool,
}

impl StateRegistry {
    pub fn new(capacity: usize, version_app: i64) -> Result<Self, Error> {
        let mut states = HashMap::new();
        states.try_reserve(capacity).map_err(|err| {
            Error::new(ErrorKind::Allocation)
                .with_message(format!("registry storage for {capacity} callers"))
                .with_source(err)
        })?;
        Ok(Self {
            inner: Mutex::new(RegistryInner {
                states,
                version_app,
                closed: false,
            }),
        })
    }

    fn guard(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attach(&self, caller: CallerId, options: AttachOptions) -> Result<CallerState, Error> {
        let mut inner = self.guard();
        if inner.closed {
            return Err(Error::new(ErrorKind::State)
                .with_message("registry swept at unload")
                .with_caller(caller));
        }
        if inner.states.contains_key(&caller) {
            return Err(Error::new(ErrorKind::AlreadyAttached)
                .with_message("caller attached twice without detach")
                .with_caller(caller));
        }
        inner.states.try_reserve(1).map_err(|err| {
            Error::new(ErrorKind::Allocation)
                .with_message("caller state record")
                .with_caller(caller)
                .with_source(err)
        })?;
        if let Some(version_app) = options.version_app {
            inner.version_app = version_app;
        }
        let state = CallerState {
            caller_id: caller,
            last_error: 0,
            env_selector: inner.version_app,
            context: options.context,
            stack: options.stack,
        };
        inner.states.insert(caller, state);
        tracing::debug!(caller = caller.as_raw(), attached = inner.states.len(), "caller attached");
        Ok(state)
    }

    pub fn lookup(&self, caller: CallerId) -> Option<CallerState> {
        self.guard().states.get(&caller).copied()
    }

    /// Returns whether a record was removed.
    pub fn detach(&self, caller: CallerId) -> bool {
        let mut inner = self.guard();
        let removed = inner.states.remove(&caller).is_some();
        if removed {
            tracing::debug!(
                caller = caller.as_raw(),
                attached = inner.states.len(),
                "caller detached"
            );
        }
        removed
    }

    /// Runs `on_each` over every remaining record, then empties and closes the registry.
    /// `on_each` runs under the registry lock and must not reenter the registry.
    pub fn sweep_all<F>(&self, mut on_each: F) -> usize
    where
        F: FnMut(&CallerState),
    {
        let mut inner = self.guard();
        for state in inner.states.values() {
            on_each(state);
        }
        let swept = inner.states.len();
        inner.states.clear();
        inner.closed = true;
        swept
    }

    pub fn get_error(&self, caller: CallerId) -> Result<i32, Error> {
        self.guard()
            .states
            .get(&caller)
            .map(|state| state.last_error)
            .ok_or_else(|| not_attached(caller))
    }

    pub fn set_error(&self, caller: CallerId, code: i32) -> Result<(), Error> {
        let mut inner = self.guard();
        let state = inner
            .states
            .get_mut(&caller)
            .ok_or_else(|| not_attached(caller))?;
        state.last_error = code;
        Ok(())
    }

    pub fn contains(&self, caller: CallerId) -> bool {
        self.guard().states.contains_key(&caller)
    }

    pub fn len(&self) -> usize {
        self.guard().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted snapshot of attached callers.
    pub fn callers(&self) -> Vec<CallerId> {
        let mut callers: Vec<CallerId> = self.guard().states.keys().copied().collect();
        callers.sort_unstable();
        callers
    }

    pub fn version_app(&self) -> i64 {
        self.guard().version_app
    }

    pub fn is_closed(&self) -> bool {
        self.guard().closed
    }
}

fn not_attached(caller: CallerId) -> Error {
    Error::new(ErrorKind::NotAttached)
        .with_message("caller has no state; attach first")
        .with_caller(caller)
}
