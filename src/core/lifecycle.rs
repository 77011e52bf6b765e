//! Purpose: Load/unload state machine owning the registry, lock table, and platform resources.
//! Exports: `LifecycleController`, `LifecycleState`, `Facility`, `UnloadReport`.
//! Role: The only place a `Facility` is created or torn down.
//! Invariants: States advance Unloaded -> Initializing -> Ready -> Unloading -> Unloaded.
//! Invariants: A failed load rolls back to Unloaded and leaves no facility behind.
//! Invariants: Unload never fails; leftover callers are swept and their slots freed.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::caller::CallerId;
use crate::core::config::FacilityConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::lock_table::{LockProvider, LockTable, TeardownReport};
use crate::core::platform::{Platform, PlatformResources, SystemPlatform};
use crate::core::registry::{AttachOptions, CallerState, StateRegistry};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    Unloaded,
    Initializing,
    Ready,
    Unloading,
}

/// Everything a Ready library instance shares between its callers.
#[derive(Debug)]
pub struct Facility {
    config: FacilityConfig,
    registry: StateRegistry,
    locks: LockTable,
    platform: PlatformResources,
}

impl Facility {
    pub fn config(&self) -> &FacilityConfig {
        &self.config
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn platform(&self) -> &PlatformResources {
        &self.platform
    }

    /// Fails with `ErrorKind::State` once unload has swept the registry.
    pub fn attach(&self, caller: CallerId, options: AttachOptions) -> Result<CallerState, Error> {
        self.registry.attach(caller, options)
    }

    pub fn detach(&self, caller: CallerId) -> bool {
        self.registry.detach(caller)
    }

    pub fn lookup(&self, caller: CallerId) -> Option<CallerState> {
        self.registry.lookup(caller)
    }

    pub fn get_error(&self, caller: CallerId) -> Result<i32, Error> {
        self.registry.get_error(caller)
    }

    pub fn set_error(&self, caller: CallerId, code: i32) -> Result<(), Error> {
        self.registry.set_error(caller, code)
    }

    pub fn locking_callback(
        &self,
        mode: i32,
        resource: i32,
        caller: CallerId,
    ) -> Result<(), Error> {
        self.locks.callback(mode, resource, caller)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnloadReport {
    /// False when there was nothing loaded to unload.
    pub was_loaded: bool,
    /// Callers that never detached.
    pub swept: usize,
    /// Slots those callers still held.
    pub released_slots: usize,
    pub teardown: TeardownReport,
}

struct ControllerInner {
    state: LifecycleState,
    facility: Option<Arc<Facility>>,
    platform: Option<Arc<dyn Platform>>,
}

pub struct LifecycleController {
    inner: Mutex<ControllerInner>,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(ControllerInner {
                state: LifecycleState::Unloaded,
                facility: None,
                platform: None,
            }),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LifecycleState {
        self.guard().state
    }

    pub fn facility(&self) -> Option<Arc<Facility>> {
        self.guard().facility.clone()
    }

    pub fn load(&self, config: FacilityConfig) -> Result<Arc<Facility>, Error> {
        self.load_with(config, Arc::new(SystemPlatform))
    }

    pub fn load_with(
        &self,
        config: FacilityConfig,
        platform: Arc<dyn Platform>,
    ) -> Result<Arc<Facility>, Error> {
        let mut inner = self.guard();
        if inner.state != LifecycleState::Unloaded {
            return Err(Error::new(ErrorKind::State)
                .with_message(format!("load requested while {:?}", inner.state)));
        }
        transition(&mut inner, LifecycleState::Initializing);

        match build_facility(config, platform.as_ref()) {
            Ok(facility) => {
                let facility = Arc::new(facility);
                inner.facility = Some(Arc::clone(&facility));
                inner.platform = Some(platform);
                transition(&mut inner, LifecycleState::Ready);
                Ok(facility)
            }
            Err(err) => {
                tracing::error!(error = %err, "load failed; rolling back");
                transition(&mut inner, LifecycleState::Unloading);
                transition(&mut inner, LifecycleState::Unloaded);
                Err(err)
            }
        }
    }

    pub fn unload(&self) -> UnloadReport {
        let mut inner = self.guard();
        if inner.state != LifecycleState::Ready {
            return UnloadReport::default();
        }
        transition(&mut inner, LifecycleState::Unloading);

        let mut report = UnloadReport {
            was_loaded: true,
            ..UnloadReport::default()
        };
        if let Some(facility) = inner.facility.take() {
            let mut released_slots = 0;
            report.swept = facility.registry.sweep_all(|state| {
                released_slots += facility.locks.release_all_held_by(state.caller_id);
            });
            report.released_slots = released_slots;
            if report.swept > 0 {
                tracing::warn!(
                    swept = report.swept,
                    released_slots,
                    "reclaimed state from callers that never detached"
                );
            }
            report.teardown = facility.locks.teardown();
            if let Some(platform) = inner.platform.take() {
                platform.release(facility.platform.clone());
            }
        }

        transition(&mut inner, LifecycleState::Unloaded);
        report
    }
}

fn build_facility(config: FacilityConfig, platform: &dyn Platform) -> Result<Facility, Error> {
    config.validate()?;
    let locks = LockTable::new(config.lock_slots)?;
    let registry = StateRegistry::new(config.registry_capacity, config.version_app)?;
    let platform = platform.acquire().map_err(|err| {
        if err.kind() == ErrorKind::Platform {
            err
        } else {
            Error::new(ErrorKind::Platform)
                .with_message("platform resources unavailable")
                .with_source(err)
        }
    })?;
    Ok(Facility {
        config,
        registry,
        locks,
        platform,
    })
}

fn transition(inner: &mut ControllerInner, to: LifecycleState) {
    tracing::info!(from = ?inner.state, to = ?to, "lifecycle transition");
    inner.state = to;
}
