//! Purpose: Load-time configuration for the facility.
//! Exports: `FacilityConfig`, `DEFAULT_LOCK_SLOTS`, env var names.
//! Role: Read once by the loader; never consulted after the facility is Ready.
//! Invariants: Unknown JSON fields are rejected; missing fields take defaults.
//! Invariants: Environment overrides apply on top of file or default values.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

/// Slot count matching the classic `CRYPTO_NUM_LOCKS`.
pub const DEFAULT_LOCK_SLOTS: usize = 41;
pub const DEFAULT_REGISTRY_CAPACITY: usize = 7;

pub const ENV_LOCK_SLOTS: &str = "CRYPTOSHARE_LOCK_SLOTS";
pub const ENV_REGISTRY_CAPACITY: &str = "CRYPTOSHARE_REGISTRY_CAPACITY";
pub const ENV_VERSION_APP: &str = "CRYPTOSHARE_VERSION_APP";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FacilityConfig {
    pub lock_slots: usize,
    pub registry_capacity: usize,
    /// Initial protocol-version preference; 0 means "no preference".
    pub version_app: i64,
}

impl Default for FacilityConfig {
    fn default() -> Self {
        Self {
            lock_slots: DEFAULT_LOCK_SLOTS,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            version_app: 0,
        }
    }
}

impl FacilityConfig {
    pub fn with_lock_slots(mut self, lock_slots: usize) -> Self {
        self.lock_slots = lock_slots;
        self
    }

    pub fn with_registry_capacity(mut self, registry_capacity: usize) -> Self {
        self.registry_capacity = registry_capacity;
        self
    }

    pub fn with_version_app(mut self, version_app: i64) -> Self {
        self.version_app = version_app;
        self
    }

    pub fn from_json_str(input: &str) -> Result<Self, Error> {
        serde_json::from_str(input).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid facility config json")
                .with_source(err)
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to read config {}", path.display()))
                .with_source(err)
        })?;
        Self::from_json_str(&text)
    }

    /// Defaults plus overrides from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_LOCK_SLOTS) {
            self.lock_slots = parse_env(ENV_LOCK_SLOTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REGISTRY_CAPACITY) {
            self.registry_capacity = parse_env(ENV_REGISTRY_CAPACITY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_VERSION_APP) {
            self.version_app = parse_env(ENV_VERSION_APP, &raw)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.lock_slots == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("lock_slots must be at least 1"));
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T, Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim().parse::<T>().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid {name}: {raw:?}"))
            .with_source(err)
    })
}
