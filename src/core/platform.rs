//! Purpose: Boundary to the platform resources the facility holds while Ready.
//! Exports: `Platform`, `SystemPlatform`, `PlatformResources`.
//! Role: External collaborator seam; load acquires, unload releases.
//! Invariants: `release` is infallible and called exactly once per successful `acquire`.
//! Invariants: A failed `acquire` leaves nothing to release.
use std::time::{Duration, Instant};

use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug)]
pub struct PlatformResources {
    clock_base: Instant,
    loaded_at: OffsetDateTime,
    utc_offset: UtcOffset,
}

impl PlatformResources {
    pub fn new(clock_base: Instant, loaded_at: OffsetDateTime, utc_offset: UtcOffset) -> Self {
        Self {
            clock_base,
            loaded_at,
            utc_offset,
        }
    }

    /// Time elapsed since the facility was loaded.
    pub fn clock(&self) -> Duration {
        self.clock_base.elapsed()
    }

    pub fn utc_offset(&self) -> UtcOffset {
        self.utc_offset
    }

    pub fn loaded_at(&self) -> OffsetDateTime {
        self.loaded_at
    }

    pub fn loaded_at_rfc3339(&self) -> Result<String, Error> {
        self.loaded_at.format(&Rfc3339).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("timestamp format failed")
                .with_source(err)
        })
    }
}

pub trait Platform: Send + Sync {
    fn acquire(&self) -> Result<PlatformResources, Error>;
    fn release(&self, resources: PlatformResources);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    fn acquire(&self) -> Result<PlatformResources, Error> {
        let clock_base = Instant::now();
        // Local offset lookup is refused by `time` once other threads exist.
        let utc_offset = UtcOffset::current_local_offset().unwrap_or_else(|err| {
            tracing::debug!(error = %err, "local utc offset unavailable; using utc");
            UtcOffset::UTC
        });
        let loaded_at = OffsetDateTime::now_utc().to_offset(utc_offset);
        Ok(PlatformResources::new(clock_base, loaded_at, utc_offset))
    }

    fn release(&self, resources: PlatformResources) {
        tracing::debug!(uptime_ms = resources.clock().as_millis() as u64, "platform released");
    }
}
