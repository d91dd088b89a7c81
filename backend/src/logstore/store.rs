use chrono::Utc;
use shared::{LogStoreHealth, StorageBackend, VisionLogRecord};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::models::VisionLogInput;
use super::{LogBackend, StoreError};

pub const NO_BACKEND_AVAILABLE: &str = "No backend available for VisionLog";

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub ok: bool,
    pub backend: Option<StorageBackend>,
    pub error: Option<String>,
}

impl SaveOutcome {
    fn stored(backend: StorageBackend) -> Self {
        Self {
            ok: true,
            backend: Some(backend),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            backend: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Default)]
struct Counters {
    primary_writes: AtomicU64,
    secondary_writes: AtomicU64,
    primary_fallbacks: AtomicU64,
    failed_writes: AtomicU64,
}

/// Append-only sink for vision logs. Tries the primary backend first and
/// falls back to the secondary; records are never copied between them.
pub struct VisionLogStore {
    primary: Option<Arc<dyn LogBackend>>,
    secondary: Option<Arc<dyn LogBackend>>,
    write_timeout: Duration,
    counters: Counters,
}

impl VisionLogStore {
    pub fn new(
        primary: Option<Arc<dyn LogBackend>>,
        secondary: Option<Arc<dyn LogBackend>>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            write_timeout,
            counters: Counters::default(),
        }
    }

    /// Never returns an error; failures are reported in the outcome.
    pub async fn save(&self, input: VisionLogInput) -> SaveOutcome {
        let record = input.into_record(Utc::now());
        let mut last_error = None;

        if let Some(primary) = &self.primary {
            match self.attempt(primary.as_ref(), &record).await {
                Ok(()) => {
                    self.counters.primary_writes.fetch_add(1, Ordering::Relaxed);
                    return SaveOutcome::stored(StorageBackend::Primary);
                }
                Err(e) => {
                    log::warn!(
                        "Primary log backend ({}) failed, falling back: {}",
                        primary.name(),
                        e
                    );
                    self.counters
                        .primary_fallbacks
                        .fetch_add(1, Ordering::Relaxed);
                    last_error = Some(e.to_string());
                }
            }
        }

        if let Some(secondary) = &self.secondary {
            match self.attempt(secondary.as_ref(), &record).await {
                Ok(()) => {
                    self.counters
                        .secondary_writes
                        .fetch_add(1, Ordering::Relaxed);
                    return SaveOutcome::stored(StorageBackend::Secondary);
                }
                Err(e) => {
                    log::warn!("Secondary log backend ({}) failed: {}", secondary.name(), e);
                    last_error = Some(e.to_string());
                }
            }
        }

        self.counters.failed_writes.fetch_add(1, Ordering::Relaxed);
        SaveOutcome::failed(last_error.unwrap_or_else(|| NO_BACKEND_AVAILABLE.to_string()))
    }

    async fn attempt(
        &self,
        backend: &dyn LogBackend,
        record: &VisionLogRecord,
    ) -> Result<(), StoreError> {
        tokio::time::timeout(self.write_timeout, backend.append(record))
            .await
            .map_err(|_| StoreError::Timeout(self.write_timeout))?
    }

    pub fn health(&self) -> LogStoreHealth {
        LogStoreHealth {
            primary_enabled: self.primary.is_some(),
            secondary_enabled: self.secondary.is_some(),
            primary_writes: self.counters.primary_writes.load(Ordering::Relaxed),
            secondary_writes: self.counters.secondary_writes.load(Ordering::Relaxed),
            primary_fallbacks: self.counters.primary_fallbacks.load(Ordering::Relaxed),
            failed_writes: self.counters.failed_writes.load(Ordering::Relaxed),
        }
    }
}
