//! Backend readiness probing
//!
//! The backend loads its models in the background after startup. Interaction
//! is gated on [`ApiStatus::Ready`]; while models are loading the poller
//! re-probes on a fixed interval, one probe at a time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::client::{InferenceBackend, StatusReport};
use crate::{Error, Result};

/// Backend readiness as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiStatus {
    /// A probe is in flight
    #[default]
    Checking,
    /// Backend reachable, models still loading
    Loading,
    /// Backend ready for exchanges
    Ready,
    /// Backend unreachable
    Error,
}

impl ApiStatus {
    /// Map a probe result to a status
    #[must_use]
    pub fn from_report(report: &StatusReport) -> Self {
        if report.models_loaded == Some(true) {
            Self::Ready
        } else {
            Self::Loading
        }
    }

    /// Whether polling stops at this status until an explicit retry
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Checking => "checking",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Polls backend readiness
pub struct StatusPoller {
    backend: Arc<dyn InferenceBackend>,
    interval: Duration,
    /// Held for the whole of a poll so overlapping callers queue up
    polling: Mutex<()>,
}

impl StatusPoller {
    /// Create a poller probing every `interval` while models load
    #[must_use]
    pub fn new(backend: Arc<dyn InferenceBackend>, interval: Duration) -> Self {
        Self {
            backend,
            interval,
            polling: Mutex::new(()),
        }
    }

    /// Interval between probes while loading
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Single probe, keeping the failure detail
    ///
    /// # Errors
    ///
    /// Returns [`Error::StatusCheck`] if the backend cannot be reached
    pub async fn probe(&self) -> Result<ApiStatus> {
        let report = self.backend.status().await.map_err(Error::StatusCheck)?;
        let status = ApiStatus::from_report(&report);
        tracing::debug!(
            %status,
            backend_status = report.status.as_deref().unwrap_or("unknown"),
            "status probe"
        );
        Ok(status)
    }

    /// Single probe; transport failures map to [`ApiStatus::Error`]
    pub async fn check_status(&self) -> ApiStatus {
        match self.probe().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, "backend status check failed");
                ApiStatus::Error
            }
        }
    }

    /// Probe until the status settles on ready or error
    ///
    /// `observe` sees every status in order, starting with
    /// [`ApiStatus::Checking`]. Calling this again after an error is the retry
    /// path. Each tick decides only from the status it just observed.
    ///
    /// Polls never overlap: a second caller waits for the running poll to
    /// settle and then starts its own from [`ApiStatus::Checking`].
    pub async fn poll(&self, mut observe: impl FnMut(ApiStatus)) -> ApiStatus {
        let _polling = self.polling.lock().await;
        observe(ApiStatus::Checking);

        loop {
            let status = self.check_status().await;
            observe(status);

            if status.is_settled() {
                tracing::info!(%status, "backend status settled");
                return status;
            }

            tracing::debug!(interval = ?self.interval, "models still loading, waiting");
            tokio::time::sleep(self.interval).await;
        }
    }
}

impl fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusPoller")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
