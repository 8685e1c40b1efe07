// src/core/store/reconnect.rs

//! The reconnection policy consumed by the RESP store adapter.

use crate::config::ReconnectConfig;
use crate::core::GeoCacheError;
use crate::core::metrics;
use rand::Rng;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::{debug, warn};

/// Whether an error is worth another connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The store may come back (refused, reset, timed out). Retry.
    Transient,
    /// Retrying cannot help (bad password, unknown database, protocol garbage).
    Fatal,
}

/// Exponential backoff with jitter, bounded both by attempt count and by the
/// total time spent sleeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_total_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_total_backoff: Duration::from_millis(cfg.max_total_backoff_ms),
        }
    }
}

impl ReconnectPolicy {
    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_total_backoff: Duration::ZERO,
        }
    }

    pub fn classify(err: &GeoCacheError) -> ErrorClass {
        match err {
            GeoCacheError::Io(e) => match e.kind() {
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::BrokenPipe
                | ErrorKind::TimedOut
                | ErrorKind::Interrupted
                | ErrorKind::UnexpectedEof
                | ErrorKind::AddrNotAvailable => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            GeoCacheError::Timeout => ErrorClass::Transient,
            // A server that is still loading its dataset answers with -LOADING.
            GeoCacheError::StoreReply(msg) if msg.starts_with("LOADING") => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }

    /// The un-jittered backoff before retry number `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Backoff with up to 50% subtractive jitter so restarting clients spread out.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        base.mul_f64(jitter)
    }

    /// Runs `op` until it succeeds, fails fatally, or the policy is exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, GeoCacheError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GeoCacheError>>,
    {
        let mut attempt = 0u32;
        let mut slept = Duration::ZERO;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if Self::classify(&err) == ErrorClass::Fatal {
                warn!("{what} failed with a non-retryable error: {err}");
                return Err(err);
            }
            if attempt >= self.max_attempts.max(1) {
                warn!("{what} failed after {attempt} attempt(s): {err}");
                return Err(err);
            }
            let delay = self.jittered_delay(attempt);
            if slept + delay > self.max_total_backoff {
                warn!("{what} exhausted its backoff budget of {:?}: {err}", self.max_total_backoff);
                return Err(err);
            }

            debug!("{what} attempt {attempt} failed ({err}); retrying in {delay:?}");
            metrics::STORE_RECONNECTS_TOTAL.inc();
            tokio::time::sleep(delay).await;
            slept += delay;
        }
    }
}
