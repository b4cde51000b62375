//! Timeout enforcement.
//!
//! # Responsibilities
//! - Carry one optional deadline per blocking operation
//! - Wrap client and backend I/O futures with that deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - `None` means wait forever
//! - An elapsed deadline becomes `io::ErrorKind::TimedOut`, so callers apply
//!   the same teardown they would for any other I/O failure

use std::future::Future;
use std::io;
use std::time::Duration;

use crate::config::TimeoutConfig;

/// Per-operation deadlines for a single dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub connect: Option<Duration>,
    pub backend_write: Option<Duration>,
    pub backend_read: Option<Duration>,
    pub client_read: Option<Duration>,
    pub client_write: Option<Duration>,
}

impl TimeoutPolicy {
    /// A policy with no deadlines at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Same deadline for every operation.
    pub fn uniform(limit: Duration) -> Self {
        Self {
            connect: Some(limit),
            backend_write: Some(limit),
            backend_read: Some(limit),
            client_read: Some(limit),
            client_write: Some(limit),
        }
    }
}

impl From<&TimeoutConfig> for TimeoutPolicy {
    fn from(config: &TimeoutConfig) -> Self {
        fn millis(value: Option<u64>) -> Option<Duration> {
            value.filter(|ms| *ms > 0).map(Duration::from_millis)
        }

        Self {
            connect: millis(config.connect_ms),
            backend_write: millis(config.backend_write_ms),
            backend_read: millis(config.backend_read_ms),
            client_read: millis(config.client_read_ms),
            client_write: millis(config.client_write_ms),
        }
    }
}

/// Run `fut` under an optional deadline.
pub async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        None => fut.await,
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("operation timed out after {:?}", limit),
            )),
        },
    }
}
