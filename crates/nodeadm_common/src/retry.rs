//! Deadline-bounded retries with a fixed backoff.
//!
//! Package managers racing first-boot provisioning, agent registration and
//! daemon jobs all fail transiently. Callers pass the flow deadline; when the
//! next attempt would land past it, the last error is returned wrapped with the
//! attempt count.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn, Span};

/// Backoff between package-manager and registration attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Run `operation` until it succeeds or `deadline` would be exceeded.
///
/// Checksum errors are returned immediately.
pub async fn retry_until_deadline<F, Fut, T>(
    operation_name: &str,
    backoff: Duration,
    deadline: Instant,
    log: &Span,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_checksum() => return Err(e),
            Err(e) => {
                if Instant::now() + backoff > deadline {
                    error!(
                        parent: log,
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Deadline reached, giving up"
                    );
                    return Err(Error::RetriesExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }

                warn!(
                    parent: log,
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = backoff.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
