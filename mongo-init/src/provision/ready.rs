//! Wait for the server to accept commands before provisioning

use crate::provision::client::{AdminClient, ClientError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Ping until the server answers, returning the number of attempts made.
///
/// Only connectivity errors are retried. Anything else (bad credentials for
/// the bootstrap session, a broken shell) is returned immediately, as is the
/// last connectivity error once `timeout` has elapsed.
pub async fn wait_for_server<C>(client: &C, timeout: Duration, interval: Duration) -> Result<u32, ClientError>
where
    C: AdminClient + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match client.ping().await {
            Ok(()) => {
                info!(attempt, "Database server is ready");
                return Ok(attempt);
            }
            Err(ClientError::Unreachable(reason)) if Instant::now() + interval < deadline => {
                warn!(attempt, reason = %reason, "Database server not ready, retrying");
                sleep(interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}
