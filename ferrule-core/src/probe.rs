//! Bootstrap connectivity probe.
//!
//! Before any client handle is created the consumer and producer check that
//! at least one configured bootstrap address accepts a TCP connection. This
//! turns a misconfigured address list into an immediate error instead of a
//! client that retries forever in the background.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Succeed as soon as one address accepts a TCP connection within `limit`.
///
/// An empty address list succeeds without probing. Each address gets its own
/// `limit`; addresses are tried in order.
pub async fn probe(addresses: &[String], limit: Duration) -> Result<()> {
    if addresses.is_empty() {
        return Ok(());
    }

    let mut last_failure = String::new();
    for address in addresses {
        match timeout(limit, TcpStream::connect(address.as_str())).await {
            Ok(Ok(_stream)) => {
                debug!(address = %address, "bootstrap address reachable");
                return Ok(());
            }
            Ok(Err(err)) => {
                warn!(address = %address, error = %err, "bootstrap address unreachable");
                last_failure = err.to_string();
            }
            Err(_) => {
                warn!(address = %address, timeout_ms = limit.as_millis() as u64, "bootstrap probe timed out");
                last_failure = format!("timed out after {limit:?}");
            }
        }
    }

    Err(Error::Connectivity {
        addresses: addresses.join(","),
        message: last_failure,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        addr.to_string()
    }

    #[tokio::test]
    async fn test_empty_list_succeeds() {
        assert!(probe(&[], Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_any_reachable_address_is_enough() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let live = listener.local_addr().expect("local addr").to_string();
        let dead = closed_port().await;

        probe(&[dead, live], Duration::from_secs(1))
            .await
            .expect("one address is reachable");
    }

    #[tokio::test]
    async fn test_all_unreachable_is_connectivity_error() {
        let dead = closed_port().await;
        let err = probe(&[dead.clone()], Duration::from_secs(1))
            .await
            .expect_err("nothing listens");
        match err {
            Error::Connectivity { addresses, .. } => assert_eq!(addresses, dead),
            other => panic!("unexpected error: {other}"),
        }
    }
}
