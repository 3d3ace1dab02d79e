//! Timeout helpers
//!
//! Every suspension point in the pipeline is bounded:
//! - provider calls use the provider's own timeout and fail with
//!   `ProviderErrorKind::Timeout` so the orchestrator can fall back
//! - capture and task-list calls use [`TimeoutConfig`] and fail with
//!   `TidyError::Timeout`

use std::future::Future;
use std::time::Duration;

use crate::constants::network as net_constants;
use crate::types::{ProviderError, Result, TidyError};

/// Timeouts for collaborator calls around the provider call
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub capture: Duration,
    pub task_list: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            capture: Duration::from_secs(net_constants::CAPTURE_TIMEOUT_SECS),
            task_list: Duration::from_secs(10),
        }
    }
}

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(TidyError::timeout(operation_name, timeout)),
    }
}

/// Execute a provider call with the provider's timeout
pub async fn with_provider_timeout<T, F>(
    provider: &str,
    timeout: Duration,
    future: F,
) -> std::result::Result<T, ProviderError>
where
    F: Future<Output = std::result::Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(|e| {
            if e.provider.is_none() {
                e.provider(provider)
            } else {
                e
            }
        }),
        Err(_) => Err(ProviderError::timeout(provider, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderErrorKind;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(
            Duration::from_secs(1),
            async { Ok::<_, TidyError>(42) },
            "quick operation",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            "slow capture",
        )
        .await;
        match result {
            Err(TidyError::Timeout { operation, .. }) => assert_eq!(operation, "slow capture"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_timeout_kind() {
        let result: std::result::Result<(), ProviderError> =
            with_provider_timeout("slowpoke", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Timeout);
        assert_eq!(err.provider.as_deref(), Some("slowpoke"));
    }

    #[tokio::test]
    async fn test_provider_error_gets_provider_name() {
        let result: std::result::Result<(), ProviderError> =
            with_provider_timeout("openai", Duration::from_secs(1), async {
                Err(ProviderError::new(ProviderErrorKind::Auth, "bad key"))
            })
            .await;
        assert_eq!(result.unwrap_err().provider.as_deref(), Some("openai"));
    }
}
