//! Target liveness check before any load is generated

use crate::error::TargetError;
use std::time::Duration;
use tracing::debug;

/// Bounded retry budget for the liveness check
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessConfig {
    /// Path of the identifying endpoint, relative to the base URL
    pub path: String,
    pub attempts: u32,
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            attempts: 30,
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
        }
    }
}

/// A target that answered its liveness endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct LiveTarget {
    /// Attempts used, including the successful one
    pub attempts: u32,
    /// `framework` field of the identifying payload, if present
    pub identity: Option<String>,
}

/// Poll `base_url` until it answers 2xx or the retry budget is spent
pub async fn wait_until_live(
    client: &reqwest::Client,
    base_url: &str,
    config: &LivenessConfig,
) -> Result<LiveTarget, TargetError> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), config.path);
    let attempts = config.attempts.max(1);
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=attempts {
        match client
            .get(&url)
            .timeout(config.request_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                let identity = response
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|body| body.get("framework").and_then(|f| f.as_str()).map(String::from));
                debug!(url = %url, attempt = attempt, identity = ?identity, "Target is live");
                return Ok(LiveTarget { attempts: attempt, identity });
            }
            Ok(response) => {
                last_error = format!("status {}", response.status());
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }

        debug!(url = %url, attempt = attempt, error = %last_error, "Liveness attempt failed");
        if attempt < attempts {
            tokio::time::sleep(config.interval).await;
        }
    }

    Err(TargetError::Unavailable {
        base_url: base_url.to_string(),
        attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(attempts: u32) -> LivenessConfig {
        LivenessConfig {
            attempts,
            interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_live_target_identity() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Actix-web API","framework":"actix-web","runtime":"rust"}"#)
            .create_async()
            .await;

        let live = wait_until_live(&reqwest::Client::new(), &server.url(), &quick(3))
            .await
            .unwrap();
        assert_eq!(live.attempts, 1);
        assert_eq!(live.identity.as_deref(), Some("actix-web"));
    }

    #[tokio::test]
    async fn test_exhausts_retry_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .with_status(503)
            .expect(4)
            .create_async()
            .await;

        let err = wait_until_live(&reqwest::Client::new(), &server.url(), &quick(4))
            .await
            .unwrap_err();
        let TargetError::Unavailable {
            attempts,
            last_error,
            ..
        } = err;
        assert_eq!(attempts, 4);
        assert!(last_error.contains("503"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = wait_until_live(
            &reqwest::Client::new(),
            &format!("http://127.0.0.1:{port}"),
            &quick(2),
        )
        .await;
        assert!(result.is_err());
    }
}
