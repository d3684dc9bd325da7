//! POSTs forwarded audio chunks and events to their configured sinks (§4.4),
//! retrying transient failures with AudioHook's own exponential backoff -
//! deliberately distinct from the vendor connector's linear policy (§9).

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::retry::{cancellable_sleep, exponential_backoff, is_retryable_status};

/// Outcome of one forwarding attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Sent,
    GaveUp,
    /// No sink URL is configured; forwarding is a deliberate no-op.
    Disabled,
}

/// POSTs `body` to `url` (if set), retrying retryable failures with
/// exponential backoff until `retry_max_attempts` is exhausted or `stop` is
/// cancelled mid-sleep.
pub async fn forward_with_retry(
    client: &Client,
    url: Option<&Url>,
    ingest_token: &str,
    body: &Value,
    retry_max_attempts: u32,
    retry_backoff_seconds: f64,
    timeout_seconds: u64,
    stop: &CancellationToken,
) -> ForwardOutcome {
    let Some(url) = url else {
        return ForwardOutcome::Disabled;
    };

    let attempts = retry_max_attempts.max(1);
    for attempt in 1..=attempts {
        let mut request = client
            .post(url.clone())
            .timeout(Duration::from_secs(timeout_seconds))
            .json(body);
        if !ingest_token.is_empty() {
            request = request.header("X-Cloud-Token", ingest_token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => return ForwardOutcome::Sent,
            Ok(response) => {
                let status = response.status().as_u16();
                if !is_retryable_status(status) || attempt == attempts {
                    log::warn!("audiohook forward to {url} failed with status {status} (attempt {attempt}/{attempts})");
                    return ForwardOutcome::GaveUp;
                }
            }
            Err(err) => {
                if attempt == attempts {
                    log::warn!("audiohook forward to {url} failed: {err} (attempt {attempt}/{attempts})");
                    return ForwardOutcome::GaveUp;
                }
            }
        }

        let delay = exponential_backoff(retry_backoff_seconds, attempt);
        if !cancellable_sleep(delay, stop).await {
            return ForwardOutcome::GaveUp;
        }
    }

    ForwardOutcome::GaveUp
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn disabled_when_no_url_is_configured() {
        let client = Client::new();
        let stop = CancellationToken::new();
        let outcome = forward_with_retry(&client, None, "", &json!({}), 3, 0.01, 5, &stop).await;
        assert_eq!(outcome, ForwardOutcome::Disabled);
    }

    #[tokio::test]
    async fn sends_successfully_on_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio"))
            .and(header("X-Cloud-Token", "secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let url = Url::parse(&format!("{}/audio", server.uri())).unwrap();
        let stop = CancellationToken::new();
        let outcome = forward_with_retry(&client, Some(&url), "secret", &json!({"ok": true}), 3, 0.01, 5, &stop).await;
        assert_eq!(outcome, ForwardOutcome::Sent);
    }

    #[tokio::test]
    async fn retries_retryable_status_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/audio"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = Url::parse(&format!("{}/audio", server.uri())).unwrap();
        let stop = CancellationToken::new();
        let outcome = forward_with_retry(&client, Some(&url), "", &json!({}), 3, 0.01, 5, &stop).await;
        assert_eq!(outcome, ForwardOutcome::Sent);
    }

    #[tokio::test]
    async fn gives_up_immediately_on_non_retryable_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let url = Url::parse(&format!("{}/audio", server.uri())).unwrap();
        let stop = CancellationToken::new();
        let outcome = forward_with_retry(&client, Some(&url), "", &json!({}), 5, 0.01, 5, &stop).await;
        assert_eq!(outcome, ForwardOutcome::GaveUp);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_retryable_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = Url::parse(&format!("{}/audio", server.uri())).unwrap();
        let stop = CancellationToken::new();
        let outcome = forward_with_retry(&client, Some(&url), "", &json!({}), 2, 0.01, 5, &stop).await;
        assert_eq!(outcome, ForwardOutcome::GaveUp);
    }
}
