//! OAuth client-credentials token acquisition and caching (§4.5 step 2, I8).

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::Value;

use crate::clock::Clock;
use crate::constants::CONNECTOR_TOKEN_MIN_TTL_SECONDS;
use crate::error::{TelemetryError, TelemetryResult};

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Caches the vendor's bearer token, refreshing strictly before its cached
/// expiry minus a safety buffer (I8).
pub struct TokenCache {
    current: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self { current: Mutex::new(None) }
    }

    /// Drops the cached token, e.g. after a request comes back `401`.
    pub fn invalidate(&self) {
        *self.current.lock() = None;
    }

    /// Returns a cached token if it has more than `buffer` of life left,
    /// otherwise exchanges client credentials for a fresh one and caches it.
    pub async fn get_token(
        &self,
        client: &Client,
        login_base_url: &str,
        client_id: &str,
        client_secret: &str,
        timeout: Duration,
        buffer: Duration,
        clock: &dyn Clock,
    ) -> TelemetryResult<String> {
        let now = clock.now_utc();
        if let Some(cached) = self.current.lock().as_ref() {
            if now < cached.expires_at - chrono::Duration::from_std(buffer).unwrap_or_default() {
                return Ok(cached.access_token.clone());
            }
        }

        if client_id.is_empty() || client_secret.is_empty() {
            return Err(TelemetryError::AuthError("client_id/client_secret not configured".into()));
        }

        let credentials = BASE64.encode(format!("{client_id}:{client_secret}"));
        let url = format!("{login_base_url}/oauth/token");
        let response = client
            .post(&url)
            .timeout(timeout)
            .header("Authorization", format!("Basic {credentials}"))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TelemetryError::AuthError(format!(
                "oauth token request failed with status {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TelemetryError::AuthError("oauth response missing access_token".into()))?
            .to_string();
        let expires_in = body.get("expires_in").and_then(Value::as_u64).unwrap_or(3600);
        let ttl = expires_in.max(CONNECTOR_TOKEN_MIN_TTL_SECONDS);
        let expires_at = now + chrono::Duration::seconds(ttl as i64);

        *self.current.lock() = Some(CachedToken { access_token: access_token.clone(), expires_at });
        log::info!("connector oauth token refreshed, expires_in={expires_in}s");
        Ok(access_token)
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_and_caches_a_fresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-1", "expires_in": 3600})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = TokenCache::new();
        let client = Client::new();
        let clock = FixedClock::new(1_700_000_000_000);

        let token = cache
            .get_token(&client, &server.uri(), "id", "secret", Duration::from_secs(5), Duration::from_secs(30), &clock)
            .await
            .unwrap();
        assert_eq!(token, "tok-1");

        // Second call within TTL must not hit the server again (mock expects exactly 1 call).
        let token2 = cache
            .get_token(&client, &server.uri(), "id", "secret", Duration::from_secs(5), Duration::from_secs(30), &clock)
            .await
            .unwrap();
        assert_eq!(token2, "tok-1");
    }

    #[tokio::test]
    async fn refreshes_once_within_the_expiry_buffer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-a", "expires_in": 60})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-b", "expires_in": 60})))
            .mount(&server)
            .await;

        let cache = TokenCache::new();
        let client = Client::new();
        let clock = FixedClock::new(1_700_000_000_000);
        let first = cache
            .get_token(&client, &server.uri(), "id", "secret", Duration::from_secs(5), Duration::from_secs(30), &clock)
            .await
            .unwrap();
        assert_eq!(first, "tok-a");

        clock.advance(Duration::from_secs(45));
        let second = cache
            .get_token(&client, &server.uri(), "id", "secret", Duration::from_secs(5), Duration::from_secs(30), &clock)
            .await
            .unwrap();
        assert_eq!(second, "tok-b");
    }

    #[tokio::test]
    async fn invalidate_forces_a_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-x", "expires_in": 3600})))
            .mount(&server)
            .await;

        let cache = TokenCache::new();
        let client = Client::new();
        let clock = FixedClock::new(1_700_000_000_000);
        let _ = cache
            .get_token(&client, &server.uri(), "id", "secret", Duration::from_secs(5), Duration::from_secs(30), &clock)
            .await
            .unwrap();
        cache.invalidate();
        assert!(cache.current.lock().is_none());
    }
}
