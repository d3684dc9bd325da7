//! REST calls against the vendor API: OAuth-authenticated requests with the
//! connector's linear retry policy (§4.5 HTTP retry policy), channel
//! creation, topic subscription, and paginated queue/user discovery.

use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::connector::auth::TokenCache;
use crate::connector::config::ConnectorConfig;
use crate::clock::Clock;
use crate::constants::{CONNECTOR_DISCOVERY_MAX_PAGES, CONNECTOR_DISCOVERY_PAGE_SIZE, CONNECTOR_TOKEN_EXPIRY_BUFFER_SECONDS};
use crate::error::{TelemetryError, TelemetryResult};
use crate::retry::{cancellable_sleep, is_retryable_status, linear_backoff};

/// Performs one authenticated REST call against the vendor API, retrying
/// retryable statuses and network errors with linear backoff, and
/// invalidating the cached token on a `401` before the next attempt.
pub async fn authenticated_request(
    client: &Client,
    config: &ConnectorConfig,
    tokens: &TokenCache,
    clock: &dyn Clock,
    stop: &CancellationToken,
    method: Method,
    url: &str,
    query: Option<&[(&str, String)]>,
    json_body: Option<&Value>,
) -> TelemetryResult<Value> {
    let attempts = config.retry_max_attempts.max(1);
    let timeout = Duration::from_secs(config.http_timeout_seconds);

    for attempt in 1..=attempts {
        let token = tokens
            .get_token(
                client,
                &config.normalized_login_base(),
                &config.client_id,
                &config.client_secret,
                timeout,
                Duration::from_secs(CONNECTOR_TOKEN_EXPIRY_BUFFER_SECONDS),
                clock,
            )
            .await?;

        let mut request = client.request(method.clone(), url).timeout(timeout).bearer_auth(&token);
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = json_body {
            request = request.json(body);
        }

        let result = request.send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                return response.json().await.map_err(TelemetryError::from);
            }
            Ok(response) => {
                let status = response.status().as_u16();
                if status == 401 {
                    tokens.invalidate();
                }
                if !is_retryable_status(status) || attempt == attempts {
                    let body = response.text().await.unwrap_or_default();
                    return Err(TelemetryError::UpstreamFatal(format!(
                        "{method} {url} failed with status {status}: {}",
                        response_snippet(&body)
                    )));
                }
            }
            Err(err) => {
                if attempt == attempts {
                    return Err(TelemetryError::from(err));
                }
            }
        }

        let delay = linear_backoff(config.retry_backoff_seconds, attempt);
        if !cancellable_sleep(delay, stop).await {
            return Err(TelemetryError::UpstreamTransient("connector stopped during retry backoff".into()));
        }
    }

    Err(TelemetryError::UpstreamFatal(format!("{method} {url} exhausted retry attempts")))
}

fn response_snippet(body: &str) -> String {
    let compact: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.len() <= 240 {
        compact
    } else {
        format!("{}...", &compact[..237])
    }
}

/// Creates a notification channel, returning its raw JSON (`id`, `connectUri`).
pub async fn create_notification_channel(
    client: &Client,
    config: &ConnectorConfig,
    tokens: &TokenCache,
    clock: &dyn Clock,
    stop: &CancellationToken,
) -> TelemetryResult<Value> {
    let url = format!("{}/api/v2/notifications/channels", config.normalized_api_base());
    authenticated_request(client, config, tokens, clock, stop, Method::POST, &url, None, Some(&Value::Object(Default::default()))).await
}

/// Subscribes `channel_id` to every topic in `topics`.
pub async fn subscribe_topics(
    client: &Client,
    config: &ConnectorConfig,
    tokens: &TokenCache,
    clock: &dyn Clock,
    stop: &CancellationToken,
    channel_id: &str,
    topics: &[String],
) -> TelemetryResult<()> {
    let url = format!(
        "{}/api/v2/notifications/channels/{channel_id}/subscriptions",
        config.normalized_api_base()
    );
    let body: Value = topics.iter().map(|topic| serde_json::json!({"id": topic})).collect();
    authenticated_request(client, config, tokens, clock, stop, Method::POST, &url, None, Some(&body)).await?;
    Ok(())
}

/// One paginated discovery entity: `(id, name, email)`. `email` is empty for queues.
pub struct DiscoveredEntity {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Paginates `path` (e.g. `/api/v2/routing/queues`), collecting entities from
/// each page's `entities` array until `max_items` is reached, the page is
/// short, `pageCount` is exhausted, or the hard page cap is hit.
pub async fn paginate_entities(
    client: &Client,
    config: &ConnectorConfig,
    tokens: &TokenCache,
    clock: &dyn Clock,
    stop: &CancellationToken,
    path: &str,
    extra_query: &[(&str, String)],
    max_items: usize,
) -> TelemetryResult<Vec<DiscoveredEntity>> {
    if max_items == 0 {
        return Ok(Vec::new());
    }

    let url = format!("{}{path}", config.normalized_api_base());
    let mut discovered = Vec::new();
    let mut page_number: u32 = 1;

    loop {
        let page_size_str = CONNECTOR_DISCOVERY_PAGE_SIZE.to_string();
        let page_number_str = page_number.to_string();
        let mut query: Vec<(&str, String)> = vec![("pageSize", page_size_str), ("pageNumber", page_number_str)];
        query.extend_from_slice(extra_query);

        let payload = authenticated_request(client, config, tokens, clock, stop, Method::GET, &url, Some(&query), None).await?;
        let entities = payload.get("entities").and_then(Value::as_array).cloned().unwrap_or_default();
        if entities.is_empty() {
            break;
        }

        for entity in &entities {
            let id = entity.get("id").and_then(Value::as_str).unwrap_or("").trim().to_string();
            let name = entity.get("name").and_then(Value::as_str).unwrap_or("").trim().to_string();
            let email = entity.get("email").and_then(Value::as_str).unwrap_or("").trim().to_lowercase();
            if id.is_empty() {
                continue;
            }
            discovered.push(DiscoveredEntity { id, name, email });
            if discovered.len() >= max_items {
                return Ok(discovered);
            }
        }

        let page_count = payload.get("pageCount").and_then(Value::as_u64);
        if let Some(page_count) = page_count {
            if page_number as u64 >= page_count {
                break;
            }
        }
        if entities.len() < CONNECTOR_DISCOVERY_PAGE_SIZE as usize {
            break;
        }
        page_number += 1;
        if page_number > CONNECTOR_DISCOVERY_MAX_PAGES {
            break;
        }
    }

    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_base: &str, login_base: &str) -> ConnectorConfig {
        ConnectorConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            login_base_url: login_base.to_string(),
            api_base_url: api_base.to_string(),
            retry_max_attempts: 3,
            retry_backoff_seconds: 0.01,
            ..ConnectorConfig::default()
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok", "expires_in": 3600})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn creates_channel_with_bearer_auth() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/notifications/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "chan-1", "connectUri": "wss://example/ws"})))
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), &server.uri());
        let client = Client::new();
        let tokens = TokenCache::new();
        let clock = FixedClock::new(1_700_000_000_000);
        let stop = CancellationToken::new();

        let channel = create_notification_channel(&client, &config, &tokens, &clock, &stop).await.unwrap();
        assert_eq!(channel.get("id").and_then(Value::as_str), Some("chan-1"));
    }

    #[tokio::test]
    async fn retries_on_401_after_invalidating_token() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/notifications/channels"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/notifications/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "chan-2", "connectUri": "wss://x"})))
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), &server.uri());
        let client = Client::new();
        let tokens = TokenCache::new();
        let clock = FixedClock::new(1_700_000_000_000);
        let stop = CancellationToken::new();

        let channel = create_notification_channel(&client, &config, &tokens, &clock, &stop).await.unwrap();
        assert_eq!(channel.get("id").and_then(Value::as_str), Some("chan-2"));
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/routing/queues"))
            .and(query_param("pageNumber", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entities": [{"id": "q1", "name": "Sales"}, {"id": "q2", "name": "Support"}],
                "pageCount": 2,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/routing/queues"))
            .and(query_param("pageNumber", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entities": [], "pageCount": 2})))
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), &server.uri());
        let client = Client::new();
        let tokens = TokenCache::new();
        let clock = FixedClock::new(1_700_000_000_000);
        let stop = CancellationToken::new();

        let found = paginate_entities(&client, &config, &tokens, &clock, &stop, "/api/v2/routing/queues", &[], 25)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn stops_discovery_once_max_items_reached() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v2/routing/queues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entities": [{"id": "q1", "name": "A"}, {"id": "q2", "name": "B"}, {"id": "q3", "name": "C"}],
            })))
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), &server.uri());
        let client = Client::new();
        let tokens = TokenCache::new();
        let clock = FixedClock::new(1_700_000_000_000);
        let stop = CancellationToken::new();

        let found = paginate_entities(&client, &config, &tokens, &clock, &stop, "/api/v2/routing/queues", &[], 2)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }
}
