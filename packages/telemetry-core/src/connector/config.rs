//! Runtime configuration for the vendor notification connector (§4.5, §6 env var table).

use crate::constants::{
    CONNECTOR_DEFAULT_API_BASE_URL, CONNECTOR_DEFAULT_HEALTH_STALE_SECONDS, CONNECTOR_DEFAULT_HTTP_TIMEOUT_SECS,
    CONNECTOR_DEFAULT_LOGIN_BASE_URL, CONNECTOR_DEFAULT_RECONNECT_DELAY_SECONDS, CONNECTOR_DEFAULT_RETRY_BACKOFF_SECONDS,
    CONNECTOR_DEFAULT_RETRY_MAX_ATTEMPTS, CONNECTOR_DEFAULT_TOPIC_BUILDER_MAX_QUEUES,
    CONNECTOR_DEFAULT_TOPIC_BUILDER_MAX_USERS, CONNECTOR_DEFAULT_TOPIC_BUILDER_MODE,
    CONNECTOR_DEFAULT_TOPIC_BUILDER_REFRESH_SECONDS,
};

/// Tunables for the vendor OAuth client, topic builder, and notification websocket.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub client_id: String,
    pub client_secret: String,
    pub login_base_url: String,
    pub api_base_url: String,

    /// Explicitly configured topics, unioned with any queue/user-derived and discovered topics.
    pub subscription_topics: Vec<String>,
    pub queue_ids: Vec<String>,
    pub user_ids: Vec<String>,

    pub verify_ssl: bool,
    pub http_timeout_seconds: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_seconds: f64,
    pub reconnect_delay_seconds: u64,

    /// `manual|off|none|queues|users|queues_users|all` (case-insensitive).
    pub topic_builder_mode: String,
    pub topic_builder_queue_name_filters: Vec<String>,
    pub topic_builder_user_name_filters: Vec<String>,
    pub topic_builder_user_email_domain_filters: Vec<String>,
    pub topic_builder_max_queues: usize,
    pub topic_builder_max_users: usize,
    pub topic_builder_refresh_seconds: u64,

    pub health_stale_seconds: u64,
    pub dry_run: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            login_base_url: CONNECTOR_DEFAULT_LOGIN_BASE_URL.to_string(),
            api_base_url: CONNECTOR_DEFAULT_API_BASE_URL.to_string(),
            subscription_topics: Vec::new(),
            queue_ids: Vec::new(),
            user_ids: Vec::new(),
            verify_ssl: true,
            http_timeout_seconds: CONNECTOR_DEFAULT_HTTP_TIMEOUT_SECS,
            retry_max_attempts: CONNECTOR_DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_backoff_seconds: CONNECTOR_DEFAULT_RETRY_BACKOFF_SECONDS,
            reconnect_delay_seconds: CONNECTOR_DEFAULT_RECONNECT_DELAY_SECONDS,
            topic_builder_mode: CONNECTOR_DEFAULT_TOPIC_BUILDER_MODE.to_string(),
            topic_builder_queue_name_filters: Vec::new(),
            topic_builder_user_name_filters: Vec::new(),
            topic_builder_user_email_domain_filters: Vec::new(),
            topic_builder_max_queues: CONNECTOR_DEFAULT_TOPIC_BUILDER_MAX_QUEUES,
            topic_builder_max_users: CONNECTOR_DEFAULT_TOPIC_BUILDER_MAX_USERS,
            topic_builder_refresh_seconds: CONNECTOR_DEFAULT_TOPIC_BUILDER_REFRESH_SECONDS,
            health_stale_seconds: CONNECTOR_DEFAULT_HEALTH_STALE_SECONDS,
            dry_run: false,
        }
    }
}

impl ConnectorConfig {
    /// Login/API base URLs with any trailing slash stripped, as the REST helpers assume.
    pub fn normalized_login_base(&self) -> String {
        self.login_base_url.trim_end_matches('/').to_string()
    }

    pub fn normalized_api_base(&self) -> String {
        self.api_base_url.trim_end_matches('/').to_string()
    }
}
