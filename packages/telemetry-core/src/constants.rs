//! Default tuning constants for the telemetry plane.
//!
//! These values mirror the defaults of the originating settings module and
//! should only be changed deliberately - several of them (mailbox capacity,
//! smoothing factors) are load-bearing for the documented behavior of the
//! ingest engine and event bus, not arbitrary tuning knobs.

// ─────────────────────────────────────────────────────────────────────────────
// Event Bus (C3)
// ─────────────────────────────────────────────────────────────────────────────

/// Per-subscriber mailbox capacity. When a subscriber's mailbox is full, the
/// oldest queued message is dropped to make room for the new one rather than
/// blocking the publisher or dropping the new message.
pub const EVENT_MAILBOX_CAPACITY: usize = 200;

// ─────────────────────────────────────────────────────────────────────────────
// Live-Audio Buffer (C4)
// ─────────────────────────────────────────────────────────────────────────────

/// Default rolling window retained per call (seconds).
pub const DEFAULT_AUDIO_WINDOW_SECONDS: u64 = 300;

/// Default sample rate assumed when a chunk omits format metadata (Hz).
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 16000;

/// Default channel count assumed when a chunk omits format metadata.
pub const DEFAULT_AUDIO_CHANNELS: u16 = 1;

/// Maximum size of a single audio chunk accepted by the buffer (bytes).
pub const MAX_AUDIO_CHUNK_BYTES: usize = 2_000_000;

// ─────────────────────────────────────────────────────────────────────────────
// Ingest Engine (C5) - scoring
// ─────────────────────────────────────────────────────────────────────────────

/// Sentiment considered negative enough to trigger the negative-sentiment alert rule.
pub const DEFAULT_NEGATIVE_SENTIMENT_THRESHOLD: f64 = -0.45;

/// Risk score considered high enough to trigger the high-risk-score alert rule.
pub const DEFAULT_HIGH_RISK_THRESHOLD: f64 = 0.72;

/// Minimum time between repeated alerts of the same type on the same call (seconds).
pub const DEFAULT_ALERT_COOLDOWN_SECONDS: i64 = 75;

/// Exponential smoothing weight applied to the previous sentiment score.
pub const SENTIMENT_SMOOTHING_PREVIOUS_WEIGHT: f64 = 0.72;

/// Exponential smoothing weight applied to the incoming sentiment score.
pub const SENTIMENT_SMOOTHING_NEW_WEIGHT: f64 = 0.28;

/// Per-tick decay multiplier applied to the previous risk score.
pub const RISK_DECAY_FACTOR: f64 = 0.88;

/// Multiplier applied to the magnitude of a negative sentiment score, capped below.
pub const RISK_SENTIMENT_MULTIPLIER: f64 = 0.42;

/// Cap on the sentiment-driven contribution to the risk score.
pub const RISK_SENTIMENT_CONTRIBUTION_CAP: f64 = 0.46;

/// Flat contribution added to the risk score when a keyword trigger fires.
pub const RISK_KEYWORD_CONTRIBUTION: f64 = 0.24;

/// Cap on the dead-air-driven contribution to the risk score.
pub const RISK_DEAD_AIR_CONTRIBUTION_CAP: f64 = 0.25;

/// Divisor applied to seconds of dead air beyond the grace period.
pub const RISK_DEAD_AIR_DIVISOR: f64 = 100.0;

/// Dead air below this many seconds contributes nothing to the risk score.
pub const RISK_DEAD_AIR_GRACE_SECONDS: f64 = 10.0;

/// Flat contribution added to the risk score per "high" severity alert this tick.
pub const RISK_HIGH_SEVERITY_CONTRIBUTION: f64 = 0.16;

/// Flat contribution added to the risk score per "critical" severity alert this tick.
pub const RISK_CRITICAL_SEVERITY_CONTRIBUTION: f64 = 0.20;

/// Multiplier applied to the risk score once a call reaches a terminal status.
pub const RISK_TERMINAL_STATUS_MULTIPLIER: f64 = 0.6;

/// Maximum length a stored `last_text` value is truncated to (characters).
pub const LAST_TEXT_MAX_LEN: usize = 2400;

/// Number of most recent events included in a call snapshot.
pub const SNAPSHOT_EVENT_LIMIT: usize = 40;

/// Number of most recent alerts included in a call snapshot.
pub const SNAPSHOT_ALERT_LIMIT: usize = 30;

// ─────────────────────────────────────────────────────────────────────────────
// AudioHook Ingress (C6)
// ─────────────────────────────────────────────────────────────────────────────

/// Default host the AudioHook WebSocket server binds to.
pub const AUDIOHOOK_DEFAULT_HOST: &str = "0.0.0.0";

/// Default port the AudioHook WebSocket server binds to.
pub const AUDIOHOOK_DEFAULT_PORT: u16 = 9011;

/// Default path the AudioHook WebSocket server listens on.
pub const AUDIOHOOK_DEFAULT_PATH: &str = "/audiohook/ws";

/// Default forwarding HTTP timeout (seconds).
pub const AUDIOHOOK_DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

/// Default number of forwarding attempts before giving up on a chunk/event.
pub const AUDIOHOOK_DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for the forwarding retry backoff (seconds).
pub const AUDIOHOOK_DEFAULT_RETRY_BACKOFF_SECONDS: f64 = 1.5;

/// Default flush interval for the chunk buffer (milliseconds).
pub const AUDIOHOOK_DEFAULT_FLUSH_INTERVAL_MS: u64 = 750;

/// Default minimum buffered duration before a time-based flush is allowed to skip (ms).
pub const AUDIOHOOK_DEFAULT_MIN_CHUNK_DURATION_MS: u64 = 300;

/// Default maximum buffered duration before a size-based flush is forced (ms).
pub const AUDIOHOOK_DEFAULT_MAX_CHUNK_DURATION_MS: u64 = 2000;

/// Default staleness window after which the status file is considered unhealthy (seconds).
pub const AUDIOHOOK_DEFAULT_HEALTH_STALE_SECONDS: u64 = 90;

/// WebSocket ping interval for AudioHook connections (seconds).
pub const AUDIOHOOK_WS_PING_INTERVAL_SECS: u64 = 20;

/// WebSocket ping timeout for AudioHook connections (seconds).
pub const AUDIOHOOK_WS_PING_TIMEOUT_SECS: u64 = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Vendor Connector (C7)
// ─────────────────────────────────────────────────────────────────────────────

/// Default vendor OAuth login base URL.
pub const CONNECTOR_DEFAULT_LOGIN_BASE_URL: &str = "https://login.mypurecloud.com";

/// Default vendor REST API base URL.
pub const CONNECTOR_DEFAULT_API_BASE_URL: &str = "https://api.mypurecloud.com";

/// Default HTTP timeout for connector REST calls (seconds).
pub const CONNECTOR_DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

/// Default number of attempts for a single connector REST call.
pub const CONNECTOR_DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for the connector's linear retry backoff (seconds).
///
/// Despite the "backoff" name, this delay grows linearly with attempt count,
/// not exponentially - see `connector::client::retry_delay`.
pub const CONNECTOR_DEFAULT_RETRY_BACKOFF_SECONDS: f64 = 1.5;

/// Default delay before attempting to reconnect the notification websocket (seconds).
pub const CONNECTOR_DEFAULT_RECONNECT_DELAY_SECONDS: u64 = 5;

/// Default topic builder discovery mode.
pub const CONNECTOR_DEFAULT_TOPIC_BUILDER_MODE: &str = "queues_users";

/// Default cap on the number of queues folded into auto-discovered topics.
pub const CONNECTOR_DEFAULT_TOPIC_BUILDER_MAX_QUEUES: usize = 25;

/// Default cap on the number of users folded into auto-discovered topics.
pub const CONNECTOR_DEFAULT_TOPIC_BUILDER_MAX_USERS: usize = 50;

/// Default interval between topic discovery refreshes (seconds).
pub const CONNECTOR_DEFAULT_TOPIC_BUILDER_REFRESH_SECONDS: u64 = 900;

/// Page size used when paginating queue/user discovery calls.
pub const CONNECTOR_DISCOVERY_PAGE_SIZE: u32 = 100;

/// Hard cap on the number of discovery pages fetched, regardless of `max_queues`/`max_users`.
pub const CONNECTOR_DISCOVERY_MAX_PAGES: u32 = 50;

/// Default staleness window after which the connector status file is considered unhealthy (seconds).
pub const CONNECTOR_DEFAULT_HEALTH_STALE_SECONDS: u64 = 90;

/// WebSocket ping interval for the outbound vendor notification channel (seconds).
pub const CONNECTOR_WS_PING_INTERVAL_SECS: u64 = 20;

/// WebSocket ping timeout for the outbound vendor notification channel (seconds).
pub const CONNECTOR_WS_PING_TIMEOUT_SECS: u64 = 10;

/// Safety floor under the OAuth token's own `expires_in` (seconds).
pub const CONNECTOR_TOKEN_MIN_TTL_SECONDS: u64 = 60;

/// Buffer subtracted from the OAuth token's `expires_in` before caching expiry.
pub const CONNECTOR_TOKEN_EXPIRY_BUFFER_SECONDS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// SSE Gateway (C8)
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between SSE keep-alive comment frames (seconds).
pub const SSE_KEEPALIVE_INTERVAL_SECS: u64 = 15;
