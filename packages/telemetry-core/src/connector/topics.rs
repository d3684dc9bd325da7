//! Topic set assembly for the notification subscription: explicit topics
//! plus queue/user-derived topics, optionally extended with paginated
//! queue/user discovery (§4.5 topic builder).

use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::connector::auth::TokenCache;
use crate::connector::client::paginate_entities;
use crate::connector::config::ConnectorConfig;
use crate::error::TelemetryResult;

/// Which discovery calls a topic builder mode enables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DiscoveryGate {
    queues: bool,
    users: bool,
}

/// Maps `topic_builder_mode` to the discovery calls it enables. Manual/off
/// disable discovery entirely; unrecognized modes fall back to discovering
/// both, matching the original connector's permissive dispatch.
fn discovery_gate(mode: &str) -> DiscoveryGate {
    match mode.trim().to_lowercase().as_str() {
        "manual" | "off" | "none" | "" => DiscoveryGate { queues: false, users: false },
        "queues" | "queue" => DiscoveryGate { queues: true, users: false },
        "users" | "user" => DiscoveryGate { queues: false, users: true },
        "queues_users" | "users_queues" | "all" | "org" => DiscoveryGate { queues: true, users: true },
        _ => DiscoveryGate { queues: true, users: true },
    }
}

fn queue_topic(queue_id: &str) -> String {
    format!("v2.routing.queues.{queue_id}.conversations.calls")
}

fn user_topic(user_id: &str) -> String {
    format!("v2.users.{user_id}.conversations.calls")
}

/// Topics built from `subscription_topics`, `queue_ids`, and `user_ids`
/// directly, with no API calls.
fn manual_topics(config: &ConnectorConfig) -> BTreeSet<String> {
    let mut topics: BTreeSet<String> = config.subscription_topics.iter().cloned().collect();
    topics.extend(config.queue_ids.iter().map(|id| queue_topic(id)));
    topics.extend(config.user_ids.iter().map(|id| user_topic(id)));
    topics
}

fn matches_name_filters(name: &str, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let lower = name.to_lowercase();
    filters.iter().any(|filter| lower.contains(&filter.to_lowercase()))
}

fn matches_email_domain_filters(email: &str, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    filters.iter().any(|domain| email.ends_with(&domain.to_lowercase()))
}

/// Result of one topic-builder pass: the full topic set plus how many came
/// from discovery, for status reporting.
pub struct TopicBuildResult {
    pub topics: Vec<String>,
    pub discovered_queues: usize,
    pub discovered_users: usize,
}

/// Builds the full topic set for a subscription pass: manual topics unioned
/// with any discovered queue/user topics gated by `topic_builder_mode`.
pub async fn build_topics(
    client: &Client,
    config: &ConnectorConfig,
    tokens: &TokenCache,
    clock: &dyn Clock,
    stop: &CancellationToken,
) -> TelemetryResult<TopicBuildResult> {
    let mut topics = manual_topics(config);
    let gate = discovery_gate(&config.topic_builder_mode);

    let mut discovered_queues = 0;
    if gate.queues && config.topic_builder_max_queues > 0 {
        let queues = paginate_entities(
            client,
            config,
            tokens,
            clock,
            stop,
            "/api/v2/routing/queues",
            &[],
            config.topic_builder_max_queues,
        )
        .await?;
        for queue in &queues {
            if matches_name_filters(&queue.name, &config.topic_builder_queue_name_filters) {
                topics.insert(queue_topic(&queue.id));
                discovered_queues += 1;
            }
        }
    }

    let mut discovered_users = 0;
    if gate.users && config.topic_builder_max_users > 0 {
        let users = paginate_entities(
            client,
            config,
            tokens,
            clock,
            stop,
            "/api/v2/users",
            &[("state", "active".to_string())],
            config.topic_builder_max_users,
        )
        .await?;
        for user in &users {
            let name_ok = matches_name_filters(&user.name, &config.topic_builder_user_name_filters);
            let email_ok = matches_email_domain_filters(&user.email, &config.topic_builder_user_email_domain_filters);
            if name_ok && email_ok {
                topics.insert(user_topic(&user.id));
                discovered_users += 1;
            }
        }
    }

    Ok(TopicBuildResult {
        topics: topics.into_iter().collect(),
        discovered_queues,
        discovered_users,
    })
}

/// Tracks the last successful topic build so repeated subscribe passes
/// don't re-run discovery more often than `topic_builder_refresh_seconds`.
pub struct TopicCache {
    last_built_at: Option<std::time::Instant>,
}

impl TopicCache {
    pub fn new() -> Self {
        Self { last_built_at: None }
    }

    pub fn should_refresh(&self, refresh_seconds: u64) -> bool {
        match self.last_built_at {
            None => true,
            Some(last) => last.elapsed() >= Duration::from_secs(refresh_seconds),
        }
    }

    pub fn mark_built(&mut self) {
        self.last_built_at = Some(std::time::Instant::now());
    }
}

impl Default for TopicCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_mode_disables_discovery() {
        assert_eq!(discovery_gate("manual"), DiscoveryGate { queues: false, users: false });
        assert_eq!(discovery_gate("OFF"), DiscoveryGate { queues: false, users: false });
        assert_eq!(discovery_gate(""), DiscoveryGate { queues: false, users: false });
    }

    #[test]
    fn queues_mode_only_enables_queue_discovery() {
        assert_eq!(discovery_gate("queues"), DiscoveryGate { queues: true, users: false });
    }

    #[test]
    fn users_mode_only_enables_user_discovery() {
        assert_eq!(discovery_gate("users"), DiscoveryGate { queues: false, users: true });
    }

    #[test]
    fn combined_and_unrecognized_modes_enable_both() {
        assert_eq!(discovery_gate("queues_users"), DiscoveryGate { queues: true, users: true });
        assert_eq!(discovery_gate("all"), DiscoveryGate { queues: true, users: true });
        assert_eq!(discovery_gate("something_else"), DiscoveryGate { queues: true, users: true });
    }

    #[test]
    fn manual_topics_union_explicit_queue_and_user_ids() {
        let config = ConnectorConfig {
            subscription_topics: vec!["v2.detail.events.custom".to_string()],
            queue_ids: vec!["q-1".to_string()],
            user_ids: vec!["u-1".to_string()],
            ..ConnectorConfig::default()
        };
        let topics = manual_topics(&config);
        assert!(topics.contains("v2.detail.events.custom"));
        assert!(topics.contains("v2.routing.queues.q-1.conversations.calls"));
        assert!(topics.contains("v2.users.u-1.conversations.calls"));
    }

    #[test]
    fn name_filter_matches_case_insensitive_substring() {
        assert!(matches_name_filters("Sales Queue", &["sales".to_string()]));
        assert!(!matches_name_filters("Support Queue", &["sales".to_string()]));
        assert!(matches_name_filters("anything", &[]));
    }

    #[test]
    fn email_domain_filter_matches_suffix() {
        assert!(matches_email_domain_filters("agent@example.com", &["example.com".to_string()]));
        assert!(!matches_email_domain_filters("agent@other.com", &["example.com".to_string()]));
    }

    #[test]
    fn topic_cache_requires_refresh_until_marked_built() {
        let cache = TopicCache::new();
        assert!(cache.should_refresh(900));
        let mut cache = cache;
        cache.mark_built();
        assert!(!cache.should_refresh(900));
    }
}
