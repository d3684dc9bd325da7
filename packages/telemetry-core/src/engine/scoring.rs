//! Risk-score arithmetic and alert-rule evaluation (§4.3).
//!
//! Kept free of any storage/locking concerns so the formula can be unit
//! tested in isolation from the engine's call-state bookkeeping.

use crate::constants::*;
use crate::model::AlertSeverity;

/// Recomputes the risk score per the formula in §4.3, clamped to `[0, 1]` and
/// rounded to 2 decimal places.
pub fn update_risk_score(
    prev_risk: f64,
    sentiment: Option<f64>,
    escalation_keyword_hit: bool,
    dead_air_seconds: Option<f64>,
    raised_severities: &[AlertSeverity],
    terminal_status: bool,
) -> f64 {
    let mut score = prev_risk * RISK_DECAY_FACTOR;

    if let Some(sentiment) = sentiment {
        if sentiment < 0.0 {
            score += (sentiment.abs() * RISK_SENTIMENT_MULTIPLIER).min(RISK_SENTIMENT_CONTRIBUTION_CAP);
        }
    }

    if escalation_keyword_hit {
        score += RISK_KEYWORD_CONTRIBUTION;
    }

    if let Some(dead_air) = dead_air_seconds {
        let excess = (dead_air - RISK_DEAD_AIR_GRACE_SECONDS).max(0.0);
        score += (excess / RISK_DEAD_AIR_DIVISOR).min(RISK_DEAD_AIR_CONTRIBUTION_CAP);
    }

    for severity in raised_severities {
        match severity {
            AlertSeverity::High => score += RISK_HIGH_SEVERITY_CONTRIBUTION,
            AlertSeverity::Critical => score += RISK_CRITICAL_SEVERITY_CONTRIBUTION,
            AlertSeverity::Medium => {}
        }
    }

    if terminal_status {
        score *= RISK_TERMINAL_STATUS_MULTIPLIER;
    }

    let clamped = score.clamp(0.0, 1.0);
    (clamped * 100.0).round() / 100.0
}

/// Canonical escalation keywords that force `high` severity on the
/// `escalation_keyword` rule regardless of which configured keyword matched.
const HIGH_SEVERITY_ESCALATION_KEYWORDS: [&str; 3] = ["supervisor", "lawyer", "legal"];

/// Returns the first configured keyword (case-insensitive substring match)
/// found in `text`, if any.
pub fn find_escalation_keyword<'a>(text: &str, keywords: &'a [String]) -> Option<&'a str> {
    let lowered = text.to_lowercase();
    keywords
        .iter()
        .find(|kw| !kw.is_empty() && lowered.contains(kw.as_str()))
        .map(String::as_str)
}

/// Severity for an `escalation_keyword` alert: `high` if the matched keyword is
/// one of the canonical escalation terms, else `medium`.
pub fn escalation_keyword_severity(matched: &str) -> AlertSeverity {
    if HIGH_SEVERITY_ESCALATION_KEYWORDS.contains(&matched.to_lowercase().as_str()) {
        AlertSeverity::High
    } else {
        AlertSeverity::Medium
    }
}

/// Severity for a `negative_sentiment` alert: `high` if `sentiment` is at or
/// below `threshold - 0.2`, else `medium`.
pub fn negative_sentiment_severity(sentiment: f64, threshold: f64) -> AlertSeverity {
    if sentiment <= threshold - 0.2 {
        AlertSeverity::High
    } else {
        AlertSeverity::Medium
    }
}

/// Severity for a `dead_air` alert: `high` if `dead_air_seconds >= 35`, else `medium`.
pub fn dead_air_severity(dead_air_seconds: f64) -> AlertSeverity {
    if dead_air_seconds >= 35.0 {
        AlertSeverity::High
    } else {
        AlertSeverity::Medium
    }
}

/// Threshold in seconds at/above which a dead-air reading raises an alert.
pub const DEAD_AIR_ALERT_THRESHOLD_SECONDS: f64 = 20.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_sentiment_contributes_capped_risk() {
        let score = update_risk_score(0.0, Some(-1.0), false, None, &[], false);
        assert!((score - RISK_SENTIMENT_CONTRIBUTION_CAP).abs() < 1e-9);
    }

    #[test]
    fn keyword_hit_adds_flat_contribution() {
        let score = update_risk_score(0.0, None, true, None, &[], false);
        assert!((score - RISK_KEYWORD_CONTRIBUTION).abs() < 1e-9);
    }

    #[test]
    fn dead_air_below_grace_period_contributes_nothing() {
        let score = update_risk_score(0.0, None, false, Some(5.0), &[], false);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn dead_air_above_grace_is_capped() {
        let score = update_risk_score(0.0, None, false, Some(500.0), &[], false);
        assert!((score - RISK_DEAD_AIR_CONTRIBUTION_CAP).abs() < 1e-9);
    }

    #[test]
    fn terminal_status_decays_final_score() {
        let score = update_risk_score(1.0, None, false, None, &[], true);
        let expected = (RISK_DECAY_FACTOR * RISK_TERMINAL_STATUS_MULTIPLIER * 100.0).round() / 100.0;
        assert_eq!(score, expected);
    }

    #[test]
    fn score_never_exceeds_one() {
        let score = update_risk_score(
            1.0,
            Some(-1.0),
            true,
            Some(500.0),
            &[AlertSeverity::Critical, AlertSeverity::High],
            false,
        );
        assert!(score <= 1.0);
    }

    #[test]
    fn canonical_keywords_force_high_severity() {
        assert_eq!(escalation_keyword_severity("Lawyer"), AlertSeverity::High);
        assert_eq!(escalation_keyword_severity("manager"), AlertSeverity::Medium);
    }

    #[test]
    fn finds_case_insensitive_keyword_match() {
        let keywords = vec!["supervisor".to_string(), "refund".to_string()];
        let found = find_escalation_keyword("please get me a SUPERVISOR now", &keywords);
        assert_eq!(found, Some("supervisor"));
    }
}
