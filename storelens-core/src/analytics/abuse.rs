//! Abusive session detection
//!
//! Groups page views by visitor identity and flags sessions whose access
//! pattern looks automated. A session is only judged once it has at least
//! `min_views_for_analysis` views; shorter sessions always pass.
//!
//! ## Signals
//!
//! Any one tripped signal flags the whole session.
//!
//! | Signal | Trips when |
//! |--------|-----------|
//! | Volume | `total_views > max_views_per_session` |
//! | Pace | mean interval `< min_avg_interval_ms` |
//! | Burst | a run of `consecutive_fast_views` intervals each `< fast_view_threshold_ms` |
//! | Density | more than `max_views_per_minute` views inside any 60 s window |
//!
//! Detection is a single pass. The [`AbuseSummary`] it produces is an audit
//! record for the report and never feeds back into thresholds.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AbuseConfig;
use crate::types::{RawEvent, SessionProfile};

/// Width of the sliding density window.
const DENSITY_WINDOW_MS: i64 = 60_000;

/// Audit record of one detection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AbuseSummary {
    /// Whether detection ran at all
    pub enabled: bool,
    /// Distinct identity keys among the input events
    pub sessions_seen: usize,
    /// Sessions with enough views to be profiled
    pub sessions_analyzed: usize,
    /// Page views dropped because their session was flagged
    pub events_removed: usize,
    /// Profiles of flagged sessions, ordered by identity key
    pub flagged: Vec<SessionProfile>,
}

impl AbuseSummary {
    pub fn sessions_flagged(&self) -> usize {
        self.flagged.len()
    }
}

/// Result of [`AbuseSessionAnalyzer::analyze`].
#[derive(Debug, Clone)]
pub struct AbuseOutcome {
    /// Events of non-abusive sessions, in input order
    pub retained: Vec<RawEvent>,
    pub summary: AbuseSummary,
}

/// Flags sessions with automated-looking access patterns.
#[derive(Debug, Clone)]
pub struct AbuseSessionAnalyzer {
    config: AbuseConfig,
}

impl AbuseSessionAnalyzer {
    pub fn new(config: AbuseConfig) -> Self {
        Self { config }
    }

    /// Drop every event of a flagged session.
    pub fn analyze(&self, events: Vec<RawEvent>) -> AbuseOutcome {
        if !self.config.enabled {
            return AbuseOutcome {
                retained: events,
                summary: AbuseSummary::default(),
            };
        }

        let mut sessions: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
        let keys: Vec<String> = events
            .iter()
            .map(|e| {
                let key = e.identity_key();
                sessions.entry(key.clone()).or_default().push(e.created_at);
                key
            })
            .collect();

        let mut summary = AbuseSummary {
            enabled: true,
            sessions_seen: sessions.len(),
            ..Default::default()
        };

        for (key, timestamps) in sessions {
            if let Some(profile) = self.profile(key, timestamps) {
                summary.sessions_analyzed += 1;
                if profile.is_abusive {
                    tracing::info!(
                        identity_key = %profile.identity_key,
                        views = profile.total_views,
                        reasons = ?profile.reasons,
                        "Flagged abusive session"
                    );
                    summary.flagged.push(profile);
                }
            }
        }
        summary
            .flagged
            .sort_by(|a, b| a.identity_key.cmp(&b.identity_key));

        let flagged: HashSet<&str> = summary
            .flagged
            .iter()
            .map(|p| p.identity_key.as_str())
            .collect();
        let before = events.len();
        let retained: Vec<RawEvent> = events
            .into_iter()
            .zip(keys.iter())
            .filter(|(_, key)| !flagged.contains(key.as_str()))
            .map(|(event, _)| event)
            .collect();
        summary.events_removed = before - retained.len();

        AbuseOutcome { retained, summary }
    }

    /// Build the profile of one session, or `None` if it is too short to judge.
    pub fn profile(
        &self,
        identity_key: String,
        mut timestamps: Vec<DateTime<Utc>>,
    ) -> Option<SessionProfile> {
        let total_views = timestamps.len();
        if total_views < self.config.min_views_for_analysis || total_views < 2 {
            return None;
        }
        timestamps.sort();

        let intervals: Vec<i64> = timestamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds())
            .collect();
        let avg_interval_ms = intervals.iter().sum::<i64>() as f64 / intervals.len() as f64;
        let min_interval_ms = intervals.iter().copied().min().unwrap_or(0);
        let max_consecutive_fast_views =
            longest_fast_run(&intervals, self.config.fast_view_threshold_ms);
        let max_views_per_minute_window = densest_window(&timestamps);

        let cfg = &self.config;
        let mut reasons = Vec::new();
        if total_views > cfg.max_views_per_session {
            reasons.push(format!(
                "{} views in session exceeds limit of {}",
                total_views, cfg.max_views_per_session
            ));
        }
        if avg_interval_ms < cfg.min_avg_interval_ms as f64 {
            reasons.push(format!(
                "average interval {:.0}ms is below {}ms",
                avg_interval_ms, cfg.min_avg_interval_ms
            ));
        }
        if max_consecutive_fast_views >= cfg.consecutive_fast_views {
            reasons.push(format!(
                "{} consecutive views faster than {}ms",
                max_consecutive_fast_views, cfg.fast_view_threshold_ms
            ));
        }
        if max_views_per_minute_window > cfg.max_views_per_minute {
            reasons.push(format!(
                "{} views within one minute exceeds limit of {}",
                max_views_per_minute_window, cfg.max_views_per_minute
            ));
        }

        Some(SessionProfile {
            identity_key,
            total_views,
            avg_interval_ms,
            min_interval_ms,
            max_views_per_minute_window,
            max_consecutive_fast_views,
            is_abusive: !reasons.is_empty(),
            reasons,
            ordered_view_timestamps: timestamps,
        })
    }
}

/// Longest run of consecutive intervals strictly under `threshold_ms`.
fn longest_fast_run(intervals: &[i64], threshold_ms: u64) -> usize {
    let threshold = i64::try_from(threshold_ms).unwrap_or(i64::MAX);
    let mut best = 0;
    let mut run = 0;
    for &interval in intervals {
        if interval < threshold {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}

/// Most views starting inside any `[t, t + 60s)` window of a sorted series.
fn densest_window(sorted: &[DateTime<Utc>]) -> usize {
    let mut best = 0;
    let mut end = 0;
    for (start, first) in sorted.iter().enumerate() {
        if end < start {
            end = start;
        }
        while end < sorted.len() && (sorted[end] - *first).num_milliseconds() < DENSITY_WINDOW_MS {
            end += 1;
        }
        best = best.max(end - start);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    /// `count` views from one session spaced `step_ms` apart.
    fn session(session: &str, count: usize, step_ms: i64) -> Vec<RawEvent> {
        (0..count)
            .map(|i| {
                let mut e = RawEvent::new(
                    format!("{session}-{i}"),
                    EventKind::PageView,
                    base() + Duration::milliseconds(step_ms * i as i64),
                );
                e.session_id = Some(session.to_string());
                e
            })
            .collect()
    }

    fn analyzer() -> AbuseSessionAnalyzer {
        AbuseSessionAnalyzer::new(AbuseConfig::default())
    }

    #[test]
    fn test_fast_burst_is_flagged() {
        let outcome = analyzer().analyze(session("bot", 12, 500));

        assert!(outcome.retained.is_empty());
        assert_eq!(outcome.summary.sessions_flagged(), 1);
        assert_eq!(outcome.summary.events_removed, 12);

        let profile = &outcome.summary.flagged[0];
        assert_eq!(profile.total_views, 12);
        assert_eq!(profile.max_consecutive_fast_views, 11);
        assert_eq!(profile.min_interval_ms, 500);
        assert!(profile
            .reasons
            .iter()
            .any(|r| r.contains("consecutive views faster than 1000ms")));
    }

    #[test]
    fn test_slow_reader_is_kept() {
        let outcome = analyzer().analyze(session("reader", 12, 12_000));

        assert_eq!(outcome.retained.len(), 12);
        assert_eq!(outcome.summary.sessions_analyzed, 1);
        assert!(outcome.summary.flagged.is_empty());
    }

    #[test]
    fn test_short_sessions_are_never_flagged() {
        // 9 views 10 ms apart trip every rate signal but stay below the minimum
        let outcome = analyzer().analyze(session("short", 9, 10));

        assert_eq!(outcome.retained.len(), 9);
        assert_eq!(outcome.summary.sessions_analyzed, 0);
        assert!(outcome.summary.flagged.is_empty());
    }

    #[test]
    fn test_only_flagged_session_is_removed() {
        let mut events = session("bot", 20, 100);
        events.extend(session("human", 15, 30_000));
        events.extend(session("visitor", 3, 100));

        let outcome = analyzer().analyze(events);

        assert_eq!(outcome.summary.sessions_seen, 3);
        assert_eq!(outcome.summary.sessions_analyzed, 2);
        assert_eq!(outcome.retained.len(), 18);
        assert!(outcome
            .retained
            .iter()
            .all(|e| e.session_id.as_deref() != Some("bot")));
    }

    #[test]
    fn test_volume_signal() {
        let config = AbuseConfig {
            max_views_per_session: 20,
            ..Default::default()
        };
        let profile = AbuseSessionAnalyzer::new(config)
            .profile("s:slow".into(), session("slow", 25, 60_000).iter().map(|e| e.created_at).collect())
            .unwrap();

        assert!(profile.is_abusive);
        assert_eq!(profile.reasons.len(), 1);
        assert!(profile.reasons[0].contains("25 views in session"));
    }

    #[test]
    fn test_density_signal() {
        // 40 views 1.2 s apart: slow enough for the burst signal, but 50 per minute
        let config = AbuseConfig {
            min_avg_interval_ms: 1_000,
            ..Default::default()
        };
        let timestamps = session("dense", 40, 1_200).iter().map(|e| e.created_at).collect();
        let profile = AbuseSessionAnalyzer::new(config)
            .profile("s:dense".into(), timestamps)
            .unwrap();

        assert_eq!(profile.max_views_per_minute_window, 40);
        assert_eq!(profile.max_consecutive_fast_views, 0);
        assert_eq!(profile.reasons.len(), 1);
        assert!(profile.reasons[0].contains("within one minute"));
    }

    #[test]
    fn test_pace_signal_without_burst() {
        // Alternating 100 ms and 3000 ms gaps: mean near 1400 ms, no run of 5 fast views
        let mut timestamps = Vec::new();
        let mut t = base();
        for i in 0..12 {
            timestamps.push(t);
            t += Duration::milliseconds(if i % 2 == 0 { 100 } else { 3_000 });
        }
        let profile = analyzer().profile("s:pace".into(), timestamps).unwrap();

        assert_eq!(profile.max_consecutive_fast_views, 1);
        assert!(profile.avg_interval_ms < 2_000.0);
        assert!(profile.is_abusive);
        assert!(profile.reasons[0].starts_with("average interval"));
    }

    #[test]
    fn test_profile_sorts_timestamps() {
        let mut timestamps: Vec<_> = session("s", 10, 5_000).iter().map(|e| e.created_at).collect();
        timestamps.reverse();
        let profile = analyzer().profile("s:s".into(), timestamps).unwrap();

        assert!(profile
            .ordered_view_timestamps
            .windows(2)
            .all(|w| w[0] <= w[1]));
        assert_eq!(profile.min_interval_ms, 5_000);
    }

    #[test]
    fn test_disabled_passes_through() {
        let config = AbuseConfig {
            enabled: false,
            ..Default::default()
        };
        let events = session("bot", 50, 10);
        let outcome = AbuseSessionAnalyzer::new(config).analyze(events.clone());

        assert_eq!(outcome.retained, events);
        assert!(!outcome.summary.enabled);
    }

    #[test]
    fn test_densest_window_is_half_open() {
        let ts: Vec<_> = (0..3).map(|i| base() + Duration::seconds(30 * i)).collect();
        // 0s and 30s fit one window; 60s starts the next
        assert_eq!(densest_window(&ts), 2);
        assert_eq!(densest_window(&[]), 0);
    }
}
