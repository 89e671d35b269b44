//! Dimensional breakdowns
//!
//! Groups the current window's events by one dimension and ranks the groups
//! by distinct visitors. Missing values get a canonical group of their own
//! instead of being dropped.
//!
//! | Dimension | Source events | Missing value |
//! |-----------|---------------|---------------|
//! | `country` | page views | `Unknown` |
//! | `referrer` | page views | `Direct` |
//! | `download_source` | downloads | `Unknown` |
//! | `sub_category` | downloads | `Uncategorized` |
//!
//! An event with several sub-categories counts once in each of them, so the
//! percentage base is the number of group assignments, not the number of
//! events.
//!
//! `percentage_of_total` is `event_count / total * 100` to one decimal,
//! apportioned by the largest-remainder method over every group before
//! truncation. The untruncated shares sum to exactly 100.0, so three equal
//! groups read 33.4 / 33.3 / 33.3 rather than 33.3 each.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::types::{BreakdownEntry, EventKind, RawEvent};

/// Default number of groups kept per breakdown.
pub const DEFAULT_BREAKDOWN_LIMIT: usize = 10;

/// Label for visits without a referrer.
pub const DIRECT_VISIT_LABEL: &str = "Direct visit";

/// Attribute a breakdown groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Country,
    Referrer,
    DownloadSource,
    SubCategory,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Country,
        Dimension::Referrer,
        Dimension::DownloadSource,
        Dimension::SubCategory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Country => "country",
            Dimension::Referrer => "referrer",
            Dimension::DownloadSource => "download_source",
            Dimension::SubCategory => "sub_category",
        }
    }

    /// Event kind this dimension is read from.
    pub fn source_kind(&self) -> EventKind {
        match self {
            Dimension::Country | Dimension::Referrer => EventKind::PageView,
            Dimension::DownloadSource | Dimension::SubCategory => EventKind::Download,
        }
    }

    /// Group name used when an event has no value.
    pub fn missing_value(&self) -> &'static str {
        match self {
            Dimension::Country | Dimension::DownloadSource => "Unknown",
            Dimension::Referrer => "Direct",
            Dimension::SubCategory => "Uncategorized",
        }
    }

    /// `(value, label)` pairs an event is grouped under.
    fn groups_of(&self, event: &RawEvent) -> Vec<(String, String)> {
        match self {
            Dimension::Country => vec![plain(self, event.country.as_deref())],
            Dimension::DownloadSource => vec![plain(self, event.download_source.as_deref())],
            Dimension::Referrer => vec![referrer_group(event.referrer.as_deref())],
            Dimension::SubCategory => {
                let mut seen = HashSet::new();
                let groups: Vec<_> = event
                    .sub_categories
                    .iter()
                    .flatten()
                    .map(|c| c.trim())
                    .filter(|c| !c.is_empty() && seen.insert(*c))
                    .map(|c| (c.to_string(), c.to_string()))
                    .collect();
                if groups.is_empty() {
                    vec![plain(self, None)]
                } else {
                    groups
                }
            }
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn plain(dimension: &Dimension, value: Option<&str>) -> (String, String) {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(dimension.missing_value())
        .to_string();
    (value.clone(), value)
}

/// Ranked groups of one dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionBreakdown {
    pub dimension: Dimension,
    /// Group assignments in the period, the percentage base
    pub total: u64,
    /// Distinct groups before truncation
    pub group_count: usize,
    pub entries: Vec<BreakdownEntry>,
}

/// Groups events by a dimension and keeps the top groups.
#[derive(Debug, Clone, Copy)]
pub struct BreakdownAggregator {
    limit: usize,
}

impl Default for BreakdownAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_BREAKDOWN_LIMIT)
    }
}

#[derive(Default)]
struct Group {
    label: String,
    visitors: HashSet<String>,
    events: u64,
}

impl BreakdownAggregator {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn breakdown(&self, dimension: Dimension, events: &[RawEvent]) -> DimensionBreakdown {
        let mut groups: HashMap<String, Group> = HashMap::new();
        let mut total = 0u64;

        for event in events {
            let identity = event.identity_key();
            for (value, label) in dimension.groups_of(event) {
                let group = groups.entry(value).or_insert_with(|| Group {
                    label,
                    ..Default::default()
                });
                group.visitors.insert(identity.clone());
                group.events += 1;
                total += 1;
            }
        }

        let mut ranked: Vec<(String, Group)> = groups.into_iter().collect();
        ranked.sort_by(|(va, a), (vb, b)| {
            b.visitors
                .len()
                .cmp(&a.visitors.len())
                .then(b.events.cmp(&a.events))
                .then_with(|| va.cmp(vb))
        });

        let counts: Vec<u64> = ranked.iter().map(|(_, g)| g.events).collect();
        let tenths = largest_remainder_tenths(&counts, total);
        let group_count = ranked.len();

        let entries = ranked
            .into_iter()
            .zip(tenths)
            .take(self.limit)
            .map(|((value, group), tenths)| BreakdownEntry {
                dimension_value: value,
                display_label: group.label,
                unique_visitors: group.visitors.len() as u64,
                event_count: group.events,
                percentage_of_total: tenths as f64 / 10.0,
            })
            .collect();

        DimensionBreakdown {
            dimension,
            total,
            group_count,
            entries,
        }
    }
}

/// Share of `total` per count, in tenths of a percent, summing to exactly 1000.
///
/// Each share is floored, then the leftover tenths go to the largest
/// remainders. Ties favour the earlier (higher ranked) entry.
fn largest_remainder_tenths(counts: &[u64], total: u64) -> Vec<u64> {
    if total == 0 {
        return vec![0; counts.len()];
    }
    let mut tenths: Vec<u64> = counts.iter().map(|c| c * 1000 / total).collect();
    let assigned: u64 = tenths.iter().sum();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = counts[a] * 1000 % total;
        let rb = counts[b] * 1000 % total;
        match rb.cmp(&ra) {
            Ordering::Equal => a.cmp(&b),
            other => other,
        }
    });
    for &i in order.iter().take((1000 - assigned) as usize) {
        tenths[i] += 1;
    }
    tenths
}

// ============================================
// Referrer labels
// ============================================

/// Known referrer hosts. A trailing `.` matches any top-level domain.
const REFERRER_CATALOGUE: &[(&str, &str)] = &[
    // Search engines
    ("google.", "Google"),
    ("bing.com", "Bing"),
    ("yahoo.", "Yahoo!"),
    ("duckduckgo.com", "DuckDuckGo"),
    ("baidu.com", "Baidu"),
    ("yandex.", "Yandex"),
    ("naver.com", "Naver"),
    ("ecosia.org", "Ecosia"),
    // Social platforms
    ("facebook.com", "Facebook"),
    ("fb.com", "Facebook"),
    ("instagram.com", "Instagram"),
    ("x.com", "X (Twitter)"),
    ("twitter.com", "X (Twitter)"),
    ("t.co", "X (Twitter)"),
    ("threads.net", "Threads"),
    ("linkedin.com", "LinkedIn"),
    ("lnkd.in", "LinkedIn"),
    ("pinterest.", "Pinterest"),
    ("reddit.com", "Reddit"),
    ("youtube.com", "YouTube"),
    ("youtu.be", "YouTube"),
    ("tiktok.com", "TikTok"),
    ("note.com", "note"),
    // Messaging apps
    ("line.me", "LINE"),
    ("whatsapp.com", "WhatsApp"),
    ("wa.me", "WhatsApp"),
    ("t.me", "Telegram"),
    ("telegram.org", "Telegram"),
    ("discord.com", "Discord"),
    ("discord.gg", "Discord"),
    ("slack.com", "Slack"),
    ("messenger.com", "Messenger"),
];

/// Extract the bare hostname of a referrer, without `www.`.
fn referrer_host(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw)
        .or_else(|_| url::Url::parse(&format!("https://{}", raw)))
        .ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    (!host.is_empty()).then_some(host)
}

fn catalogue_match(host: &str) -> Option<&'static str> {
    REFERRER_CATALOGUE.iter().find_map(|(pattern, label)| {
        let hit = if pattern.ends_with('.') {
            host.starts_with(pattern) || host.contains(&format!(".{}", pattern))
        } else {
            host == *pattern || host.ends_with(&format!(".{}", pattern))
        };
        hit.then_some(*label)
    })
}

/// Human label for a raw referrer value.
pub fn referrer_label(raw: Option<&str>) -> String {
    referrer_group(raw).1
}

/// Group a referrer by hostname and label it from the catalogue.
fn referrer_group(raw: Option<&str>) -> (String, String) {
    let raw = raw.map(str::trim).unwrap_or("");
    if raw.is_empty() || raw.eq_ignore_ascii_case("direct") {
        return ("Direct".to_string(), DIRECT_VISIT_LABEL.to_string());
    }
    match referrer_host(raw) {
        Some(host) => {
            let label = catalogue_match(&host)
                .map(str::to_string)
                .unwrap_or_else(|| host.clone());
            (host, label)
        }
        None => (raw.to_string(), raw.to_string()),
    }
}
