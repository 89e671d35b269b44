//! Core domain types for storelens
//!
//! The engine reads the storefront's raw event log and produces short-lived
//! report values. Nothing in this module is persisted by the engine.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One row of the raw event log (page view, order, signup, inquiry, download) |
//! | **Identity key** | Value used to deduplicate a visitor: session id, else user id, else a synthetic key |
//! | **Session** | All page views sharing one identity key inside the analysis window |
//! | **Bucket** | A half-open `[start, end)` interval used for time-series grouping |
//! | **Funnel** | Free action (download) to paid action (purchase), as a conversion rate |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Raw events
// ============================================

/// Kind of raw event, one table per kind in the event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageView,
    Order,
    Signup,
    Inquiry,
    Download,
}

impl EventKind {
    /// Every event kind, in report order.
    pub const ALL: [EventKind; 5] = [
        EventKind::PageView,
        EventKind::Order,
        EventKind::Signup,
        EventKind::Inquiry,
        EventKind::Download,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PageView => "page_view",
            EventKind::Order => "order",
            EventKind::Signup => "signup",
            EventKind::Inquiry => "inquiry",
            EventKind::Download => "download",
        }
    }

    /// Event store table holding this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EventKind::PageView => "page_views",
            EventKind::Order => "orders",
            EventKind::Signup => "signups",
            EventKind::Inquiry => "inquiries",
            EventKind::Download => "downloads",
        }
    }

    /// Columns every deployment of the store has for this kind.
    pub fn base_columns(&self) -> &'static [&'static str] {
        match self {
            EventKind::PageView => &["id", "created_at", "session_id", "user_id", "product_id"],
            EventKind::Order => &["id", "created_at", "session_id", "user_id", "amount"],
            EventKind::Signup | EventKind::Inquiry => &["id", "created_at", "session_id", "user_id"],
            EventKind::Download => &["id", "created_at", "session_id", "user_id", "product_id"],
        }
    }

    /// Dimension columns that may be missing on stores that predate them.
    pub fn optional_columns(&self) -> &'static [&'static str] {
        match self {
            EventKind::PageView => &["country", "referrer", "user_agent"],
            EventKind::Order => &["country", "user_agent"],
            EventKind::Signup => &["country", "referrer"],
            EventKind::Inquiry => &["country"],
            EventKind::Download => &["country", "user_agent", "download_source", "sub_categories"],
        }
    }

    /// Whether this kind can be scoped to a single product.
    pub fn has_product(&self) -> bool {
        matches!(self, EventKind::PageView | EventKind::Download)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page_view" => Ok(EventKind::PageView),
            "order" => Ok(EventKind::Order),
            "signup" => Ok(EventKind::Signup),
            "inquiry" => Ok(EventKind::Inquiry),
            "download" => Ok(EventKind::Download),
            _ => Err(format!("unknown event kind: {}", s)),
        }
    }
}

/// A row of the raw event log.
///
/// Optional dimension fields are `None` both when the value was never recorded
/// and when the store could not project the column. Callers treat `None` as
/// unknown, never as a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Record id in the event store
    pub id: String,
    /// Which table this event came from
    pub kind: EventKind,
    /// When the event was recorded
    pub created_at: DateTime<Utc>,
    /// Signed-in user, if any
    pub user_id: Option<String>,
    /// Browser session, if any
    pub session_id: Option<String>,
    /// Visitor country code
    pub country: Option<String>,
    /// Raw referrer URL (or literal "Direct")
    pub referrer: Option<String>,
    /// Raw user-agent string
    pub user_agent: Option<String>,
    /// Where a download was started from
    pub download_source: Option<String>,
    /// Order amount
    pub amount: Option<f64>,
    /// Product sub-categories of the downloaded item
    pub sub_categories: Option<Vec<String>>,
    /// Product the event refers to
    pub product_id: Option<String>,
}

impl RawEvent {
    /// Create an event with only the required fields set.
    pub fn new(id: impl Into<String>, kind: EventKind, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind,
            created_at,
            user_id: None,
            session_id: None,
            country: None,
            referrer: None,
            user_agent: None,
            download_source: None,
            amount: None,
            sub_categories: None,
            product_id: None,
        }
    }

    /// Resolve the visitor identity used for deduplication.
    ///
    /// Precedence: non-empty session id, then non-empty user id, then a
    /// synthetic key built from the record id and timestamp. Never empty.
    pub fn identity_key(&self) -> String {
        if let Some(session) = non_empty(self.session_id.as_deref()) {
            return format!("s:{}", session);
        }
        if let Some(user) = non_empty(self.user_id.as_deref()) {
            return format!("u:{}", user);
        }
        format!(
            "anon:{}:{}:{}",
            self.kind.as_str(),
            self.id,
            self.created_at.timestamp_millis()
        )
    }

    /// Signed-in user id, ignoring empty strings.
    pub fn known_user(&self) -> Option<&str> {
        non_empty(self.user_id.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ============================================
// Report building blocks
// ============================================

/// Time-series granularity of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "day" => Ok(Granularity::Daily),
            "weekly" | "week" => Ok(Granularity::Weekly),
            "monthly" | "month" => Ok(Granularity::Monthly),
            _ => Err(format!("unknown granularity: {}", s)),
        }
    }
}

/// Half-open `[start, end)` time interval used for grouping events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBucket {
    /// Half-open membership test.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// A half-open time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Per-bucket metrics of a report's time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub label: String,
    pub start: DateTime<Utc>,
    pub page_views: u64,
    pub unique_visitors: u64,
    pub order_count: u64,
    pub revenue: f64,
    pub new_users: u64,
    pub inquiry_count: u64,
}

/// Access-pattern profile of one session, built only for sessions with
/// enough views to judge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionProfile {
    pub identity_key: String,
    pub ordered_view_timestamps: Vec<DateTime<Utc>>,
    pub total_views: usize,
    pub avg_interval_ms: f64,
    pub min_interval_ms: i64,
    pub max_views_per_minute_window: usize,
    pub max_consecutive_fast_views: usize,
    pub is_abusive: bool,
    /// Human-readable reasons, one per tripped signal
    pub reasons: Vec<String>,
}

/// Headline totals and their change against the prior window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_visitors: u64,
    pub visitors_change_pct: f64,
    pub total_revenue: f64,
    pub revenue_change_pct: f64,
    pub total_new_users: u64,
    pub new_users_change_pct: f64,
    pub total_page_views: u64,
    pub page_views_change_pct: f64,
}

/// One ranked group of a dimensional breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownEntry {
    pub dimension_value: String,
    pub display_label: String,
    pub unique_visitors: u64,
    pub event_count: u64,
    pub percentage_of_total: f64,
}

/// Free-to-paid conversion summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionSnapshot {
    pub distinct_identified_users: u64,
    pub converted_user_count: u64,
    pub conversion_rate_pct: f64,
    pub anonymous_event_count: u64,
}

/// Round to one decimal place.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
