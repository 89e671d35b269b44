//! Analytics module for storelens
//!
//! Turns the raw event log into a storefront report:
//! - Calendar-aligned time buckets
//! - Paginated, schema-tolerant event fetching
//! - Bot and abusive-session filtering
//! - Per-bucket metrics and period-over-period growth
//! - Dimensional breakdowns
//! - Download-to-purchase conversion
//!
//! ## Pipeline
//!
//! [`ReportEngine`] fetches every event set it needs concurrently, then runs
//! the stages in order: bot filter, abuse filter (page views only),
//! aggregation, growth, breakdowns, funnel. Everything after the fetch is
//! in memory and side-effect free.

pub mod abuse;
pub mod aggregate;
pub mod bot;
pub mod breakdown;
pub mod fetcher;
pub mod funnel;
pub mod growth;
pub mod period;
pub mod report;

pub use abuse::{AbuseOutcome, AbuseSessionAnalyzer, AbuseSummary};
pub use aggregate::{aggregate, distinct_visitors};
pub use bot::{is_bot, BotFilter};
pub use breakdown::{referrer_label, BreakdownAggregator, Dimension, DimensionBreakdown};
pub use fetcher::{
    EventFetcher, EventPage, EventQuery, EventStore, Projection, SchemaCapability,
    DEFAULT_PAGE_SIZE,
};
pub use funnel::{ConversionFunnelAnalyzer, LedgerFilter, PurchaseLedger, PAID_STATUS};
pub use growth::{change_pct, prior_window, PeriodTotals};
pub use period::{bucketize, grid_window};
pub use report::{FilterSummary, Report, ReportEngine, ReportRequest};
