//! Report orchestration
//!
//! A report is computed on request and never stored. The engine fetches
//! every event set it needs concurrently, waits for all of them, then runs
//! the filters and aggregations in memory. Any failure aborts the report;
//! there is no partial output.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::analytics::abuse::{AbuseSessionAnalyzer, AbuseSummary};
use crate::analytics::aggregate::{aggregate, distinct_visitors};
use crate::analytics::bot::BotFilter;
use crate::analytics::breakdown::{BreakdownAggregator, Dimension, DimensionBreakdown};
use crate::analytics::fetcher::{EventFetcher, EventQuery, EventStore};
use crate::analytics::funnel::{ConversionFunnelAnalyzer, LedgerFilter, PurchaseLedger, PAID_STATUS};
use crate::analytics::growth::{self, prior_window, PeriodTotals};
use crate::analytics::period::{bucketize, grid_window};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{
    ConversionSnapshot, EventKind, Granularity, MetricsSnapshot, RawEvent, SeriesPoint, Window,
};

/// What to report on.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub granularity: Granularity,
    /// Scope page views and downloads to one product
    pub product_id: Option<String>,
}

impl ReportRequest {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            product_id: None,
        }
    }

    pub fn for_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }
}

/// What the filters removed, for auditing a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterSummary {
    /// Bot events removed from the current window, all kinds
    pub bots_removed: usize,
    /// Bot events removed from the prior window, all kinds
    pub prior_bots_removed: usize,
    pub abuse: AbuseSummary,
    pub prior_abuse: AbuseSummary,
}

/// A complete storefront analytics report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub granularity: Granularity,
    pub product_id: Option<String>,
    pub window: Window,
    pub prior_window: Window,
    pub series: Vec<SeriesPoint>,
    pub snapshot: MetricsSnapshot,
    pub breakdowns: Vec<DimensionBreakdown>,
    pub conversion: ConversionSnapshot,
    pub filtering: FilterSummary,
}

impl Report {
    pub fn breakdown(&self, dimension: Dimension) -> Option<&DimensionBreakdown> {
        self.breakdowns.iter().find(|b| b.dimension == dimension)
    }
}

/// Builds reports from an event store and a purchase ledger.
#[derive(Clone)]
pub struct ReportEngine {
    config: Arc<Config>,
    fetcher: EventFetcher,
    ledger: Arc<dyn PurchaseLedger>,
}

/// Raw event sets of one report, before filtering.
struct Fetched {
    page_views: Vec<RawEvent>,
    orders: Vec<RawEvent>,
    signups: Vec<RawEvent>,
    inquiries: Vec<RawEvent>,
    downloads: Vec<RawEvent>,
    prior_page_views: Vec<RawEvent>,
    prior_orders: Vec<RawEvent>,
    prior_signups: Vec<RawEvent>,
}

impl ReportEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn EventStore>,
        ledger: Arc<dyn PurchaseLedger>,
    ) -> Self {
        let fetcher = EventFetcher::new(store, config.store.page_size);
        Self {
            config,
            fetcher,
            ledger,
        }
    }

    /// Build a report for the periods leading up to `now`.
    ///
    /// Buckets align to calendar boundaries in `now`'s time zone.
    pub async fn report<Tz: TimeZone>(
        &self,
        request: &ReportRequest,
        now: &DateTime<Tz>,
    ) -> Result<Report> {
        let report_id = Uuid::new_v4();
        let count = self.config.report.buckets_for(request.granularity);
        let buckets = bucketize(request.granularity, count, now)?;
        let window = grid_window(&buckets)
            .ok_or_else(|| Error::InvalidRequest("empty bucket grid".to_string()))?;
        let generated_at = now.with_timezone(&Utc);

        let span = tracing::info_span!(
            "report",
            %report_id,
            granularity = %request.granularity,
            product = request.product_id.as_deref().unwrap_or("-"),
        );

        async move {
            let prior = prior_window(&window);
            tracing::info!(
                buckets = buckets.len(),
                start = %window.start,
                end = %window.end,
                "Building report"
            );

            let fetched = self.fetch(request, window, prior).await?;

            let bots = BotFilter::new();
            let (page_views, pv_bots) = bots.retain_humans(fetched.page_views);
            let (orders, order_bots) = bots.retain_humans(fetched.orders);
            let (signups, signup_bots) = bots.retain_humans(fetched.signups);
            let (inquiries, inquiry_bots) = bots.retain_humans(fetched.inquiries);
            let (downloads, download_bots) = bots.retain_humans(fetched.downloads);
            let (prior_page_views, prior_pv_bots) = bots.retain_humans(fetched.prior_page_views);
            let (prior_orders, prior_order_bots) = bots.retain_humans(fetched.prior_orders);
            let (prior_signups, prior_signup_bots) = bots.retain_humans(fetched.prior_signups);

            // Current and prior sessions are judged independently
            let abuse = AbuseSessionAnalyzer::new(self.config.abuse.clone());
            let current_abuse = abuse.analyze(page_views);
            let prior_abuse = abuse.analyze(prior_page_views);
            let page_views = current_abuse.retained;
            let prior_page_views = prior_abuse.retained;

            let series = aggregate(&buckets, &page_views, &orders, &signups, &inquiries);
            let current_totals = totals(&page_views, &orders, &signups);
            let prior_totals = totals(&prior_page_views, &prior_orders, &prior_signups);
            let snapshot = growth::snapshot(&current_totals, &prior_totals);

            let breakdown = BreakdownAggregator::new(self.config.report.breakdown_limit);
            let breakdowns = Dimension::ALL
                .iter()
                .map(|dimension| match dimension.source_kind() {
                    EventKind::Download => breakdown.breakdown(*dimension, &downloads),
                    _ => breakdown.breakdown(*dimension, &page_views),
                })
                .collect();

            let filter = LedgerFilter {
                status: PAID_STATUS.to_string(),
                min_amount: self.config.ledger.min_amount,
            };
            let conversion = ConversionFunnelAnalyzer::new(
                Arc::clone(&self.ledger),
                self.config.ledger.batch_size,
                filter,
            )
            .analyze(&downloads)
            .await?;

            let filtering = FilterSummary {
                bots_removed: pv_bots + order_bots + signup_bots + inquiry_bots + download_bots,
                prior_bots_removed: prior_pv_bots + prior_order_bots + prior_signup_bots,
                abuse: current_abuse.summary,
                prior_abuse: prior_abuse.summary,
            };

            tracing::info!(
                page_views = snapshot.total_page_views,
                visitors = snapshot.total_visitors,
                bots_removed = filtering.bots_removed,
                sessions_flagged = filtering.abuse.sessions_flagged(),
                conversion_pct = conversion.conversion_rate_pct,
                "Report complete"
            );

            Ok(Report {
                report_id,
                generated_at,
                granularity: request.granularity,
                product_id: request.product_id.clone(),
                window,
                prior_window: prior,
                series,
                snapshot,
                breakdowns,
                conversion,
                filtering,
            })
        }
        .instrument(span)
        .await
    }

    /// Fetch every event set concurrently; all must succeed.
    async fn fetch(&self, request: &ReportRequest, window: Window, prior: Window) -> Result<Fetched> {
        let query = |kind: EventKind, window: Window| {
            let query = EventQuery::new(kind, window);
            if kind.has_product() {
                query.for_product(request.product_id.clone())
            } else {
                query
            }
        };

        let page_views = query(EventKind::PageView, window);
        let orders = query(EventKind::Order, window);
        let signups = query(EventKind::Signup, window);
        let inquiries = query(EventKind::Inquiry, window);
        let downloads = query(EventKind::Download, window);
        let prior_page_views = query(EventKind::PageView, prior);
        let prior_orders = query(EventKind::Order, prior);
        let prior_signups = query(EventKind::Signup, prior);

        let f = &self.fetcher;
        let (
            page_views,
            orders,
            signups,
            inquiries,
            downloads,
            prior_page_views,
            prior_orders,
            prior_signups,
        ) = tokio::try_join!(
            f.fetch_all(&page_views),
            f.fetch_all(&orders),
            f.fetch_all(&signups),
            f.fetch_all(&inquiries),
            f.fetch_all(&downloads),
            f.fetch_all(&prior_page_views),
            f.fetch_all(&prior_orders),
            f.fetch_all(&prior_signups),
        )?;

        Ok(Fetched {
            page_views,
            orders,
            signups,
            inquiries,
            downloads,
            prior_page_views,
            prior_orders,
            prior_signups,
        })
    }
}

fn totals(page_views: &[RawEvent], orders: &[RawEvent], signups: &[RawEvent]) -> PeriodTotals {
    PeriodTotals {
        visitors: distinct_visitors(page_views),
        revenue: orders.iter().filter_map(|o| o.amount).sum(),
        new_users: signups.len() as u64,
        page_views: page_views.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fetcher::{EventPage, Projection, SchemaCapability};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashSet;

    /// Store over an in-memory event list; ignores projections.
    struct VecStore {
        events: Vec<RawEvent>,
        fail: bool,
    }

    #[async_trait]
    impl EventStore for VecStore {
        fn name(&self) -> &'static str {
            "vec"
        }

        async fn capability(&self, _kind: EventKind) -> Result<SchemaCapability> {
            Ok(SchemaCapability::Full)
        }

        async fn fetch_page(
            &self,
            query: &EventQuery,
            _projection: &Projection,
            offset: usize,
            limit: usize,
        ) -> Result<EventPage> {
            if self.fail && query.kind == EventKind::Inquiry {
                return Err(Error::Fetch("connection refused".to_string()));
            }
            let mut rows: Vec<RawEvent> = self
                .events
                .iter()
                .filter(|e| e.kind == query.kind)
                .filter(|e| query.window.start <= e.created_at && e.created_at < query.window.end)
                .filter(|e| match &query.product_id {
                    Some(p) => e.product_id.as_deref() == Some(p.as_str()),
                    None => true,
                })
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            let has_more = rows.len() > offset + limit;
            let events = rows.into_iter().skip(offset).take(limit).collect();
            Ok(EventPage { events, has_more })
        }
    }

    struct NoPurchases;

    #[async_trait]
    impl PurchaseLedger for NoPurchases {
        fn name(&self) -> &'static str {
            "none"
        }

        fn max_batch_size(&self) -> usize {
            100
        }

        async fn paid_users(&self, user_ids: &[String], _filter: &LedgerFilter) -> Result<HashSet<String>> {
            Ok(user_ids.iter().filter(|u| u.ends_with('0')).cloned().collect())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 15, 0, 0).unwrap()
    }

    fn event(kind: EventKind, id: usize, at: DateTime<Utc>) -> RawEvent {
        let mut e = RawEvent::new(id.to_string(), kind, at);
        e.session_id = Some(format!("s{}", id % 4));
        e
    }

    fn engine(events: Vec<RawEvent>, fail: bool) -> ReportEngine {
        let mut config = Config::default();
        config.report.daily_buckets = 7;
        ReportEngine::new(
            Arc::new(config),
            Arc::new(VecStore { events, fail }),
            Arc::new(NoPurchases),
        )
    }

    fn sample() -> Vec<RawEvent> {
        let day = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let mut events = Vec::new();
        for i in 0..20 {
            let mut view = event(EventKind::PageView, i, day + Duration::hours(i as i64 * 7));
            view.country = Some(if i % 2 == 0 { "JP" } else { "US" }.to_string());
            view.product_id = Some(if i < 15 { "p1" } else { "p2" }.to_string());
            events.push(view);
        }
        // Prior week
        for i in 100..110 {
            events.push(event(EventKind::PageView, i, day - Duration::days(3)));
        }
        let mut bot = event(EventKind::PageView, 200, day);
        bot.session_id = Some("crawler".into());
        bot.user_agent = Some("Googlebot/2.1".into());
        events.push(bot);

        let mut order = event(EventKind::Order, 1, day + Duration::days(1));
        order.amount = Some(25.0);
        events.push(order);
        events.push(event(EventKind::Signup, 1, day + Duration::days(2)));
        events.push(event(EventKind::Inquiry, 1, day + Duration::days(2)));
        for i in 0..4 {
            let mut download = event(EventKind::Download, i, day + Duration::days(3));
            download.user_id = Some(format!("user-{}", i * 5));
            download.product_id = Some("p1".into());
            events.push(download);
        }
        events
    }

    #[tokio::test]
    async fn test_daily_report() {
        let report = engine(sample(), false)
            .report(&ReportRequest::new(Granularity::Daily), &now())
            .await
            .unwrap();

        assert_eq!(report.series.len(), 7);
        assert_eq!(report.snapshot.total_page_views, 20);
        assert_eq!(report.snapshot.total_visitors, 4);
        assert_eq!(report.snapshot.total_revenue, 25.0);
        assert_eq!(report.snapshot.total_new_users, 1);
        assert_eq!(report.filtering.bots_removed, 1);
        assert_eq!(report.prior_window.end, report.window.start);

        let series_views: u64 = report.series.iter().map(|p| p.page_views).sum();
        assert_eq!(series_views, 20);

        let country = report.breakdown(Dimension::Country).unwrap();
        assert_eq!(country.total, 20);
        assert_eq!(country.entries.len(), 2);

        // user-0 and user-10 end in '0'
        assert_eq!(report.conversion.distinct_identified_users, 4);
        assert_eq!(report.conversion.converted_user_count, 2);
        assert_eq!(report.conversion.conversion_rate_pct, 50.0);
    }

    #[tokio::test]
    async fn test_product_scope() {
        let report = engine(sample(), false)
            .report(&ReportRequest::new(Granularity::Daily).for_product("p2"), &now())
            .await
            .unwrap();

        assert_eq!(report.snapshot.total_page_views, 5);
        assert_eq!(report.conversion.distinct_identified_users, 0);
        assert_eq!(report.product_id.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_report() {
        let result = engine(sample(), true)
            .report(&ReportRequest::new(Granularity::Weekly), &now())
            .await;
        assert!(matches!(result, Err(Error::Fetch(_))));
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let report = engine(sample(), false)
            .report(&ReportRequest::new(Granularity::Monthly), &now())
            .await
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["granularity"], "monthly");
        assert!(json["breakdowns"].as_array().unwrap().len() == 4);
        assert!(json["series"].as_array().is_some());
    }
}
