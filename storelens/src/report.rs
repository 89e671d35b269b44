//! storelens-report - CLI tool to build a storefront analytics report
//!
//! Reads the local event log, filters bots and abusive sessions, and prints
//! the time series, headline metrics, breakdowns and conversion funnel.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use storelens_core::analytics::{Dimension, Report, ReportEngine, ReportRequest};
use storelens_core::db::SqliteEventStore;
use storelens_core::{ledger, Config, Database, Granularity};

#[derive(Parser)]
#[command(name = "storelens-report")]
#[command(about = "Build a storefront analytics report")]
#[command(version)]
struct Args {
    /// Bucket size: daily, weekly or monthly
    #[arg(short, long, default_value = "daily")]
    granularity: Granularity,

    /// Only count page views and downloads of this product
    #[arg(short, long)]
    product: Option<String>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Event store to read (overrides store.database_path)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Report as of this RFC 3339 instant instead of the current time
    #[arg(long)]
    now: Option<DateTime<chrono::FixedOffset>>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration (validated, env overrides applied)
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(path) = &args.database {
        config.store.database_path = Some(path.clone());
    }

    // Initialize logging
    let _log_guard =
        storelens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Open database
    let db_path = config.database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open event store {}", db_path.display()))?;
    db.migrate().context("failed to run database migrations")?;
    let db = Arc::new(db);

    let store = SqliteEventStore::new(Arc::clone(&db)).context("failed to inspect event store")?;
    let ledger = ledger::open_ledger(&config.ledger, db).context("failed to open purchase ledger")?;
    let engine = ReportEngine::new(Arc::new(config), Arc::new(store), ledger);

    let mut request = ReportRequest::new(args.granularity);
    request.product_id = args.product.clone();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let report = runtime.block_on(async {
        match args.now {
            Some(now) => engine.report(&request, &now).await,
            None => engine.report(&request, &Local::now()).await,
        }
    })?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text_report(&report);
    }

    Ok(())
}

fn signed_pct(pct: f64) -> String {
    if pct >= 0.0 {
        format!("+{:.1}%", pct)
    } else {
        format!("{:.1}%", pct)
    }
}

fn print_text_report(report: &Report) {
    let scope = report.product_id.as_deref().unwrap_or("all products");
    println!(
        "Storefront report ({}, {}) {} .. {}",
        report.granularity,
        scope,
        report.window.start.format("%Y-%m-%d %H:%M"),
        report.window.end.format("%Y-%m-%d %H:%M")
    );
    println!();

    let s = &report.snapshot;
    println!("Overview (vs previous period)");
    println!(
        "  Visitors    {:>10}  {}",
        s.total_visitors,
        signed_pct(s.visitors_change_pct)
    );
    println!(
        "  Page views  {:>10}  {}",
        s.total_page_views,
        signed_pct(s.page_views_change_pct)
    );
    println!(
        "  Revenue     {:>10.2}  {}",
        s.total_revenue,
        signed_pct(s.revenue_change_pct)
    );
    println!(
        "  New users   {:>10}  {}",
        s.total_new_users,
        signed_pct(s.new_users_change_pct)
    );
    println!();

    println!("Time series");
    println!(
        "  {:<10} {:>8} {:>8} {:>7} {:>10} {:>6} {:>9}",
        "period", "views", "uniques", "orders", "revenue", "new", "inquiries"
    );
    for point in &report.series {
        println!(
            "  {:<10} {:>8} {:>8} {:>7} {:>10.2} {:>6} {:>9}",
            point.label,
            point.page_views,
            point.unique_visitors,
            point.order_count,
            point.revenue,
            point.new_users,
            point.inquiry_count
        );
    }

    for dimension in Dimension::ALL {
        let Some(breakdown) = report.breakdown(dimension) else {
            continue;
        };
        println!();
        println!("Top {} ({} events)", dimension, breakdown.total);
        if breakdown.entries.is_empty() {
            println!("  (no data)");
        }
        for entry in &breakdown.entries {
            println!(
                "  {:<24} {:>6} visitors {:>6} events {:>5.1}%",
                entry.display_label,
                entry.unique_visitors,
                entry.event_count,
                entry.percentage_of_total
            );
        }
    }

    let c = &report.conversion;
    println!();
    println!("Conversion (download -> purchase)");
    println!(
        "  {} of {} identified downloaders purchased ({:.1}%), {} anonymous downloads",
        c.converted_user_count,
        c.distinct_identified_users,
        c.conversion_rate_pct,
        c.anonymous_event_count
    );

    let f = &report.filtering;
    println!();
    println!(
        "Filtered: {} bot events, {} abusive sessions ({} page views)",
        f.bots_removed,
        f.abuse.sessions_flagged(),
        f.abuse.events_removed
    );
    for profile in &f.abuse.flagged {
        println!("  {}: {}", profile.identity_key, profile.reasons.join("; "));
    }
}
