//! storelens-seed - CLI tool to fill an event store with synthetic traffic
//!
//! Generates a reproducible mix of visitors, crawlers and scrapers so the
//! report can be tried without a live storefront.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use storelens_core::{Config, Database, EventKind, RawEvent};

#[derive(Parser)]
#[command(name = "storelens-seed")]
#[command(about = "Fill an event store with synthetic storefront traffic")]
#[command(version)]
struct Args {
    /// Event store to write (overrides store.database_path)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Days of history to generate, ending now
    #[arg(long, default_value_t = 60)]
    days: u32,

    /// Visitor sessions per day
    #[arg(long, default_value_t = 40)]
    visitors_per_day: u32,

    /// Random seed; the same seed produces the same events
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Generate history ending at this RFC 3339 instant
    #[arg(long)]
    now: Option<DateTime<chrono::FixedOffset>>,
}

const COUNTRIES: &[Option<&str>] = &[Some("JP"), Some("JP"), Some("JP"), Some("US"), Some("KR"), Some("TW"), None];
const REFERRERS: &[Option<&str>] = &[
    None,
    Some("Direct"),
    Some("https://www.google.com/search?q=stock+photos"),
    Some("https://www.google.co.jp/"),
    Some("https://t.co/xyz"),
    Some("https://www.instagram.com/"),
    Some("https://line.me/R/msg/text/"),
    Some("https://blog.example.net/best-assets"),
];
const BROWSERS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];
const BOTS: &[&str] = &[
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
    "Mozilla/5.0 (compatible; AhrefsBot/7.0; +http://ahrefs.com/robot/)",
    "facebookexternalhit/1.1",
];
const PRODUCTS: &[&str] = &["p-100", "p-200", "p-300"];
const SOURCES: &[Option<&str>] = &[Some("product_page"), Some("search"), Some("newsletter"), None];
const CATEGORIES: &[&str] = &["photos", "icons", "fonts", "templates"];

fn pick<T: Copy>(rng: &mut StdRng, items: &[T]) -> T {
    items[rng.gen_range(0..items.len())]
}

#[derive(Default)]
struct Seeded {
    events: Vec<RawEvent>,
    refunded: Vec<RawEvent>,
}

fn generate(args: &Args, now: DateTime<Utc>) -> Seeded {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut out = Seeded::default();
    let start = now - Duration::days(i64::from(args.days));

    for day in 0..args.days {
        let day_start = start + Duration::days(i64::from(day));

        for visitor in 0..args.visitors_per_day {
            let session = format!("s-{}-{}", day, visitor);
            let user = rng.gen_bool(0.4).then(|| format!("user-{:03}", rng.gen_range(0..300)));
            let bot = rng.gen_bool(0.05);
            let agent = if bot { pick(&mut rng, BOTS) } else { pick(&mut rng, BROWSERS) };
            let country = pick(&mut rng, COUNTRIES);
            let product = pick(&mut rng, PRODUCTS);
            let mut at = day_start + Duration::seconds(rng.gen_range(0..86_000));

            let event = |kind: EventKind, at: DateTime<Utc>| {
                let mut e = RawEvent::new("", kind, at);
                e.session_id = Some(session.clone());
                e.user_id = user.clone();
                e.country = country.map(String::from);
                e
            };

            let views = rng.gen_range(1..8);
            let referrer = pick(&mut rng, REFERRERS);
            for _ in 0..views {
                let mut view = event(EventKind::PageView, at);
                view.referrer = referrer.map(String::from);
                view.user_agent = Some(agent.to_string());
                view.product_id = Some(product.to_string());
                out.events.push(view);
                at += Duration::seconds(rng.gen_range(15..240));
            }
            if bot {
                continue;
            }

            if rng.gen_bool(0.25) {
                let mut download = event(EventKind::Download, at);
                download.product_id = Some(product.to_string());
                download.user_agent = Some(agent.to_string());
                download.download_source = pick(&mut rng, SOURCES).map(String::from);
                let categories = rng.gen_range(0..3);
                download.sub_categories =
                    Some((0..categories).map(|_| pick(&mut rng, CATEGORIES).to_string()).collect());
                out.events.push(download);
            }
            if user.is_some() && rng.gen_bool(0.2) {
                let mut order = event(EventKind::Order, at + Duration::minutes(5));
                order.amount = Some(pick(&mut rng, &[0.0, 9.99, 19.99, 49.0, 120.0]));
                order.user_agent = Some(agent.to_string());
                if rng.gen_bool(0.1) {
                    out.refunded.push(order);
                } else {
                    out.events.push(order);
                }
            }
            if rng.gen_bool(0.06) {
                let mut signup = event(EventKind::Signup, at);
                signup.referrer = referrer.map(String::from);
                out.events.push(signup);
            }
            if rng.gen_bool(0.03) {
                out.events.push(event(EventKind::Inquiry, at));
            }
        }

        // A scraper walking the catalogue every few days
        if day % 5 == 0 {
            let at = day_start + Duration::hours(3);
            for i in 0..60 {
                let mut view = RawEvent::new("", EventKind::PageView, at + Duration::milliseconds(300 * i));
                view.session_id = Some(format!("scraper-{}", day));
                view.user_agent = Some(BROWSERS[0].to_string());
                view.product_id = Some(PRODUCTS[(i as usize) % PRODUCTS.len()].to_string());
                out.events.push(view);
            }
        }
    }

    out
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(path) = &args.database {
        config.store.database_path = Some(path.clone());
    }

    let _log_guard =
        storelens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = config.database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open event store {}", db_path.display()))?;
    db.migrate().context("failed to run database migrations")?;

    let now = args
        .now
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let seeded = generate(&args, now);

    let inserted = db
        .insert_events(&seeded.events)
        .context("failed to insert events")?;
    for order in &seeded.refunded {
        db.insert_order(order, "refunded")
            .context("failed to insert refunded order")?;
    }

    tracing::info!(inserted, refunded = seeded.refunded.len(), "Seeded event store");

    println!("Seeded {} at {}", inserted + seeded.refunded.len(), db_path.display());
    for kind in EventKind::ALL {
        println!("  {:<10} {}", kind.table(), db.count_events(kind)?);
    }

    Ok(())
}
