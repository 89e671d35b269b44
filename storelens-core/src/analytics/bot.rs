//! User-agent based bot filtering
//!
//! Crawlers, link-preview fetchers and scripted clients inflate traffic
//! without being visitors. They are recognised by a case-insensitive
//! substring match on the raw user-agent string.
//!
//! | Family | Examples |
//! |--------|----------|
//! | Search engines | googlebot, bingbot, yandexbot, baiduspider, duckduckbot |
//! | Link previews | facebookexternalhit, twitterbot, slackbot, discordbot, line |
//! | SEO crawlers | ahrefsbot, semrushbot, mj12bot, dotbot |
//! | Archives | ia_archiver, archive.org_bot |
//! | Scripted clients | headlesschrome, phantomjs, curl, python-requests |

use crate::types::RawEvent;

/// Lowercase user-agent fragments that identify non-human traffic.
const BOT_SIGNATURES: &[&str] = &[
    // Search engines
    "googlebot",
    "google-inspectiontool",
    "adsbot-google",
    "mediapartners-google",
    "bingbot",
    "bingpreview",
    "yandexbot",
    "baiduspider",
    "duckduckbot",
    "slurp",
    "applebot",
    "petalbot",
    "sogou",
    "exabot",
    // Social link previews
    "facebookexternalhit",
    "facebookcatalog",
    "twitterbot",
    "linkedinbot",
    "pinterestbot",
    "slackbot",
    "discordbot",
    "telegrambot",
    "whatsapp",
    "line-poker",
    "skypeuripreview",
    "embedly",
    // SEO crawlers
    "ahrefsbot",
    "semrushbot",
    "mj12bot",
    "dotbot",
    "rogerbot",
    "screaming frog",
    "seznambot",
    "blexbot",
    "dataforseobot",
    // Archives
    "ia_archiver",
    "archive.org_bot",
    // Scripted and headless clients
    "headlesschrome",
    "phantomjs",
    "puppeteer",
    "playwright",
    "selenium",
    "curl/",
    "wget/",
    "python-requests",
    "python-urllib",
    "go-http-client",
    "okhttp",
    "axios/",
    "node-fetch",
    "scrapy",
    // Generic markers
    "bot/",
    "crawler",
    "spider",
];

/// Whether a user-agent string belongs to a known bot.
///
/// Missing or empty user agents are treated as human.
pub fn is_bot(user_agent: Option<&str>) -> bool {
    let Some(ua) = user_agent.map(str::trim).filter(|ua| !ua.is_empty()) else {
        return false;
    };
    let ua = ua.to_lowercase();
    BOT_SIGNATURES.iter().any(|sig| ua.contains(sig))
}

/// Removes bot traffic from an event set.
#[derive(Debug, Clone, Copy, Default)]
pub struct BotFilter;

impl BotFilter {
    pub fn new() -> Self {
        Self
    }

    /// Keep events whose user agent is not a known bot.
    ///
    /// Returns the kept events in their original order and the number removed.
    pub fn retain_humans(&self, events: Vec<RawEvent>) -> (Vec<RawEvent>, usize) {
        let before = events.len();
        let kept: Vec<RawEvent> = events
            .into_iter()
            .filter(|e| !is_bot(e.user_agent.as_deref()))
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            tracing::debug!(removed, kept = kept.len(), "Filtered bot events");
        }
        (kept, removed)
    }
}
