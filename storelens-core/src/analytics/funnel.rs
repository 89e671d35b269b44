//! Free-to-paid conversion funnel
//!
//! Downloads are the free action; a completed paid purchase in the ledger
//! is the paid one. Only downloads with a known user can be followed to a
//! purchase, so anonymous downloads are counted but kept out of the rate.
//!
//! The ledger accepts a bounded list of user ids per query. Distinct users
//! are sorted, chunked and queried concurrently; the rate is only computed
//! once every batch has answered, and any failed batch fails the funnel.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::types::{round1, ConversionSnapshot, RawEvent};

/// Order status that counts as a completed purchase.
pub const PAID_STATUS: &str = "paid";

/// Which ledger entries count as a paid conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerFilter {
    pub status: String,
    /// Purchases must be strictly above this amount
    pub min_amount: f64,
}

impl Default for LedgerFilter {
    fn default() -> Self {
        Self {
            status: PAID_STATUS.to_string(),
            min_amount: 0.0,
        }
    }
}

/// Source of purchase records.
#[async_trait]
pub trait PurchaseLedger: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Largest id list one `paid_users` call accepts.
    fn max_batch_size(&self) -> usize;

    /// Subset of `user_ids` with at least one purchase matching `filter`.
    async fn paid_users(&self, user_ids: &[String], filter: &LedgerFilter) -> Result<HashSet<String>>;
}

/// Computes the download-to-purchase conversion rate.
#[derive(Clone)]
pub struct ConversionFunnelAnalyzer {
    ledger: Arc<dyn PurchaseLedger>,
    batch_size: usize,
    filter: LedgerFilter,
}

impl ConversionFunnelAnalyzer {
    /// Batches are capped at the ledger's own maximum.
    pub fn new(ledger: Arc<dyn PurchaseLedger>, batch_size: usize, filter: LedgerFilter) -> Self {
        let batch_size = batch_size.clamp(1, ledger.max_batch_size().max(1));
        Self {
            ledger,
            batch_size,
            filter,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn analyze(&self, downloads: &[RawEvent]) -> Result<ConversionSnapshot> {
        let mut users = BTreeSet::new();
        let mut anonymous = 0u64;
        for event in downloads {
            match event.known_user() {
                Some(user) => {
                    users.insert(user.to_string());
                }
                None => anonymous += 1,
            }
        }

        let users: Vec<String> = users.into_iter().collect();
        let converted = self.converted_users(&users).await?;

        let distinct = users.len() as u64;
        let converted_count = converted.len() as u64;
        let rate = if distinct == 0 {
            0.0
        } else {
            round1(converted_count as f64 / distinct as f64 * 100.0)
        };

        tracing::debug!(
            ledger = self.ledger.name(),
            distinct,
            converted = converted_count,
            anonymous,
            "Conversion funnel computed"
        );

        Ok(ConversionSnapshot {
            distinct_identified_users: distinct,
            converted_user_count: converted_count,
            conversion_rate_pct: rate,
            anonymous_event_count: anonymous,
        })
    }

    /// Union of paid users over every batch, or the first batch error.
    async fn converted_users(&self, users: &[String]) -> Result<HashSet<String>> {
        let mut tasks = JoinSet::new();
        for batch in users.chunks(self.batch_size) {
            let ledger = Arc::clone(&self.ledger);
            let filter = self.filter.clone();
            let batch = batch.to_vec();
            tasks.spawn(async move { ledger.paid_users(&batch, &filter).await });
        }

        let mut converted = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let batch_result = match joined {
                Ok(result) => result,
                Err(e) => Err(Error::Ledger(format!("ledger batch task failed: {}", e))),
            };
            match batch_result {
                Ok(paid) => converted.extend(paid),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }
        Ok(converted)
    }
}
