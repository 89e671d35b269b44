//! Per-bucket time-series metrics
//!
//! Every event lands in at most one bucket by half-open membership. Events
//! outside the grid are dropped without error.

use std::collections::HashSet;

use crate::types::{RawEvent, SeriesPoint, TimeBucket};

/// Index of the bucket containing `event`, if any.
///
/// Buckets are ascending and contiguous, so a binary search on start is enough.
fn bucket_index(buckets: &[TimeBucket], event: &RawEvent) -> Option<usize> {
    let ts = event.created_at;
    let idx = buckets.partition_point(|b| b.start <= ts);
    if idx == 0 {
        return None;
    }
    let candidate = idx - 1;
    buckets[candidate].contains(ts).then_some(candidate)
}

/// Build one [`SeriesPoint`] per bucket.
///
/// `orders` contribute their `amount` to revenue (unknown amounts add 0),
/// `signups` count as new users.
pub fn aggregate(
    buckets: &[TimeBucket],
    page_views: &[RawEvent],
    orders: &[RawEvent],
    signups: &[RawEvent],
    inquiries: &[RawEvent],
) -> Vec<SeriesPoint> {
    let mut points: Vec<SeriesPoint> = buckets
        .iter()
        .map(|b| SeriesPoint {
            label: b.label.clone(),
            start: b.start,
            page_views: 0,
            unique_visitors: 0,
            order_count: 0,
            revenue: 0.0,
            new_users: 0,
            inquiry_count: 0,
        })
        .collect();
    let mut visitors: Vec<HashSet<String>> = vec![HashSet::new(); buckets.len()];

    for event in page_views {
        if let Some(i) = bucket_index(buckets, event) {
            points[i].page_views += 1;
            visitors[i].insert(event.identity_key());
        }
    }
    for event in orders {
        if let Some(i) = bucket_index(buckets, event) {
            points[i].order_count += 1;
            points[i].revenue += event.amount.unwrap_or(0.0);
        }
    }
    for event in signups {
        if let Some(i) = bucket_index(buckets, event) {
            points[i].new_users += 1;
        }
    }
    for event in inquiries {
        if let Some(i) = bucket_index(buckets, event) {
            points[i].inquiry_count += 1;
        }
    }

    for (point, set) in points.iter_mut().zip(visitors) {
        point.unique_visitors = set.len() as u64;
    }
    points
}

/// Distinct visitor identities across a whole event set.
pub fn distinct_visitors(events: &[RawEvent]) -> u64 {
    events
        .iter()
        .map(RawEvent::identity_key)
        .collect::<HashSet<_>>()
        .len() as u64
}
