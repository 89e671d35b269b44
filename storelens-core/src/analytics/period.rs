//! Calendar-aligned time buckets
//!
//! Buckets are aligned to the start of their period in the caller's time
//! zone (local midnight, Monday midnight, first-of-month midnight) and
//! returned as UTC half-open intervals. The grid is contiguous: each bucket
//! ends where the next begins.
//!
//! The final bucket is stretched past the computation instant so an event
//! logged at "now" still falls inside it. Daily grids end at the next local
//! midnight; weekly and monthly grids end one second after `now`.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::types::{Granularity, TimeBucket, Window};

/// Margin added past `now` for weekly and monthly grids.
const END_MARGIN_SECS: i64 = 1;

/// Build `count` ascending buckets ending with the period containing `now`.
pub fn bucketize<Tz: TimeZone>(
    granularity: Granularity,
    count: u32,
    now: &DateTime<Tz>,
) -> Result<Vec<TimeBucket>> {
    if count == 0 {
        return Err(Error::Config("bucket count must be greater than 0".to_string()));
    }

    let tz = now.timezone();
    let aligned = align_down(granularity, now.date_naive());
    let first = step_back(granularity, aligned, count - 1)?;

    // Period start dates, plus the boundary after the last one
    let mut dates = Vec::with_capacity(count as usize + 1);
    let mut date = first;
    for _ in 0..=count {
        dates.push(date);
        date = step_forward(granularity, date)?;
    }

    let mut starts = Vec::with_capacity(dates.len());
    for date in &dates {
        starts.push(local_midnight(&tz, *date)?);
    }

    let now_utc = now.with_timezone(&Utc);
    let mut buckets = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let end = if i + 1 == count as usize {
            match granularity {
                Granularity::Daily => starts[i + 1],
                Granularity::Weekly | Granularity::Monthly => {
                    now_utc + chrono::Duration::seconds(END_MARGIN_SECS)
                }
            }
        } else {
            starts[i + 1]
        };
        buckets.push(TimeBucket {
            label: label(granularity, dates[i]),
            start: starts[i],
            end,
        });
    }

    Ok(buckets)
}

/// The window a bucket grid covers: `[first.start, last.end)`.
pub fn grid_window(buckets: &[TimeBucket]) -> Option<Window> {
    let first = buckets.first()?;
    let last = buckets.last()?;
    Some(Window::new(first.start, last.end))
}

fn align_down(granularity: Granularity, date: NaiveDate) -> NaiveDate {
    match granularity {
        Granularity::Daily => date,
        Granularity::Weekly => {
            date - Days::new(u64::from(date.weekday().num_days_from_monday()))
        }
        // Day 1 always exists
        Granularity::Monthly => date - Days::new(u64::from(date.day0())),
    }
}

fn step_back(granularity: Granularity, date: NaiveDate, periods: u32) -> Result<NaiveDate> {
    let shifted = match granularity {
        Granularity::Daily => date.checked_sub_days(Days::new(u64::from(periods))),
        Granularity::Weekly => date.checked_sub_days(Days::new(7 * u64::from(periods))),
        // `date` is already the 1st, so month arithmetic cannot overflow the day
        Granularity::Monthly => date.checked_sub_months(Months::new(periods)),
    };
    shifted.ok_or_else(|| Error::InvalidRequest(format!("date out of range: {} - {} periods", date, periods)))
}

fn step_forward(granularity: Granularity, date: NaiveDate) -> Result<NaiveDate> {
    let shifted = match granularity {
        Granularity::Daily => date.checked_add_days(Days::new(1)),
        Granularity::Weekly => date.checked_add_days(Days::new(7)),
        Granularity::Monthly => date.checked_add_months(Months::new(1)),
    };
    shifted.ok_or_else(|| Error::InvalidRequest(format!("date out of range after {}", date)))
}

/// First instant of `date` in `tz`.
///
/// Where a DST transition skips midnight, the day starts at the first
/// existing hour.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<DateTime<Utc>> {
    for hour in 0..=2 {
        let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
        if let Some(start) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            return Ok(start.with_timezone(&Utc));
        }
    }
    Err(Error::InvalidRequest(format!(
        "no local start of day for {}",
        date
    )))
}

fn label(granularity: Granularity, date: NaiveDate) -> String {
    match granularity {
        Granularity::Daily | Granularity::Weekly => date.format("%Y-%m-%d").to_string(),
        Granularity::Monthly => date.format("%Y-%m").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset};

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn assert_contiguous(buckets: &[TimeBucket]) {
        for pair in buckets.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap at {}", pair[1].label);
            assert!(pair[0].start < pair[0].end);
        }
        let last = buckets.last().unwrap();
        assert!(last.start < last.end);
    }

    #[test]
    fn test_daily_seven_buckets() {
        let now = utc(2024, 3, 10, 15);
        let buckets = bucketize(Granularity::Daily, 7, &now).unwrap();

        assert_eq!(buckets.len(), 7);
        assert_eq!(buckets[0].start, utc(2024, 3, 4, 0));
        assert_eq!(buckets[0].label, "2024-03-04");
        assert_eq!(buckets[6].start, utc(2024, 3, 10, 0));
        assert!(buckets[6].end > now);
        assert_eq!(buckets[6].end, utc(2024, 3, 11, 0));
        assert_contiguous(&buckets);
    }

    #[test]
    fn test_weekly_aligns_to_monday() {
        // 2024-03-10 is a Sunday
        let now = utc(2024, 3, 10, 15);
        let buckets = bucketize(Granularity::Weekly, 4, &now).unwrap();

        assert_eq!(buckets[3].start, utc(2024, 3, 4, 0));
        assert_eq!(buckets[0].start, utc(2024, 2, 12, 0));
        assert_eq!(buckets[3].end, now + Duration::seconds(1));
        assert_contiguous(&buckets);
    }

    #[test]
    fn test_monthly_from_the_31st() {
        let now = utc(2024, 3, 31, 23);
        let buckets = bucketize(Granularity::Monthly, 3, &now).unwrap();

        let labels: Vec<_> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(buckets[1].start, utc(2024, 2, 1, 0));
        assert_eq!(buckets[1].end, utc(2024, 3, 1, 0));
        assert!(buckets[2].end > now);
        assert_contiguous(&buckets);
    }

    #[test]
    fn test_monthly_across_year_boundary() {
        let now = utc(2024, 1, 15, 8);
        let buckets = bucketize(Granularity::Monthly, 12, &now).unwrap();
        assert_eq!(buckets[0].start, utc(2023, 2, 1, 0));
        assert_eq!(buckets[11].start, utc(2024, 1, 1, 0));
    }

    #[test]
    fn test_local_midnight_in_offset_zone() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let now = tokyo.with_ymd_and_hms(2024, 3, 10, 1, 0, 0).unwrap();
        let buckets = bucketize(Granularity::Daily, 1, &now).unwrap();

        // Local midnight in Tokyo is 15:00 UTC the previous day
        assert_eq!(buckets[0].start, utc(2024, 3, 9, 15));
        assert_eq!(buckets[0].label, "2024-03-10");
        assert!(buckets[0].contains(now.with_timezone(&Utc)));
    }

    #[test]
    fn test_event_at_now_is_never_dropped() {
        for granularity in [Granularity::Daily, Granularity::Weekly, Granularity::Monthly] {
            let now = utc(2024, 6, 30, 23) + Duration::minutes(59) + Duration::seconds(59);
            let buckets = bucketize(granularity, 5, &now).unwrap();
            assert!(buckets.last().unwrap().contains(now), "{granularity}");
        }
    }

    #[test]
    fn test_grid_is_contiguous_for_many_instants() {
        let start = utc(2023, 1, 1, 0);
        for step in 0..200 {
            let now = start + Duration::hours(step * 47);
            for granularity in [Granularity::Daily, Granularity::Weekly, Granularity::Monthly] {
                for count in [1, 2, 7, 13] {
                    let buckets = bucketize(granularity, count, &now).unwrap();
                    assert_eq!(buckets.len(), count as usize);
                    assert_contiguous(&buckets);
                    let window = grid_window(&buckets).unwrap();
                    assert_eq!(window.start, buckets[0].start);
                    assert!(window.end > now);
                    assert!(buckets[0].start <= now);
                }
            }
        }
    }

    #[test]
    fn test_zero_buckets_is_rejected() {
        let now = utc(2024, 3, 10, 15);
        assert!(matches!(
            bucketize(Granularity::Daily, 0, &now),
            Err(Error::Config(_))
        ));
        assert!(grid_window(&[]).is_none());
    }
}
