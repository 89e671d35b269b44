//! Period-over-period growth
//!
//! The prior window has the same length as the current one and ends where
//! the current one starts.

use serde::Serialize;

use crate::types::{round1, MetricsSnapshot, Window};

/// Headline totals of one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PeriodTotals {
    pub visitors: u64,
    pub revenue: f64,
    pub new_users: u64,
    pub page_views: u64,
}

/// The window of equal length immediately before `current`.
pub fn prior_window(current: &Window) -> Window {
    Window::new(current.start - current.duration(), current.start)
}

/// Percentage change from `previous` to `current`.
///
/// Growth from nothing is reported as 100%; no activity in either window is 0%.
pub fn change_pct(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Combine current and prior totals into the report's headline snapshot.
pub fn snapshot(current: &PeriodTotals, prior: &PeriodTotals) -> MetricsSnapshot {
    MetricsSnapshot {
        total_visitors: current.visitors,
        visitors_change_pct: round1(change_pct(
            current.visitors as f64,
            prior.visitors as f64,
        )),
        total_revenue: current.revenue,
        revenue_change_pct: round1(change_pct(current.revenue, prior.revenue)),
        total_new_users: current.new_users,
        new_users_change_pct: round1(change_pct(
            current.new_users as f64,
            prior.new_users as f64,
        )),
        total_page_views: current.page_views,
        page_views_change_pct: round1(change_pct(
            current.page_views as f64,
            prior.page_views as f64,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_change_pct_edges() {
        assert_eq!(change_pct(0.0, 0.0), 0.0);
        assert_eq!(change_pct(5.0, 0.0), 100.0);
        assert_eq!(change_pct(150.0, 100.0), 50.0);
        assert_eq!(change_pct(50.0, 100.0), -50.0);
        assert_eq!(change_pct(0.0, 80.0), -100.0);
    }

    #[test]
    fn test_change_pct_of_equal_values_is_zero() {
        for x in [1.0, 3.0, 17.5, 1_000_000.0] {
            assert_eq!(change_pct(x, x), 0.0);
        }
    }

    #[test]
    fn test_prior_window_is_adjacent_and_equal_length() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let current = Window::new(start, start + Duration::days(7));
        let prior = prior_window(&current);

        assert_eq!(prior.end, current.start);
        assert_eq!(prior.duration(), current.duration());
        assert_eq!(prior.start, Utc.with_ymd_and_hms(2024, 2, 26, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_snapshot_rounds_changes() {
        let current = PeriodTotals {
            visitors: 4,
            revenue: 120.0,
            new_users: 2,
            page_views: 10,
        };
        let prior = PeriodTotals {
            visitors: 3,
            revenue: 0.0,
            new_users: 2,
            page_views: 0,
        };
        let snap = snapshot(&current, &prior);

        assert_eq!(snap.total_visitors, 4);
        assert_eq!(snap.visitors_change_pct, 33.3);
        assert_eq!(snap.revenue_change_pct, 100.0);
        assert_eq!(snap.new_users_change_pct, 0.0);
        assert_eq!(snap.page_views_change_pct, 100.0);
        assert_eq!(snap.total_revenue, 120.0);
    }
}
