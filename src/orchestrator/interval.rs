//! History interval selection
//!
//! Markets close to resolution need fine-grained history; long-dated ones
//! are fine at daily resolution unless daily history is too sparse.

use chrono::{DateTime, Utc};

use crate::tools::{HistoryInterval, MarketPayload};

const HOURLY_WITHIN_DAYS: f64 = 3.0;
const FOUR_HOURLY_WITHIN_DAYS: f64 = 30.0;
const MIN_DAILY_POINTS: usize = 14;

fn days_to_close(payload: &MarketPayload, now: DateTime<Utc>) -> Option<f64> {
    let close = payload.close_time_secs()?;
    Some((close - now.timestamp()) as f64 / 86_400.0)
}

pub fn select_history_interval(payload: &MarketPayload, now: DateTime<Utc>) -> HistoryInterval {
    match days_to_close(payload, now) {
        None => HistoryInterval::OneDay,
        Some(d) if d <= HOURLY_WITHIN_DAYS => HistoryInterval::OneHour,
        Some(d) if d <= FOUR_HOURLY_WITHIN_DAYS => HistoryInterval::FourHours,
        Some(_) if payload.history_points() < MIN_DAILY_POINTS => HistoryInterval::FourHours,
        Some(_) => HistoryInterval::OneDay,
    }
}

/// Human-readable reason for the chosen interval.
pub fn explain_interval_choice(interval: HistoryInterval, payload: &MarketPayload, now: DateTime<Utc>) -> String {
    let points = payload.history_points();
    match days_to_close(payload, now) {
        None => format!("{}: no close time reported, using daily history ({} points)", interval, points),
        Some(d) if d <= 0.0 => format!("{}: market is past its close time", interval),
        Some(d) => {
            let reason = match interval {
                HistoryInterval::OneHour => "close is imminent, hourly moves matter",
                HistoryInterval::FourHours if d > FOUR_HOURLY_WITHIN_DAYS => "daily history is sparse",
                HistoryInterval::FourHours => "close is within a month",
                HistoryInterval::OneDay => "long horizon with enough daily history",
            };
            format!("{}: {} ({:.1} days to close, {} points)", interval, reason, d, points)
        }
    }
}
