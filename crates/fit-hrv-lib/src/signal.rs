use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One heart-rate sample together with the R-R intervals (ms) reported after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    /// Instantaneous heart rate in bpm
    pub heart_rate: Option<f64>,
    /// R-R intervals in milliseconds
    pub intervals: Vec<f64>,
}

impl DataPoint {
    pub fn new(timestamp: DateTime<Utc>, heart_rate: Option<f64>) -> Self {
        Self {
            timestamp,
            heart_rate,
            intervals: Vec::new(),
        }
    }

    /// Append a raw interval batch, dropping null placeholders.
    pub fn add_intervals<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        self.intervals.extend(values.into_iter().flatten());
    }

    pub fn has_rr(&self) -> bool {
        !self.intervals.is_empty()
    }

    /// Heart rate if it can produce a baseline interval.
    pub fn usable_heart_rate(&self) -> Option<f64> {
        self.heart_rate.filter(|hr| hr.is_finite() && *hr > 0.0)
    }

    /// Expected R-R interval (ms) implied by the heart rate.
    pub fn baseline_ms(&self) -> Option<f64> {
        self.usable_heart_rate().map(|hr| 60_000.0 / hr)
    }
}

/// Trailing span of data points under analysis, oldest first.
///
/// Points are only ever appended at the back and trimmed from the front.
#[derive(Debug, Clone, Default)]
pub struct WindowBuffer {
    points: VecDeque<DataPoint>,
}

impl WindowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, point: DataPoint) {
        self.points.push_back(point);
    }

    pub fn first(&self) -> Option<&DataPoint> {
        self.points.front()
    }

    pub fn last(&self) -> Option<&DataPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataPoint> {
        self.points.iter()
    }

    /// Span between the first and last point in minutes, 0 with fewer than two points.
    pub fn duration_in_minutes(&self) -> f64 {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) if self.points.len() >= 2 => {
                elapsed_minutes(first.timestamp, last.timestamp)
            }
            _ => 0.0,
        }
    }

    /// Drop the oldest points until the span fits within `window_minutes`.
    ///
    /// Never removes the last remaining point. Returns the number of points removed.
    pub fn trim_to(&mut self, window_minutes: f64) -> usize {
        let mut removed = 0;
        while self.points.len() >= 2 && self.duration_in_minutes() > window_minutes {
            self.points.pop_front();
            removed += 1;
        }
        removed
    }
}

impl FromIterator<DataPoint> for WindowBuffer {
    fn from_iter<T: IntoIterator<Item = DataPoint>>(iter: T) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

/// Seconds from `from` to `to`, fractional.
pub fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

pub fn elapsed_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    elapsed_seconds(from, to) / 60.0
}
