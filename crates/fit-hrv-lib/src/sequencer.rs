use crate::{
    config::WindowConfig,
    io::records::{stream_start, Record},
    metrics::hrv::{estimate_window, WindowEstimate},
    report::{HrvRow, HrvSeries},
    signal::{elapsed_minutes, elapsed_seconds, DataPoint, WindowBuffer},
};
use chrono::{DateTime, Utc};
use log::{debug, info};

/// Groups records into data points and emits sliding-window HRV estimates.
///
/// A data point is committed to the window when the next heart-rate sample
/// arrives, so the final point of a stream is never estimated.
#[derive(Debug)]
pub struct HrvSequencer {
    config: WindowConfig,
    buffer: WindowBuffer,
    current: Option<DataPoint>,
    start: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    estimates: Vec<WindowEstimate>,
    series: HrvSeries,
}

impl HrvSequencer {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            buffer: WindowBuffer::new(),
            current: None,
            start: None,
            last_attempt: None,
            estimates: Vec::new(),
            series: HrvSeries::new(),
        }
    }

    /// Fix time zero instead of taking it from the first heart-rate sample.
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn push(&mut self, record: &Record) {
        match record {
            Record::Start { timestamp } => {
                self.start.get_or_insert(*timestamp);
            }
            Record::HeartRate {
                timestamp,
                heart_rate,
            } => self.on_heart_rate(*timestamp, *heart_rate),
            Record::Intervals { values } => {
                if let Some(point) = self.current.as_mut() {
                    point.add_intervals(values.iter().copied());
                }
            }
            other => {
                if let Some(summary) = other.summary() {
                    info!("{}", summary);
                }
            }
        }
    }

    fn on_heart_rate(&mut self, timestamp: DateTime<Utc>, heart_rate: Option<f64>) {
        self.start.get_or_insert(timestamp);
        if let Some(point) = self.current.take() {
            if point.has_rr() {
                self.commit(point);
            }
        }
        self.current = Some(DataPoint::new(timestamp, heart_rate));
    }

    fn commit(&mut self, point: DataPoint) {
        let end = point.timestamp;
        self.buffer.push(point);
        if !self.admits(end) {
            return;
        }
        self.last_attempt = Some(end);
        match estimate_window(&mut self.buffer, self.config.window_minutes) {
            Ok(estimate) => self.record(estimate),
            Err(reason) => debug!("{} window skipped: {}", end, reason),
        }
    }

    /// The window must be longer than the target, and far enough from the previous attempt.
    fn admits(&self, end: DateTime<Utc>) -> bool {
        if self.buffer.duration_in_minutes() <= self.config.window_minutes {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(last) => elapsed_minutes(last, end) > self.config.min_spacing_minutes(),
        }
    }

    fn record(&mut self, estimate: WindowEstimate) {
        info!(
            "{} HR: {:.1} rMSSD: {:.3} HRV: {:.3} |d_RR|_max: {}",
            estimate.timestamp,
            estimate.avg_heart_rate,
            estimate.rmssd,
            estimate.hrv,
            estimate.max_deviation
        );
        let start = self.start.unwrap_or(estimate.timestamp);
        self.series.push(HrvRow {
            elapsed_s: elapsed_seconds(start, estimate.timestamp),
            avg_heart_rate: estimate.avg_heart_rate,
            hrv: estimate.hrv,
        });
        self.estimates.push(estimate);
    }

    pub fn window(&self) -> &WindowBuffer {
        &self.buffer
    }

    pub fn estimates(&self) -> &[WindowEstimate] {
        &self.estimates
    }

    pub fn series(&self) -> &HrvSeries {
        &self.series
    }

    pub fn finish(self) -> HrvSeries {
        self.series
    }
}

/// Run the whole record stream through a fresh sequencer.
pub fn run_sequencer(records: &[Record], config: &WindowConfig) -> HrvSeries {
    let mut sequencer = HrvSequencer::new(*config);
    if let Some(start) = stream_start(records) {
        sequencer = sequencer.with_start(start);
    }
    for record in records {
        sequencer.push(record);
    }
    sequencer.finish()
}
