use crate::signal::WindowBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An interval further than this fraction from its baseline is a sensor artifact
/// (two beats merged into one, or a dropped beat).
pub const MAX_RELATIVE_ERROR: f64 = 0.50;
/// Deviation limit of the second screen, in units of the window's sigma.
pub const SIGMA_MULTIPLIER: f64 = 3.0;
/// Subtracted from the retained count when estimating sigma.
pub const SIGMA_BIAS: f64 = 1.5;
/// HRV score is `HRV_SCALE * ln(rmssd)`.
pub const HRV_SCALE: f64 = 20.0;

/// Reduced HRV figures for one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowEstimate {
    /// Timestamp of the newest point in the window
    pub timestamp: DateTime<Utc>,
    pub avg_heart_rate: f64,
    /// Root mean square of successive differences (ms)
    pub rmssd: f64,
    pub hrv: f64,
    /// Largest |interval - baseline| among retained intervals (ms)
    pub max_deviation: f64,
    pub points: usize,
    pub retained: usize,
}

/// Why a window produced no estimate. None of these abort processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NoEstimate {
    #[error("window length must be a positive number of minutes")]
    InvalidWindow,
    #[error("window holds {points} point(s) after trimming, need at least 2")]
    InsufficientData { points: usize },
    #[error("no point in the window has a usable heart rate")]
    NoHeartRate,
    #[error("only {retained} interval(s) passed the relative-error screen")]
    TooFewIntervals { retained: usize },
    #[error("no successive differences left after the sigma screen")]
    NoTransitions,
    #[error("rMSSD is zero")]
    ZeroRmssd,
}

pub fn relative_error(baseline: f64, value: f64) -> f64 {
    (baseline - value).abs() / baseline
}

/// Interval that passed the relative-error screen, with its point's baseline.
#[derive(Debug, Clone, Copy)]
struct ScreenedInterval {
    rr: f64,
    baseline: f64,
}

impl ScreenedInterval {
    fn deviation(&self) -> f64 {
        (self.rr - self.baseline).abs()
    }
}

/// State threaded through the successive-difference pass.
#[derive(Debug, Default)]
struct SuccessiveDiffs {
    last_retained: Option<f64>,
    sum_sq: f64,
    transitions: usize,
    retained: usize,
    max_deviation: f64,
}

impl SuccessiveDiffs {
    fn accept(&mut self, interval: ScreenedInterval) {
        if let Some(last) = self.last_retained {
            let diff = interval.rr - last;
            self.sum_sq += diff * diff;
            self.transitions += 1;
        }
        self.last_retained = Some(interval.rr);
        self.retained += 1;
        self.max_deviation = self.max_deviation.max(interval.deviation());
    }

    fn rmssd(&self) -> Result<f64, NoEstimate> {
        if self.transitions == 0 {
            return Err(NoEstimate::NoTransitions);
        }
        Ok((self.sum_sq / self.transitions as f64).sqrt())
    }
}

/// Trim `buffer` to `window_minutes` and reduce what remains to one estimate.
///
/// The buffer is mutated: points older than the window are removed from the
/// front before the reduction, and stay removed whatever the outcome. A
/// non-finite or non-positive window is rejected before any trimming.
pub fn estimate_window(
    buffer: &mut WindowBuffer,
    window_minutes: f64,
) -> Result<WindowEstimate, NoEstimate> {
    if !(window_minutes.is_finite() && window_minutes > 0.0) {
        return Err(NoEstimate::InvalidWindow);
    }
    buffer.trim_to(window_minutes);
    reduce_window(buffer)
}

/// Two-pass reduction of an already trimmed window.
///
/// Pass 1 drops intervals whose relative error against the baseline implied by
/// their own heart rate exceeds [`MAX_RELATIVE_ERROR`]. Pass 2 drops survivors
/// deviating more than [`SIGMA_MULTIPLIER`] sigma of the window and accumulates
/// successive differences over the rest.
pub fn reduce_window(buffer: &WindowBuffer) -> Result<WindowEstimate, NoEstimate> {
    let points = buffer.len();
    let end = match buffer.last() {
        Some(last) if points >= 2 => last.timestamp,
        _ => return Err(NoEstimate::InsufficientData { points }),
    };

    let mut hr_sum = 0.0;
    let mut hr_count = 0usize;
    let mut screened = Vec::new();
    let mut sum_sq_dev = 0.0;
    for point in buffer.iter() {
        let Some(hr) = point.usable_heart_rate() else {
            continue;
        };
        hr_sum += hr;
        hr_count += 1;
        let baseline = 60_000.0 / hr;
        for &rr in &point.intervals {
            if relative_error(baseline, rr) > MAX_RELATIVE_ERROR {
                continue;
            }
            sum_sq_dev += (rr - baseline).powi(2);
            screened.push(ScreenedInterval { rr, baseline });
        }
    }
    if hr_count == 0 {
        return Err(NoEstimate::NoHeartRate);
    }
    if screened.len() < 2 {
        return Err(NoEstimate::TooFewIntervals {
            retained: screened.len(),
        });
    }

    let sigma = (sum_sq_dev / (screened.len() as f64 - SIGMA_BIAS)).sqrt();
    let sigma3 = sigma * SIGMA_MULTIPLIER;

    let mut diffs = SuccessiveDiffs::default();
    for interval in screened.iter().filter(|i| i.deviation() <= sigma3) {
        diffs.accept(*interval);
    }
    let rmssd = diffs.rmssd()?;
    if rmssd == 0.0 {
        return Err(NoEstimate::ZeroRmssd);
    }

    Ok(WindowEstimate {
        timestamp: end,
        avg_heart_rate: hr_sum / hr_count as f64,
        rmssd,
        hrv: HRV_SCALE * rmssd.ln(),
        max_deviation: diffs.max_deviation,
        points,
        retained: diffs.retained,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::DataPoint;
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2014, 5, 1, 10, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn point(seconds: i64, hr: f64, rr: &[f64]) -> DataPoint {
        let mut p = DataPoint::new(at(seconds), Some(hr));
        p.add_intervals(rr.iter().copied().map(Some));
        p
    }

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        let diff = (actual - expected).abs();
        assert!(
            diff <= tol,
            "expected {expected}, got {actual} (diff {diff} > tol {tol})"
        );
    }

    #[test]
    fn constant_intervals_have_zero_rmssd() {
        let mut buffer: WindowBuffer = [0, 10, 20]
            .into_iter()
            .map(|t| point(t, 60.0, &[1000.0, 1000.0, 1000.0, 1000.0]))
            .collect();
        assert_eq!(
            estimate_window(&mut buffer, 1.0),
            Err(NoEstimate::ZeroRmssd)
        );
    }

    #[test]
    fn merged_beat_leaves_single_interval() {
        let mut buffer: WindowBuffer = [point(0, 60.0, &[1000.0, 1900.0])].into_iter().collect();
        assert_eq!(
            estimate_window(&mut buffer, 1.0),
            Err(NoEstimate::InsufficientData { points: 1 })
        );
        // The same interval pattern inside a two-point window fails on the screen instead.
        let mut buffer: WindowBuffer = [point(0, 60.0, &[1000.0, 1900.0]), point(5, 60.0, &[])]
            .into_iter()
            .collect();
        assert_eq!(
            estimate_window(&mut buffer, 1.0),
            Err(NoEstimate::TooFewIntervals { retained: 1 })
        );
    }

    #[test]
    fn all_intervals_rejected_is_not_a_fault() {
        let mut buffer: WindowBuffer = [
            point(0, 60.0, &[2100.0, 400.0]),
            point(10, 60.0, &[1800.0]),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            estimate_window(&mut buffer, 1.0),
            Err(NoEstimate::TooFewIntervals { retained: 0 })
        );
    }

    #[test]
    fn trims_oldest_point_before_reducing() {
        let mut buffer: WindowBuffer = [
            point(0, 60.0, &[998.0, 1002.0]),
            point(40, 60.0, &[1001.0, 999.0]),
            point(80, 60.0, &[1000.0, 1003.0]),
        ]
        .into_iter()
        .collect();
        let estimate = estimate_window(&mut buffer, 1.0).expect("estimate");
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.first().map(|p| p.timestamp), Some(at(40)));
        assert_eq!(estimate.timestamp, at(80));
        assert_eq!(estimate.points, 2);
        assert_eq!(estimate.retained, 4);
        // 1001 -> 999 -> 1000 -> 1003
        assert_close(estimate.rmssd, (14.0f64 / 3.0).sqrt(), 1e-12);
        assert_close(estimate.hrv, 20.0 * (14.0f64 / 3.0).sqrt().ln(), 1e-12);
        assert_close(estimate.max_deviation, 3.0, 1e-12);
        assert_close(estimate.avg_heart_rate, 60.0, 1e-12);
    }

    #[test]
    fn gross_outlier_contributes_nothing() {
        let clean = [
            point(0, 60.0, &[990.0, 1010.0, 1000.0]),
            point(20, 60.0, &[1005.0, 995.0]),
        ];
        let mut noisy = clean.clone();
        // 1600 and 480 are more than 50% away from the 1000 ms baseline.
        noisy[0].intervals.insert(1, 1600.0);
        noisy[1].intervals.push(480.0);

        let clean: WindowBuffer = clean.into_iter().collect();
        let noisy: WindowBuffer = noisy.into_iter().collect();
        let expected = reduce_window(&clean).expect("clean estimate");
        let actual = reduce_window(&noisy).expect("noisy estimate");
        assert_eq!(actual, expected);
        assert_close(actual.max_deviation, 10.0, 1e-12);
    }

    #[test]
    fn sigma_outlier_is_skipped_without_breaking_the_chain() {
        let first = [
            1000.0, 1010.0, 990.0, 1000.0, 1010.0, 990.0, 1000.0, 1010.0, 990.0, 1000.0,
        ];
        let second = [
            1000.0, 1010.0, 990.0, 1000.0, 1010.0, 990.0, 1000.0, 1010.0, 990.0,
        ];
        let mut with_outlier = second.to_vec();
        // Within 50% of baseline, but far beyond 3 sigma of this window.
        with_outlier.insert(1, 1300.0);

        let clean: WindowBuffer = [point(0, 60.0, &first), point(30, 60.0, &second)]
            .into_iter()
            .collect();
        let noisy: WindowBuffer = [point(0, 60.0, &first), point(30, 60.0, &with_outlier)]
            .into_iter()
            .collect();

        let expected = reduce_window(&clean).expect("clean estimate");
        let actual = reduce_window(&noisy).expect("noisy estimate");
        assert_eq!(actual.retained, 19);
        assert_close(actual.rmssd, expected.rmssd, 1e-12);
        assert_close(actual.max_deviation, 10.0, 1e-12);

        let sequence: Vec<f64> = first.iter().chain(second.iter()).copied().collect();
        let sum_sq: f64 = sequence.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
        assert_close(actual.rmssd, (sum_sq / 18.0).sqrt(), 1e-12);
    }

    #[test]
    fn average_heart_rate_covers_every_point() {
        let buffer: WindowBuffer = [
            point(0, 60.0, &[1000.0, 1004.0]),
            point(10, 75.0, &[2000.0]),
            point(20, 60.0, &[998.0, 1003.0]),
        ]
        .into_iter()
        .collect();
        let estimate = reduce_window(&buffer).expect("estimate");
        assert_close(estimate.avg_heart_rate, 65.0, 1e-12);
        assert_eq!(estimate.retained, 4);
    }

    #[test]
    fn missing_heart_rate_everywhere() {
        let mut a = DataPoint::new(at(0), None);
        a.add_intervals([Some(1000.0), Some(1010.0)]);
        let mut b = DataPoint::new(at(10), None);
        b.add_intervals([Some(990.0)]);
        let buffer: WindowBuffer = [a, b].into_iter().collect();
        assert_eq!(reduce_window(&buffer), Err(NoEstimate::NoHeartRate));
    }

    #[test]
    fn repeated_estimate_is_identical() {
        let mut buffer: WindowBuffer = [
            point(0, 62.0, &[960.0, 985.0]),
            point(30, 64.0, &[940.0, 952.0, 931.0]),
            point(70, 63.0, &[948.0, 955.0]),
        ]
        .into_iter()
        .collect();
        let first = estimate_window(&mut buffer, 1.0);
        let len = buffer.len();
        let second = estimate_window(&mut buffer, 1.0);
        assert!(first.is_ok());
        assert_eq!(first, second);
        assert_eq!(buffer.len(), len);
    }

    #[test]
    fn rejects_unusable_window_without_trimming() {
        for window in [-1.0, 0.0, f64::NAN, f64::INFINITY] {
            let mut buffer: WindowBuffer = [
                point(0, 60.0, &[998.0, 1002.0]),
                point(40, 60.0, &[1001.0, 999.0]),
                point(80, 60.0, &[1000.0, 1003.0]),
            ]
            .into_iter()
            .collect();
            assert_eq!(
                estimate_window(&mut buffer, window),
                Err(NoEstimate::InvalidWindow)
            );
            assert_eq!(buffer.len(), 3);
        }
    }

    #[test]
    fn relative_error_is_against_baseline() {
        assert_close(relative_error(1000.0, 1900.0), 0.9, 1e-12);
        assert_close(relative_error(800.0, 600.0), 0.25, 1e-12);
    }
}
