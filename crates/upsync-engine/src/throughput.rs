//! Upload speed and ETA derivation.
//!
//! Speed is a pure function of a bounded window of `(timestamp, cumulative bytes)`
//! samples: per-interval rates smoothed with an exponential moving average.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use upsync_core::constants::ETA_UNKNOWN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub at: Instant,
    /// Contiguous bytes applied at `at`
    pub bytes: u64,
}

/// Bounded FIFO of samples for one file.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn samples(&self) -> &VecDeque<Sample> {
        &self.samples
    }

    pub fn speed(&self) -> u64 {
        smoothed_speed(self.samples.iter().copied())
    }
}

/// EMA of per-interval rates in bytes/sec, with alpha = 2/(k+1) for k intervals.
///
/// Intervals of zero length are folded into the next one. Fewer than two usable points
/// yield 0.
pub fn smoothed_speed<I>(samples: I) -> u64
where
    I: IntoIterator<Item = Sample>,
{
    let mut rates = Vec::new();
    let mut anchor: Option<Sample> = None;

    for sample in samples {
        let Some(prev) = anchor else {
            anchor = Some(sample);
            continue;
        };
        let elapsed = sample.at.saturating_duration_since(prev.at);
        if elapsed == Duration::ZERO {
            continue;
        }
        let bytes = sample.bytes.saturating_sub(prev.bytes);
        rates.push(bytes as f64 / elapsed.as_secs_f64());
        anchor = Some(sample);
    }

    if rates.is_empty() {
        return 0;
    }

    let alpha = 2.0 / (rates.len() as f64 + 1.0);
    let mut ema = rates[0];
    for rate in &rates[1..] {
        ema = alpha * rate + (1.0 - alpha) * ema;
    }
    ema.round() as u64
}

/// Seconds until `remaining` bytes arrive at `speed`, or `ETA_UNKNOWN` without a speed.
pub fn eta_seconds(remaining: u64, speed: u64) -> i64 {
    if remaining == 0 {
        return 0;
    }
    if speed == 0 {
        return ETA_UNKNOWN;
    }
    i64::try_from(remaining.div_ceil(speed)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, millis: u64, bytes: u64) -> Sample {
        Sample {
            at: base + Duration::from_millis(millis),
            bytes,
        }
    }

    #[test]
    fn test_no_speed_without_two_points() {
        let base = Instant::now();
        assert_eq!(smoothed_speed(Vec::new()), 0);
        assert_eq!(smoothed_speed(vec![at(base, 0, 100)]), 0);
    }

    #[test]
    fn test_constant_rate() {
        let base = Instant::now();
        let samples = vec![
            at(base, 0, 0),
            at(base, 1000, 250_000),
            at(base, 2000, 500_000),
            at(base, 3000, 750_000),
        ];
        assert_eq!(smoothed_speed(samples), 250_000);
    }

    #[test]
    fn test_ema_weights_recent_intervals() {
        let base = Instant::now();
        // rates 100 then 400, alpha = 2/3 -> 100 + 2/3 * 300 = 300
        let samples = vec![at(base, 0, 0), at(base, 1000, 100), at(base, 2000, 500)];
        assert_eq!(smoothed_speed(samples), 300);
    }

    #[test]
    fn test_zero_length_intervals_are_folded() {
        let base = Instant::now();
        let samples = vec![
            at(base, 0, 0),
            at(base, 0, 50),
            at(base, 1000, 200),
        ];
        assert_eq!(smoothed_speed(samples), 200);
    }

    #[test]
    fn test_window_is_bounded() {
        let base = Instant::now();
        let mut window = SampleWindow::new(3);
        for i in 0..10u64 {
            window.push(at(base, i * 1000, i * 10));
        }
        assert_eq!(window.samples().len(), 3);
        assert_eq!(window.speed(), 10);
    }

    #[test]
    fn test_eta() {
        assert_eq!(eta_seconds(1000, 0), ETA_UNKNOWN);
        assert_eq!(eta_seconds(0, 0), 0);
        assert_eq!(eta_seconds(1000, 300), 4);
        assert_eq!(eta_seconds(900, 300), 3);
    }
}
