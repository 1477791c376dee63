//! Open-loop arrival scheduling
//!
//! Issue times are derived from the target rate alone and never from
//! observed latency. A controller is consumed by [`RateController::schedule`]
//! and cannot be restarted.

use crate::error::ConfigError;
use std::time::Duration;

/// One linearly interpolated stretch of a ramping schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampSegment {
    pub duration: Duration,
    /// Rate reached at the end of the segment (req/s)
    pub target_rate: f64,
}

/// Rate-shaping discipline
#[derive(Debug, Clone, PartialEq)]
pub enum RateShape {
    /// One arrival grid at a fixed rate for the whole duration
    Constant { rate: f64, duration: Duration },
    /// Segments whose rate moves linearly from the previous segment's end
    Ramping {
        start_rate: f64,
        segments: Vec<RampSegment>,
    },
}

/// Produces issue offsets (relative to round start) for one round
#[derive(Debug, Clone)]
pub struct RateController {
    shape: RateShape,
}

impl RateController {
    pub fn constant(rate: f64, duration: Duration) -> Result<Self, ConfigError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::InvalidRate(rate));
        }
        if duration.is_zero() {
            return Err(ConfigError::InvalidDuration("constant rate"));
        }
        Ok(Self {
            shape: RateShape::Constant { rate, duration },
        })
    }

    pub fn ramping(start_rate: f64, segments: Vec<RampSegment>) -> Result<Self, ConfigError> {
        if !start_rate.is_finite() || start_rate < 0.0 {
            return Err(ConfigError::InvalidRate(start_rate));
        }
        if segments.is_empty() {
            return Err(ConfigError::InvalidDuration("ramp"));
        }
        for segment in &segments {
            if !segment.target_rate.is_finite() || segment.target_rate < 0.0 {
                return Err(ConfigError::InvalidRate(segment.target_rate));
            }
            if segment.duration.is_zero() {
                return Err(ConfigError::InvalidDuration("ramp segment"));
            }
        }
        Ok(Self {
            shape: RateShape::Ramping {
                start_rate,
                segments,
            },
        })
    }

    pub fn shape(&self) -> &RateShape {
        &self.shape
    }

    pub fn total_duration(&self) -> Duration {
        match &self.shape {
            RateShape::Constant { duration, .. } => *duration,
            RateShape::Ramping { segments, .. } => segments.iter().map(|s| s.duration).sum(),
        }
    }

    /// Highest instantaneous rate anywhere in the schedule
    pub fn peak_rate(&self) -> f64 {
        match &self.shape {
            RateShape::Constant { rate, .. } => *rate,
            RateShape::Ramping {
                start_rate,
                segments,
            } => segments
                .iter()
                .map(|s| s.target_rate)
                .fold(*start_rate, f64::max),
        }
    }

    /// Rate at the end of the schedule
    pub fn final_rate(&self) -> f64 {
        match &self.shape {
            RateShape::Constant { rate, .. } => *rate,
            RateShape::Ramping {
                start_rate,
                segments,
            } => segments.last().map(|s| s.target_rate).unwrap_or(*start_rate),
        }
    }

    /// Area under the rate curve
    pub fn expected_arrivals(&self) -> f64 {
        self.segments().iter().map(Segment::arrivals).sum()
    }

    /// Concurrency slots needed so the issuer does not become the bottleneck
    ///
    /// `rate × worst_latency`, clamped to `[floor, ceiling]`.
    pub fn capacity_for(rate: f64, worst_latency: Duration, floor: usize, ceiling: usize) -> usize {
        let wanted = (rate.max(0.0) * worst_latency.as_secs_f64()).ceil() as usize;
        wanted.max(floor).min(ceiling.max(1))
    }

    fn segments(&self) -> Vec<Segment> {
        match &self.shape {
            RateShape::Constant { rate, duration } => vec![Segment {
                start_rate: *rate,
                end_rate: *rate,
                secs: duration.as_secs_f64(),
            }],
            RateShape::Ramping {
                start_rate,
                segments,
            } => {
                let mut from = *start_rate;
                segments
                    .iter()
                    .map(|s| {
                        let segment = Segment {
                            start_rate: from,
                            end_rate: s.target_rate,
                            secs: s.duration.as_secs_f64(),
                        };
                        from = s.target_rate;
                        segment
                    })
                    .collect()
            }
        }
    }

    /// Consume the controller into its lazy, finite issue-time sequence
    pub fn schedule(self) -> IssueSchedule {
        IssueSchedule {
            segments: self.segments(),
            index: 0,
            segment_offset: 0.0,
            segment_base: 0.0,
            next_arrival: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start_rate: f64,
    end_rate: f64,
    secs: f64,
}

impl Segment {
    fn arrivals(&self) -> f64 {
        (self.start_rate + self.end_rate) * 0.5 * self.secs
    }

    /// Time into the segment at which `n` cumulative arrivals are reached
    fn time_of(&self, n: f64) -> f64 {
        let slope = (self.end_rate - self.start_rate) / self.secs;
        let t = if slope.abs() < 1e-12 {
            n / self.start_rate
        } else {
            // n = r0 t + slope t² / 2
            let a = slope * 0.5;
            let disc = (self.start_rate * self.start_rate + 4.0 * a * n).max(0.0);
            (-self.start_rate + disc.sqrt()) / (2.0 * a)
        };
        t.clamp(0.0, self.secs)
    }
}

/// Lazy sequence of issue offsets; the k-th arrival is issued when the
/// integrated rate reaches k
#[derive(Debug)]
pub struct IssueSchedule {
    segments: Vec<Segment>,
    index: usize,
    segment_offset: f64,
    segment_base: f64,
    next_arrival: u64,
}

impl Iterator for IssueSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        loop {
            let segment = *self.segments.get(self.index)?;
            let local = self.next_arrival as f64 - self.segment_base;

            if local < segment.arrivals() {
                let at = self.segment_offset + segment.time_of(local);
                self.next_arrival += 1;
                return Some(Duration::from_secs_f64(at));
            }

            self.segment_base += segment.arrivals();
            self.segment_offset += segment.secs;
            self.index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_count_and_gaps() {
        for (rate, secs) in [(10.0, 3u64), (250.0, 2), (7.5, 4), (1000.0, 1)] {
            let controller = RateController::constant(rate, Duration::from_secs(secs)).unwrap();
            let times: Vec<Duration> = controller.schedule().collect();

            let expected = rate * secs as f64;
            assert!(
                (times.len() as f64 - expected).abs() <= 1.0,
                "rate {rate}: {} issue times, expected {expected}",
                times.len()
            );

            let gaps: Vec<f64> = times
                .windows(2)
                .map(|w| (w[1] - w[0]).as_secs_f64())
                .collect();
            let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
            assert!((mean - 1.0 / rate).abs() < 1e-6, "mean gap {mean}");
            assert!(times.iter().all(|t| *t < Duration::from_secs(secs)));
        }
    }

    #[test]
    fn test_issue_times_are_ordered() {
        let controller = RateController::ramping(
            5.0,
            vec![
                RampSegment {
                    duration: Duration::from_secs(2),
                    target_rate: 50.0,
                },
                RampSegment {
                    duration: Duration::from_secs(3),
                    target_rate: 50.0,
                },
                RampSegment {
                    duration: Duration::from_secs(1),
                    target_rate: 10.0,
                },
            ],
        )
        .unwrap();

        let times: Vec<Duration> = controller.schedule().collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_ramp_matches_integrated_rate() {
        // 0 -> 100 req/s over 2s: area = 100 arrivals
        let controller = RateController::ramping(
            0.0,
            vec![RampSegment {
                duration: Duration::from_secs(2),
                target_rate: 100.0,
            }],
        )
        .unwrap();
        assert!((controller.expected_arrivals() - 100.0).abs() < 1e-9);

        let times: Vec<Duration> = controller.schedule().collect();
        assert!((times.len() as i64 - 100).abs() <= 1);

        // linear ramp: a quarter of the arrivals land in the first half
        let first_half = times
            .iter()
            .filter(|t| **t < Duration::from_secs(1))
            .count();
        assert!((first_half as i64 - 25).abs() <= 1, "first half {first_half}");
    }

    #[test]
    fn test_ramp_then_hold_density() {
        let controller = RateController::ramping(
            100.0,
            vec![
                RampSegment {
                    duration: Duration::from_secs(1),
                    target_rate: 200.0,
                },
                RampSegment {
                    duration: Duration::from_secs(2),
                    target_rate: 200.0,
                },
            ],
        )
        .unwrap();
        assert_eq!(controller.total_duration(), Duration::from_secs(3));
        assert_eq!(controller.peak_rate(), 200.0);
        assert_eq!(controller.final_rate(), 200.0);

        let times: Vec<Duration> = controller.schedule().collect();
        let hold = times
            .iter()
            .filter(|t| **t >= Duration::from_secs(1))
            .count();
        assert!((hold as i64 - 400).abs() <= 1);
        assert!((times.len() as i64 - 550).abs() <= 1);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(RateController::constant(0.0, Duration::from_secs(1)).is_err());
        assert!(RateController::constant(f64::NAN, Duration::from_secs(1)).is_err());
        assert!(RateController::constant(10.0, Duration::ZERO).is_err());
        assert!(RateController::ramping(0.0, vec![]).is_err());
        assert!(RateController::ramping(
            -1.0,
            vec![RampSegment {
                duration: Duration::from_secs(1),
                target_rate: 1.0
            }]
        )
        .is_err());
    }

    #[test]
    fn test_capacity_sizing() {
        assert_eq!(
            RateController::capacity_for(1000.0, Duration::from_secs(2), 16, 10_000),
            2000
        );
        assert_eq!(
            RateController::capacity_for(1.0, Duration::from_millis(100), 16, 10_000),
            16
        );
        assert_eq!(
            RateController::capacity_for(50_000.0, Duration::from_secs(2), 16, 4096),
            4096
        );
    }
}
