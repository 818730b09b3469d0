use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Floor for history sizing, matching the fastest sampling the agent accepts
const MIN_SAMPLE_INTERVAL_MS: u128 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub at: DateTime<Utc>,
    pub celsius: f64,
}

/// Chart window and the bucket width used to aggregate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChartPeriod {
    #[default]
    Hour,
    Day,
    Week,
}

impl ChartPeriod {
    pub fn bucket_width(self) -> Duration {
        match self {
            ChartPeriod::Hour => Duration::minutes(5),
            ChartPeriod::Day => Duration::hours(1),
            ChartPeriod::Week => Duration::days(1),
        }
    }

    pub fn bucket_count(self) -> usize {
        match self {
            ChartPeriod::Hour => 12,
            ChartPeriod::Day => 24,
            ChartPeriod::Week => 7,
        }
    }

    pub fn span(self) -> Duration {
        self.bucket_width() * self.bucket_count() as i32
    }
}

impl fmt::Display for ChartPeriod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChartPeriod::Hour => write!(f, "hour"),
            ChartPeriod::Day => write!(f, "day"),
            ChartPeriod::Week => write!(f, "week"),
        }
    }
}

impl FromStr for ChartPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "h" => Ok(ChartPeriod::Hour),
            "day" | "d" => Ok(ChartPeriod::Day),
            "week" | "w" => Ok(ChartPeriod::Week),
            other => Err(format!("unknown chart period {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartBucket {
    pub start: DateTime<Utc>,
    /// `None` when no sample fell into the bucket
    pub stats: Option<BucketStats>,
}

/// Bounded history of received temperatures, oldest first.
#[derive(Debug, Clone)]
pub struct TelemetryHistory {
    capacity: usize,
    samples: VecDeque<TelemetrySample>,
}

impl TelemetryHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Samples needed to cover a full `period` when readings arrive every `sample_interval`.
    pub fn capacity_for(period: ChartPeriod, sample_interval: std::time::Duration) -> usize {
        let interval_ms = sample_interval.as_millis().max(MIN_SAMPLE_INTERVAL_MS) as i64;
        (period.span().num_milliseconds() / interval_ms) as usize + 1
    }

    pub fn push(&mut self, sample: TelemetrySample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Aggregates the window `(now - span, now]` into fixed buckets, oldest first.
    pub fn series(&self, period: ChartPeriod, now: DateTime<Utc>) -> Vec<ChartBucket> {
        let width = period.bucket_width();
        let count = period.bucket_count();
        let window_start = now - period.span();

        let mut acc: Vec<Option<BucketStats>> = vec![None; count];
        for sample in &self.samples {
            if sample.at <= window_start || sample.at > now {
                continue;
            }
            let offset = (sample.at - window_start).num_milliseconds() - 1;
            let index = (offset / width.num_milliseconds()) as usize;
            let slot = &mut acc[index.min(count - 1)];
            *slot = Some(match slot.take() {
                None => BucketStats {
                    min: sample.celsius,
                    max: sample.celsius,
                    avg: sample.celsius,
                    count: 1,
                },
                Some(stats) => {
                    let count = stats.count + 1;
                    BucketStats {
                        min: stats.min.min(sample.celsius),
                        max: stats.max.max(sample.celsius),
                        avg: stats.avg + (sample.celsius - stats.avg) / count as f64,
                        count,
                    }
                }
            });
        }

        acc.into_iter()
            .enumerate()
            .map(|(i, stats)| ChartBucket {
                start: window_start + width * i as i32,
                stats,
            })
            .collect()
    }
}
