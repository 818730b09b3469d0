use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Network,
    Mqtt,
    Temperature,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureKind::Network => write!(f, "network"),
            FailureKind::Mqtt => write!(f, "mqtt"),
            FailureKind::Temperature => write!(f, "temperature"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Consecutive failures including this one
    pub count: u32,
    /// The limit was hit and the counter went back to zero
    pub limit_reached: bool,
}

/// Consecutive-failure counters, one per kind.
#[derive(Debug, Clone)]
pub struct ErrorCounters {
    max: u32,
    counts: HashMap<FailureKind, u32>,
}

impl ErrorCounters {
    pub fn new(max: u32) -> Self {
        Self {
            max: max.max(1),
            counts: HashMap::new(),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn count(&self, kind: FailureKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn record_failure(&mut self, kind: FailureKind) -> FailureOutcome {
        let entry = self.counts.entry(kind).or_insert(0);
        *entry += 1;
        let count = *entry;
        let limit_reached = count >= self.max;
        if limit_reached {
            *entry = 0;
        }
        FailureOutcome {
            count,
            limit_reached,
        }
    }

    /// Resets the counter. Returns the previous count when there were failures to clear.
    pub fn record_success(&mut self, kind: FailureKind) -> Option<u32> {
        match self.counts.insert(kind, 0) {
            Some(previous) if previous > 0 => Some(previous),
            _ => None,
        }
    }
}
