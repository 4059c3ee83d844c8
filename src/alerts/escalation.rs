//! Cross-cycle escalation
//!
//! Each metric keeps two streaks: cycles at WARNING or above, and cycles at
//! CRITICAL or above. A cycle below WARNING resets both.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Severity;
use crate::types::MetricKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub warning: u32,
    pub critical: u32,
}

#[derive(Debug, Clone)]
pub struct EscalationTracker {
    warning_cycles: u32,
    critical_cycles: u32,
    streaks: HashMap<MetricKind, Streak>,
}

impl EscalationTracker {
    pub fn new(warning_cycles: u32, critical_cycles: u32) -> Self {
        Self {
            warning_cycles,
            critical_cycles,
            streaks: HashMap::new(),
        }
    }

    /// Record this cycle's severity for `metric` and return the escalated
    /// severity:
    ///
    /// - `critical_cycles` consecutive CRITICALs give ERROR
    /// - `warning_cycles` consecutive cycles at WARNING or above raise a
    ///   WARNING to CRITICAL
    pub fn observe(&mut self, metric: MetricKind, severity: Severity) -> Severity {
        let streak = self.streaks.entry(metric).or_default();

        if severity >= Severity::Warning {
            streak.warning += 1;
        } else {
            *streak = Streak::default();
            return severity;
        }
        if severity >= Severity::Critical {
            streak.critical += 1;
        } else {
            streak.critical = 0;
        }

        let streak = *streak;
        self.grade(streak, severity)
    }

    /// Escalated severity for a reading that was already observed. The
    /// streaks are left as they are.
    pub fn peek(&self, metric: MetricKind, severity: Severity) -> Severity {
        if severity < Severity::Warning {
            return severity;
        }
        self.grade(self.streak(metric), severity)
    }

    fn grade(&self, streak: Streak, severity: Severity) -> Severity {
        if streak.critical >= self.critical_cycles {
            Severity::Error
        } else if streak.warning >= self.warning_cycles && severity == Severity::Warning {
            severity.escalate()
        } else {
            severity
        }
    }

    pub fn streak(&self, metric: MetricKind) -> Streak {
        self.streaks.get(&metric).copied().unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.streaks.clear();
    }
}
