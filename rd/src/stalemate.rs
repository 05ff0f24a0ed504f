//! Stalemate (bail-out) detection
//!
//! Counts completed rotation rounds that produced no verified fix. Any
//! verified fix resets the count to zero.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The loop's memory of recent attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CycleCounters {
    pub consecutive_failures: u32,
    pub model_failures_in_cycle: u32,
    pub progress_this_cycle: u32,
    pub no_progress_cycles: u32,
}

impl CycleCounters {
    /// A fix attempt verified `fixed` issues
    pub fn record_fix(&mut self, fixed: u32) {
        debug!(fixed, "CycleCounters::record_fix: called");
        if fixed == 0 {
            return;
        }
        self.progress_this_cycle += fixed;
        self.no_progress_cycles = 0;
        self.consecutive_failures = 0;
    }

    /// A fix attempt produced nothing verifiable
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.model_failures_in_cycle += 1;
        debug!(consecutive = self.consecutive_failures, "CycleCounters::record_failure: called");
    }

    /// Close a rotation round; true when the loop should bail out
    pub fn complete_cycle(&mut self, max_stale_cycles: u32) -> bool {
        if self.progress_this_cycle == 0 {
            self.no_progress_cycles += 1;
        }
        self.progress_this_cycle = 0;
        self.model_failures_in_cycle = 0;
        debug!(no_progress = self.no_progress_cycles, max = max_stale_cycles, "CycleCounters::complete_cycle: called");
        let stalled = self.is_stalled(max_stale_cycles);
        if stalled {
            warn!(cycles = self.no_progress_cycles, "No progress across rotation cycles");
        }
        stalled
    }

    pub fn is_stalled(&self, max_stale_cycles: u32) -> bool {
        self.no_progress_cycles >= max_stale_cycles
    }
}

/// Structured report recorded when the loop gives up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BailOutRecord {
    pub cycles_completed: u32,
    pub fixed_count: usize,
    pub remaining: Vec<RemainingIssue>,
    /// `tool:model` pairs that were tried
    pub exhausted: Vec<String>,
    pub iteration: u32,
    pub at: i64,
}

/// An issue still open at bail-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingIssue {
    pub id: String,
    pub path: String,
    pub line: Option<u32>,
    pub excerpt: String,
}
