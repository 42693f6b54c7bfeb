//! Miner telemetry

use std::fmt;
use std::time::Duration;
use tracing::info;

/// Point-in-time view of the miner counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinerStats {
    /// Candidates tried by all workers
    pub attempts: u64,
    /// Candidates that met the threshold
    pub solutions: u64,
    /// Solutions dropped on a full queue
    pub overflows: u64,
    /// Solutions written to the solution log
    pub logged: u64,
    /// Solutions dropped because their problem was no longer active
    pub stale: u64,
    /// Transactions sent
    pub submissions: u64,
    /// Accepted claims
    pub confirmed: u64,
    /// Reverted or superseded claims
    pub race_losses: u64,
    /// Submissions without a verifiable result
    pub transient_failures: u64,
    /// Time since the miner started
    pub elapsed: Duration,
}

impl MinerStats {
    /// Attempts per second since start
    pub fn hashrate(&self) -> f64 {
        hashrate(self.attempts, self.elapsed)
    }

    /// Log a one-line summary
    pub fn log_summary(&self) {
        info!(
            target: "infinity::stats",
            attempts = self.attempts,
            solutions = self.solutions,
            stale = self.stale,
            submissions = self.submissions,
            confirmed = self.confirmed,
            race_losses = self.race_losses,
            transient = self.transient_failures,
            overflows = self.overflows,
            logged = self.logged,
            hashrate = %format_hashrate(self.attempts, self.elapsed),
            "Miner stats"
        );
    }
}

impl fmt::Display for MinerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempts, {} solutions, {} confirmed, {}",
            self.attempts,
            self.solutions,
            self.confirmed,
            format_hashrate(self.attempts, self.elapsed)
        )
    }
}

fn hashrate(attempts: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { attempts as f64 / secs } else { 0.0 }
}

/// Render an attempt rate, e.g. `"1234.50 H/s"`
pub fn format_hashrate(attempts: u64, elapsed: Duration) -> String {
    format!("{:.2} H/s", hashrate(attempts, elapsed))
}
