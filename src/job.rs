//! Job definition and lifecycle

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Utility decays linearly from this value down to zero over the job's
/// waiting plus running time, see [`Job::utility`].
const UTILITY_HORIZON: f64 = 1200.0;

/// The two workload shapes the placer distinguishes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// CPU-bound, rack-locality-sensitive MPI job.
    Mpi,
    /// GPU job that wants the distinguished GPU rack.
    Gpu,
}

/// Coarse lifecycle state, derived from whether the job currently holds
/// machines rather than stored redundantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
}

/// A batch job tracked by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: i32,
    pub job_type: JobType,
    /// Number of machines the job needs.
    pub k: u32,
    /// Caller-supplied priority. Not consulted by the placer or the
    /// search planner; carried through for API responses only.
    pub priority: i32,
    pub duration_fast: f64,
    pub duration_slow: f64,
    pub arrive_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    /// Whether the job landed on its preferred topology (single
    /// non-GPU rack for MPI, the GPU rack for GPU jobs).
    pub preferred: bool,
    pub assigned: BTreeSet<u32>,
    /// Monotonic sequence number assigned when the job starts running;
    /// breaks ties in the running set's completion-time ordering by
    /// insertion order. `None` while pending.
    pub(crate) run_seq: Option<u64>,
}

impl Job {
    pub fn new(
        job_id: i32,
        job_type: JobType,
        k: u32,
        priority: i32,
        duration_fast: f64,
        duration_slow: f64,
        arrive_time: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            job_type,
            k,
            priority,
            duration_fast,
            duration_slow,
            arrive_time,
            start_time: None,
            preferred: false,
            assigned: BTreeSet::new(),
            run_seq: None,
        }
    }

    pub fn state(&self) -> JobState {
        if self.start_time.is_some() {
            JobState::Running
        } else {
            JobState::Pending
        }
    }

    /// Duration the job will actually run for, given whether it landed
    /// on its preferred topology.
    pub fn duration(&self) -> f64 {
        if self.preferred {
            self.duration_fast
        } else {
            self.duration_slow
        }
    }

    /// Move the job from pending to running, recording its placement.
    pub fn start(&mut self, machines: BTreeSet<u32>, preferred: bool, now: DateTime<Utc>, seq: u64) {
        self.assigned = machines;
        self.preferred = preferred;
        self.start_time = Some(now);
        self.run_seq = Some(seq);
    }

    /// Release a single machine, e.g. in response to an out-of-band
    /// free-resources notification. Returns true if the job no longer
    /// holds any machines.
    pub fn free_machine(&mut self, machine_id: u32) -> bool {
        self.assigned.remove(&machine_id);
        self.assigned.is_empty()
    }

    /// The time at which the job is projected to finish, if running.
    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        let start = self.start_time?;
        let millis = (self.duration() * 1000.0).round() as i64;
        Some(start + chrono::Duration::milliseconds(millis))
    }

    /// `U(j, t, preferred)`: linear decay from [`UTILITY_HORIZON`] down
    /// to zero across the job's total waiting-plus-running time, floored
    /// at zero.
    pub fn utility(&self, at: DateTime<Utc>, preferred: bool) -> f64 {
        let waited = (at - self.arrive_time).num_milliseconds() as f64 / 1000.0;
        let running = if preferred {
            self.duration_fast
        } else {
            self.duration_slow
        };
        (UTILITY_HORIZON - waited.max(0.0) - running).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn new_job_is_pending() {
        let job = Job::new(1, JobType::Mpi, 4, 0, 10.0, 20.0, now());
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.assigned.is_empty());
    }

    #[test]
    fn start_moves_to_running_with_preferred_duration() {
        let mut job = Job::new(1, JobType::Mpi, 4, 0, 10.0, 20.0, now());
        job.start([1, 2, 3, 4].into_iter().collect(), true, now(), 0);
        assert_eq!(job.state(), JobState::Running);
        assert_eq!(job.duration(), 10.0);
        assert_eq!(
            job.completion_time().unwrap(),
            now() + chrono::Duration::seconds(10)
        );
    }

    #[test]
    fn non_preferred_uses_slow_duration() {
        let mut job = Job::new(1, JobType::Gpu, 2, 0, 5.0, 50.0, now());
        job.start([1, 2].into_iter().collect(), false, now(), 0);
        assert_eq!(job.duration(), 50.0);
    }

    #[test]
    fn utility_floors_at_zero() {
        let job = Job::new(1, JobType::Mpi, 1, 0, 2000.0, 2000.0, now());
        assert_eq!(job.utility(now(), true), 0.0);
    }

    #[test]
    fn utility_decays_with_wait() {
        let job = Job::new(1, JobType::Mpi, 1, 0, 10.0, 10.0, now());
        let later = now() + chrono::Duration::seconds(100);
        assert_eq!(job.utility(later, true), UTILITY_HORIZON - 100.0 - 10.0);
    }

    #[test]
    fn free_machine_reports_emptiness() {
        let mut job = Job::new(1, JobType::Mpi, 2, 0, 1.0, 1.0, now());
        job.start([1, 2].into_iter().collect(), true, now(), 0);
        assert!(!job.free_machine(1));
        assert!(job.free_machine(2));
    }
}
