//! The Handler: the single owner of authoritative cluster state.
//!
//! All mutation goes through `AddJob`, `FreeResources` and `Schedule`.
//! Everything else in this crate (the placer, the search planner) only
//! ever touches a [`Snapshot`] clone.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::client::ResourceManagerClient;
use crate::error::SchedulerError;
use crate::job::{Job, JobType};
use crate::search;
use crate::snapshot::Snapshot;
use crate::topology::Topology;

/// How the scheduler decides where (and whether) to place pending jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// FIFO admission onto randomly chosen free machines. No lookahead,
    /// no rack-locality preference.
    None,
    /// N-step lookahead search; non-preferred placements are allowed
    /// when nothing better is available.
    Soft,
    /// N-step lookahead search; a job only runs on its preferred
    /// topology, otherwise it stays pending.
    Hard,
}

impl std::str::FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Policy::None),
            "soft" => Ok(Policy::Soft),
            "hard" => Ok(Policy::Hard),
            other => Err(format!("unknown policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub policy: Policy,
    /// Seeds the RNG behind the `none` policy's random machine picker,
    /// so test runs are reproducible.
    pub rng_seed: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { policy: Policy::Soft, rng_seed: 0 }
    }
}

/// A point-in-time view of the cluster, for the HTTP status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub total_machines: u32,
    pub free_machines: u32,
    pub total_per_rack: Vec<u32>,
    pub free_per_rack: Vec<u32>,
    pub pending_jobs: usize,
    pub running_jobs: usize,
}

pub struct Handler {
    topology: Topology,
    jobs: HashMap<i32, Job>,
    pending: VecDeque<i32>,
    running: Vec<i32>,
    policy: Policy,
    rng: StdRng,
    seq_counter: u64,
    client: Arc<dyn ResourceManagerClient>,
}

impl Handler {
    pub fn new(topology: Topology, config: SchedulerConfig, client: Arc<dyn ResourceManagerClient>) -> Self {
        Self {
            topology,
            jobs: HashMap::new(),
            pending: VecDeque::new(),
            running: Vec::new(),
            policy: config.policy,
            rng: StdRng::seed_from_u64(config.rng_seed),
            seq_counter: 0,
            client,
        }
    }

    /// Admit a new job and immediately attempt to schedule.
    pub fn add_job(
        &mut self,
        job_id: i32,
        job_type: JobType,
        k: u32,
        priority: i32,
        duration_fast: f64,
        duration_slow: f64,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if self.jobs.contains_key(&job_id) {
            return Err(SchedulerError::DuplicateJob(job_id));
        }
        if duration_fast <= 0.0 || duration_slow <= 0.0 {
            warn!(job_id, duration_fast, duration_slow, "job submitted with a non-positive duration, enqueueing anyway");
        }

        let job = Job::new(job_id, job_type, k, priority, duration_fast, duration_slow, now);
        self.jobs.insert(job_id, job);
        self.pending.push_back(job_id);
        info!(job_id, k, ?job_type, "job added");

        self.schedule(now);
        Ok(())
    }

    /// Release machines back to the pool, e.g. because a job finished
    /// or was killed out of band. Unknown or already-free machines are
    /// logged and skipped.
    pub fn free_resources(&mut self, machine_ids: &[u32], now: DateTime<Utc>) {
        for &id in machine_ids {
            let owner = match self.topology.machine_mut(id) {
                Some(machine) => machine.owner,
                None => {
                    warn!(machine_id = id, "free_resources: unknown machine");
                    continue;
                }
            };
            let Some(job_id) = owner else {
                warn!(machine_id = id, "free_resources: machine was already free");
                continue;
            };
            if let Some(machine) = self.topology.machine_mut(id) {
                machine.free();
            }
            let finished = self.jobs.get_mut(&job_id).map(|job| job.free_machine(id)).unwrap_or(false);
            if finished {
                self.running.retain(|&j| j != job_id);
                self.jobs.remove(&job_id);
                info!(job_id, "job finished, all machines released");
            }
        }
        self.schedule(now);
    }

    /// Re-run placement for all pending jobs.
    pub fn schedule(&mut self, now: DateTime<Utc>) {
        match self.policy {
            Policy::None => self.fifo_fill(now),
            Policy::Soft | Policy::Hard => self.plan_fill(now),
        }
    }

    fn fifo_fill(&mut self, now: DateTime<Utc>) {
        while let Some(&head) = self.pending.front() {
            let k = self.jobs[&head].k;
            if self.topology.free_count() < k {
                break;
            }
            let machines = self.random_free_machines(k);
            self.pending.pop_front();
            self.start_job(head, machines, false, now);
        }
    }

    fn plan_fill(&mut self, now: DateTime<Utc>) {
        let pending_jobs: Vec<Job> = self.pending.iter().map(|id| self.jobs[id].clone()).collect();
        let running_jobs: Vec<Job> = self.running.iter().map(|id| self.jobs[id].clone()).collect();
        let mut snapshot = Snapshot::new(self.topology.clone(), &pending_jobs, &running_jobs);
        let decisions = search::plan(&mut snapshot, self.policy, now);
        for decision in decisions {
            self.start_job(decision.job_id, decision.machines, decision.preferred, now);
        }
    }

    fn random_free_machines(&mut self, k: u32) -> BTreeSet<u32> {
        let mut free = self.topology.free_machine_ids();
        free.shuffle(&mut self.rng);
        free.into_iter().take(k as usize).collect()
    }

    fn start_job(&mut self, job_id: i32, machines: BTreeSet<u32>, preferred: bool, now: DateTime<Utc>) {
        for &m in &machines {
            if let Some(machine) = self.topology.machine_mut(m) {
                machine.assign(job_id);
            }
        }
        let seq = self.seq_counter;
        self.seq_counter += 1;

        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.start(machines.clone(), preferred, now, seq);
        }
        self.pending.retain(|&id| id != job_id);
        self.running.push(job_id);

        if let Err(e) = self.client.alloc_resources(job_id, &machines) {
            error!(job_id, error = %e, "resource manager rejected allocation notice");
        }
        info!(job_id, machines = machines.len(), preferred, "job started");
    }

    pub fn job(&self, job_id: i32) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    pub fn status(&self) -> ClusterStatus {
        ClusterStatus {
            total_machines: self.topology.total_machines(),
            free_machines: self.topology.free_count(),
            total_per_rack: self.topology.total_per_rack(),
            free_per_rack: self.topology.free_per_rack(),
            pending_jobs: self.pending.len(),
            running_jobs: self.running.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RecordingResourceManagerClient;
    use crate::job::JobState;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn handler(policy: Policy, rack_caps: &[u32]) -> (Handler, Arc<RecordingResourceManagerClient>) {
        let client = Arc::new(RecordingResourceManagerClient::new());
        let topology = Topology::from_rack_caps(rack_caps).unwrap();
        let config = SchedulerConfig { policy, rng_seed: 42 };
        (Handler::new(topology, config, client.clone()), client)
    }

    #[test]
    fn add_job_places_immediately_when_capacity_allows() {
        let (mut h, client) = handler(Policy::Soft, &[4]);
        h.add_job(1, JobType::Gpu, 2, 0, 10.0, 10.0, now()).unwrap();
        assert_eq!(h.job(1).unwrap().state(), JobState::Running);
        assert_eq!(client.calls().len(), 1);
    }

    #[test]
    fn duplicate_job_id_is_rejected() {
        let (mut h, _client) = handler(Policy::Soft, &[4]);
        h.add_job(1, JobType::Gpu, 2, 0, 10.0, 10.0, now()).unwrap();
        let err = h.add_job(1, JobType::Gpu, 1, 0, 10.0, 10.0, now()).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob(1)));
    }

    #[test]
    fn free_resources_reschedules_pending_jobs() {
        let (mut h, _client) = handler(Policy::Soft, &[2]);
        h.add_job(1, JobType::Gpu, 2, 0, 10.0, 10.0, now()).unwrap();
        h.add_job(2, JobType::Gpu, 2, 0, 10.0, 10.0, now()).unwrap();
        assert_eq!(h.job(2).unwrap().state(), JobState::Pending);

        let assigned: Vec<u32> = h.job(1).unwrap().assigned.iter().copied().collect();
        h.free_resources(&assigned, now());

        assert!(h.job(1).is_none());
        assert_eq!(h.job(2).unwrap().state(), JobState::Running);
    }

    #[test]
    fn gpu_job_lands_on_gpu_rack() {
        let (mut h, client) = handler(Policy::Soft, &[4, 6, 6, 6]);
        h.add_job(1, JobType::Gpu, 3, 0, 10.0, 40.0, now()).unwrap();
        let job = h.job(1).unwrap();
        assert!(job.preferred);
        assert_eq!(job.assigned, [0, 1, 2].into_iter().collect());
        assert_eq!(client.calls()[0], (1, [0, 1, 2].into_iter().collect()));
    }

    #[test]
    fn mpi_job_prefers_smallest_fitting_non_gpu_rack() {
        let (mut h, _client) = handler(Policy::Soft, &[4, 6, 6, 6]);
        h.add_job(2, JobType::Mpi, 4, 0, 20.0, 60.0, now()).unwrap();
        let job = h.job(2).unwrap();
        assert!(job.preferred);
        assert_eq!(job.assigned, [4, 5, 6, 7].into_iter().collect());
    }

    #[test]
    fn none_policy_is_fifo_and_random() {
        let (mut h, _client) = handler(Policy::None, &[4]);
        h.add_job(1, JobType::Mpi, 2, 0, 10.0, 10.0, now()).unwrap();
        let job = h.job(1).unwrap();
        assert_eq!(job.state(), JobState::Running);
        assert!(!job.preferred);
    }

    #[test]
    fn status_free_and_total_per_rack_sum_to_aggregate_counts() {
        let (mut h, _client) = handler(Policy::Soft, &[4, 6, 6, 6]);
        h.add_job(1, JobType::Gpu, 3, 0, 10.0, 40.0, now()).unwrap();
        h.add_job(2, JobType::Mpi, 4, 0, 20.0, 60.0, now()).unwrap();

        let status = h.status();
        assert_eq!(status.total_per_rack.iter().sum::<u32>(), status.total_machines);
        assert_eq!(status.free_per_rack.iter().sum::<u32>(), status.free_machines);
        assert_eq!(status.free_machines, status.total_machines - 3 - 4);
    }

    #[test]
    fn hard_policy_leaves_unpreferred_job_pending() {
        let (mut h, _client) = handler(Policy::Hard, &[2, 2]);
        h.add_job(1, JobType::Gpu, 3, 0, 10.0, 10.0, now()).unwrap();
        assert_eq!(h.job(1).unwrap().state(), JobState::Pending);
    }
}
