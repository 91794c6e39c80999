//! A speculative, deep-copied view of the cluster used by the search
//! planner. Mutating a `Snapshot` never touches authoritative state.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::error::PlacementError;
use crate::job::Job;
use crate::placer;
use crate::topology::Topology;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunningEntry {
    completion: DateTime<Utc>,
    seq: u64,
    job_id: i32,
}

impl Ord for RunningEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest completion
        // (ties broken by earlier insertion) sits on top.
        other.completion.cmp(&self.completion).then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for RunningEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    topology: Topology,
    jobs: HashMap<i32, Job>,
    pending: VecDeque<i32>,
    running: BinaryHeap<RunningEntry>,
    seq_counter: u64,
}

impl Snapshot {
    pub fn new(topology: Topology, pending: &[Job], running: &[Job]) -> Self {
        let mut jobs = HashMap::with_capacity(pending.len() + running.len());
        let mut pending_ids = VecDeque::with_capacity(pending.len());
        let mut heap = BinaryHeap::with_capacity(running.len());
        let mut max_seq = 0u64;

        for job in pending {
            pending_ids.push_back(job.job_id);
            jobs.insert(job.job_id, job.clone());
        }
        for job in running {
            let completion = job.completion_time().expect("running job has a start time");
            let seq = job.run_seq.unwrap_or(0);
            max_seq = max_seq.max(seq);
            heap.push(RunningEntry { completion, seq, job_id: job.job_id });
            jobs.insert(job.job_id, job.clone());
        }

        Self { topology, jobs, pending: pending_ids, running: heap, seq_counter: max_seq + 1 }
    }

    pub fn free_count(&self) -> u32 {
        self.topology.free_count()
    }

    pub fn job(&self, job_id: i32) -> &Job {
        &self.jobs[&job_id]
    }

    pub fn pending_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.pending.iter().copied()
    }

    /// Where `job` would land if placed right now, without committing.
    pub fn place_best(&self, job: &Job) -> Result<(BTreeSet<u32>, bool), PlacementError> {
        placer::place(&self.topology, job.job_type, job.k)
    }

    /// Commit a placement: move the job from pending to running and
    /// mark its machines owned.
    pub fn allocate(&mut self, job_id: i32, machines: BTreeSet<u32>, preferred: bool, now: DateTime<Utc>) {
        for &m in &machines {
            if let Some(machine) = self.topology.machine_mut(m) {
                machine.assign(job_id);
            }
        }
        let seq = self.seq_counter;
        self.seq_counter += 1;

        let completion = {
            let job = self.jobs.get_mut(&job_id).expect("allocate target must exist");
            job.start(machines, preferred, now, seq);
            job.completion_time().expect("just started")
        };

        self.pending.retain(|&id| id != job_id);
        self.running.push(RunningEntry { completion, seq, job_id });
    }

    /// Pop the earliest-finishing running job, freeing its machines.
    /// Returns `None` if nothing is running.
    pub fn pop_earliest_running(&mut self) -> Option<(i32, DateTime<Utc>)> {
        let entry = self.running.pop()?;
        self.release_machines(entry.job_id);
        Some((entry.job_id, entry.completion))
    }

    /// Undo a placement made earlier in this snapshot: free its
    /// machines and push it back onto the end of the pending list.
    pub fn undo_placement(&mut self, job_id: i32) {
        self.release_machines(job_id);
        self.running = self.running.drain().filter(|e| e.job_id != job_id).collect();
        self.pending.push_back(job_id);
    }

    fn release_machines(&mut self, job_id: i32) {
        let machines = match self.jobs.get(&job_id) {
            Some(job) => job.assigned.clone(),
            None => return,
        };
        for m in &machines {
            if let Some(machine) = self.topology.machine_mut(*m) {
                machine.free();
            }
        }
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.assigned.clear();
            job.start_time = None;
        }
    }

    /// Peek the job id of the `n`-th running-job completion without
    /// mutating this snapshot, or `None` if fewer than `n` jobs are
    /// running.
    pub fn nth_running_job_id(&self, n: usize) -> Option<i32> {
        let mut probe = self.running.clone();
        let mut last = None;
        for _ in 0..n {
            last = Some(probe.pop()?.job_id);
        }
        last
    }
}
