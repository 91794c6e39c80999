//! N-step lookahead search: decide which pending jobs to place now, and
//! which to delay, by simulating a bounded number of future completion
//! events.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{error, trace};

use crate::scheduler::Policy;
use crate::snapshot::Snapshot;

/// How many running-job completions ahead the search end-point looks
/// when deciding how deep to branch.
const SEARCH_STEP: usize = 5;

/// Maximum depth of the branch-and-simulate recursion.
const EXTRA_SEARCH_STEP: usize = 7;

/// One job placed by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub job_id: i32,
    pub preferred: bool,
    pub machines: BTreeSet<u32>,
}

#[derive(Clone)]
struct Candidate {
    job_id: i32,
    preferred: bool,
    machines: BTreeSet<u32>,
    utility: f64,
}

fn to_decisions(candidates: &[Candidate]) -> Vec<Decision> {
    candidates
        .iter()
        .map(|c| Decision { job_id: c.job_id, preferred: c.preferred, machines: c.machines.clone() })
        .collect()
}

/// Greedily place pending jobs, always taking the highest-utility
/// placeable job next, until nothing placeable remains or the best
/// remaining utility is zero.
fn greedy_fill(snapshot: &mut Snapshot, t: DateTime<Utc>, policy: Policy) -> Vec<Candidate> {
    let mut placed = Vec::new();
    loop {
        let free = snapshot.free_count();
        let mut best: Option<Candidate> = None;

        for job_id in snapshot.pending_ids().collect::<Vec<_>>() {
            let job = snapshot.job(job_id);
            if job.k > free {
                continue;
            }
            let (machines, preferred) = match snapshot.place_best(job) {
                Ok(placement) => placement,
                Err(e) => {
                    // The free-count check above should make this
                    // unreachable; surface it loudly if it ever fires.
                    error!(job_id, error = %e, "placer rejected a job that passed the free-count precheck");
                    continue;
                }
            };
            if policy == Policy::Hard && !preferred {
                continue;
            }
            let utility = job.utility(t, preferred);
            if best.as_ref().map_or(true, |b| utility > b.utility) {
                best = Some(Candidate { job_id, preferred, machines, utility });
            }
        }

        match best {
            Some(candidate) if candidate.utility > 0.0 => {
                snapshot.allocate(candidate.job_id, candidate.machines.clone(), candidate.preferred, t);
                placed.push(candidate);
            }
            _ => break,
        }
    }
    placed
}

/// Advance the simulation by one completion event and recurse with
/// `step - 1`.
fn simulate_next(snapshot: &mut Snapshot, step: usize, end_id: Option<i32>, t: DateTime<Utc>, policy: Policy) -> (Vec<Decision>, f64) {
    match snapshot.pop_earliest_running() {
        Some((finished_id, completion)) => {
            let next_end = if Some(finished_id) == end_id { None } else { end_id };
            let next_t = completion.max(t);
            search(snapshot, step.saturating_sub(1), next_end, next_t, policy)
        }
        None => search(snapshot, step.saturating_sub(1), None, t, policy),
    }
}

/// The recursive search itself, operating in-place on `snapshot`.
fn search(snapshot: &mut Snapshot, step: usize, end_id: Option<i32>, t: DateTime<Utc>, policy: Policy) -> (Vec<Decision>, f64) {
    if step == 0 && end_id.is_some() {
        return match snapshot.pop_earliest_running() {
            Some((finished_id, completion)) => {
                let next_end = if Some(finished_id) == end_id { None } else { end_id };
                let next_t = completion.max(t);
                search(snapshot, 0, next_end, next_t, policy)
            }
            None => search(snapshot, 0, None, t, policy),
        };
    }

    let potential = greedy_fill(snapshot, t, policy);
    let cur_utility: f64 = potential.iter().map(|c| c.utility).sum();
    let greedy_decisions = to_decisions(&potential);

    if end_id.is_none() {
        return (greedy_decisions, cur_utility);
    }

    let mut best_utility = f64::MIN;
    let mut best_decisions = greedy_decisions;
    let mut remaining = potential;
    let mut running_utility = cur_utility;

    loop {
        let mut probe = snapshot.clone();
        let (_, future_utility) = simulate_next(&mut probe, step, end_id, t, policy);

        if running_utility + future_utility > best_utility {
            best_utility = running_utility + future_utility;
            best_decisions = to_decisions(&remaining);
        }

        let Some(last) = remaining.pop() else { break };
        running_utility -= last.utility;
        snapshot.undo_placement(last.job_id);
    }

    (best_decisions, best_utility)
}

/// Determine how far ahead the search end-point sits: the id of the
/// [`SEARCH_STEP`]-th soonest-completing running job, or `None` if
/// fewer than that many jobs are running.
fn search_end_job_id(snapshot: &Snapshot) -> Option<i32> {
    snapshot.nth_running_job_id(SEARCH_STEP)
}

/// Plan placements for the pending jobs in `snapshot` as of `t`,
/// respecting `policy`. Mutates `snapshot` as a side effect of
/// simulating; callers should treat it as consumed.
pub fn plan(snapshot: &mut Snapshot, policy: Policy, t: DateTime<Utc>) -> Vec<Decision> {
    let end_id = search_end_job_id(snapshot);
    trace!(?end_id, "starting lookahead search");
    let (decisions, _utility) = search(snapshot, EXTRA_SEARCH_STEP, end_id, t, policy);
    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobType};
    use crate::topology::Topology;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn places_a_single_fitting_job() {
        let topology = Topology::from_rack_caps(&[4]).unwrap();
        let job = Job::new(1, JobType::Gpu, 2, 0, 10.0, 10.0, now());
        let mut snap = Snapshot::new(topology, &[job], &[]);

        let decisions = plan(&mut snap, Policy::Soft, now());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].job_id, 1);
        assert!(decisions[0].preferred);
    }

    #[test]
    fn hard_policy_skips_non_preferred_placements() {
        let topology = Topology::from_rack_caps(&[2, 2]).unwrap();
        // GPU job needing 3 machines can't land on rack 0 alone -> non-preferred.
        let job = Job::new(1, JobType::Gpu, 3, 0, 10.0, 10.0, now());
        let mut snap = Snapshot::new(topology, &[job], &[]);

        let decisions = plan(&mut snap, Policy::Hard, now());
        assert!(decisions.is_empty());
    }

    #[test]
    fn with_no_running_jobs_search_returns_immediately() {
        let topology = Topology::from_rack_caps(&[4]).unwrap();
        let job = Job::new(1, JobType::Gpu, 2, 0, 10.0, 10.0, now());
        let mut snap = Snapshot::new(topology, &[job], &[]);
        assert!(search_end_job_id(&snap).is_none());
        let decisions = plan(&mut snap, Policy::Soft, now());
        assert_eq!(decisions.len(), 1);
    }

    #[test]
    fn branches_over_delay_once_enough_jobs_are_running() {
        // Five running jobs push `search_end_job_id` to `Some`, which is
        // what turns on the delay-branching loop in `search` instead of
        // the immediate-return greedy-only path.
        let topology = Topology::from_rack_caps(&[8]).unwrap();
        let mut running = Vec::new();
        for id in 0..5 {
            let mut job = Job::new(id, JobType::Gpu, 1, 0, 10.0 + id as f64, 10.0 + id as f64, now());
            job.start([id as u32].into_iter().collect(), true, now(), id as u64);
            running.push(job);
        }
        let pending = Job::new(100, JobType::Gpu, 3, 0, 5.0, 5.0, now());
        let mut snap = Snapshot::new(topology, &[pending], &running);
        assert!(search_end_job_id(&snap).is_some());

        let decisions = plan(&mut snap, Policy::Soft, now());
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].job_id, 100);
    }

    #[test]
    fn zero_utility_placement_is_not_taken() {
        // Job has already waited past the utility horizon: utility is 0,
        // greedy fill should refuse to place it.
        let topology = Topology::from_rack_caps(&[4]).unwrap();
        let arrive = now() - chrono::Duration::seconds(5000);
        let job = Job::new(1, JobType::Gpu, 2, 0, 10.0, 10.0, arrive);
        let mut snap = Snapshot::new(topology, &[job], &[]);

        let decisions = plan(&mut snap, Policy::Soft, now());
        assert!(decisions.is_empty());
    }
}
