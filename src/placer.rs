//! Deterministic placement: where to put a job on the current topology.
//!
//! Placement never mutates the topology; callers (the authoritative
//! scheduler, or a speculative snapshot) apply the returned machine set
//! themselves once they've decided to commit to it.

use std::collections::BTreeSet;

use crate::error::PlacementError;
use crate::job::JobType;
use crate::topology::{Topology, GPU_RACK};

/// Find the rack with the fewest non-zero free machines, ties broken by
/// lowest index. Racks with zero free machines are never chosen.
fn find_min_rack(free: &[u32]) -> Option<usize> {
    free.iter()
        .enumerate()
        .filter(|(_, &f)| f > 0)
        .min_by_key(|&(idx, &f)| (f, idx))
        .map(|(idx, _)| idx)
}

/// Read-only preview of which machines `take_from_rack` would pick.
fn preview_take(topology: &Topology, rack_idx: usize, n: u32) -> BTreeSet<u32> {
    topology
        .rack(rack_idx)
        .machines
        .iter()
        .filter(|m| m.is_free())
        .take(n as usize)
        .map(|m| m.id)
        .collect()
}

/// Spread placement: repeatedly take from the rack with the fewest
/// non-zero free machines until `k` machines have been gathered.
fn spread(topology: &Topology, k: u32) -> BTreeSet<u32> {
    let mut free = topology.free_per_rack();
    let mut remaining = k;
    let mut result = BTreeSet::new();
    while remaining > 0 {
        let idx = match find_min_rack(&free) {
            Some(idx) => idx,
            None => break,
        };
        let take = remaining.min(free[idx]);
        result.extend(preview_take(topology, idx, take));
        free[idx] -= take;
        remaining -= take;
    }
    result
}

fn place_mpi(topology: &Topology, k: u32) -> (BTreeSet<u32>, bool) {
    let free = topology.free_per_rack();

    let mut best: Option<(usize, u32)> = None;
    for (idx, &f) in free.iter().enumerate().skip(GPU_RACK + 1) {
        if f >= k && (best.is_none() || f < best.unwrap().1) {
            best = Some((idx, f));
        }
    }
    if let Some((idx, _)) = best {
        return (preview_take(topology, idx, k), true);
    }

    if free[GPU_RACK] >= k {
        return (preview_take(topology, GPU_RACK, k), true);
    }

    (spread(topology, k), false)
}

fn place_gpu(topology: &Topology, k: u32) -> (BTreeSet<u32>, bool) {
    let free = topology.free_per_rack();
    if free[GPU_RACK] >= k {
        return (preview_take(topology, GPU_RACK, k), true);
    }
    (spread(topology, k), false)
}

/// Decide where a job of the given type and size would land on
/// `topology`, and whether that placement is on the job's preferred
/// topology (a single non-GPU rack for MPI, the GPU rack for GPU jobs).
///
/// Returns `Err` only if the cluster as a whole cannot fit `k` machines
/// right now; callers are expected to check `Topology::free_count`
/// first so this should not normally trigger.
pub fn place(topology: &Topology, job_type: JobType, k: u32) -> Result<(BTreeSet<u32>, bool), PlacementError> {
    let available = topology.free_count();
    if k > available {
        return Err(PlacementError::InsufficientCapacity { requested: k, available });
    }
    Ok(match job_type {
        JobType::Mpi => place_mpi(topology, k),
        JobType::Gpu => place_gpu(topology, k),
    })
}
