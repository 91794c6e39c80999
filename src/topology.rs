//! Rack topology: machines grouped into racks, rack 0 distinguished as
//! the GPU rack.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::machine::Machine;

/// Index of the distinguished GPU rack.
pub const GPU_RACK: usize = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rack {
    pub machines: Vec<Machine>,
}

impl Rack {
    fn free_count(&self) -> u32 {
        self.machines.iter().filter(|m| m.is_free()).count() as u32
    }

    /// First `n` free machines in ascending local-index order.
    fn take_free(&mut self, n: u32, job_id: i32) -> Vec<u32> {
        let ids: Vec<u32> = self
            .machines
            .iter()
            .filter(|m| m.is_free())
            .take(n as usize)
            .map(|m| m.id)
            .collect();
        for &id in &ids {
            self.machines.iter_mut().find(|m| m.id == id).unwrap().assign(job_id);
        }
        ids
    }
}

/// The cluster's rack layout. Immutable in shape after construction:
/// machines move between owners, but racks never gain or lose
/// machines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    racks: Vec<Rack>,
    max_per_rack: u32,
}

impl Topology {
    /// Build a topology from per-rack machine counts, assigning dense
    /// ids rack-major (rack 0's machines first, etc).
    pub fn from_rack_caps(rack_caps: &[u32]) -> Result<Self, ConfigError> {
        if rack_caps.is_empty() {
            return Err(ConfigError::InvalidTopology("topology must have at least one rack".into()));
        }
        if rack_caps.iter().any(|&c| c == 0) {
            return Err(ConfigError::InvalidTopology("racks must have at least one machine".into()));
        }
        let max_per_rack = *rack_caps.iter().max().unwrap();
        let mut next_id = 0u32;
        let racks = rack_caps
            .iter()
            .map(|&cap| {
                let machines = (0..cap).map(|_| {
                    let m = Machine::new(next_id);
                    next_id += 1;
                    m
                }).collect();
                Rack { machines }
            })
            .collect();
        Ok(Self { racks, max_per_rack })
    }

    pub fn rack_count(&self) -> usize {
        self.racks.len()
    }

    pub fn max_per_rack(&self) -> u32 {
        self.max_per_rack
    }

    pub fn total_machines(&self) -> u32 {
        self.racks.iter().map(|r| r.machines.len() as u32).sum()
    }

    pub fn free_count(&self) -> u32 {
        self.racks.iter().map(Rack::free_count).sum()
    }

    /// Free machine count per rack, in rack order.
    pub fn free_per_rack(&self) -> Vec<u32> {
        self.racks.iter().map(Rack::free_count).collect()
    }

    /// All currently-free machine ids, in ascending order.
    pub fn free_machine_ids(&self) -> Vec<u32> {
        self.racks.iter().flat_map(|r| r.machines.iter()).filter(|m| m.is_free()).map(|m| m.id).collect()
    }

    /// Total machine count per rack, in rack order.
    pub fn total_per_rack(&self) -> Vec<u32> {
        self.racks.iter().map(|r| r.machines.len() as u32).collect()
    }

    pub fn rack(&self, idx: usize) -> &Rack {
        &self.racks[idx]
    }

    pub fn machine_mut(&mut self, id: u32) -> Option<&mut Machine> {
        self.racks.iter_mut().flat_map(|r| r.machines.iter_mut()).find(|m| m.id == id)
    }

    /// Assign `n` free machines from `rack_idx` to `job_id`, in
    /// ascending local-index order. Caller must ensure the rack has at
    /// least `n` free machines.
    pub fn take_from_rack(&mut self, rack_idx: usize, n: u32, job_id: i32) -> Vec<u32> {
        self.racks[rack_idx].take_free(n, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_ids_rack_major() {
        let t = Topology::from_rack_caps(&[2, 3]).unwrap();
        assert_eq!(t.rack(0).machines.iter().map(|m| m.id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(t.rack(1).machines.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn rejects_empty_rack() {
        assert!(Topology::from_rack_caps(&[2, 0]).is_err());
    }

    #[test]
    fn rejects_no_racks() {
        assert!(Topology::from_rack_caps(&[]).is_err());
    }

    #[test]
    fn free_per_rack_reflects_ownership() {
        let mut t = Topology::from_rack_caps(&[2, 2]).unwrap();
        t.take_from_rack(0, 1, 42);
        assert_eq!(t.free_per_rack(), vec![1, 2]);
    }
}
