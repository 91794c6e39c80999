//! A single schedulable unit of capacity.

use serde::{Deserialize, Serialize};

/// One machine in the cluster. Machines are never created or destroyed
/// at runtime; only their `owner` changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: u32,
    pub owner: Option<i32>,
}

impl Machine {
    pub fn new(id: u32) -> Self {
        Self { id, owner: None }
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    pub fn assign(&mut self, job_id: i32) {
        self.owner = Some(job_id);
    }

    pub fn free(&mut self) {
        self.owner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_free() {
        let m = Machine::new(3);
        assert!(m.is_free());
    }

    #[test]
    fn assign_then_free() {
        let mut m = Machine::new(3);
        m.assign(7);
        assert!(!m.is_free());
        assert_eq!(m.owner, Some(7));
        m.free();
        assert!(m.is_free());
    }
}
