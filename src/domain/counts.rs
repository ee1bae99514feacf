//! Particle accounting
//!
//! Per-device counts refer to the devices of the local node; per-node counts
//! cover the whole run. Only the orchestrator writes here, between barriers.

use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticleCounts {
    total: u32,
    per_node: Vec<u32>,
    per_device: Vec<u32>,
    start_per_device: Vec<u32>,
}

impl ParticleCounts {
    pub fn new(devices_per_node: usize, nodes: usize) -> Self {
        Self {
            total: 0,
            per_node: vec![0; nodes],
            per_device: vec![0; devices_per_node],
            start_per_device: vec![0; devices_per_node],
        }
    }

    /// Spread `total` particles over the devices of a single node as evenly
    /// as possible (earlier devices take the remainder)
    pub fn with_even_split(total: u32, devices_per_node: usize) -> Self {
        let mut counts = Self::new(devices_per_node, 1);
        let devices = devices_per_node.max(1) as u32;
        let per_device: Vec<u32> = (0..devices)
            .map(|d| total / devices + u32::from(d < total % devices))
            .collect();
        counts.set_total(total);
        counts.set_node_count(0, total);
        counts.set_device_counts(&per_device);
        counts
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn per_node(&self) -> &[u32] {
        &self.per_node
    }

    pub fn per_device(&self) -> &[u32] {
        &self.per_device
    }

    pub fn start_per_device(&self) -> &[u32] {
        &self.start_per_device
    }

    pub fn device_count(&self, device: usize) -> u32 {
        self.per_device.get(device).copied().unwrap_or(0)
    }

    pub fn device_start(&self, device: usize) -> u32 {
        self.start_per_device.get(device).copied().unwrap_or(0)
    }

    pub fn set_total(&mut self, total: u32) {
        self.total = total;
    }

    pub fn set_node_count(&mut self, rank: usize, count: u32) {
        if let Some(slot) = self.per_node.get_mut(rank) {
            *slot = count;
        }
    }

    pub fn set_node_counts(&mut self, counts: &[u32]) {
        self.per_node.clear();
        self.per_node.extend_from_slice(counts);
    }

    pub fn set_device_count(&mut self, device: usize, count: u32) {
        if let Some(slot) = self.per_device.get_mut(device) {
            *slot = count;
        }
        self.update_starts();
    }

    /// Replace every per-device count and recompute start offsets
    pub fn set_device_counts(&mut self, counts: &[u32]) {
        self.per_device.clear();
        self.per_device.extend_from_slice(counts);
        self.update_starts();
    }

    /// Sum of the local devices' counts
    pub fn node_sum(&self) -> u64 {
        self.per_device.iter().map(|&c| c as u64).sum()
    }

    fn update_starts(&mut self) {
        self.start_per_device.resize(self.per_device.len(), 0);
        let mut start = 0u32;
        for (slot, &count) in self.start_per_device.iter_mut().zip(&self.per_device) {
            *slot = start;
            start = start.saturating_add(count);
        }
    }

    /// Check the accounting invariants for node `rank`:
    /// each device count fits in the node count, the node count fits in the
    /// total, device counts add up to the node count and node counts add up
    /// to the total
    pub fn check(&self, rank: usize) -> SimResult<()> {
        let node = *self.per_node.get(rank).ok_or_else(|| SimError::CountInvariant {
            message: format!("no count for node {} of {}", rank, self.per_node.len()),
        })?;

        if node > self.total {
            return Err(SimError::CountInvariant {
                message: format!("node {} holds {} of {} particles", rank, node, self.total),
            });
        }
        if let Some((device, &count)) = self.per_device.iter().enumerate().find(|(_, &c)| c > node) {
            return Err(SimError::CountInvariant {
                message: format!("device {} holds {} of {} node particles", device, count, node),
            });
        }
        let device_sum = self.node_sum();
        if device_sum != node as u64 {
            return Err(SimError::CountInvariant {
                message: format!(
                    "devices of node {} hold {} particles, node count is {}",
                    rank, device_sum, node
                ),
            });
        }
        let node_sum: u64 = self.per_node.iter().map(|&c| c as u64).sum();
        if node_sum != self.total as u64 {
            return Err(SimError::CountInvariant {
                message: format!("nodes hold {} particles, total is {}", node_sum, self.total),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        let counts = ParticleCounts::with_even_split(10, 3);
        assert_eq!(counts.per_device(), &[4, 3, 3]);
        assert_eq!(counts.start_per_device(), &[0, 4, 7]);
        assert!(counts.check(0).is_ok());
    }

    #[test]
    fn test_migration_keeps_invariant() {
        let mut counts = ParticleCounts::with_even_split(100, 2);
        // 7 particles move from device 0 to device 1
        counts.set_device_counts(&[43, 57]);
        assert!(counts.check(0).is_ok());
        assert_eq!(counts.device_start(1), 43);
    }

    #[test]
    fn test_detects_lost_particles() {
        let mut counts = ParticleCounts::with_even_split(100, 2);
        counts.set_device_count(1, 49);
        let err = counts.check(0).unwrap_err();
        assert!(matches!(err, SimError::CountInvariant { .. }));
    }

    #[test]
    fn test_multi_node() {
        let mut counts = ParticleCounts::new(2, 2);
        counts.set_total(30);
        counts.set_node_counts(&[12, 18]);
        counts.set_device_counts(&[5, 7]);
        assert!(counts.check(0).is_ok());
        assert!(counts.check(1).is_err(), "local devices do not sum to node 1");
        assert!(counts.check(2).is_err());

        counts.set_node_counts(&[12, 20]);
        assert!(counts.check(0).is_err(), "node counts exceed the total");
    }
}
