//! Cell to device assignment
//!
//! The splitter collaborator assigns every cell a dense device number
//! (`rank * devices_per_node + local`). `DeviceMap::recompute` runs the
//! splitter, validates its output and packs each entry into a
//! `GlobalDeviceId` exactly once. There is no public way to re-run the
//! packing on an existing map.

use glam::Vec3;
use rayon::prelude::*;

use crate::domain::device_id::{GlobalDeviceId, MAX_DEVICES_PER_NODE, MAX_NODES_PER_CLUSTER};
use crate::domain::geometry::GridGeometry;
use crate::error::{SimError, SimResult};

/// Layout of the devices taking part in the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLayout {
    pub devices_per_node: usize,
    pub nodes: usize,
}

impl DeviceLayout {
    pub fn new(devices_per_node: usize, nodes: usize) -> SimResult<Self> {
        if devices_per_node == 0 || devices_per_node > MAX_DEVICES_PER_NODE {
            return Err(SimError::InvalidDeviceMap {
                message: format!(
                    "{} devices per node, supported range is 1..={}",
                    devices_per_node, MAX_DEVICES_PER_NODE
                ),
            });
        }
        if nodes == 0 || nodes > MAX_NODES_PER_CLUSTER {
            return Err(SimError::InvalidDeviceMap {
                message: format!(
                    "{} nodes, supported range is 1..={}",
                    nodes, MAX_NODES_PER_CLUSTER
                ),
            });
        }
        Ok(Self { devices_per_node, nodes })
    }

    pub fn single() -> Self {
        Self { devices_per_node: 1, nodes: 1 }
    }

    pub fn total_devices(&self) -> usize {
        self.devices_per_node * self.nodes
    }

    pub fn is_single_device(&self) -> bool {
        self.devices_per_node == 1 && self.nodes == 1
    }
}

/// Decomposition collaborator: produces one dense device number per cell
pub trait DomainSplitter {
    fn split(
        &self,
        geometry: &GridGeometry,
        histogram: &[u32],
        total_devices: usize,
    ) -> SimResult<Vec<u32>>;
}

/// Owning device of every cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMap {
    cells: Vec<GlobalDeviceId>,
}

impl DeviceMap {
    /// Every cell owned by one device
    pub fn uniform(total_cells: u32, owner: GlobalDeviceId) -> Self {
        Self {
            cells: vec![owner; total_cells as usize],
        }
    }

    /// Run `splitter` and pack its dense numbering into global device ids
    pub fn recompute(
        splitter: &dyn DomainSplitter,
        geometry: &GridGeometry,
        histogram: &[u32],
        layout: DeviceLayout,
    ) -> SimResult<Self> {
        let total_cells = geometry.total_cells() as usize;
        if histogram.len() != total_cells {
            return Err(SimError::InvalidDeviceMap {
                message: format!(
                    "histogram has {} entries for {} cells",
                    histogram.len(),
                    total_cells
                ),
            });
        }

        let dense = splitter.split(geometry, histogram, layout.total_devices())?;
        if dense.len() != total_cells {
            return Err(SimError::InvalidDeviceMap {
                message: format!("splitter assigned {} of {} cells", dense.len(), total_cells),
            });
        }
        let total_devices = layout.total_devices() as u32;
        if let Some(bad) = dense.par_iter().find_any(|&&number| number >= total_devices) {
            return Err(SimError::InvalidDeviceMap {
                message: format!("device number {} out of {} devices", bad, total_devices),
            });
        }

        let cells = dense
            .par_iter()
            .map(|&number| GlobalDeviceId::from_linear(number as usize, layout.devices_per_node))
            .collect();

        log::debug!(
            "[DeviceMap] Recomputed assignment of {} cells over {} devices",
            total_cells,
            total_devices
        );
        Ok(Self { cells })
    }

    #[inline]
    pub fn owner(&self, cell: u32) -> GlobalDeviceId {
        self.cells[cell as usize]
    }

    pub fn get(&self, cell: u32) -> Option<GlobalDeviceId> {
        self.cells.get(cell as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[GlobalDeviceId] {
        &self.cells
    }

    /// Number of cells owned by each device, indexed by dense device number
    pub fn cells_per_device(&self, layout: DeviceLayout) -> Vec<usize> {
        let mut counts = vec![0; layout.total_devices()];
        for id in &self.cells {
            if let Some(count) = counts.get_mut(id.linear(layout.devices_per_node)) {
                *count += 1;
            }
        }
        counts
    }
}

/// Count the particles falling in each cell (positions outside the grid are
/// clamped to the border cells)
pub fn cell_histogram(geometry: &GridGeometry, positions: &[Vec3]) -> Vec<u32> {
    let cells = geometry.total_cells() as usize;
    positions
        .par_iter()
        .fold(
            || vec![0u32; cells],
            |mut histogram, &pos| {
                histogram[geometry.cell_index_of(pos) as usize] += 1;
                histogram
            },
        )
        .reduce(
            || vec![0u32; cells],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        )
}

/// Cuts the grid into slabs along its longest axis and hands contiguous runs
/// of slabs to devices so that particle counts are balanced
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisSplitter;

impl AxisSplitter {
    fn longest_axis(geometry: &GridGeometry) -> usize {
        let grid = geometry.grid_size();
        if grid.x >= grid.y && grid.x >= grid.z {
            0
        } else if grid.y >= grid.z {
            1
        } else {
            2
        }
    }
}

impl DomainSplitter for AxisSplitter {
    fn split(
        &self,
        geometry: &GridGeometry,
        histogram: &[u32],
        total_devices: usize,
    ) -> SimResult<Vec<u32>> {
        let axis = Self::longest_axis(geometry);
        let slabs = geometry.grid_size().to_array()[axis] as usize;

        let mut weights = vec![0u64; slabs];
        for (index, &count) in histogram.iter().enumerate() {
            let coord = geometry.cell_coord_from_linear(index as u32).to_array()[axis];
            weights[coord as usize] += count as u64;
        }
        let mut total: u64 = weights.iter().sum();
        if total == 0 {
            // no particles yet: balance cells instead
            weights.iter_mut().for_each(|w| *w = 1);
            total = slabs as u64;
        }

        let mut slab_owner = vec![0u32; slabs];
        let mut device = 0usize;
        let mut accumulated = 0u64;
        for (slab, &weight) in weights.iter().enumerate() {
            slab_owner[slab] = device as u32;
            accumulated += weight;
            let boundary = total * (device as u64 + 1) / total_devices as u64;
            let slabs_left = slabs - slab - 1;
            let devices_left = total_devices - device - 1;
            if devices_left > 0 && (accumulated >= boundary || slabs_left <= devices_left) {
                device += 1;
            }
        }

        Ok((0..geometry.total_cells())
            .map(|index| {
                let coord = geometry.cell_coord_from_linear(index).to_array()[axis];
                slab_owner[coord as usize]
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;

    /// Hands out a fixed dense assignment
    struct Fixed(Vec<u32>);

    impl DomainSplitter for Fixed {
        fn split(&self, _: &GridGeometry, _: &[u32], _: usize) -> SimResult<Vec<u32>> {
            Ok(self.0.clone())
        }
    }

    fn grid(x: u32, y: u32, z: u32) -> GridGeometry {
        GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::new(x, y, z)).unwrap()
    }

    #[test]
    fn test_recompute_packs_dense_numbers() {
        let geometry = grid(2, 2, 1);
        let layout = DeviceLayout::new(2, 2).unwrap();
        let map = DeviceMap::recompute(&Fixed(vec![0, 1, 2, 3]), &geometry, &[0; 4], layout).unwrap();

        assert_eq!(map.owner(0), GlobalDeviceId::new(0, 0));
        assert_eq!(map.owner(1), GlobalDeviceId::new(0, 1));
        assert_eq!(map.owner(2), GlobalDeviceId::new(1, 0));
        assert_eq!(map.owner(3), GlobalDeviceId::new(1, 1));
        assert_eq!(map.owner(3).raw(), 0b1001);
        assert_eq!(map.cells_per_device(layout), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_recompute_rejects_incomplete_or_invalid_maps() {
        let geometry = grid(2, 2, 1);
        let layout = DeviceLayout::new(2, 1).unwrap();
        assert!(DeviceMap::recompute(&Fixed(vec![0, 1, 0]), &geometry, &[0; 4], layout).is_err());
        assert!(DeviceMap::recompute(&Fixed(vec![0, 1, 2, 0]), &geometry, &[0; 4], layout).is_err());
        assert!(DeviceMap::recompute(&Fixed(vec![0; 4]), &geometry, &[0; 3], layout).is_err());
    }

    #[test]
    fn test_layout_limits() {
        assert!(DeviceLayout::new(0, 1).is_err());
        assert!(DeviceLayout::new(MAX_DEVICES_PER_NODE + 1, 1).is_err());
        assert!(DeviceLayout::new(1, MAX_NODES_PER_CLUSTER + 1).is_err());
        assert!(DeviceLayout::single().is_single_device());
        assert_eq!(DeviceLayout::new(4, 3).unwrap().total_devices(), 12);
    }

    #[test]
    fn test_histogram() {
        let geometry = grid(2, 1, 1);
        let positions = [
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(1.5, 0.5, 0.5),
            Vec3::new(1.7, 0.2, 0.1),
            Vec3::new(-3.0, 0.0, 0.0),
        ];
        assert_eq!(cell_histogram(&geometry, &positions), vec![2, 2]);
    }

    #[test]
    fn test_axis_splitter_balances_particles() {
        let geometry = grid(8, 2, 1);
        // all the particles sit in the first four x-slabs
        let mut histogram = vec![0u32; 16];
        for y in 0..2 {
            for x in 0..4 {
                histogram[y * 8 + x] = 10;
            }
        }
        let layout = DeviceLayout::new(2, 1).unwrap();
        let map = DeviceMap::recompute(&AxisSplitter, &geometry, &histogram, layout).unwrap();

        let loads = (0..16).fold([0u32; 2], |mut loads, cell| {
            loads[map.owner(cell).local_index() as usize] += histogram[cell as usize];
            loads
        });
        assert_eq!(loads, [40, 40]);
        // slabs are contiguous along x
        assert_eq!(map.owner(0), map.owner(8));
        assert_eq!(map.owner(7).local_index(), 1);
    }

    #[test]
    fn test_axis_splitter_gives_every_device_a_slab() {
        let geometry = grid(4, 1, 1);
        // everything in the first slab
        let histogram = vec![100, 0, 0, 0];
        let layout = DeviceLayout::new(4, 1).unwrap();
        let map = DeviceMap::recompute(&AxisSplitter, &geometry, &histogram, layout).unwrap();
        assert_eq!(map.cells_per_device(layout), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_axis_splitter_empty_domain() {
        let geometry = grid(1, 6, 1);
        let layout = DeviceLayout::new(3, 1).unwrap();
        let map = DeviceMap::recompute(&AxisSplitter, &geometry, &[0; 6], layout).unwrap();
        assert_eq!(map.cells_per_device(layout), vec![2, 2, 2]);
    }
}
