//! Shared coordination state
//!
//! Held behind `SharedGlobalData`. The orchestrator takes the write lock
//! only between barriers; workers take the read lock during a phase.

use std::sync::Arc;

use glam::{Mat3, Vec3, Vec4};
use parking_lot::RwLock;

use crate::coordination::command::CommandState;
use crate::coordination::slots::DoubleBufferSlots;
use crate::domain::{
    DeviceLayout, DeviceMap, DomainSplitter, GlobalDeviceId, GridGeometry, ParticleCounts,
};
use crate::error::{SimError, SimResult};
use crate::flags::Flag;

/// Maximum number of rigid bodies tracked on the host
pub const MAX_BODIES: usize = 16;

pub type SharedGlobalData = Arc<RwLock<GlobalData>>;

/// Grid, device layout and the cell to device map
#[derive(Debug, Clone)]
pub struct DomainDecomposition {
    geometry: GridGeometry,
    layout: DeviceLayout,
    device_map: DeviceMap,
}

impl DomainDecomposition {
    /// Start with every cell assigned to the first device
    pub fn new(geometry: GridGeometry, layout: DeviceLayout) -> Self {
        let device_map = DeviceMap::uniform(geometry.total_cells(), GlobalDeviceId::default());
        Self { geometry, layout, device_map }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn layout(&self) -> DeviceLayout {
        self.layout
    }

    pub fn device_map(&self) -> &DeviceMap {
        &self.device_map
    }

    /// Rebuild the device map from a fresh particle histogram.
    ///
    /// The splitter's dense numbering is packed into global ids here and
    /// nowhere else. On error the previous map stays in place.
    pub fn recompute(&mut self, splitter: &dyn DomainSplitter, histogram: &[u32]) -> SimResult<()> {
        self.device_map = DeviceMap::recompute(splitter, &self.geometry, histogram, self.layout)?;
        Ok(())
    }

    /// Device owning the cell that contains `pos`
    #[inline]
    pub fn owner_device_of(&self, pos: Vec3) -> GlobalDeviceId {
        if self.layout.is_single_device() {
            return GlobalDeviceId::default();
        }
        self.device_map.owner(self.geometry.cell_index_of(pos))
    }

    /// Global id of node-local device `local` on node `rank`
    pub fn device_id(&self, rank: usize, local: usize) -> GlobalDeviceId {
        GlobalDeviceId::new(rank as u8, local as u8)
    }

    pub fn linear_device_number(&self, id: GlobalDeviceId) -> usize {
        id.linear(self.layout.devices_per_node)
    }
}

/// Iteration and time step bookkeeping
#[derive(Debug, Clone)]
pub struct TimeControl {
    pub keep_going: bool,
    pub iterations: u64,
    pub t: f32,
    pub dt: f32,
    /// Last time step proposed by each local device
    pub dts: Vec<f32>,
    /// Skip writing results
    pub nosave: bool,
}

impl TimeControl {
    pub fn new(devices: usize, dt: f32) -> Self {
        Self {
            keep_going: true,
            iterations: 0,
            t: 0.0,
            dt,
            dts: vec![0.0; devices],
            nosave: false,
        }
    }

    /// Take the smallest valid per-device time step as the global one.
    /// Leaves `dt` untouched when no device proposed a step.
    pub fn reduce_dt(&mut self) -> f32 {
        if let Some(min) = self
            .dts
            .iter()
            .copied()
            .filter(|dt| dt.is_finite() && *dt > 0.0)
            .reduce(f32::min)
        {
            self.dt = min;
        }
        self.dt
    }

    pub fn advance(&mut self) {
        self.t += self.dt;
        self.iterations += 1;
    }
}

/// Rigid body reductions and the motion computed for them on the host
#[derive(Debug, Clone)]
pub struct RigidBodies {
    count: usize,
    pub last_index: [u32; MAX_BODIES],
    partial_force: Vec<[Vec3; MAX_BODIES]>,
    partial_torque: Vec<[Vec3; MAX_BODIES]>,
    pub gravity_centers: Vec<Vec3>,
    pub translations: Vec<Vec3>,
    pub rotations: Vec<Mat3>,
}

impl RigidBodies {
    pub fn new(devices: usize) -> Self {
        Self {
            count: 0,
            last_index: [0; MAX_BODIES],
            partial_force: vec![[Vec3::ZERO; MAX_BODIES]; devices],
            partial_torque: vec![[Vec3::ZERO; MAX_BODIES]; devices],
            gravity_centers: Vec::new(),
            translations: Vec::new(),
            rotations: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn set_count(&mut self, count: usize) -> SimResult<()> {
        if count > MAX_BODIES {
            return Err(SimError::Config {
                message: format!("{} rigid bodies, at most {} supported", count, MAX_BODIES),
            });
        }
        self.count = count;
        self.gravity_centers.resize(count, Vec3::ZERO);
        self.translations.resize(count, Vec3::ZERO);
        self.rotations.resize(count, Mat3::IDENTITY);
        Ok(())
    }

    /// Store one device's partial force and torque on `body`
    pub fn set_partial(&mut self, device: usize, body: usize, force: Vec3, torque: Vec3) {
        if body >= self.count {
            return;
        }
        if let (Some(f), Some(t)) = (self.partial_force.get_mut(device), self.partial_torque.get_mut(device)) {
            f[body] = force;
            t[body] = torque;
        }
    }

    /// Sum the partials over devices: one `(force, torque)` per body
    pub fn total_body_forces(&self) -> Vec<(Vec3, Vec3)> {
        (0..self.count)
            .map(|body| {
                let force = self.partial_force.iter().map(|f| f[body]).sum();
                let torque = self.partial_torque.iter().map(|t| t[body]).sum();
                (force, torque)
            })
            .collect()
    }

    pub fn reset_partials(&mut self) {
        for f in &mut self.partial_force {
            *f = [Vec3::ZERO; MAX_BODIES];
        }
        for t in &mut self.partial_torque {
            *t = [Vec3::ZERO; MAX_BODIES];
        }
    }
}

/// Record shared by the orchestrator and every device worker of a node
#[derive(Debug, Clone)]
pub struct GlobalData {
    pub rank: usize,
    pub decomposition: DomainDecomposition,
    pub counts: ParticleCounts,
    pub slots: DoubleBufferSlots,
    pub command: CommandState,
    pub time: TimeControl,
    pub bodies: RigidBodies,
    /// Variable gravity, uploaded by `UPLOAD_GRAVITY`
    pub gravity: Vec3,
    /// Plane equations and their normal lengths, uploaded by `UPLOAD_PLANES`
    pub planes: Vec<Vec4>,
    pub planes_div: Vec<f32>,
    /// Moving boundary data, uploaded by `UPLOAD_MBDATA`
    pub mb_data: Vec<Vec4>,
}

impl GlobalData {
    pub fn new(geometry: GridGeometry, layout: DeviceLayout, rank: usize) -> Self {
        let devices = layout.devices_per_node;
        Self {
            rank,
            decomposition: DomainDecomposition::new(geometry, layout),
            counts: ParticleCounts::new(devices, layout.nodes),
            slots: DoubleBufferSlots::new(),
            command: CommandState::default(),
            time: TimeControl::new(devices, 0.0),
            bodies: RigidBodies::new(devices),
            gravity: Vec3::new(0.0, 0.0, -9.81),
            planes: Vec::new(),
            planes_div: Vec::new(),
            mb_data: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedGlobalData {
        Arc::new(RwLock::new(self))
    }

    pub fn geometry(&self) -> &GridGeometry {
        self.decomposition.geometry()
    }

    pub fn layout(&self) -> DeviceLayout {
        self.decomposition.layout()
    }

    pub fn owner_device_of(&self, pos: Vec3) -> GlobalDeviceId {
        self.decomposition.owner_device_of(pos)
    }

    /// Global id of local device `local` on this node
    pub fn local_device_id(&self, local: usize) -> GlobalDeviceId {
        self.decomposition.device_id(self.rank, local)
    }

    /// Exchange read/write slots of the double-buffered families in `mask`.
    /// Only call with no phase in flight.
    pub fn swap_buffers(&mut self, mask: Flag) {
        self.slots.swap(mask);
    }

    /// Replace the plane set, keeping the normal lengths in step
    pub fn set_planes(&mut self, planes: Vec<Vec4>) {
        self.planes_div = planes.iter().map(|p| p.truncate().length()).collect();
        self.planes = planes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;

    fn geometry() -> GridGeometry {
        GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::new(4, 1, 1)).unwrap()
    }

    /// Assigns cell i to dense device i
    struct PerCell;

    impl DomainSplitter for PerCell {
        fn split(&self, geometry: &GridGeometry, _: &[u32], total: usize) -> SimResult<Vec<u32>> {
            Ok((0..geometry.total_cells()).map(|c| c % total as u32).collect())
        }
    }

    #[test]
    fn test_single_device_fast_path() {
        let mut decomposition = DomainDecomposition::new(geometry(), DeviceLayout::single());
        // a bogus map must not matter
        decomposition.device_map = DeviceMap::uniform(4, GlobalDeviceId::new(3, 3));
        for x in [-10.0, 0.5, 2.5, 100.0] {
            assert_eq!(decomposition.owner_device_of(Vec3::new(x, 0.5, 0.5)), GlobalDeviceId::default());
        }
    }

    #[test]
    fn test_owner_lookup_after_recompute() {
        let layout = DeviceLayout::new(2, 2).unwrap();
        let mut decomposition = DomainDecomposition::new(geometry(), layout);
        decomposition.recompute(&PerCell, &[0; 4]).unwrap();

        let owner = decomposition.owner_device_of(Vec3::new(2.5, 0.5, 0.5));
        assert_eq!(owner, GlobalDeviceId::new(1, 0));
        assert_eq!(decomposition.linear_device_number(owner), 2);
        // out of domain positions clamp to the border cell
        assert_eq!(
            decomposition.owner_device_of(Vec3::new(50.0, 0.5, 0.5)),
            GlobalDeviceId::new(1, 1)
        );
    }

    #[test]
    fn test_recompute_twice_is_stable() {
        let layout = DeviceLayout::new(2, 2).unwrap();
        let mut decomposition = DomainDecomposition::new(geometry(), layout);
        decomposition.recompute(&PerCell, &[0; 4]).unwrap();
        let first = decomposition.device_map().clone();
        decomposition.recompute(&PerCell, &[0; 4]).unwrap();
        assert_eq!(decomposition.device_map(), &first);
    }

    #[test]
    fn test_reduce_dt() {
        let mut time = TimeControl::new(3, 1e-3);
        assert_eq!(time.reduce_dt(), 1e-3);
        time.dts = vec![2e-4, 1e-4, 0.0];
        assert_eq!(time.reduce_dt(), 1e-4);
        time.advance();
        assert_eq!(time.iterations, 1);
        assert!((time.t - 1e-4).abs() < 1e-9);
    }

    #[test]
    fn test_body_force_reduction() {
        let mut bodies = RigidBodies::new(2);
        bodies.set_count(2).unwrap();
        bodies.set_partial(0, 1, Vec3::X, Vec3::Z);
        bodies.set_partial(1, 1, Vec3::Y, Vec3::Z);
        bodies.set_partial(1, 5, Vec3::ONE, Vec3::ONE);
        let totals = bodies.total_body_forces();
        assert_eq!(totals[0], (Vec3::ZERO, Vec3::ZERO));
        assert_eq!(totals[1], (Vec3::new(1.0, 1.0, 0.0), Vec3::new(0.0, 0.0, 2.0)));

        bodies.reset_partials();
        assert_eq!(bodies.total_body_forces()[1], (Vec3::ZERO, Vec3::ZERO));
        assert!(bodies.set_count(MAX_BODIES + 1).is_err());
    }

    #[test]
    fn test_planes_div() {
        let mut data = GlobalData::new(geometry(), DeviceLayout::single(), 0);
        data.set_planes(vec![Vec4::new(3.0, 4.0, 0.0, 1.0)]);
        assert_eq!(data.planes_div, vec![5.0]);
    }
}
