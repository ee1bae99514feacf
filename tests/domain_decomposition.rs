use glam::{IVec3, UVec3, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use particle_orchestrator::coordination::{DomainDecomposition, GlobalData};
use particle_orchestrator::domain::{
    cell_histogram, save_device_map, AxisSplitter, DeviceLayout, DeviceMap, DumpOrigin,
    GlobalDeviceId, GridGeometry, ParticleCounts, MAX_DEVICES_PER_NODE, MAX_NODES_PER_CLUSTER,
};
use particle_orchestrator::RunConfig;

fn random_grid(rng: &mut StdRng) -> GridGeometry {
    let size = UVec3::new(rng.gen_range(1..12), rng.gen_range(1..12), rng.gen_range(1..12));
    let origin = Vec3::new(rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0));
    let cell = Vec3::new(rng.gen_range(0.1..2.0), rng.gen_range(0.1..2.0), rng.gen_range(0.1..2.0));
    GridGeometry::new(origin, cell, size).unwrap()
}

#[test]
fn test_two_by_two_by_two_grid() {
    let geometry = GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::splat(2)).unwrap();
    let coord = geometry.cell_coord_of(Vec3::new(1.5, 0.5, 1.5));
    assert_eq!(coord, IVec3::new(1, 0, 1));
    // (z * ny + y) * nx + x is authoritative: (1 * 2 + 0) * 2 + 1 = 5
    assert_eq!(geometry.linear_cell_index(coord), 5);
    assert_eq!(geometry.cell_coord_from_linear(5), coord);
}

#[test]
fn test_cell_hash_round_trip() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let geometry = random_grid(&mut rng);
        for coord in geometry.cells() {
            let index = geometry.linear_cell_index(coord);
            assert_eq!(geometry.cell_coord_from_linear(index), coord);
        }
    }
}

#[test]
fn test_clamping_matches_nearest_cell() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..50 {
        let geometry = random_grid(&mut rng);
        let max = geometry.grid_size().as_ivec3() - IVec3::ONE;
        for _ in 0..100 {
            let coord = IVec3::new(rng.gen_range(-20..20), rng.gen_range(-20..20), rng.gen_range(-20..20));
            let nearest = coord.clamp(IVec3::ZERO, max);
            assert_eq!(geometry.linear_cell_index(coord), geometry.linear_cell_index(nearest));
        }
    }
}

#[test]
fn test_device_id_packing() {
    for rank in 0..MAX_NODES_PER_CLUSTER {
        for local in 0..MAX_DEVICES_PER_NODE {
            let id = GlobalDeviceId::new(rank as u8, local as u8);
            assert_eq!(id.rank() as usize, rank);
            assert_eq!(id.local_index() as usize, local);
            assert_eq!(id.linear(MAX_DEVICES_PER_NODE), rank * MAX_DEVICES_PER_NODE + local);
        }
    }
}

#[test]
fn test_single_device_owns_everything() {
    let mut rng = StdRng::seed_from_u64(3);
    let geometry = random_grid(&mut rng);
    let data = GlobalData::new(geometry, DeviceLayout::single(), 0);
    for _ in 0..200 {
        let pos = Vec3::new(rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0));
        assert_eq!(data.owner_device_of(pos), GlobalDeviceId::default());
    }
}

#[test]
fn test_decomposition_covers_every_cell_and_particle() {
    let mut rng = StdRng::seed_from_u64(42);
    let geometry = GridGeometry::new(Vec3::ZERO, Vec3::splat(0.5), UVec3::new(16, 4, 4)).unwrap();
    let layout = DeviceLayout::new(2, 2).unwrap();
    let positions: Vec<Vec3> = (0..5000)
        .map(|_| {
            // denser towards low x
            let x: f32 = rng.gen::<f32>().powi(2) * 8.0;
            Vec3::new(x, rng.gen_range(0.0..2.0), rng.gen_range(0.0..2.0))
        })
        .collect();

    let histogram = cell_histogram(&geometry, &positions);
    assert_eq!(histogram.iter().sum::<u32>(), 5000);

    let mut decomposition = DomainDecomposition::new(geometry, layout);
    decomposition.recompute(&AxisSplitter, &histogram).unwrap();

    let map = decomposition.device_map();
    assert_eq!(map.len(), geometry.total_cells() as usize);
    assert!(map.cells().iter().all(|id| id.linear(2) < layout.total_devices()));

    // every particle lands on exactly one device and the per-device loads add up
    let mut loads = vec![0u32; layout.total_devices()];
    for pos in &positions {
        let owner = decomposition.owner_device_of(*pos);
        loads[decomposition.linear_device_number(owner)] += 1;
    }
    assert_eq!(loads.iter().sum::<u32>(), 5000);
    assert!(loads.iter().all(|&load| load > 0), "loads {:?}", loads);

    // node 0 view of the accounting
    let mut counts = ParticleCounts::new(2, 2);
    counts.set_total(5000);
    counts.set_node_counts(&[loads[0] + loads[1], loads[2] + loads[3]]);
    counts.set_device_counts(&loads[..2]);
    counts.check(0).unwrap();
    for d in 0..2 {
        assert!(counts.per_device()[d] <= counts.per_node()[0]);
    }
}

#[test]
fn test_device_map_dump_follows_config_naming() {
    let tmp = tempfile::tempdir().unwrap();
    let config = RunConfig {
        output_dir: tmp.path().join("maps"),
        problem_name: "Box".into(),
        deltap: 0.05,
        ..RunConfig::default()
    };
    let geometry = GridGeometry::new(Vec3::ZERO, Vec3::ONE, UVec3::new(2, 2, 2)).unwrap();
    let map = DeviceMap::uniform(8, GlobalDeviceId::new(0, 1));

    let naming = config.dump_naming(Some("devmap"), DumpOrigin::Device { device: 1, devices: 2 });
    let path = save_device_map(&naming, &geometry, &map).unwrap();
    assert_eq!(path, tmp.path().join("maps").join("devmap_Box_dp0.05_dev1.2.csv"));

    let text = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<&str> = text.lines().collect();
    assert_eq!(rows.len(), 9);
    assert_eq!(rows[0], "X,Y,Z,LINEARIZED,VALUE");
    assert_eq!(rows[6], "1,0,1,5,1");
    assert_eq!(rows[8], "1,1,1,7,1");
}
