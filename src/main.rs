//! Host reference run
//!
//! Seeds particles on a lattice, splits them over the configured devices,
//! and drives the predictor/corrector command cycle with the CPU executor
//! until `max_iterations` or a quit signal.
//!
//! Usage: particle-orchestrator [config.toml]

use anyhow::{Context, Result};
use glam::{UVec3, Vec3, Vec4};

use particle_orchestrator::buffers::BufferList;
use particle_orchestrator::coordination::{install_signal_handlers, register_control};
use particle_orchestrator::domain::{cell_histogram, save_device_map, AxisSplitter, DumpOrigin};
use particle_orchestrator::runtime::NetworkManager;
use particle_orchestrator::util::{add_separators, rank_string};
use particle_orchestrator::{
    ControlFlags, GlobalData, HostExecutor, LocalNetwork, Orchestrator, ParticleCounts,
    PhaseExecutor, RunConfig,
};

/// `count` particles on a regular lattice filling the lower half of the domain
fn seed_particles(config: &RunConfig, count: u32) -> Vec<Vec4> {
    let extent = config.world_size * Vec3::new(1.0, 1.0, 0.5);
    let side = (count as f32).cbrt().ceil().max(1.0) as u32;
    let spacing = extent / side as f32;
    let lattice = UVec3::splat(side);

    (0..count)
        .map(|i| {
            let cell = UVec3::new(i % lattice.x, (i / lattice.x) % lattice.y, i / (lattice.x * lattice.y));
            let pos = config.world_origin + (cell.as_vec3() + 0.5) * spacing;
            pos.extend(1.0)
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => RunConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => RunConfig::default(),
    };

    let control = ControlFlags::new();
    register_control(control.clone())?;
    install_signal_handlers()?;

    let network = LocalNetwork;
    let geometry = config.geometry()?;
    let layout = config.layout(network.node_count())?;
    log::info!(
        "Problem {} on rank {}: {} cells, {} devices",
        config.problem_name,
        rank_string(network.rank(), network.node_count()),
        add_separators(geometry.total_cells() as i64),
        layout.total_devices()
    );

    let particles = seed_particles(&config, config.particles);
    let mut global = GlobalData::new(geometry, layout, network.rank());
    global.time.dt = config.dt;
    global.time.nosave = config.nosave;

    let positions: Vec<Vec3> = particles.iter().map(|p| p.truncate()).collect();
    let histogram = cell_histogram(&geometry, &positions);
    global.decomposition.recompute(&AxisSplitter, &histogram)?;

    if config.dump_device_map {
        let naming = config.dump_naming(None, DumpOrigin::Rank {
            rank: network.rank(),
            nodes: network.node_count(),
            host: network.processor_name(),
        });
        save_device_map(&naming, &geometry, global.decomposition.device_map())?;
    }

    // hand each device the particles of the cells it owns
    let mut per_device: Vec<Vec<Vec4>> = vec![Vec::new(); layout.devices_per_node];
    for (particle, pos) in particles.iter().zip(&positions) {
        let owner = global.owner_device_of(*pos);
        if owner.rank() as usize == network.rank() {
            per_device[owner.local_index() as usize].push(*particle);
        }
    }
    let counts: Vec<u32> = per_device.iter().map(|p| p.len() as u32).collect();
    let local: u32 = counts.iter().sum();
    global.counts = ParticleCounts::new(layout.devices_per_node, layout.nodes);
    global.counts.set_total(local);
    global.counts.set_node_count(network.rank(), local);
    global.counts.set_device_counts(&counts);
    global.counts.check(network.rank())?;

    let devices: Vec<(BufferList, Box<dyn PhaseExecutor>)> = per_device
        .into_iter()
        .map(|initial| {
            let executor: Box<dyn PhaseExecutor> = Box::new(HostExecutor::new(initial, config.dt));
            (BufferList::new(), executor)
        })
        .collect();

    let mut orchestrator = Orchestrator::start(
        global.into_shared(),
        Box::new(network),
        control.clone(),
        devices,
    )?;
    let iterations = orchestrator.run_iterations(config.max_iterations)?;

    let data = orchestrator.global().read();
    log::info!(
        "Finished after {} iterations, t = {:.6}{}",
        iterations,
        data.time.t,
        if control.quit_requested() { " (quit requested)" } else { "" }
    );
    Ok(())
}
