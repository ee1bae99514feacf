//! Host reference executor
//!
//! Runs the core phases on the CPU against a device's `BufferList`: cell
//! hashing, sorting, reordering into the write slots, a gravity-only force,
//! an explicit predictor/corrector step and cropping of particles that left
//! the domain. Used by the binary and by the integration tests in place of
//! accelerator kernels.

use glam::{Vec3, Vec4};

use crate::buffers::traits::{Forces, Hash, Info, PartIndex, Pos, Vel};
use crate::buffers::{BufferList, BufferTrait};
use crate::coordination::Command;
use crate::error::{SimError, SimResult};
use crate::flags::{
    Flag, BUFFER_FORCES, BUFFER_HASH, BUFFER_INFO, BUFFER_PARTINDEX, BUFFER_POS, BUFFER_VEL,
    INTEGRATOR_STEP_1,
};
use crate::runtime::worker::{PhaseContext, PhaseExecutor, PhaseReport};

/// Buffers the host executor works on
pub const HOST_BUFFERS: Flag =
    BUFFER_POS | BUFFER_VEL | BUFFER_INFO | BUFFER_HASH | BUFFER_PARTINDEX | BUFFER_FORCES;

pub struct HostExecutor {
    /// Initial positions (xyz) and masses (w)
    initial: Vec<Vec4>,
    /// Time step proposed after every force computation
    dt: f32,
}

impl HostExecutor {
    pub fn new(initial: Vec<Vec4>, dt: f32) -> Self {
        Self { initial, dt }
    }
}

fn missing<K: BufferTrait>() -> SimError {
    SimError::MissingBuffer { name: K::NAME }
}

/// Copy of the first `n` elements of `slot` of family `K`
fn snapshot<K: BufferTrait>(buffers: &BufferList, slot: usize, n: usize) -> SimResult<Vec<K::Element>> {
    let data = buffers.get_buffer_data::<K>(slot).ok_or_else(missing::<K>)?;
    Ok(data[..n.min(data.len())].to_vec())
}

/// `write[i] = read[order[i]]` for family `K`; absent families are skipped
fn reorder<K: BufferTrait>(ctx: &mut PhaseContext<'_>, order: &[u32]) -> SimResult<()> {
    let (read, write) = (ctx.read_slot(K::KEY), ctx.write_slot(K::KEY));
    let Some(buffer) = ctx.buffers.get_buffer_mut::<K>() else {
        return Ok(());
    };
    let (src, dst) = buffer.read_write(read, write).ok_or_else(missing::<K>)?;
    for (slot, &from) in dst.iter_mut().zip(order) {
        *slot = src[from as usize];
    }
    Ok(())
}

impl HostExecutor {
    fn particles(ctx: &PhaseContext<'_>) -> usize {
        let allocated = ctx
            .buffers
            .get_buffer_data::<Pos>(0)
            .map_or(0, |data| data.len());
        (ctx.particle_count() as usize).min(allocated)
    }

    fn calc_hash(ctx: &mut PhaseContext<'_>) -> SimResult<()> {
        let n = Self::particles(ctx);
        let geometry = *ctx.global.geometry();
        let positions = snapshot::<Pos>(ctx.buffers, ctx.read_slot(BUFFER_POS), n)?;

        let hashes = ctx.buffers.get_buffer_data_mut::<Hash>(0).ok_or_else(missing::<Hash>)?;
        for (hash, pos) in hashes.iter_mut().zip(&positions) {
            *hash = geometry.cell_index_of(Vec4::from(*pos).truncate());
        }
        let index = ctx
            .buffers
            .get_buffer_data_mut::<PartIndex>(0)
            .ok_or_else(missing::<PartIndex>)?;
        for (i, slot) in index.iter_mut().take(n).enumerate() {
            *slot = i as u32;
        }
        Ok(())
    }

    fn sort(ctx: &mut PhaseContext<'_>) -> SimResult<()> {
        let n = Self::particles(ctx);
        let hashes = snapshot::<Hash>(ctx.buffers, 0, n)?;
        let index = snapshot::<PartIndex>(ctx.buffers, 0, n)?;
        let mut pairs: Vec<(u32, u32)> = hashes.into_iter().zip(index).collect();
        pairs.sort_by_key(|&(hash, _)| hash);

        let hashes = ctx.buffers.get_buffer_data_mut::<Hash>(0).ok_or_else(missing::<Hash>)?;
        for (slot, (hash, _)) in hashes.iter_mut().zip(&pairs) {
            *slot = *hash;
        }
        let index = ctx
            .buffers
            .get_buffer_data_mut::<PartIndex>(0)
            .ok_or_else(missing::<PartIndex>)?;
        for (slot, (_, i)) in index.iter_mut().zip(&pairs) {
            *slot = *i;
        }
        Ok(())
    }

    fn reorder(ctx: &mut PhaseContext<'_>) -> SimResult<()> {
        let n = Self::particles(ctx);
        let order = snapshot::<PartIndex>(ctx.buffers, 0, n)?;
        reorder::<Pos>(ctx, &order)?;
        reorder::<Vel>(ctx, &order)?;
        reorder::<Info>(ctx, &order)
    }

    fn forces(ctx: &mut PhaseContext<'_>) -> SimResult<()> {
        let n = Self::particles(ctx);
        let gravity = ctx.global.gravity.extend(0.0).to_array();
        let forces = ctx.buffers.get_buffer_data_mut::<Forces>(0).ok_or_else(missing::<Forces>)?;
        forces.iter_mut().take(n).for_each(|f| *f = gravity);
        Ok(())
    }

    /// Predictor (half step) or corrector (full step) from the read slots
    /// into the write slots
    fn euler(ctx: &mut PhaseContext<'_>) -> SimResult<()> {
        let n = Self::particles(ctx);
        let dt = if ctx.command.flags & INTEGRATOR_STEP_1 != 0 {
            ctx.global.time.dt * 0.5
        } else {
            ctx.global.time.dt
        };
        let forces = snapshot::<Forces>(ctx.buffers, 0, n)?;

        let (read, write) = (ctx.read_slot(BUFFER_VEL), ctx.write_slot(BUFFER_VEL));
        let vel = ctx.buffers.get_buffer_mut::<Vel>().ok_or_else(missing::<Vel>)?;
        let (old, new) = vel.read_write(read, write).ok_or_else(missing::<Vel>)?;
        for i in 0..n {
            let v = Vec4::from(old[i]) + Vec4::from(forces[i]) * dt;
            new[i] = [v.x, v.y, v.z, old[i][3]];
        }
        let velocities = snapshot::<Vel>(ctx.buffers, write, n)?;

        let (read, write) = (ctx.read_slot(BUFFER_POS), ctx.write_slot(BUFFER_POS));
        let pos = ctx.buffers.get_buffer_mut::<Pos>().ok_or_else(missing::<Pos>)?;
        let (old, new) = pos.read_write(read, write).ok_or_else(missing::<Pos>)?;
        for i in 0..n {
            let p = Vec4::from(old[i]).truncate() + Vec4::from(velocities[i]).truncate() * dt;
            new[i] = p.extend(old[i][3]).to_array();
        }
        Ok(())
    }

    /// Drop the particles that left the domain, compacting the survivors at
    /// the front of the read slots. Returns how many are left.
    fn crop(ctx: &mut PhaseContext<'_>) -> SimResult<u32> {
        let n = Self::particles(ctx);
        let geometry = ctx.global.geometry();
        let origin = geometry.world_origin();
        let extent = origin + geometry.world_size();
        let positions = snapshot::<Pos>(ctx.buffers, ctx.read_slot(BUFFER_POS), n)?;
        let keep: Vec<usize> = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                let p = Vec3::new(p[0], p[1], p[2]);
                p.cmpge(origin).all() && p.cmplt(extent).all()
            })
            .map(|(i, _)| i)
            .collect();

        if keep.len() < n {
            compact::<Pos>(ctx, &keep);
            compact::<Vel>(ctx, &keep);
            compact::<Info>(ctx, &keep);
            log::debug!(
                "[HostExecutor] Device {}: cropped {} of {} particles",
                ctx.device,
                n - keep.len(),
                n
            );
        }
        Ok(keep.len() as u32)
    }
}

/// Move the elements listed in `keep` (ascending) to the front of the read
/// slot of family `K`; absent families are skipped
fn compact<K: BufferTrait>(ctx: &mut PhaseContext<'_>, keep: &[usize]) {
    let slot = ctx.read_slot(K::KEY);
    if let Some(data) = ctx.buffers.get_buffer_data_mut::<K>(slot) {
        for (dst, &src) in keep.iter().enumerate() {
            data[dst] = data[src];
        }
    }
}

impl PhaseExecutor for HostExecutor {
    fn prepare(&mut self, device: usize, buffers: &mut BufferList) -> SimResult<()> {
        for key in crate::flags::iter_buffers(HOST_BUFFERS) {
            if !buffers.contains(key) {
                buffers.add_key(key, 0)?;
            }
        }
        buffers.alloc_all(self.initial.len())?;

        // both slots start from the same state
        for slot in 0..Pos::SLOTS {
            let pos = buffers.get_buffer_data_mut::<Pos>(slot).ok_or_else(missing::<Pos>)?;
            for (dst, src) in pos.iter_mut().zip(&self.initial) {
                *dst = src.to_array();
            }
        }
        log::debug!("[HostExecutor] Device {} holds {} particles", device, self.initial.len());
        Ok(())
    }

    fn execute(&mut self, mut ctx: PhaseContext<'_>) -> SimResult<PhaseReport> {
        let command = ctx.command.next_command;
        let report = PhaseReport::new(ctx.device, command);
        match command {
            Command::CalcHash => Self::calc_hash(&mut ctx)?,
            Command::Sort => Self::sort(&mut ctx)?,
            Command::Reorder => Self::reorder(&mut ctx)?,
            Command::Forces => {
                Self::forces(&mut ctx)?;
                return Ok(report.with_dt(self.dt));
            }
            Command::Euler => Self::euler(&mut ctx)?,
            Command::Crop => {
                let particles = Self::crop(&mut ctx)?;
                return Ok(report.with_particles(particles));
            }
            // particles stay on their device in a host run
            Command::UpdateSegments => return Ok(report.with_particles(ctx.particle_count())),
            _ => {}
        }
        Ok(report)
    }
}
