//! Device workers
//!
//! One long-lived thread per device. Each worker owns the buffers of its
//! device, waits at the barrier for a command, runs it through its
//! `PhaseExecutor`, reports the outcome on a channel and rejoins.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use glam::Vec3;

use crate::buffers::BufferList;
use crate::coordination::{Command, CommandState, GlobalData, SharedGlobalData};
use crate::domain::GlobalDeviceId;
use crate::error::{SimError, SimResult};
use crate::flags::Flag;
use crate::runtime::sync::Synchronizer;

/// What a worker sees while running one phase
pub struct PhaseContext<'a> {
    /// Node-local device index
    pub device: usize,
    pub id: GlobalDeviceId,
    pub command: CommandState,
    pub global: &'a GlobalData,
    pub buffers: &'a mut BufferList,
}

impl PhaseContext<'_> {
    pub fn read_slot(&self, key: Flag) -> usize {
        self.global.slots.read_slot(key)
    }

    pub fn write_slot(&self, key: Flag) -> usize {
        self.global.slots.write_slot(key)
    }

    /// Particles this device works on, as last set by the orchestrator
    pub fn particle_count(&self) -> u32 {
        self.global.counts.device_count(self.device)
    }
}

/// Results a device hands back to the orchestrator after a phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub device: usize,
    pub command: Command,
    /// New particle count, after phases that add or remove particles
    pub particles: Option<u32>,
    /// Time step proposed by the device
    pub dt: Option<f32>,
    /// Partial `(body, force, torque)` sums over the device's particles
    pub body_forces: Vec<(usize, Vec3, Vec3)>,
}

impl PhaseReport {
    pub fn new(device: usize, command: Command) -> Self {
        Self {
            device,
            command,
            particles: None,
            dt: None,
            body_forces: Vec::new(),
        }
    }

    pub fn with_particles(mut self, particles: u32) -> Self {
        self.particles = Some(particles);
        self
    }

    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = Some(dt);
        self
    }

    pub fn with_body_force(mut self, body: usize, force: Vec3, torque: Vec3) -> Self {
        self.body_forces.push((body, force, torque));
        self
    }
}

/// Device-side compute for every phase
pub trait PhaseExecutor: Send {
    /// Size and fill the device buffers before the first phase
    fn prepare(&mut self, _device: usize, _buffers: &mut BufferList) -> SimResult<()> {
        Ok(())
    }

    fn execute(&mut self, ctx: PhaseContext<'_>) -> SimResult<PhaseReport>;
}

/// Message sent to the orchestrator before rejoining the barrier
#[derive(Debug)]
pub struct WorkerMessage {
    pub device: usize,
    pub command: Command,
    pub result: SimResult<PhaseReport>,
}

/// Handle on a running device thread
pub struct DeviceWorker {
    device: usize,
    handle: Option<JoinHandle<()>>,
}

impl DeviceWorker {
    pub fn spawn(
        device: usize,
        global: SharedGlobalData,
        sync: Arc<dyn Synchronizer>,
        reports: Sender<WorkerMessage>,
        buffers: BufferList,
        executor: Box<dyn PhaseExecutor>,
    ) -> SimResult<Self> {
        let handle = std::thread::Builder::new()
            .name(format!("device-{}", device))
            .spawn(move || worker_loop(device, global, sync, reports, buffers, executor))?;
        Ok(Self {
            device,
            handle: Some(handle),
        })
    }

    pub fn device(&self) -> usize {
        self.device
    }

    /// Wait for the thread to exit. Only call after the worker ran `QUIT`.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[Worker {}] Thread panicked outside of a phase", self.device);
            }
        }
    }
}

fn worker_loop(
    device: usize,
    global: SharedGlobalData,
    sync: Arc<dyn Synchronizer>,
    reports: Sender<WorkerMessage>,
    mut buffers: BufferList,
    mut executor: Box<dyn PhaseExecutor>,
) {
    log::debug!("[Worker {}] Started with {} buffers", device, buffers.len());
    let _departure = Departure {
        device,
        sync: sync.clone(),
    };

    loop {
        sync.barrier();

        let (command, result) = {
            let data = global.read();
            let state = data.command;
            let result = if state.next_command == Command::Quit {
                Ok(PhaseReport::new(device, Command::Quit))
            } else {
                let ctx = PhaseContext {
                    device,
                    id: data.local_device_id(device),
                    command: state,
                    global: &data,
                    buffers: &mut buffers,
                };
                run_phase(device, state.next_command, &mut *executor, ctx)
            };
            (state.next_command, result)
        };

        if let Err(e) = &result {
            log::error!("[Worker {}] {} failed: {}", device, command, e);
        }
        if reports.send(WorkerMessage { device, command, result }).is_err() {
            log::warn!("[Worker {}] Orchestrator stopped listening", device);
        }

        sync.barrier();

        if command == Command::Quit {
            break;
        }
    }

    buffers.clear();
    log::debug!("[Worker {}] Stopped", device);
}

/// Takes a worker out of the barrier when its thread ends, including by a
/// panic that escaped `run_phase`
struct Departure {
    device: usize,
    sync: Arc<dyn Synchronizer>,
}

impl Drop for Departure {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("[Worker {}] Thread died, leaving the barrier", self.device);
        }
        self.sync.leave();
    }
}

/// Run one phase, turning a panic into a phase failure so the worker still
/// reaches the barrier
fn run_phase(
    device: usize,
    command: Command,
    executor: &mut dyn PhaseExecutor,
    ctx: PhaseContext<'_>,
) -> SimResult<PhaseReport> {
    match catch_unwind(AssertUnwindSafe(|| executor.execute(ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(SimError::PhaseFailed {
                device,
                command,
                message,
            })
        }
    }
}
