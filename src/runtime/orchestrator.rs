//! Phase orchestration
//!
//! The orchestrator is the only writer of the shared coordination state. A
//! phase is:
//!
//! 1. write the command under the write lock
//! 2. release barrier: workers start the phase
//! 3. completion barrier: every worker has reported and rejoined
//! 4. cross-node barrier for halo exchanges
//! 5. apply the reports under the write lock
//!
//! Slot swaps and quit checks only happen between phases.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::buffers::BufferList;
use crate::coordination::{Command, CommandState, ControlFlags, SharedGlobalData};
use crate::error::{SimError, SimResult};
use crate::flags::{
    Flag, BUFFERS_POS_VEL_INFO, BUFFER_POS, BUFFER_VEL, DBLBUFFER_READ, DBLBUFFER_WRITE,
    INTEGRATOR_STEP_1, INTEGRATOR_STEP_2, NO_FLAGS,
};
use crate::runtime::network::NetworkManager;
use crate::runtime::sync::{Synchronizer, ThreadSynchronizer};
use crate::runtime::worker::{DeviceWorker, PhaseExecutor, PhaseReport, WorkerMessage};

/// One entry of a command sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Issue(CommandState),
    Swap(Flag),
}

impl From<Command> for Step {
    fn from(command: Command) -> Self {
        Step::Issue(CommandState::new(command, NO_FLAGS))
    }
}

impl From<CommandState> for Step {
    fn from(state: CommandState) -> Self {
        Step::Issue(state)
    }
}

/// A completed phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRecord {
    pub command: Command,
    /// Workers that reported and rejoined the completion barrier
    pub rejoined: usize,
}

/// How a command sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Quit,
}

/// Steps of one predictor/corrector iteration
pub fn iteration_steps(multi_device: bool) -> Vec<Step> {
    let mut steps = vec![
        Step::from(Command::CalcHash),
        Step::from(Command::Sort),
        Step::from(Command::Reorder),
        Step::Swap(BUFFERS_POS_VEL_INFO),
    ];
    if multi_device {
        steps.push(Step::from(Command::UpdateSegments));
        steps.push(Step::from(Command::AppendExternal));
    }
    steps.push(Step::from(Command::BuildNeibs));

    for integrator_step in [INTEGRATOR_STEP_1, INTEGRATOR_STEP_2] {
        if multi_device {
            steps.push(Step::from(CommandState::new(
                Command::UpdateExternal,
                BUFFERS_POS_VEL_INFO | DBLBUFFER_READ,
            )));
        }
        steps.push(Step::from(
            CommandState::new(Command::Forces, integrator_step).internal_only(),
        ));
        steps.push(Step::from(CommandState::new(
            Command::Euler,
            integrator_step | BUFFER_POS | BUFFER_VEL | DBLBUFFER_WRITE,
        )));
        steps.push(Step::Swap(BUFFER_POS | BUFFER_VEL));
    }
    steps
}

pub struct Orchestrator {
    global: SharedGlobalData,
    sync: Arc<ThreadSynchronizer>,
    network: Box<dyn NetworkManager>,
    control: Arc<ControlFlags>,
    reports: Receiver<WorkerMessage>,
    workers: Vec<DeviceWorker>,
    history: Vec<PhaseRecord>,
    finished: bool,
}

impl Orchestrator {
    /// Spawn one worker per `(buffers, executor)` pair, in local device order
    pub fn start(
        global: SharedGlobalData,
        network: Box<dyn NetworkManager>,
        control: Arc<ControlFlags>,
        mut devices: Vec<(BufferList, Box<dyn PhaseExecutor>)>,
    ) -> SimResult<Self> {
        let expected = global.read().layout().devices_per_node;
        if devices.len() != expected {
            return Err(SimError::Config {
                message: format!("{} workers for {} devices per node", devices.len(), expected),
            });
        }

        let sync = Arc::new(ThreadSynchronizer::new(devices.len() + 1));
        let (sender, reports) = crossbeam_channel::unbounded();

        // every device is ready before any thread waits on the barrier
        for (device, (buffers, executor)) in devices.iter_mut().enumerate() {
            executor.prepare(device, buffers)?;
        }

        let mut workers = Vec::with_capacity(devices.len());
        for (device, (buffers, executor)) in devices.into_iter().enumerate() {
            let worker = DeviceWorker::spawn(
                device,
                global.clone(),
                sync.clone(),
                sender.clone(),
                buffers,
                executor,
            )?;
            workers.push(worker);
        }

        log::info!(
            "[Orchestrator] Node {} of {} running {} device workers on {}",
            network.rank(),
            network.node_count(),
            workers.len(),
            network.processor_name()
        );

        Ok(Self {
            global,
            sync,
            network,
            control,
            reports,
            workers,
            history: Vec::new(),
            finished: false,
        })
    }

    pub fn global(&self) -> &SharedGlobalData {
        &self.global
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of barrier openings so far, two per phase
    pub fn barrier_passes(&self) -> u64 {
        self.sync.generation()
    }

    pub fn request_quit(&self) {
        self.control.request_quit();
    }

    /// Exchange read/write slots of the double-buffered families in `mask`
    pub fn swap_buffers(&mut self, mask: Flag) {
        self.global.write().swap_buffers(mask);
    }

    /// Run one phase on every worker and apply their reports
    pub fn issue(&mut self, state: CommandState) -> SimResult<PhaseRecord> {
        if self.finished {
            return Err(SimError::WorkerDisconnected {
                device: self.workers.first().map_or(0, |w| w.device()),
            });
        }

        let command = state.next_command;
        self.global.write().command = state;
        log::debug!("[Orchestrator] Issuing {} (flags {:#010x})", command, state.flags);

        self.sync.barrier();
        self.sync.barrier();

        if command == Command::Quit {
            for worker in &mut self.workers {
                worker.join();
            }
            self.finished = true;
        }

        let messages: Vec<WorkerMessage> = self.reports.try_iter().collect();
        let rejoined = messages.len();

        let result = self.complete_phase(command, messages);
        if let Err(e) = result {
            log::error!("[Orchestrator] Aborting after {}: {}", command, e);
            self.shutdown();
            return Err(e);
        }

        let record = PhaseRecord { command, rejoined };
        self.history.push(record);
        Ok(record)
    }

    fn complete_phase(&mut self, command: Command, messages: Vec<WorkerMessage>) -> SimResult<()> {
        if messages.len() != self.workers.len() {
            let missing = (0..self.workers.len())
                .find(|d| !messages.iter().any(|m| m.device == *d))
                .unwrap_or(0);
            return Err(SimError::WorkerDisconnected { device: missing });
        }

        let mut reports = Vec::with_capacity(messages.len());
        for message in messages {
            match message.result {
                Ok(report) => reports.push(report),
                Err(SimError::PhaseFailed { device, command, message }) => {
                    return Err(SimError::PhaseFailed { device, command, message });
                }
                Err(e) => {
                    return Err(SimError::PhaseFailed {
                        device: message.device,
                        command: message.command,
                        message: e.to_string(),
                    });
                }
            }
        }

        if !command.migrates_particles() {
            if let Some(report) = reports.iter().find(|r| r.particles.is_some()) {
                return Err(SimError::CountInvariant {
                    message: format!(
                        "device {} reported a particle count after {}, which cannot move particles",
                        report.device, command
                    ),
                });
            }
        }

        if command.exchanges_halo() {
            self.network.network_barrier()?;
        }

        self.apply_reports(command, &reports)?;

        if command.migrates_particles() {
            self.update_node_counts(command)?;
        }
        Ok(())
    }

    fn apply_reports(&mut self, command: Command, reports: &[PhaseReport]) -> SimResult<()> {
        let mut data = self.global.write();
        for report in reports {
            if let Some(particles) = report.particles {
                data.counts.set_device_count(report.device, particles);
            }
            if let Some(dt) = report.dt {
                if let Some(slot) = data.time.dts.get_mut(report.device) {
                    *slot = dt;
                }
            }
            for &(body, force, torque) in &report.body_forces {
                data.bodies.set_partial(report.device, body, force, torque);
            }
        }

        match command {
            Command::Forces => {
                let dt = data.time.reduce_dt();
                log::trace!("[Orchestrator] dt = {}", dt);
            }
            Command::ReduceBodiesForces => {
                for (body, (force, torque)) in data.bodies.total_body_forces().into_iter().enumerate() {
                    log::trace!("[Orchestrator] Body {}: force {} torque {}", body, force, torque);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Share the local particle count with the other nodes and check the
    /// accounting. Only `CROP` may change the global total.
    fn update_node_counts(&mut self, command: Command) -> SimResult<()> {
        let local = {
            let data = self.global.read();
            u32::try_from(data.counts.node_sum()).map_err(|_| SimError::CountInvariant {
                message: format!("{} particles on node {}", data.counts.node_sum(), data.rank),
            })?
        };
        let per_node = self.network.all_gather_u32(local)?;

        let mut data = self.global.write();
        let rank = data.rank;
        let total: u64 = per_node.iter().map(|&c| c as u64).sum();
        let total = u32::try_from(total).map_err(|_| SimError::CountInvariant {
            message: format!("{} particles in total", total),
        })?;
        let previous = data.counts.total();
        if command != Command::Crop && total != previous {
            return Err(SimError::CountInvariant {
                message: format!("{} changed the particle total from {} to {}", command, previous, total),
            });
        }
        data.counts.set_node_counts(&per_node);
        data.counts.set_total(total);
        data.counts.check(rank)
    }

    /// Issue `steps` in order. A pending quit request stops the sequence
    /// before the next step; the phase in flight always completes.
    pub fn run<I>(&mut self, steps: I) -> SimResult<RunOutcome>
    where
        I: IntoIterator<Item = Step>,
    {
        for step in steps {
            if self.finished {
                return Ok(RunOutcome::Quit);
            }
            if self.control.quit_requested() {
                log::warn!("[Orchestrator] Quit requested, stopping workers");
                self.shutdown();
                return Ok(RunOutcome::Quit);
            }
            match step {
                Step::Issue(state) => {
                    self.issue(state)?;
                }
                Step::Swap(mask) => self.swap_buffers(mask),
            }
        }
        Ok(if self.finished { RunOutcome::Quit } else { RunOutcome::Completed })
    }

    /// Run whole iterations until `max_iterations`, `keep_going` drops or a
    /// quit is requested. Returns the number of completed iterations.
    pub fn run_iterations(&mut self, max_iterations: u64) -> SimResult<u64> {
        let multi_device = !self.global.read().layout().is_single_device();
        let steps = iteration_steps(multi_device);
        let mut done = 0;

        while done < max_iterations {
            if !self.global.read().time.keep_going {
                break;
            }
            if self.run(steps.iter().copied())? == RunOutcome::Quit {
                break;
            }
            {
                let mut data = self.global.write();
                data.time.advance();
                if data.time.iterations % 100 == 0 {
                    log::info!(
                        "[Orchestrator] Iteration {} t = {:.6} dt = {:.3e}",
                        data.time.iterations,
                        data.time.t,
                        data.time.dt
                    );
                }
            }
            done += 1;
            self.handle_save_request()?;
        }
        self.shutdown();
        Ok(done)
    }

    /// Issue `DUMP` for a pending save request unless saving is disabled.
    /// The request is consumed either way.
    fn handle_save_request(&mut self) -> SimResult<()> {
        if !self.control.take_save_request() {
            return Ok(());
        }
        let (nosave, iteration) = {
            let data = self.global.read();
            (data.time.nosave, data.time.iterations)
        };
        if nosave {
            log::info!("[Orchestrator] Save requested at iteration {}, saving is disabled", iteration);
            return Ok(());
        }
        log::info!("[Orchestrator] Save requested at iteration {}", iteration);
        self.issue(CommandState::new(Command::Dump, NO_FLAGS))?;
        Ok(())
    }

    /// Issue `QUIT` if the workers are still running
    pub fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.global.write().command = CommandState::new(Command::Quit, NO_FLAGS);
        self.sync.barrier();
        self.sync.barrier();
        for worker in &mut self.workers {
            worker.join();
        }
        let rejoined = self.reports.try_iter().count();
        self.history.push(PhaseRecord {
            command: Command::Quit,
            rejoined,
        });
        self.finished = true;
        log::info!("[Orchestrator] All device workers stopped");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
