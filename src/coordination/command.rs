//! Command protocol
//!
//! The orchestrator is the only writer of `CommandState`; workers read it
//! during a phase and never modify it.

use crate::flags::{Flag, NO_FLAGS};

/// Phases a device worker can be asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Command {
    /// Nothing to do
    #[default]
    Idle,
    /// Compute the cell hash of every particle
    CalcHash,
    /// Sort particles by hash
    Sort,
    /// Drop particles that left the domain
    Crop,
    /// Reorder data arrays after sorting and find cell boundaries
    Reorder,
    BuildNeibs,
    Forces,
    /// Time integration sub-step
    Euler,
    /// Copy particle data to the host
    Dump,
    /// Copy cell start/end to the host
    DumpCells,
    /// Update segment boundaries and the internal particle count
    UpdateSegments,
    /// Append external cells from neighbouring devices
    AppendExternal,
    /// Refresh external cells from neighbouring devices
    UpdateExternal,
    Mls,
    Shepard,
    Vorticity,
    SurfaceParticles,
    CalcProbes,
    CalcTestpoints,
    MfInitGamma,
    MfUpdateGamma,
    MfUpdatePos,
    MfCalcBoundConditions,
    MfUpdateBoundValues,
    Sps,
    MeanStrain,
    /// Reduce per-device partial forces on rigid bodies
    ReduceBodiesForces,
    UploadMbdata,
    UploadGravity,
    UploadPlanes,
    UploadObjectsCg,
    UploadObjectsMatrices,
    Quit,
}

impl Command {
    pub const ALL: [Command; 33] = [
        Command::Idle,
        Command::CalcHash,
        Command::Sort,
        Command::Crop,
        Command::Reorder,
        Command::BuildNeibs,
        Command::Forces,
        Command::Euler,
        Command::Dump,
        Command::DumpCells,
        Command::UpdateSegments,
        Command::AppendExternal,
        Command::UpdateExternal,
        Command::Mls,
        Command::Shepard,
        Command::Vorticity,
        Command::SurfaceParticles,
        Command::CalcProbes,
        Command::CalcTestpoints,
        Command::MfInitGamma,
        Command::MfUpdateGamma,
        Command::MfUpdatePos,
        Command::MfCalcBoundConditions,
        Command::MfUpdateBoundValues,
        Command::Sps,
        Command::MeanStrain,
        Command::ReduceBodiesForces,
        Command::UploadMbdata,
        Command::UploadGravity,
        Command::UploadPlanes,
        Command::UploadObjectsCg,
        Command::UploadObjectsMatrices,
        Command::Quit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Idle => "IDLE",
            Command::CalcHash => "CALCHASH",
            Command::Sort => "SORT",
            Command::Crop => "CROP",
            Command::Reorder => "REORDER",
            Command::BuildNeibs => "BUILDNEIBS",
            Command::Forces => "FORCES",
            Command::Euler => "EULER",
            Command::Dump => "DUMP",
            Command::DumpCells => "DUMP_CELLS",
            Command::UpdateSegments => "UPDATE_SEGMENTS",
            Command::AppendExternal => "APPEND_EXTERNAL",
            Command::UpdateExternal => "UPDATE_EXTERNAL",
            Command::Mls => "MLS",
            Command::Shepard => "SHEPARD",
            Command::Vorticity => "VORTICITY",
            Command::SurfaceParticles => "SURFACE_PARTICLES",
            Command::CalcProbes => "CALC_PROBES",
            Command::CalcTestpoints => "CALC_TESTPOINTS",
            Command::MfInitGamma => "MF_INIT_GAMMA",
            Command::MfUpdateGamma => "MF_UPDATE_GAMMA",
            Command::MfUpdatePos => "MF_UPDATE_POS",
            Command::MfCalcBoundConditions => "MF_CALC_BOUND_CONDITIONS",
            Command::MfUpdateBoundValues => "MF_UPDATE_BOUND_VALUES",
            Command::Sps => "SPS",
            Command::MeanStrain => "MEAN_STRAIN",
            Command::ReduceBodiesForces => "REDUCE_BODIES_FORCES",
            Command::UploadMbdata => "UPLOAD_MBDATA",
            Command::UploadGravity => "UPLOAD_GRAVITY",
            Command::UploadPlanes => "UPLOAD_PLANES",
            Command::UploadObjectsCg => "UPLOAD_OBJECTS_CG",
            Command::UploadObjectsMatrices => "UPLOAD_OBJECTS_MATRICES",
            Command::Quit => "QUIT",
        }
    }

    /// Phases that move halo data between devices and nodes
    pub fn exchanges_halo(self) -> bool {
        matches!(self, Command::AppendExternal | Command::UpdateExternal)
    }

    /// Phases after which particles may have changed device
    pub fn migrates_particles(self) -> bool {
        matches!(self, Command::Crop | Command::UpdateSegments)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Active command and its parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandState {
    pub next_command: Command,
    /// Integrator sub-step, buffer families and slot selection for the phase
    pub flags: Flag,
    /// Optional scalar argument, NaN when unused
    pub extra_arg: f32,
    /// Restrict the phase to particles owned by the device
    pub only_internal: bool,
}

impl CommandState {
    pub fn new(command: Command, flags: Flag) -> Self {
        Self {
            next_command: command,
            flags,
            ..Self::default()
        }
    }

    pub fn with_extra_arg(mut self, extra_arg: f32) -> Self {
        self.extra_arg = extra_arg;
        self
    }

    pub fn internal_only(mut self) -> Self {
        self.only_internal = true;
        self
    }

    pub fn extra_arg(&self) -> Option<f32> {
        (!self.extra_arg.is_nan()).then_some(self.extra_arg)
    }
}

impl Default for CommandState {
    fn default() -> Self {
        Self {
            next_command: Command::Idle,
            flags: NO_FLAGS,
            extra_arg: f32::NAN,
            only_internal: false,
        }
    }
}
