//! Host-side orchestration for a multi-device particle simulator
//!
//! Typed double-buffered particle arrays, the keyed collection owning them,
//! the shared coordination state (domain decomposition, particle accounting,
//! slot selection, active command) and the barrier-synchronous runtime that
//! drives one worker thread per device.

pub mod buffers;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod flags;
pub mod runtime;
pub mod util;

pub use buffers::{AbstractBuffer, Buffer, BufferList, BufferTrait, GenericBuffer};
pub use config::RunConfig;
pub use coordination::{Command, CommandState, ControlFlags, GlobalData, SharedGlobalData};
pub use domain::{DeviceLayout, DeviceMap, GlobalDeviceId, GridGeometry, ParticleCounts};
pub use error::{SimError, SimResult};
pub use flags::Flag;
pub use runtime::{HostExecutor, LocalNetwork, Orchestrator, PhaseExecutor, PhaseReport, Step};
