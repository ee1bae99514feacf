//! Global coordination state and the command protocol

pub mod command;
pub mod control;
pub mod global;
pub mod slots;

pub use command::{Command, CommandState};
pub use control::{install_signal_handlers, register_control, registered_control, ControlFlags};
pub use global::{
    DomainDecomposition, GlobalData, RigidBodies, SharedGlobalData, TimeControl, MAX_BODIES,
};
pub use slots::DoubleBufferSlots;
