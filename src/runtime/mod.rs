//! Device workers and the orchestrator driving them

pub mod host;
pub mod network;
pub mod orchestrator;
pub mod sync;
pub mod worker;

pub use host::HostExecutor;
pub use network::{LocalNetwork, NetworkManager};
pub use orchestrator::{iteration_steps, Orchestrator, PhaseRecord, RunOutcome, Step};
pub use sync::{Synchronizer, ThreadSynchronizer};
pub use worker::{DeviceWorker, PhaseContext, PhaseExecutor, PhaseReport, WorkerMessage};
