//! Inter-node collaborator
//!
//! The orchestrator only needs node identity, a barrier across nodes for
//! halo phases and an all-gather of per-node counters.

use crate::error::SimResult;

pub trait NetworkManager: Send {
    fn node_count(&self) -> usize;

    fn rank(&self) -> usize;

    /// Host name, used to tag per-node output files
    fn processor_name(&self) -> String;

    /// Block until every node reaches the same point
    fn network_barrier(&self) -> SimResult<()>;

    /// Collect one value from every node, indexed by rank
    fn all_gather_u32(&self, value: u32) -> SimResult<Vec<u32>>;
}

/// Single node run: every collective is local
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork;

impl NetworkManager for LocalNetwork {
    fn node_count(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn processor_name(&self) -> String {
        host_name().unwrap_or_else(|| "localhost".to_string())
    }

    fn network_barrier(&self) -> SimResult<()> {
        Ok(())
    }

    fn all_gather_u32(&self, value: u32) -> SimResult<Vec<u32>> {
        Ok(vec![value])
    }
}

#[cfg(unix)]
fn host_name() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for its whole length
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn host_name() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}
