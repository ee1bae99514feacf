//! Phase barrier
//!
//! Every device worker and the orchestrator of a node meet here twice per
//! phase: once to release the workers on a new command and once when the
//! workers rejoin after running it.

use parking_lot::{Condvar, Mutex};

/// Barrier collaborator used by the orchestrator and the device workers
pub trait Synchronizer: Send + Sync {
    /// Block until every participant has arrived
    fn barrier(&self);

    /// Number of threads that must arrive to open the barrier
    fn participants(&self) -> usize;

    /// Drop out for good; later barriers wait for one thread less
    fn leave(&self);
}

#[derive(Debug, Default)]
struct BarrierState {
    participants: usize,
    arrived: usize,
    generation: u64,
    last_rejoins: usize,
}

impl BarrierState {
    fn open(&mut self) {
        self.last_rejoins = self.arrived;
        self.arrived = 0;
        self.generation += 1;
    }
}

/// Reusable barrier for threads of one process
#[derive(Debug)]
pub struct ThreadSynchronizer {
    state: Mutex<BarrierState>,
    opened: Condvar,
}

impl ThreadSynchronizer {
    pub fn new(participants: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                participants: participants.max(1),
                ..BarrierState::default()
            }),
            opened: Condvar::new(),
        }
    }

    /// Number of times the barrier has opened
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// How many threads arrived at the last opening
    pub fn rejoins(&self) -> usize {
        self.state.lock().last_rejoins
    }
}

impl Synchronizer for ThreadSynchronizer {
    fn barrier(&self) {
        let mut state = self.state.lock();
        state.arrived += 1;
        if state.arrived >= state.participants {
            state.open();
            self.opened.notify_all();
            return;
        }

        // wait for this generation to open, ignoring spurious wakeups
        let generation = state.generation;
        while state.generation == generation {
            self.opened.wait(&mut state);
        }
    }

    fn participants(&self) -> usize {
        self.state.lock().participants
    }

    fn leave(&self) {
        let mut state = self.state.lock();
        state.participants = state.participants.saturating_sub(1);
        // the threads already waiting may be all that is left
        if state.arrived > 0 && state.arrived >= state.participants {
            state.open();
            self.opened.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_single_participant_never_blocks() {
        let sync = ThreadSynchronizer::new(1);
        sync.barrier();
        sync.barrier();
        assert_eq!(sync.generation(), 2);
        assert_eq!(sync.rejoins(), 1);
    }

    #[test]
    fn test_leaving_thread_releases_waiters() {
        let sync = Arc::new(ThreadSynchronizer::new(3));
        let waiter = {
            let sync = sync.clone();
            std::thread::spawn(move || {
                sync.barrier();
                sync.barrier();
            })
        };

        // wait until the other thread is parked at the first barrier
        while sync.state.lock().arrived == 0 {
            std::thread::yield_now();
        }
        sync.leave();
        assert_eq!(sync.participants(), 2);
        assert_eq!(sync.generation(), 0);

        sync.barrier();
        sync.barrier();
        waiter.join().unwrap();
        assert_eq!(sync.generation(), 2);
        assert_eq!(sync.rejoins(), 2);
    }

    #[test]
    fn test_leave_opens_pending_barrier() {
        let sync = Arc::new(ThreadSynchronizer::new(2));
        let waiter = {
            let sync = sync.clone();
            std::thread::spawn(move || sync.barrier())
        };
        while sync.state.lock().arrived == 0 {
            std::thread::yield_now();
        }
        sync.leave();
        waiter.join().unwrap();
        assert_eq!(sync.generation(), 1);
        assert_eq!(sync.rejoins(), 1);
    }

    #[test]
    fn test_nobody_passes_early() {
        let sync = Arc::new(ThreadSynchronizer::new(4));
        let before = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let sync = sync.clone();
                let before = before.clone();
                std::thread::spawn(move || {
                    for round in 0..10 {
                        before.fetch_add(1, Ordering::SeqCst);
                        sync.barrier();
                        // every thread of this round incremented before anyone left
                        assert!(before.load(Ordering::SeqCst) >= (round + 1) * 4);
                        sync.barrier();
                    }
                })
            })
            .collect();

        for _ in 0..10 {
            before.fetch_add(1, Ordering::SeqCst);
            sync.barrier();
            sync.barrier();
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sync.generation(), 20);
        assert_eq!(sync.rejoins(), 4);
    }
}
