use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared running flag of a consumer. Clones observe and control the same consumer.
///
/// Stopping is cooperative: the loop checks the flag once per iteration, so an
/// in-flight iteration always completes first.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub(crate) fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// What a single `process_one` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// Nothing arrived within the pull timeout.
    Idle,
    /// A message was handled and acknowledged.
    Handled { ack_id: String },
}
