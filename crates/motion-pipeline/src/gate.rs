use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Admits at most one inference at a time.
///
/// Acquisition never waits: a busy gate means the caller skips inference for
/// that frame. The returned permit releases the gate when dropped, so every
/// exit path of the holder (success, error, unwinding) frees it.
#[derive(Debug, Default)]
pub struct InferenceGate {
    busy: AtomicBool,
}

impl InferenceGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| GatePermit { gate: self.clone() })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<InferenceGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}
