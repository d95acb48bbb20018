use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory stand-in for a serial device, selected with `port = "/dev/null"`.
///
/// Reads return whatever was queued with [`NullDevice::queue_read`], one
/// chunk per read, and nothing otherwise. Writes are recorded. Clones share
/// the same state, so a test can keep a handle while the endpoint is closed
/// and reopened.
#[derive(Debug, Clone, Default)]
pub struct NullDevice {
    state: Arc<Mutex<NullState>>,
}

#[derive(Debug, Default)]
struct NullState {
    pending: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    last_write: Option<Vec<u8>>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `data` available to the next read
    pub fn queue_read(&self, data: &[u8]) {
        self.state().pending.push_back(data.to_vec());
    }

    /// Payload of the most recent write
    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.state().last_write.clone()
    }

    /// Every byte written so far, in order
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn pending_reads(&self) -> usize {
        self.state().pending.len()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.pending.clear();
        state.written.clear();
        state.last_write = None;
    }

    pub(crate) fn take_read(&self) -> Option<Vec<u8>> {
        self.state().pending.pop_front()
    }

    pub(crate) fn record_write(&self, data: &[u8]) {
        let mut state = self.state();
        state.written.extend_from_slice(data);
        state.last_write = Some(data.to_vec());
    }

    fn state(&self) -> MutexGuard<'_, NullState> {
        // Plain data with no invariants spanning a panic
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
