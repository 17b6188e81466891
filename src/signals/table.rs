//! Per-slot `Mutex` + `Condvar` handoff

use std::sync::{Condvar, Mutex, MutexGuard};

use thiserror::Error;

use super::SyncObject;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Slot {0:?} is already armed by another request")]
    AlreadyArmed(SyncObject),

    #[error("Slot {0:?} was not armed before waiting")]
    NotArmed(SyncObject),

    #[error("Remote connection closed while waiting on {0:?}")]
    Disconnected(SyncObject),
}

#[derive(Debug)]
enum Outcome {
    Signaled(Option<Vec<u8>>),
    Released,
}

#[derive(Debug, Default)]
struct SlotState {
    armed: bool,
    capacity: usize,
    outcome: Option<Outcome>,
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Table of one-shot slots, one per [`SyncObject`]
#[derive(Debug)]
pub struct SignalTable {
    slots: Vec<Slot>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self {
            slots: SyncObject::ALL.iter().map(|_| Slot::default()).collect(),
        }
    }

    fn slot(&self, id: SyncObject) -> &Slot {
        &self.slots[id.index()]
    }

    /// Register interest in `id` before the request goes out
    ///
    /// `capacity` bounds how many response bytes the caller accepts.
    pub fn arm(&self, id: SyncObject, capacity: usize) -> Result<(), SyncError> {
        let mut state = self.slot(id).lock();
        if state.armed {
            return Err(SyncError::AlreadyArmed(id));
        }
        state.armed = true;
        state.capacity = capacity;
        state.outcome = None;
        Ok(())
    }

    /// Give up an armed slot without waiting (e.g. the send failed)
    pub fn disarm(&self, id: SyncObject) {
        let mut state = self.slot(id).lock();
        state.armed = false;
        state.capacity = 0;
        state.outcome = None;
    }

    pub fn is_armed(&self, id: SyncObject) -> bool {
        self.slot(id).lock().armed
    }

    /// Block until `id` is signaled; returns the delivered bytes, if any
    pub fn wait_for(&self, id: SyncObject) -> Result<Option<Vec<u8>>, SyncError> {
        let slot = self.slot(id);
        let mut state = slot.lock();
        if !state.armed {
            return Err(SyncError::NotArmed(id));
        }

        while state.outcome.is_none() {
            state = slot.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }

        state.armed = false;
        state.capacity = 0;
        match state.outcome.take() {
            Some(Outcome::Signaled(data)) => Ok(data),
            _ => Err(SyncError::Disconnected(id)),
        }
    }

    /// Wake the waiter of `id` with no data
    pub fn signal(&self, id: SyncObject) {
        self.complete(id, Outcome::Signaled(None));
    }

    /// Wake the waiter of `id`, handing over at most the armed capacity of `data`
    pub fn deliver(&self, id: SyncObject, data: &[u8]) {
        let capacity = self.slot(id).lock().capacity;
        let len = data.len().min(capacity);
        if len < data.len() {
            log::warn!(
                "Response for {:?} truncated from {} to {} bytes",
                id,
                data.len(),
                len
            );
        }
        self.complete(id, Outcome::Signaled(Some(data[..len].to_vec())));
    }

    fn complete(&self, id: SyncObject, outcome: Outcome) {
        let slot = self.slot(id);
        let mut state = slot.lock();
        if !state.armed {
            log::debug!("Signal for {:?} arrived with no armed requester", id);
        }
        state.outcome = Some(outcome);
        slot.ready.notify_all();
    }

    /// Release every armed waiter with a disconnection error
    pub fn release_all(&self) {
        for (slot, id) in self.slots.iter().zip(SyncObject::ALL) {
            let mut state = slot.lock();
            if state.armed {
                log::debug!("Releasing waiter on {:?}", id);
                state.outcome = Some(Outcome::Released);
                slot.ready.notify_all();
            }
        }
    }

    /// Forget everything, ready for a new session
    pub fn reset(&self) {
        for slot in &self.slots {
            let mut state = slot.lock();
            *state = SlotState::default();
        }
    }
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_wakes_waiter() {
        let table = Arc::new(SignalTable::new());
        table.arm(SyncObject::FlushResult, 0).unwrap();

        let signaler = Arc::clone(&table);
        let handle = thread::spawn(move || signaler.signal(SyncObject::FlushResult));

        assert_eq!(table.wait_for(SyncObject::FlushResult), Ok(None));
        handle.join().unwrap();
        assert!(!table.is_armed(SyncObject::FlushResult));
    }

    #[test]
    fn test_double_arm_is_rejected() {
        let table = SignalTable::new();
        table.arm(SyncObject::ReadMemory, 16).unwrap();

        assert_eq!(
            table.arm(SyncObject::ReadMemory, 16),
            Err(SyncError::AlreadyArmed(SyncObject::ReadMemory))
        );
    }

    #[test]
    fn test_deliver_truncates_to_capacity() {
        let table = SignalTable::new();
        table.arm(SyncObject::ReadMemory, 4).unwrap();
        table.deliver(SyncObject::ReadMemory, &[1, 2, 3, 4, 5, 6]);

        assert_eq!(table.wait_for(SyncObject::ReadMemory), Ok(Some(vec![1, 2, 3, 4])));
    }

    #[test]
    fn test_signal_before_wait_is_kept() {
        let table = SignalTable::new();
        table.arm(SyncObject::Bp, 0).unwrap();
        table.signal(SyncObject::Bp);

        assert_eq!(table.wait_for(SyncObject::Bp), Ok(None));
    }

    #[test]
    fn test_release_all_unblocks_waiters() {
        let table = Arc::new(SignalTable::new());
        table.arm(SyncObject::ReadRegisters, 64).unwrap();
        table.arm(SyncObject::PteResult, 64).unwrap();

        let waiters: Vec<_> = [SyncObject::ReadRegisters, SyncObject::PteResult]
            .into_iter()
            .map(|id| {
                let table = Arc::clone(&table);
                thread::spawn(move || table.wait_for(id))
            })
            .collect();

        table.release_all();
        for (waiter, id) in waiters
            .into_iter()
            .zip([SyncObject::ReadRegisters, SyncObject::PteResult])
        {
            assert_eq!(waiter.join().unwrap(), Err(SyncError::Disconnected(id)));
        }
    }

    #[test]
    fn test_wait_without_arm() {
        let table = SignalTable::new();
        assert_eq!(
            table.wait_for(SyncObject::Bp),
            Err(SyncError::NotArmed(SyncObject::Bp))
        );
    }

    #[test]
    fn test_rearm_clears_stale_signal() {
        let table = SignalTable::new();
        table.arm(SyncObject::TestQuery, 0).unwrap();
        table.signal(SyncObject::TestQuery);
        table.wait_for(SyncObject::TestQuery).unwrap();

        // stray signal with nobody armed
        table.signal(SyncObject::TestQuery);
        table.arm(SyncObject::TestQuery, 0).unwrap();
        table.release_all();
        assert_eq!(
            table.wait_for(SyncObject::TestQuery),
            Err(SyncError::Disconnected(SyncObject::TestQuery))
        );
    }
}
