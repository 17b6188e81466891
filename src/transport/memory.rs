//! In-process channel transport, used for loopback sessions and tests

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use super::{Transport, TransportError};

pub struct MemoryTransport {
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    rx: Mutex<Receiver<Vec<u8>>>,
}

impl MemoryTransport {
    /// Two connected ends; what one sends the other receives
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = channel();
        let (b_tx, a_rx) = channel();
        (
            Self {
                tx: Mutex::new(Some(a_tx)),
                rx: Mutex::new(a_rx),
            },
            Self {
                tx: Mutex::new(Some(b_tx)),
                rx: Mutex::new(b_rx),
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn receive_framed(&self) -> Result<Vec<u8>, TransportError> {
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        // A dropped peer reads as a close signal
        Ok(rx.recv().unwrap_or_default())
    }

    fn send_framed(&self, buf: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(buf.to_vec()).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
