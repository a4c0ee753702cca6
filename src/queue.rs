// src/queue.rs
use crate::error::{DiskError, Result};
use std::sync::mpsc::{Receiver, Sender};

/// What a queued request asks the device to do.
pub enum RequestKind {
    /// Read `sectors` contiguous sectors; the device allocates the buffer
    /// and returns it through the completion.
    Read { sectors: u64 },
    /// Write the payload, which must be a whole number of sectors. The
    /// caller hands ownership of the bytes to the device.
    Write { data: Vec<u8> },
    /// Host control commands (flush, trim, passthrough and friends) that
    /// this device does not service. They fail with `MalformedRequest`
    /// without touching the store. Only hosts construct these; the binary's
    /// smoke path never does.
    #[allow(dead_code)]
    Control(&'static str),
}

/// A single queued I/O operation. Lives for exactly one pass through the
/// queue; the completion channel is its only way out.
pub struct Request {
    pub sector: u64,
    pub kind: RequestKind,
    pub(crate) done: Sender<Completion>,
}

/// Reads complete with `Some(data)`, writes with `None`.
pub type Completion = Result<Option<Vec<u8>>>;

/// Caller-side handle for one submitted request.
pub struct IoHandle {
    pub(crate) rx: Receiver<Completion>,
}

impl IoHandle {
    /// Blocks until the dispatch loop resolves the request. If the device
    /// is torn down first, the severed channel surfaces as
    /// [`DiskError::DeviceShutdown`] rather than hanging forever.
    pub fn wait(self) -> Completion {
        self.rx.recv().unwrap_or(Err(DiskError::DeviceShutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn wait_reports_shutdown_when_sender_is_gone() {
        let (tx, rx) = mpsc::channel();
        drop(tx);
        let handle = IoHandle { rx };
        assert!(matches!(handle.wait(), Err(DiskError::DeviceShutdown)));
    }

    #[test]
    fn wait_delivers_completion() {
        let (tx, rx) = mpsc::channel();
        tx.send(Ok(Some(vec![1, 2, 3]))).unwrap();
        let handle = IoHandle { rx };
        assert_eq!(handle.wait().unwrap(), Some(vec![1, 2, 3]));
    }
}
