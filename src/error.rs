// src/error.rs
use std::io;
use thiserror::Error;

/// Error taxonomy for the device.
///
/// Per-request failures (`OutOfBounds`, `UnalignedBuffer`, `MalformedRequest`)
/// are delivered on the request's completion channel and never stop the
/// dispatch loop. Construction failures (`CipherInit`, `OutOfMemory`, `Io`)
/// abort device creation entirely.
#[derive(Error, Debug)]
pub enum DiskError {
    #[error("request range out of bounds: offset {offset} + {length} bytes exceeds capacity {capacity}")]
    OutOfBounds {
        offset: u64,
        length: u64,
        capacity: u64,
    },

    #[error("buffer of {length} bytes is not a multiple of the {block_size} byte sector size")]
    UnalignedBuffer { length: usize, block_size: usize },

    #[error("unserviceable request kind: {0}")]
    MalformedRequest(&'static str),

    #[error("cipher initialization failed: {0}")]
    CipherInit(String),

    #[error("backing store allocation of {0} bytes failed")]
    OutOfMemory(u64),

    #[error("device torn down with {0} request(s) still queued")]
    TeardownBusy(usize),

    #[error("device shut down before the request completed")]
    DeviceShutdown,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, DiskError>;
