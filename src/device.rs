// src/device.rs
use crate::cipher::ChunkCipher;
use crate::error::{DiskError, Result};
use crate::queue::{Completion, IoHandle, Request, RequestKind};
use crate::transfer::{TransferBuf, TransferEngine};
use log::{error, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread;

/// The host addresses geometry in 512-byte units regardless of our logical
/// sector size.
const KERNEL_SECTOR_SIZE: u64 = 512;

/// Process-local stand-in for the host's device registry.
static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(0);

/// Startup options for one device instance.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Name prefix; the registry id is appended ("cdisk0", "cdisk1", ...).
    pub name: String,
    pub capacity_sectors: u64,
    pub block_size: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "cdisk".to_string(),
            capacity_sectors: 1024,
            block_size: 512,
        }
    }
}

/// Legacy cylinders/heads/sectors addressing, exposed only so fdisk-style
/// tools can partition the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: u64,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub start: u64,
}

struct State {
    store: Vec<u8>,
    queue: VecDeque<Request>,
    shutdown: bool,
}

struct Shared {
    engine: TransferEngine,
    // One lock guards both the store and the queue, so every transfer is
    // serialized against every other transfer on this device.
    state: Mutex<State>,
    wakeup: Condvar,
}

/// An encrypted in-memory block device.
///
/// Holds the backing store and request queue behind a single mutex and runs
/// exactly one dispatch thread that drains the queue in FIFO order. All data
/// at rest in the store is ciphertext; the cipher transform runs on the way
/// in and out of every transfer.
pub struct Device {
    name: String,
    id: u32,
    capacity: u64,
    block_size: usize,
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Device {
    /// Builds the device all-or-nothing: cipher keyed, store allocated and
    /// zero-filled, dispatch thread running. Any failure rolls back whatever
    /// was built and no handle is returned.
    pub fn create(config: DeviceConfig, cipher: Box<dyn ChunkCipher>) -> Result<Device> {
        let capacity = config
            .capacity_sectors
            .checked_mul(config.block_size as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(DiskError::OutOfMemory(
                config.capacity_sectors.saturating_mul(config.block_size as u64),
            ))?;

        let engine = TransferEngine::new(cipher, config.block_size)?;

        let mut store = Vec::new();
        store
            .try_reserve_exact(capacity)
            .map_err(|_| DiskError::OutOfMemory(capacity as u64))?;
        store.resize(capacity, 0);

        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}{}", config.name, id);

        let shared = Arc::new(Shared {
            engine,
            state: Mutex::new(State {
                store,
                queue: VecDeque::new(),
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });

        let worker = thread::Builder::new()
            .name(format!("{name}-dispatch"))
            .spawn({
                let shared = Arc::clone(&shared);
                move || dispatch_loop(&shared)
            })?;

        info!(
            "{name}: created, {} sectors x {} bytes = {} bytes",
            config.capacity_sectors, config.block_size, capacity
        );

        Ok(Device {
            name,
            id,
            capacity: capacity as u64,
            block_size: config.block_size,
            shared,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[allow(dead_code)]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// We have no real geometry, of course, so make something up the same
    /// way the legacy drivers do.
    pub fn geometry(&self) -> Geometry {
        let kernel_sectors = self.capacity / KERNEL_SECTOR_SIZE;
        Geometry {
            cylinders: (kernel_sectors & !0x3f) >> 6,
            heads: 4,
            sectors_per_track: 16,
            start: 0,
        }
    }

    /// Appends a request to the queue and wakes the dispatch thread. Safe to
    /// call from any number of threads; requests are served strictly in
    /// submission order.
    pub fn submit(&self, sector: u64, kind: RequestKind) -> IoHandle {
        let (tx, rx) = mpsc::channel();
        {
            let mut state = self.shared.state.lock().unwrap();
            state.queue.push_back(Request {
                sector,
                kind,
                done: tx,
            });
        }
        self.shared.wakeup.notify_one();
        IoHandle { rx }
    }

    /// Queues a write of `data` (a whole number of sectors) at `sector`.
    pub fn write(&self, sector: u64, data: Vec<u8>) -> IoHandle {
        self.submit(sector, RequestKind::Write { data })
    }

    /// Queues a read of `sectors` sectors starting at `sector`.
    pub fn read(&self, sector: u64, sectors: u64) -> IoHandle {
        self.submit(sector, RequestKind::Read { sectors })
    }

    /// Tears the device down. The queue must already be drained: finding
    /// requests still queued is an invariant violation, reported as
    /// [`DiskError::TeardownBusy`] and never silently discarded. Leftover
    /// requests have their completion channels severed, so any blocked
    /// submitter observes `DeviceShutdown`.
    pub fn destroy(mut self) -> Result<()> {
        self.shutdown_worker();
        let pending = self.shared.state.lock().unwrap().queue.len();
        if pending > 0 {
            error!("{}: destroyed with {pending} request(s) still queued", self.name);
            return Err(DiskError::TeardownBusy(pending));
        }
        info!("{}: destroyed", self.name);
        Ok(())
    }

    fn shutdown_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Ok(mut state) = self.shared.state.lock() {
                state.shutdown = true;
            }
            self.shared.wakeup.notify_all();
            let _ = worker.join();
        }
    }

    #[cfg(test)]
    fn store_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        let state = self.shared.state.lock().unwrap();
        state.store[offset..offset + len].to_vec()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

/// Single consumer of the queue. Blocks on the condvar while idle, exits as
/// soon as shutdown is flagged, and otherwise resolves requests head-first.
/// A failing request is reported to its submitter and never halts drainage.
fn dispatch_loop(shared: &Shared) {
    let mut state = shared.state.lock().unwrap();
    loop {
        let req = loop {
            if state.shutdown {
                return;
            }
            if let Some(req) = state.queue.pop_front() {
                break req;
            }
            state = shared.wakeup.wait(state).unwrap();
        };

        let outcome = service(shared, &mut state, req.sector, req.kind);
        if let Err(err) = &outcome {
            warn!("request at sector {}: {err}", req.sector);
        }
        // The submitter may have dropped its handle already.
        let _ = req.done.send(outcome);
    }
}

fn service(shared: &Shared, state: &mut State, sector: u64, kind: RequestKind) -> Completion {
    match kind {
        RequestKind::Write { data } => shared
            .engine
            .transfer(&mut state.store, sector, TransferBuf::Write(&data))
            .map(|()| None),
        RequestKind::Read { sectors } => {
            // Cap the allocation before the full bounds check runs.
            let length = shared
                .engine
                .sector_bytes(sectors)
                .filter(|&len| len <= state.store.len())
                .ok_or(DiskError::OutOfBounds {
                    offset: sector.saturating_mul(shared.engine.block_size() as u64),
                    length: sectors.saturating_mul(shared.engine.block_size() as u64),
                    capacity: state.store.len() as u64,
                })?;
            let mut out = vec![0u8; length];
            shared
                .engine
                .transfer(&mut state.store, sector, TransferBuf::Read(&mut out))?;
            Ok(Some(out))
        }
        RequestKind::Control(op) => Err(DiskError::MalformedRequest(op)),
    }
}
