// src/transfer.rs
use crate::cipher::ChunkCipher;
use crate::error::{DiskError, Result};
use log::debug;

/// Direction of a transfer, carrying the caller-side buffer.
///
/// `Write` hands plaintext to persist; `Read` hands the destination for
/// decrypted data.
pub enum TransferBuf<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

/// Validates bounds and drives the chunked cipher transform between request
/// buffers and the backing store.
pub struct TransferEngine {
    cipher: Box<dyn ChunkCipher>,
    block_size: usize,
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("block_size", &self.block_size)
            .field("chunk_size", &self.cipher.chunk_size())
            .finish_non_exhaustive()
    }
}

impl TransferEngine {
    pub fn new(cipher: Box<dyn ChunkCipher>, block_size: usize) -> Result<Self> {
        let chunk = cipher.chunk_size();
        if chunk == 0 || block_size == 0 || block_size % chunk != 0 {
            return Err(DiskError::CipherInit(format!(
                "cipher chunk of {chunk} bytes does not divide the {block_size} byte sector size"
            )));
        }
        Ok(Self { cipher, block_size })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Byte length of `sectors` sectors, `None` on arithmetic overflow.
    pub fn sector_bytes(&self, sectors: u64) -> Option<usize> {
        sectors
            .checked_mul(self.block_size as u64)
            .and_then(|n| usize::try_from(n).ok())
    }

    /// Moves `buf` between the caller and the store, encrypting on the way
    /// in and decrypting on the way out.
    ///
    /// Validation runs before any byte moves, so a failed transfer leaves
    /// both the store and the caller buffer untouched.
    pub fn transfer(&self, store: &mut [u8], start_sector: u64, buf: TransferBuf) -> Result<()> {
        let length = match &buf {
            TransferBuf::Read(b) => b.len(),
            TransferBuf::Write(b) => b.len(),
        };
        let offset = self.validate(store.len(), start_sector, length)?;

        let chunk = self.cipher.chunk_size();
        match buf {
            TransferBuf::Write(data) => {
                for i in (0..length).step_by(chunk) {
                    self.cipher
                        .encrypt_chunk(&data[i..i + chunk], &mut store[offset + i..offset + i + chunk]);
                }
                if log::log_enabled!(log::Level::Debug) && length > 0 {
                    let n = length.min(15);
                    debug!(
                        "write sector {start_sector}: {} -> {}",
                        hex::encode(&data[..n]),
                        hex::encode(&store[offset..offset + n])
                    );
                }
            }
            TransferBuf::Read(out) => {
                for i in (0..length).step_by(chunk) {
                    self.cipher
                        .decrypt_chunk(&store[offset + i..offset + i + chunk], &mut out[i..i + chunk]);
                }
                if log::log_enabled!(log::Level::Debug) && length > 0 {
                    let n = length.min(15);
                    debug!(
                        "read sector {start_sector}: {} -> {}",
                        hex::encode(&store[offset..offset + n]),
                        hex::encode(&out[..n])
                    );
                }
            }
        }
        Ok(())
    }

    /// Bounds check shared by both directions; returns the starting byte
    /// offset into the store.
    fn validate(&self, capacity: usize, start_sector: u64, length: usize) -> Result<usize> {
        if length % self.block_size != 0 {
            return Err(DiskError::UnalignedBuffer {
                length,
                block_size: self.block_size,
            });
        }
        let offset = start_sector
            .checked_mul(self.block_size as u64)
            .ok_or(DiskError::OutOfBounds {
                offset: u64::MAX,
                length: length as u64,
                capacity: capacity as u64,
            })?;
        match offset.checked_add(length as u64) {
            Some(end) if end <= capacity as u64 => Ok(offset as usize),
            _ => Err(DiskError::OutOfBounds {
                offset,
                length: length as u64,
                capacity: capacity as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::AesChunkCipher;

    const BLOCK: usize = 512;

    fn engine() -> TransferEngine {
        let cipher = Box::new(AesChunkCipher::new(&[0x01; 16]).unwrap());
        TransferEngine::new(cipher, BLOCK).unwrap()
    }

    #[test]
    fn rejects_chunk_that_does_not_divide_sector() {
        let cipher = Box::new(AesChunkCipher::new(&[0x01; 16]).unwrap());
        let err = TransferEngine::new(cipher, 100).unwrap_err();
        assert!(matches!(err, DiskError::CipherInit(_)));
    }

    #[test]
    fn roundtrip_through_store() {
        let engine = engine();
        let mut store = vec![0u8; BLOCK * 4];
        let payload: Vec<u8> = (0..BLOCK).map(|i| (i % 251) as u8).collect();

        engine
            .transfer(&mut store, 2, TransferBuf::Write(&payload))
            .unwrap();
        let mut out = vec![0u8; BLOCK];
        engine
            .transfer(&mut store, 2, TransferBuf::Read(&mut out))
            .unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn store_never_holds_plaintext() {
        let engine = engine();
        let mut store = vec![0u8; BLOCK * 2];
        let payload = vec![0xAA; BLOCK];

        engine
            .transfer(&mut store, 0, TransferBuf::Write(&payload))
            .unwrap();
        assert_ne!(&store[..BLOCK], payload.as_slice());
    }

    #[test]
    fn out_of_bounds_leaves_store_untouched() {
        let engine = engine();
        let mut store = vec![0u8; BLOCK * 2];
        let before = store.clone();
        let payload = vec![0xFF; BLOCK * 2];

        // One sector past the end.
        let err = engine
            .transfer(&mut store, 1, TransferBuf::Write(&payload))
            .unwrap_err();
        assert!(matches!(err, DiskError::OutOfBounds { .. }));
        assert_eq!(store, before);
    }

    #[test]
    fn sector_arithmetic_overflow_is_out_of_bounds() {
        let engine = engine();
        let mut store = vec![0u8; BLOCK];
        let payload = vec![0u8; BLOCK];

        let err = engine
            .transfer(&mut store, u64::MAX / 2, TransferBuf::Write(&payload))
            .unwrap_err();
        assert!(matches!(err, DiskError::OutOfBounds { .. }));
    }

    #[test]
    fn rejects_unaligned_buffer() {
        let engine = engine();
        let mut store = vec![0u8; BLOCK * 2];
        let payload = vec![0u8; BLOCK + 1];

        let err = engine
            .transfer(&mut store, 0, TransferBuf::Write(&payload))
            .unwrap_err();
        assert!(matches!(err, DiskError::UnalignedBuffer { .. }));
    }

    #[test]
    fn multi_sector_transfer() {
        let engine = engine();
        let mut store = vec![0u8; BLOCK * 8];
        let payload: Vec<u8> = (0..BLOCK * 3).map(|i| (i / BLOCK) as u8 + 1).collect();

        engine
            .transfer(&mut store, 4, TransferBuf::Write(&payload))
            .unwrap();
        let mut out = vec![0u8; BLOCK * 3];
        engine
            .transfer(&mut store, 4, TransferBuf::Read(&mut out))
            .unwrap();
        assert_eq!(out, payload);
    }
}
