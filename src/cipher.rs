// src/cipher.rs
use crate::error::{DiskError, Result};
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

/// Cipher granularity in bytes. Must evenly divide the device sector size so
/// a transfer never leaves a fractional trailing chunk.
pub const CHUNK_SIZE: usize = 16;

/// Capability seam over the block-cipher primitive.
///
/// Implementations are keyed exactly once at construction and carry no
/// mutable state beyond the fixed key schedule, so a shared reference can be
/// used from the dispatch thread without extra synchronization. Resources are
/// released when the engine is dropped at device teardown.
pub trait ChunkCipher: Send + Sync {
    fn chunk_size(&self) -> usize;

    /// Encrypts exactly one chunk out-of-place.
    ///
    /// Both slices must be exactly `chunk_size()` bytes; anything else is a
    /// caller contract violation and panics.
    fn encrypt_chunk(&self, plain: &[u8], out: &mut [u8]);

    /// Decrypts exactly one chunk out-of-place. Same length contract as
    /// [`ChunkCipher::encrypt_chunk`].
    fn decrypt_chunk(&self, cipher: &[u8], out: &mut [u8]);
}

/// AES-128 in its raw block form: deterministic per-chunk transform, 16-byte
/// chunks inside 512-byte sectors.
pub struct AesChunkCipher {
    inner: Aes128,
}

impl std::fmt::Debug for AesChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the key schedule.
        f.debug_struct("AesChunkCipher").finish_non_exhaustive()
    }
}

impl AesChunkCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(DiskError::CipherInit("empty key material".into()));
        }
        let inner = Aes128::new_from_slice(key).map_err(|_| {
            DiskError::CipherInit(format!(
                "AES-128 expects a 16 byte key, got {} bytes",
                key.len()
            ))
        })?;
        Ok(Self { inner })
    }
}

impl ChunkCipher for AesChunkCipher {
    fn chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    fn encrypt_chunk(&self, plain: &[u8], out: &mut [u8]) {
        self.inner.encrypt_block_b2b(
            GenericArray::from_slice(plain),
            GenericArray::from_mut_slice(out),
        );
    }

    fn decrypt_chunk(&self, cipher: &[u8], out: &mut [u8]) {
        self.inner.decrypt_block_b2b(
            GenericArray::from_slice(cipher),
            GenericArray::from_mut_slice(out),
        );
    }
}
