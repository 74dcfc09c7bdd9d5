//! Page cipher and the codec that turns page images into on-disk bytes.
//!
//! The cipher is an opaque keyed, reversible transform applied to whole pages
//! below the connection cache. It has no say in cache keying or freshness.

use crate::error::{Error, Result};
use crate::storage::page::{seal_page, verify_page, PageId, PAGE_SIZE};
use bytes::Bytes;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Keyed, reversible transform over raw page bytes.
pub trait PageCipher: Send + Sync {
    fn encrypt(&self, page_id: PageId, data: &mut [u8]);
    fn decrypt(&self, page_id: PageId, data: &mut [u8]);
}

/// XORs each page with a ChaCha20 keystream seeded from the key and the page
/// number. The keystream is part of the file format, so the generator must
/// stay a fixed algorithm. No authentication; the page checksum catches a
/// wrong key.
pub struct KeystreamCipher {
    seed: [u8; 32],
}

impl KeystreamCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::Config("encryption key must not be empty".into()));
        }

        let mut seed = [0u8; 32];
        for (lane, chunk) in seed.chunks_mut(4).enumerate() {
            let word = crc32c::crc32c_append(crc32c::crc32c(&[lane as u8]), key);
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(Self { seed })
    }

    fn apply(&self, page_id: PageId, data: &mut [u8]) {
        let mut seed = self.seed;
        for (byte, id_byte) in seed.iter_mut().zip(page_id.0.to_le_bytes()) {
            *byte ^= id_byte;
        }

        let mut keystream = vec![0u8; data.len()];
        ChaCha20Rng::from_seed(seed).fill_bytes(&mut keystream);
        for (byte, key_byte) in data.iter_mut().zip(keystream) {
            *byte ^= key_byte;
        }
    }
}

impl PageCipher for KeystreamCipher {
    fn encrypt(&self, page_id: PageId, data: &mut [u8]) {
        self.apply(page_id, data);
    }

    fn decrypt(&self, page_id: PageId, data: &mut [u8]) {
        self.apply(page_id, data);
    }
}

/// Seals, checks and (optionally) enciphers page images.
#[derive(Default)]
pub struct PageCodec {
    cipher: Option<Box<dyn PageCipher>>,
}

impl PageCodec {
    pub fn new(cipher: Option<Box<dyn PageCipher>>) -> Self {
        Self { cipher }
    }

    pub fn with_key(key: Option<&[u8]>) -> Result<Self> {
        let cipher = match key {
            Some(key) => Some(Box::new(KeystreamCipher::new(key)?) as Box<dyn PageCipher>),
            None => None,
        };
        Ok(Self::new(cipher))
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Produces the on-disk bytes for a page image.
    pub fn encode(&self, page_id: PageId, image: &[u8]) -> Result<Vec<u8>> {
        if image.len() != PAGE_SIZE {
            return Err(Error::Misuse(format!(
                "page {} image has {} bytes, expected {}",
                page_id,
                image.len(),
                PAGE_SIZE
            )));
        }

        let mut raw = image.to_vec();
        seal_page(&mut raw);
        if let Some(cipher) = &self.cipher {
            cipher.encrypt(page_id, &mut raw);
        }
        Ok(raw)
    }

    /// Recovers a page image from on-disk bytes, failing with `Corrupt` when
    /// the checksum does not hold (damaged page or wrong key).
    pub fn decode(&self, page_id: PageId, mut raw: Vec<u8>) -> Result<Bytes> {
        if let Some(cipher) = &self.cipher {
            cipher.decrypt(page_id, &mut raw);
        }
        verify_page(page_id, &raw)?;
        Ok(Bytes::from(raw))
    }
}
