use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use rand::TryRngCore;
use rand::rngs::OsRng;

const ID_BYTES: usize = 24;
const CACHE_SIZE: usize = ID_BYTES << 7;

/// A buffered source of random session ids.
///
/// Entropy is drawn from the OS in `CACHE_SIZE` chunks and sliced per id to
/// avoid a system call for every session. Refills happen under the buffer
/// lock, so concurrent callers never receive overlapping slices.
pub struct IdGenerator {
    cache: Mutex<EntropyCache>,
}

struct EntropyCache {
    bytes: Box<[u8; CACHE_SIZE]>,
    pos: usize,
}

impl EntropyCache {
    fn refill(&mut self) {
        OsRng
            .try_fill_bytes(&mut self.bytes[..])
            .expect("failed to source entropy from the OS");
        self.pos = 0;
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            // pos at the end forces a refill on first use
            cache: Mutex::new(EntropyCache {
                bytes: Box::new([0u8; CACHE_SIZE]),
                pos: CACHE_SIZE,
            }),
        }
    }

    /// Returns a 32-character URL-safe session id.
    pub fn generate(&self) -> String {
        let mut raw = [0u8; ID_BYTES];
        {
            let mut cache = self.cache.lock();
            if cache.pos + ID_BYTES > CACHE_SIZE {
                cache.refill();
            }
            let pos = cache.pos;
            raw.copy_from_slice(&cache.bytes[pos..pos + ID_BYTES]);
            cache.pos += ID_BYTES;
        }

        URL_SAFE_NO_PAD.encode(raw)
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}
