/*!
 * Content fingerprints for change detection
 *
 * Small payloads get a fast FNV-1a hash; larger ones are digested with
 * SHA-256 in fixed-size chunks and keep the first 64 bits.
 */

use sha2::{Digest, Sha256};
use std::fmt;

/// Payloads up to this size take the fast path
pub const FAST_PATH_LIMIT: usize = 10 * 1024;

const DIGEST_CHUNK: usize = 64 * 1024;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Opaque stable digest of a fetched payload; equal fingerprints mean
/// "no change"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    Fast(u64),
    Digest(u64),
}

impl Fingerprint {
    pub fn of(payload: &[u8]) -> Self {
        if payload.len() <= FAST_PATH_LIMIT {
            Fingerprint::Fast(fnv1a(payload))
        } else {
            Fingerprint::Digest(chunked_sha256_prefix(payload))
        }
    }

    pub fn of_str(payload: &str) -> Self {
        Self::of(payload.as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Fast(value) => write!(f, "fnv:{:016x}", value),
            Fingerprint::Digest(value) => write!(f, "sha256:{:016x}", value),
        }
    }
}

/// Cheap hash used for fingerprints and mutation gating
pub fn fnv1a(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

fn chunked_sha256_prefix(data: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    for chunk in data.chunks(DIGEST_CHUNK) {
        hasher.update(chunk);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_path_for_small_payloads() {
        let fp = Fingerprint::of_str("<html>A</html>");
        assert!(matches!(fp, Fingerprint::Fast(_)));
        assert_eq!(fp, Fingerprint::of_str("<html>A</html>"));
        assert_ne!(fp, Fingerprint::of_str("<html>B</html>"));
    }

    #[test]
    fn test_fnv_known_vectors() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_digest_path_matches_sha256_prefix() {
        let payload = vec![b'x'; FAST_PATH_LIMIT + 1];
        let fp = Fingerprint::of(&payload);

        let full = hex::encode(Sha256::digest(&payload));
        assert_eq!(fp.to_string(), format!("sha256:{}", &full[..16]));
    }

    #[test]
    fn test_boundary_uses_fast_path() {
        let payload = vec![0u8; FAST_PATH_LIMIT];
        assert!(matches!(Fingerprint::of(&payload), Fingerprint::Fast(_)));
    }

    #[test]
    fn test_large_payload_change_detected() {
        let mut payload = vec![b'a'; 200 * 1024];
        let before = Fingerprint::of(&payload);
        payload[150 * 1024] = b'b';
        assert_ne!(before, Fingerprint::of(&payload));
    }
}
