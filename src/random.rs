use rand::rngs::OsRng;
use rand::RngCore;

/// Source of cryptographically secure random bytes.
///
/// Token, session identifier, nonce and staging-file generation all draw from
/// this collaborator. The default is the operating system RNG.
pub trait RandomSource: Send + Sync {
    /// Fills `buf` with random bytes.
    fn fill(&self, buf: &mut [u8]);
}

/// The operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

pub(crate) fn random_bytes(source: &dyn RandomSource, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    source.fill(&mut buf);
    buf
}
