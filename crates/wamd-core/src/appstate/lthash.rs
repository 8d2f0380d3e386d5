//! LT-hash: a homomorphic set hash
//!
//! Every element is expanded to 128 bytes with HKDF and folded into the
//! running hash lane by lane as little-endian `u16`s with wrapping arithmetic.
//! Adding and removing elements commute, so the hash of a collection can be
//! updated from a patch without rehashing everything.

use crate::crypto::hkdf_sha256;
use crate::errors::CryptographicError;

pub const LT_HASH_SIZE: usize = 128;

#[derive(Debug, Clone, Copy)]
pub struct LtHash {
    info: &'static [u8],
    size: usize,
}

/// The instance used for app-state patch integrity
pub const WA_PATCH_INTEGRITY: LtHash = LtHash {
    info: b"WhatsApp Patch Integrity",
    size: LT_HASH_SIZE,
};

impl LtHash {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Remove `subtract` then add `add`, in place
    pub fn subtract_then_add<S, A>(
        &self,
        base: &mut [u8],
        subtract: &[S],
        add: &[A],
    ) -> Result<(), CryptographicError>
    where
        S: AsRef<[u8]>,
        A: AsRef<[u8]>,
    {
        if base.len() != self.size {
            return Err(CryptographicError::invalid_key(format!(
                "lt-hash of {} bytes, expected {}",
                base.len(),
                self.size
            )));
        }
        for item in subtract {
            self.fold(base, item.as_ref(), u16::wrapping_sub)?;
        }
        for item in add {
            self.fold(base, item.as_ref(), u16::wrapping_add)?;
        }
        Ok(())
    }

    fn fold(
        &self,
        base: &mut [u8],
        item: &[u8],
        op: fn(u16, u16) -> u16,
    ) -> Result<(), CryptographicError> {
        let expanded = hkdf_sha256(None, item, self.info, self.size)?;
        for (lane, other) in base.chunks_exact_mut(2).zip(expanded.chunks_exact(2)) {
            let value = op(
                u16::from_le_bytes([lane[0], lane[1]]),
                u16::from_le_bytes([other[0], other[1]]),
            );
            lane.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }
}
