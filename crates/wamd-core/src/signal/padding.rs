//! Random-length plaintext padding applied before pairwise and group encryption

use rand_core::{OsRng, RngCore};

use crate::errors::CryptographicError;

pub const MAX_PADDING: u8 = 16;

/// Append 1..=`max` bytes, each equal to the pad length
pub fn pad_message(plaintext: &[u8], max: u8) -> Vec<u8> {
    pad_message_with_rng(plaintext, max, &mut OsRng)
}

pub fn pad_message_with_rng<R: RngCore>(plaintext: &[u8], max: u8, rng: &mut R) -> Vec<u8> {
    let max = max.max(1);
    let length = (rng.next_u32() % u32::from(max)) as u8 + 1;
    let mut padded = Vec::with_capacity(plaintext.len() + usize::from(length));
    padded.extend_from_slice(plaintext);
    padded.resize(plaintext.len() + usize::from(length), length);
    padded
}

/// Strip the padding; the final byte gives its length
pub fn unpad_message(padded: &[u8]) -> Result<&[u8], CryptographicError> {
    let Some(&length) = padded.last() else {
        return Err(CryptographicError::InvalidPadding);
    };
    let length = usize::from(length);
    if length == 0 || length > padded.len() {
        return Err(CryptographicError::InvalidPadding);
    }
    Ok(&padded[..padded.len() - length])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_pad_then_unpad(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let padded = pad_message(&data, MAX_PADDING);
            let added = padded.len() - data.len();
            prop_assert!((1..=16).contains(&added));
            prop_assert!(padded[data.len()..].iter().all(|&byte| usize::from(byte) == added));
            prop_assert_eq!(unpad_message(&padded).unwrap(), data.as_slice());
        }
    }

    #[test]
    fn test_invalid_padding() {
        assert_eq!(unpad_message(&[]), Err(CryptographicError::InvalidPadding));
        assert_eq!(unpad_message(&[1, 2, 0]), Err(CryptographicError::InvalidPadding));
        assert_eq!(unpad_message(&[9, 9]), Err(CryptographicError::InvalidPadding));
    }
}
