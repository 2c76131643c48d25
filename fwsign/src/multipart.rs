// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Streaming Ed25519 verification.
//!
//! Verifies a 64-byte signature over a message whose content arrives in
//! chunks, without materializing the message. Equivalent to one-shot
//! verification of the concatenation: `h = SHA-512(R ‖ A ‖ M) mod L`,
//! then `R' = sB − hA` and a constant-time compare of `R'` against `R`.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use sha2::{Digest as _, Sha512};
use subtle::ConstantTimeEq as _;

/// Rejection at verifier construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartVerifyError {
    /// The public key bytes do not decode as a curve point.
    InvalidPublicKey,
    /// The upper three bits of signature byte 63 are set.
    MalformedSignature,
}

impl core::fmt::Display for MultipartVerifyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MultipartVerifyError::InvalidPublicKey => {
                write!(f, "public key is not a valid curve point")
            }
            MultipartVerifyError::MalformedSignature => {
                write!(f, "signature scalar has high bits set")
            }
        }
    }
}

impl std::error::Error for MultipartVerifyError {}

pub struct MultipartVerifier {
    signature: [u8; 64],
    minus_a: EdwardsPoint,
    hash: Sha512,
}

impl MultipartVerifier {
    /// Start a verification of `signature` by `public_key`. The hash is
    /// preloaded with `R ‖ A`; the message follows via [`update`](Self::update).
    pub fn new(
        signature: &[u8; 64],
        public_key: &[u8; 32],
    ) -> Result<Self, MultipartVerifyError> {
        if signature[63] & 0xE0 != 0 {
            return Err(MultipartVerifyError::MalformedSignature);
        }

        let a = CompressedEdwardsY(*public_key)
            .decompress()
            .ok_or(MultipartVerifyError::InvalidPublicKey)?;

        let mut hash = Sha512::new();
        hash.update(&signature[..32]);
        hash.update(public_key);

        Ok(MultipartVerifier {
            signature: *signature,
            minus_a: -a,
            hash,
        })
    }

    /// Feed the next message chunk. Chunking does not affect the result.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hash.update(chunk);
    }

    /// Finish the verification.
    pub fn finish(self) -> bool {
        let h = Scalar::from_hash(self.hash);
        let s = Scalar::from_bytes_mod_order(
            self.signature[32..].try_into().expect("32 bytes"),
        );

        let r = EdwardsPoint::vartime_double_scalar_mul_basepoint(&h, &self.minus_a, &s);
        let checker = r.compress();

        checker.as_bytes().ct_eq(&self.signature[..32]).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{verify, Keypair};

    fn keypair() -> Keypair {
        Keypair::from_seed(&[42u8; 32])
    }

    fn message() -> Vec<u8> {
        (0u32..4096).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn whole_message_in_one_chunk() {
        let keypair = keypair();
        let message = message();
        let signature = keypair.sign(&message);

        let mut verifier = MultipartVerifier::new(&signature, keypair.public()).unwrap();
        verifier.update(&message);
        assert!(verifier.finish());
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let keypair = keypair();
        let message = message();
        let signature = keypair.sign(&message);

        for chunk_size in [1, 128, 1000, message.len()] {
            let mut verifier = MultipartVerifier::new(&signature, keypair.public()).unwrap();
            for chunk in message.chunks(chunk_size) {
                verifier.update(chunk);
            }
            assert!(verifier.finish(), "chunk size {chunk_size}");
        }
    }

    #[test]
    fn altered_message_fails() {
        let keypair = keypair();
        let mut message = message();
        let signature = keypair.sign(&message);
        message[100] ^= 0x80;

        let mut verifier = MultipartVerifier::new(&signature, keypair.public()).unwrap();
        verifier.update(&message);
        assert!(!verifier.finish());
    }

    #[test]
    fn agrees_with_one_shot_verification() {
        let keypair = keypair();
        let message = message();
        let signature = keypair.sign(&message);

        let mut wrong_signature = signature;
        wrong_signature[3] ^= 1;

        for (sig, msg) in [
            (signature, &message[..]),
            (wrong_signature, &message[..]),
            (signature, &message[..message.len() - 1]),
        ] {
            let mut verifier = MultipartVerifier::new(&sig, keypair.public()).unwrap();
            verifier.update(msg);
            assert_eq!(verifier.finish(), verify(&sig, msg, keypair.public()));
        }
    }

    #[test]
    fn rejects_signature_with_high_bits_set() {
        let keypair = keypair();
        let mut signature = keypair.sign(b"msg");
        signature[63] |= 0xE0;

        assert_eq!(
            MultipartVerifier::new(&signature, keypair.public()).err(),
            Some(MultipartVerifyError::MalformedSignature)
        );
    }

    #[test]
    fn rejects_invalid_public_key_encoding() {
        let keypair = keypair();
        let signature = keypair.sign(b"msg");

        // About half of all y coordinates have no matching x on the curve;
        // sweep a few fixed encodings and require rejections among them.
        let rejected = (2u8..40)
            .filter(|&fill| {
                MultipartVerifier::new(&signature, &[fill; 32]).err()
                    == Some(MultipartVerifyError::InvalidPublicKey)
            })
            .count();
        assert!(rejected > 0);
    }
}
