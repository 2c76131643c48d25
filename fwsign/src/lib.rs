// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Cryptographic pipeline for signed firmware images.
//!
//! Ed25519 keypairs and one-shot signing/verification, a streaming
//! [`MultipartVerifier`] that checks an Ed25519 signature over a message
//! supplied in chunks with O(1) memory, the SHA-512 hash chain that binds
//! streamed fragments to a single metadata signature, and the record
//! validators installed into the fragment store.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore as _;
use sha2::{Digest as _, Sha512};
use subtle::ConstantTimeEq as _;
use update_protocol::{Fragment, Metadata};

mod image;
mod multipart;
mod openssh;
mod validate;

pub use image::{build_fragments, FragmentSigning};
pub use multipart::{MultipartVerifier, MultipartVerifyError};
pub use openssh::{parse_openssh_private_key, OpensshKeyError};
pub use validate::Ed25519Validator;

/// A fresh 32-byte signing seed from the operating system RNG.
pub fn seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    seed
}

/// Ed25519 keypair in the OpenSSH layout: the 64-byte secret half is the
/// seed followed by the public key.
#[derive(Clone)]
pub struct Keypair {
    public: [u8; 32],
    secret: [u8; 64],
}

impl Keypair {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let public = signing_key.verifying_key().to_bytes();

        let mut secret = [0u8; 64];
        secret[..32].copy_from_slice(seed);
        secret[32..].copy_from_slice(&public);

        Keypair { public, secret }
    }

    pub fn public(&self) -> &[u8; 32] {
        &self.public
    }

    pub fn secret(&self) -> &[u8; 64] {
        &self.secret
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let seed: [u8; 32] = self.secret[..32].try_into().expect("32 bytes");
        let signing_key = SigningKey::from_bytes(&seed);
        signing_key.sign(message).to_bytes()
    }
}

/// One-shot Ed25519 verification.
pub fn verify(signature: &[u8; 64], message: &[u8], public_key: &[u8; 32]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    verifying_key
        .verify(message, &Signature::from_bytes(signature))
        .is_ok()
}

/// Fill in `metadata_signature` over the record's signed prefix.
pub fn sign_metadata(metadata: &mut Metadata, keypair: &Keypair) {
    metadata.metadata_signature = keypair.sign(&metadata.signed_bytes());
}

/// Fill in a method-0 fragment signature over the record's signed prefix.
pub fn sign_fragment(fragment: &mut Fragment, keypair: &Keypair) {
    fragment.signature_or_hash = keypair.sign(&fragment.signed_bytes());
}

/// Next link of the fragment hash chain: SHA-512 over the previous tag
/// followed by the fragment bytes minus the trailing tag. Fragment 0
/// chains from the metadata signature, binding the whole sequence to it.
pub fn chain_tag(previous_tag: &[u8; 64], fragment_prefix: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(previous_tag);
    hasher.update(fragment_prefix);
    hasher.finalize().into()
}

/// Constant-time 64-byte tag comparison, no early exit.
pub fn tags_equal(a: &[u8; 64], b: &[u8; 64]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use update_protocol::VerifyMethod;

    fn keypair() -> Keypair {
        Keypair::from_seed(&[7u8; 32])
    }

    #[test]
    fn keypair_secret_carries_seed_and_public() {
        let keypair = keypair();
        assert_eq!(&keypair.secret()[..32], &[7u8; 32]);
        assert_eq!(&keypair.secret()[32..], keypair.public());
    }

    #[test]
    fn sign_verify_round_trip() {
        let keypair = keypair();
        let message = b"some firmware bytes";
        let signature = keypair.sign(message);

        assert!(verify(&signature, message, keypair.public()));
        assert!(!verify(&signature, b"other bytes", keypair.public()));

        let mut tampered = signature;
        tampered[5] ^= 1;
        assert!(!verify(&tampered, message, keypair.public()));
    }

    #[test]
    fn distinct_seeds_make_distinct_keys() {
        let a = Keypair::from_seed(&seed());
        let b = Keypair::from_seed(&seed());
        assert_ne!(a.public(), b.public());
    }

    #[test]
    fn signed_metadata_validates() {
        let keypair = keypair();
        let mut metadata = Metadata {
            fw_type: 1,
            version: 2,
            rollback_number: 0,
            firmware_id: 3,
            start_address: 0x0800_0000,
            firmware_size: 1024,
            name: [0u8; 32],
            firmware_signature: [0u8; 64],
            metadata_signature: [0u8; 64],
        };
        sign_metadata(&mut metadata, &keypair);

        assert!(verify(
            &metadata.metadata_signature,
            &metadata.signed_bytes(),
            keypair.public()
        ));
    }

    #[test]
    fn chain_tags_bind_content_and_order() {
        let keypair = keypair();
        let seed_tag = keypair.sign(b"metadata");

        let mut first = Fragment::zeroed(VerifyMethod::Sha512Chain);
        first.size = 4;
        first.content[..4].copy_from_slice(b"aaaa");
        first.signature_or_hash = chain_tag(&seed_tag, &first.signed_bytes());

        let mut second = Fragment::zeroed(VerifyMethod::Sha512Chain);
        second.number = 1;
        second.size = 4;
        second.content[..4].copy_from_slice(b"bbbb");
        second.signature_or_hash = chain_tag(&first.signature_or_hash, &second.signed_bytes());

        // Unaltered chain links verify.
        assert!(tags_equal(
            &first.signature_or_hash,
            &chain_tag(&seed_tag, &first.signed_bytes())
        ));
        assert!(tags_equal(
            &second.signature_or_hash,
            &chain_tag(&first.signature_or_hash, &second.signed_bytes())
        ));

        // Any flipped content byte breaks its link.
        let mut altered = first.clone();
        altered.content[2] ^= 0x01;
        assert!(!tags_equal(
            &altered.signature_or_hash,
            &chain_tag(&seed_tag, &altered.signed_bytes())
        ));

        // Reordering breaks the chain even with intact fragments.
        assert!(!tags_equal(
            &first.signature_or_hash,
            &chain_tag(&second.signature_or_hash, &first.signed_bytes())
        ));
    }

    #[test]
    fn sha512_streaming_matches_one_shot() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let one_shot: [u8; 64] = Sha512::digest(&data).into();

        let mut streamed = Sha512::new();
        for chunk in data.chunks(77) {
            streamed.update(chunk);
        }
        let streamed: [u8; 64] = streamed.finalize().into();

        assert_eq!(one_shot, streamed);
    }
}
