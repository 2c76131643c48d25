// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Record validators installed into the fragment store.

use fragstore::Validator;
use update_protocol::{Fragment, Metadata, VerifyMethod};

use crate::verify;

/// Validates stored records against the device's public key.
///
/// Metadata and method-0 fragments carry Ed25519 signatures and are
/// checked directly. A method-1 fragment carries a chain tag that cannot
/// be checked in isolation; it is bound to the metadata signature by the
/// ingest chain check and by the whole-image verification pass that runs
/// before any commit, so at rest only its structure is checked here.
pub struct Ed25519Validator {
    public_key: [u8; 32],
}

impl Ed25519Validator {
    pub fn new(public_key: [u8; 32]) -> Self {
        Ed25519Validator { public_key }
    }
}

impl Validator for Ed25519Validator {
    fn validate_metadata(&self, metadata: &Metadata) -> bool {
        verify(
            &metadata.metadata_signature,
            &metadata.signed_bytes(),
            &self.public_key,
        )
    }

    fn validate_fragment(&self, fragment: &Fragment) -> bool {
        match fragment.verify_method {
            VerifyMethod::Ed25519 => verify(
                &fragment.signature_or_hash,
                &fragment.signed_bytes(),
                &self.public_key,
            ),
            VerifyMethod::Sha512Chain => {
                fragment.size > 0 && fragment.size as usize <= Fragment::CONTENT_SIZE
            }
        }
    }
}
