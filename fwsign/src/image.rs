// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Host-side image slicing: cut a firmware binary into wire fragments and
//! attach their verification tags.

use update_protocol::{Fragment, Metadata, VerifyMethod};

use crate::{chain_tag, sign_fragment, Keypair};

/// How the produced fragments are tagged.
pub enum FragmentSigning<'a> {
    /// Every fragment carries its own Ed25519 signature.
    PerFragment(&'a Keypair),
    /// Fragments carry a SHA-512 chain seeded from the metadata signature.
    HashChain,
}

/// Slice `firmware` into fragments starting at `base_address`.
///
/// The final fragment's content is zero padded; its `size` keeps the
/// actual byte count. Fragment numbers and addresses are contiguous, the
/// layout the device walks during install.
pub fn build_fragments(
    metadata: &Metadata,
    firmware: &[u8],
    base_address: u32,
    signing: FragmentSigning<'_>,
) -> Vec<Fragment> {
    let method = match signing {
        FragmentSigning::PerFragment(_) => VerifyMethod::Ed25519,
        FragmentSigning::HashChain => VerifyMethod::Sha512Chain,
    };

    let mut fragments = Vec::with_capacity(firmware.len().div_ceil(Fragment::CONTENT_SIZE));
    let mut previous_tag = metadata.metadata_signature;

    for (number, chunk) in firmware.chunks(Fragment::CONTENT_SIZE).enumerate() {
        let mut fragment = Fragment::zeroed(method);
        fragment.firmware_id = metadata.firmware_id;
        fragment.number = number as u32;
        fragment.start_address = base_address + (number * Fragment::CONTENT_SIZE) as u32;
        fragment.size = chunk.len() as u32;
        fragment.content[..chunk.len()].copy_from_slice(chunk);

        match &signing {
            FragmentSigning::PerFragment(keypair) => sign_fragment(&mut fragment, keypair),
            FragmentSigning::HashChain => {
                fragment.signature_or_hash = chain_tag(&previous_tag, &fragment.signed_bytes());
                previous_tag = fragment.signature_or_hash;
            }
        }

        fragments.push(fragment);
    }

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tags_equal, verify, Ed25519Validator};
    use fragstore::Validator as _;

    fn keypair() -> Keypair {
        Keypair::from_seed(&[5u8; 32])
    }

    fn metadata(firmware_len: usize) -> Metadata {
        let mut metadata = Metadata {
            fw_type: 1,
            version: 0x0100,
            rollback_number: 0,
            firmware_id: 0xA5A5_0102,
            start_address: 0x0800_00C4,
            firmware_size: firmware_len as u32,
            name: [0u8; 32],
            firmware_signature: [0u8; 64],
            metadata_signature: [0u8; 64],
        };
        crate::sign_metadata(&mut metadata, &keypair());
        metadata
    }

    fn firmware() -> Vec<u8> {
        (0u32..(2 * Fragment::CONTENT_SIZE as u32 + 500))
            .map(|i| (i % 251) as u8)
            .collect()
    }

    #[test]
    fn slicing_is_contiguous_and_padded() {
        let firmware = firmware();
        let metadata = metadata(firmware.len());
        let fragments = build_fragments(
            &metadata,
            &firmware,
            0x0800_00C4,
            FragmentSigning::HashChain,
        );

        assert_eq!(fragments.len(), 3);
        for (i, fragment) in fragments.iter().enumerate() {
            assert_eq!(fragment.number, i as u32);
            assert_eq!(
                fragment.start_address,
                0x0800_00C4 + (i * Fragment::CONTENT_SIZE) as u32
            );
            assert_eq!(fragment.firmware_id, metadata.firmware_id);
        }
        assert_eq!(fragments[2].size, 500);
        assert!(fragments[2].content[500..].iter().all(|&b| b == 0));
    }

    #[test]
    fn per_fragment_signatures_verify() {
        let firmware = firmware();
        let metadata = metadata(firmware.len());
        let keypair = keypair();
        let fragments = build_fragments(
            &metadata,
            &firmware,
            0x0800_00C4,
            FragmentSigning::PerFragment(&keypair),
        );

        let validator = Ed25519Validator::new(*keypair.public());
        for fragment in &fragments {
            assert!(verify(
                &fragment.signature_or_hash,
                &fragment.signed_bytes(),
                keypair.public()
            ));
            assert!(validator.validate_fragment(fragment));
        }
    }

    // I6: every chain fragment verifies iff no byte was altered.
    #[test]
    fn hash_chain_links_verify_and_detect_tampering() {
        let firmware = firmware();
        let metadata = metadata(firmware.len());
        let fragments = build_fragments(
            &metadata,
            &firmware,
            0x0800_00C4,
            FragmentSigning::HashChain,
        );

        let mut previous = metadata.metadata_signature;
        for fragment in &fragments {
            assert!(tags_equal(
                &fragment.signature_or_hash,
                &chain_tag(&previous, &fragment.signed_bytes())
            ));
            previous = fragment.signature_or_hash;
        }

        let mut tampered = fragments.clone();
        tampered[1].content[0] ^= 1;
        assert!(!tags_equal(
            &tampered[1].signature_or_hash,
            &chain_tag(
                &tampered[0].signature_or_hash,
                &tampered[1].signed_bytes()
            )
        ));
    }
}
