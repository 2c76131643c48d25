// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Service handlers and the verify-before-commit install pipeline.

use fragstore::{Command, CommandStore, Error as StoreError, Flash, FragmentArea};
use fwsign::{chain_tag, tags_equal, Ed25519Validator, MultipartVerifier};
use update_protocol::{
    Fragment, Metadata, Status, DATA_ID_ERASE_SLOT, DATA_ID_FIRMWARE_NAME,
    DATA_ID_FIRMWARE_ROLLBACK, DATA_ID_FIRMWARE_TYPE, DATA_ID_FIRMWARE_UPDATE,
    DATA_ID_FIRMWARE_VERSION, DATA_ID_RESET,
};
use update_server::Handlers;

use crate::pending::PendingUpload;

/// Identity the device reports through the read-only data IDs.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub version: u32,
    pub fw_type: u32,
    pub name: String,
}

/// Longest firmware name served over the wire.
const NAME_LIMIT: usize = 16;

#[derive(Clone)]
pub struct EngineConfig {
    pub device: DeviceInfo,
    /// Operator public key the device trusts.
    pub public_key: [u8; 32],
    /// Flash address the first uploaded fragment must carry.
    pub first_flash_address: u32,
    /// Upper bound on an accepted firmware image.
    pub max_firmware_size: u32,
}

pub struct UpdateEngine<'a, F: Flash> {
    config: EngineConfig,
    area: FragmentArea<'a, F, Ed25519Validator>,
    journal: CommandStore<'a, F>,
    pending: PendingUpload,
    reset_requested: bool,
}

impl<'a, F: Flash> UpdateEngine<'a, F> {
    pub fn new(
        config: EngineConfig,
        area: FragmentArea<'a, F, Ed25519Validator>,
        journal: CommandStore<'a, F>,
    ) -> Self {
        let max_fragments =
            (config.max_firmware_size as usize).div_ceil(Fragment::CONTENT_SIZE);
        UpdateEngine {
            config,
            area,
            journal,
            pending: PendingUpload::new(max_fragments),
            reset_requested: false,
        }
    }

    /// Whether a processed request asked for a device reset. The embedding
    /// loop resets the device (or, in a host harness, re-arms the engine).
    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    /// Acknowledge a reset request and drop the pending upload, as a real
    /// reboot would.
    pub fn take_reset_request(&mut self) -> bool {
        let requested = self.reset_requested;
        self.reset_requested = false;
        if requested {
            self.pending.clear();
        }
        requested
    }

    pub fn area(&self) -> &FragmentArea<'a, F, Ed25519Validator> {
        &self.area
    }

    pub fn journal(&self) -> &CommandStore<'a, F> {
        &self.journal
    }

    pub fn pending_fragment_count(&self) -> usize {
        self.pending.fragment_count()
    }

    fn accept_metadata(&mut self, data: &[u8]) -> Result<(), Status> {
        let metadata = Metadata::decode(data).map_err(|_| Status::NackInvalidRequest)?;

        if !fwsign::verify(
            &metadata.metadata_signature,
            &metadata.signed_bytes(),
            &self.config.public_key,
        ) {
            return Err(Status::NackRequestFailed);
        }

        // A new metadata record starts a new upload.
        self.pending.clear();
        self.pending.set_metadata(metadata);
        Ok(())
    }

    fn accept_fragment(&mut self, data: &[u8]) -> Result<(), Status> {
        let fragment = Fragment::decode(data).map_err(|_| Status::NackInvalidRequest)?;

        if fragment.size == 0 || fragment.size as usize > Fragment::CONTENT_SIZE {
            return Err(Status::NackInvalidRequest);
        }

        match fragment.verify_method {
            update_protocol::VerifyMethod::Ed25519 => {
                if !fwsign::verify(
                    &fragment.signature_or_hash,
                    &fragment.signed_bytes(),
                    &self.config.public_key,
                ) {
                    return Err(Status::NackRequestFailed);
                }
            }
            update_protocol::VerifyMethod::Sha512Chain => {
                // The chain is anchored in the metadata signature; without
                // the previous link the tag cannot be checked.
                let previous_tag = if fragment.number == 0 {
                    self.pending
                        .metadata()
                        .map(|m| m.metadata_signature)
                        .ok_or(Status::NackRequestFailed)?
                } else {
                    self.pending
                        .fragment(fragment.number - 1)
                        .map(|f| f.signature_or_hash)
                        .ok_or(Status::NackRequestFailed)?
                };

                let expected = chain_tag(&previous_tag, &fragment.signed_bytes());
                if !tags_equal(&fragment.signature_or_hash, &expected) {
                    return Err(Status::NackRequestFailed);
                }
            }
        }

        self.pending
            .insert(fragment)
            .map_err(|_| Status::NackOutOfRange)
    }

    /// Verify the pending upload against the supplied metadata, then
    /// commit it and schedule the install.
    fn try_install(&mut self, supplied: &Metadata) -> Result<(), Status> {
        let metadata = self
            .pending
            .metadata()
            .ok_or(Status::NackRequestFailed)?
            .clone();

        // The commit must name exactly the uploaded metadata.
        if supplied.encode() != metadata.encode() {
            return Err(Status::NackRequestFailed);
        }

        if self.pending.fragment_count() == 0
            || metadata.firmware_size == 0
            || metadata.firmware_size > self.config.max_firmware_size
        {
            return Err(Status::NackRequestFailed);
        }

        let firmware_start = metadata.start_address as u64;
        let firmware_end = firmware_start + metadata.firmware_size as u64;
        if firmware_start < self.config.first_flash_address as u64 {
            return Err(Status::NackRequestFailed);
        }

        // Walk fragments in ascending number order: numbers 0,1,2,… with
        // contiguous addresses from the configured first flash address,
        // streaming the image bytes through a multipart verifier.
        let mut verifier =
            MultipartVerifier::new(&metadata.firmware_signature, &self.config.public_key)
                .map_err(|_| Status::NackRequestFailed)?;
        let mut expected_address = self.config.first_flash_address as u64;

        for (index, (number, fragment)) in self.pending.fragments().enumerate() {
            if number != index as u32
                || fragment.firmware_id != metadata.firmware_id
                || fragment.start_address as u64 != expected_address
            {
                return Err(Status::NackRequestFailed);
            }

            let fragment_start = fragment.start_address as u64;
            let fragment_end = fragment_start + fragment.size as u64;

            // Feed only the overlap with the signed image; the stored
            // image may begin part-way into the first fragment.
            let lo = fragment_start.max(firmware_start);
            let hi = fragment_end.min(firmware_end);
            if lo < hi {
                let offset = (lo - fragment_start) as usize;
                let len = (hi - lo) as usize;
                verifier.update(&fragment.content[offset..offset + len]);
            }

            expected_address = fragment_end;
        }

        // The fragments must cover the signed image completely.
        if expected_address < firmware_end {
            return Err(Status::NackRequestFailed);
        }

        if !verifier.finish() {
            return Err(Status::NackRequestFailed);
        }

        self.commit(&metadata)
    }

    fn commit(&mut self, metadata: &Metadata) -> Result<(), Status> {
        if self.pending.fragment_count() > self.area.max_index() + 1 {
            return Err(Status::NackOutOfRange);
        }

        self.area.erase_area().map_err(wire_status)?;
        self.area.write_metadata(metadata).map_err(wire_status)?;
        for (number, fragment) in self.pending.fragments() {
            self.area
                .write_fragment(number as usize, fragment)
                .map_err(wire_status)?;
        }

        self.journal
            .write_install_command(Command::Install, metadata)
            .map_err(wire_status)?;

        self.pending.clear();
        self.reset_requested = true;
        Ok(())
    }

    fn rollback(&mut self, data: &[u8]) -> Result<(), Status> {
        let metadata = if data == [0] {
            // A single zero byte targets the previously installed image.
            self.journal.read_history().map_err(wire_status)?
        } else {
            let metadata = Metadata::decode(data).map_err(|_| Status::NackInvalidRequest)?;
            if !fwsign::verify(
                &metadata.metadata_signature,
                &metadata.signed_bytes(),
                &self.config.public_key,
            ) {
                return Err(Status::NackRequestFailed);
            }
            metadata
        };

        self.journal
            .write_install_command(Command::Rollback, &metadata)
            .map_err(wire_status)?;
        self.reset_requested = true;
        Ok(())
    }
}

impl<F: Flash> Handlers for UpdateEngine<'_, F> {
    fn read_data_by_id(&mut self, id: u8, out: &mut [u8]) -> Result<usize, Status> {
        match id {
            DATA_ID_FIRMWARE_VERSION => {
                if out.len() < 4 {
                    return Err(Status::NackInternalError);
                }
                out[..4].copy_from_slice(&self.config.device.version.to_be_bytes());
                Ok(4)
            }
            DATA_ID_FIRMWARE_TYPE => {
                if out.len() < 4 {
                    return Err(Status::NackInternalError);
                }
                out[..4].copy_from_slice(&self.config.device.fw_type.to_be_bytes());
                Ok(4)
            }
            DATA_ID_FIRMWARE_NAME => {
                let name = self.config.device.name.as_bytes();
                let len = name.len().min(NAME_LIMIT).min(out.len());
                out[..len].copy_from_slice(&name[..len]);
                Ok(len)
            }
            _ => Err(Status::NackOutOfRange),
        }
    }

    fn write_data_by_id(&mut self, id: u8, data: &[u8]) -> Result<(), Status> {
        match id {
            DATA_ID_FIRMWARE_UPDATE => {
                let metadata =
                    Metadata::decode(data).map_err(|_| Status::NackInvalidRequest)?;
                self.try_install(&metadata)
            }
            DATA_ID_FIRMWARE_ROLLBACK => self.rollback(data),
            DATA_ID_ERASE_SLOT => {
                if data.len() != 1 {
                    return Err(Status::NackInvalidRequest);
                }
                self.area.erase_slot(data[0] as usize).map_err(wire_status)
            }
            DATA_ID_RESET => {
                if data != [0] {
                    return Err(Status::NackInvalidRequest);
                }
                self.reset_requested = true;
                Ok(())
            }
            _ => Err(Status::NackOutOfRange),
        }
    }

    fn put_metadata(&mut self, data: &[u8]) -> Result<(), Status> {
        self.accept_metadata(data)
    }

    fn put_fragment(&mut self, data: &[u8]) -> Result<(), Status> {
        self.accept_fragment(data)
    }
}

/// Domain-to-wire mapping, applied only at this boundary.
fn wire_status(error: StoreError) -> Status {
    match error {
        StoreError::Busy => Status::NackBusyRepeatRequest,
        StoreError::Invalid => Status::NackInvalidRequest,
        StoreError::Param => Status::NackOutOfRange,
        StoreError::Empty => Status::NackRequestFailed,
    }
}
