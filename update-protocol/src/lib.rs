// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Wire-level data model of the firmware update protocol.
//!
//! Everything the device server, the device application layer and the host
//! tools agree on lives here: the transfer codes of the datagram framing
//! layer, the service identifiers and status bytes of the request router,
//! the well-known data identifiers, and the packed `Metadata` and
//! `Fragment` records with their exact byte layouts.
//!
//! The byte layouts are authoritative. Records are encoded and decoded
//! field by field rather than memory-mapped, so the layout holds on every
//! target regardless of struct packing rules.

#![no_std]

#[cfg(test)]
extern crate std;


/// Maximum datagram the transport will carry (fits a common 1500-byte MTU).
pub const MAX_DATAGRAM_SIZE: usize = 1472;

/// Maximum request payload carried by one datagram, excluding the leading
/// transfer code byte.
pub const MAX_REQUEST_PAYLOAD: usize = 511;

/// Transfer code: whole logical request in one datagram.
pub const TRANSFER_SINGLE_PACKET: u8 = 0x00;
/// Transfer code: announce a multi-packet request (payload = BE u32 length).
pub const TRANSFER_MULTI_PACKET_INIT: u8 = 0x01;
/// Transfer code: one chunk of a multi-packet request.
pub const TRANSFER_MULTI_PACKET_DATA: u8 = 0x02;
/// Transfer code: dispatch the reassembled multi-packet request.
pub const TRANSFER_MULTI_PACKET_END: u8 = 0x03;

/// Service identifier of the Ping service.
pub const SID_PING: u8 = 0x01;
/// Service identifier of ReadDataById.
pub const SID_READ_DATA_BY_ID: u8 = 0x02;
/// Service identifier of WriteDataById.
pub const SID_WRITE_DATA_BY_ID: u8 = 0x03;
/// Service identifier of PutMetadata.
pub const SID_PUT_METADATA: u8 = 0x10;
/// Service identifier of PutFragment.
pub const SID_PUT_FRAGMENT: u8 = 0x11;

/// Read-only data ID: firmware version, BE u32.
pub const DATA_ID_FIRMWARE_VERSION: u8 = 0x01;
/// Read-only data ID: firmware type, BE u32.
pub const DATA_ID_FIRMWARE_TYPE: u8 = 0x02;
/// Read-only data ID: firmware name string, up to 16 bytes.
pub const DATA_ID_FIRMWARE_NAME: u8 = 0x03;
/// Write-only data ID: commit a pending upload, body is the full Metadata.
pub const DATA_ID_FIRMWARE_UPDATE: u8 = 0x10;
/// Write-only data ID: roll back, body is a target Metadata or a single
/// zero byte meaning "previously installed firmware".
pub const DATA_ID_FIRMWARE_ROLLBACK: u8 = 0x11;
/// Write-only data ID: erase one fragment slot, body is the slot index.
pub const DATA_ID_ERASE_SLOT: u8 = 0x12;
/// Write-only data ID: reset the device, body is a single zero byte.
pub const DATA_ID_RESET: u8 = 0x13;

/// Status byte of a service response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    AckOk = 0x00,
    NackOutOfRange = 0xE0,
    NackInvalidRequest = 0xE1,
    NackBusyRepeatRequest = 0xE2,
    NackRequestFailed = 0xE3,
    NackInternalError = 0xE4,
}

impl Status {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Status::AckOk),
            0xE0 => Some(Status::NackOutOfRange),
            0xE1 => Some(Status::NackInvalidRequest),
            0xE2 => Some(Status::NackBusyRepeatRequest),
            0xE3 => Some(Status::NackRequestFailed),
            0xE4 => Some(Status::NackInternalError),
            _ => None,
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status as u8
    }
}

/// Magic identifying a metadata record.
pub const METADATA_MAGIC: [u8; 16] = *b"_M_E_T_A_D_A_T_A";

/// How the trailing 64 bytes of a fragment are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VerifyMethod {
    /// Ed25519 signature over the fragment bytes minus the trailing tag.
    Ed25519 = 0,
    /// SHA-512 hash chain: the tag hashes the previous fragment's tag (or
    /// the metadata signature for fragment 0) followed by the fragment
    /// bytes minus the tag.
    Sha512Chain = 1,
}

impl VerifyMethod {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(VerifyMethod::Ed25519),
            1 => Some(VerifyMethod::Sha512Chain),
            _ => None,
        }
    }
}

/// Fixed-size header describing one firmware image.
///
/// 196 bytes on the wire and in flash, little-endian integers:
///
/// ```text
/// offset 0   : magic[16] = "_M_E_T_A_D_A_T_A"
/// offset 16  : u32 type
/// offset 20  : u32 version
/// offset 24  : u32 rollback_number
/// offset 28  : u32 firmware_id
/// offset 32  : u32 start_address
/// offset 36  : u32 firmware_size
/// offset 40  : name[32]
/// offset 72  : firmware_signature[64]
/// offset 136 : metadata_signature[64]   (over bytes 0..=135)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub fw_type: u32,
    pub version: u32,
    pub rollback_number: u32,
    pub firmware_id: u32,
    pub start_address: u32,
    pub firmware_size: u32,
    pub name: [u8; 32],
    pub firmware_signature: [u8; 64],
    pub metadata_signature: [u8; 64],
}

impl Metadata {
    /// Size of the encoded record in bytes.
    pub const SIZE: usize = 196;

    /// Length of the prefix covered by `metadata_signature`.
    pub const SIGNED_LEN: usize = 132;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..16].copy_from_slice(&METADATA_MAGIC);
        buf[16..20].copy_from_slice(&self.fw_type.to_le_bytes());
        buf[20..24].copy_from_slice(&self.version.to_le_bytes());
        buf[24..28].copy_from_slice(&self.rollback_number.to_le_bytes());
        buf[28..32].copy_from_slice(&self.firmware_id.to_le_bytes());
        buf[32..36].copy_from_slice(&self.start_address.to_le_bytes());
        buf[36..40].copy_from_slice(&self.firmware_size.to_le_bytes());
        buf[40..72].copy_from_slice(&self.name);
        buf[72..136].copy_from_slice(&self.firmware_signature);
        buf[136..196].copy_from_slice(&self.metadata_signature);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != Self::SIZE {
            return Err(DecodeError::Length {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[..16] != METADATA_MAGIC {
            return Err(DecodeError::BadMagic);
        }

        Ok(Metadata {
            fw_type: le_u32(&bytes[16..20]),
            version: le_u32(&bytes[20..24]),
            rollback_number: le_u32(&bytes[24..28]),
            firmware_id: le_u32(&bytes[28..32]),
            start_address: le_u32(&bytes[32..36]),
            firmware_size: le_u32(&bytes[36..40]),
            name: bytes[40..72].try_into().expect("32 bytes"),
            firmware_signature: bytes[72..136].try_into().expect("64 bytes"),
            metadata_signature: bytes[136..196].try_into().expect("64 bytes"),
        })
    }

    /// The encoded prefix covered by `metadata_signature`.
    pub fn signed_bytes(&self) -> [u8; Self::SIGNED_LEN] {
        let encoded = self.encode();
        encoded[..Self::SIGNED_LEN].try_into().expect("132 bytes")
    }

    /// Firmware name with the NUL padding stripped.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        &self.name[..end]
    }
}

/// One slot-sized chunk of firmware plus its verification tag.
///
/// 4100 bytes on the wire and in flash, little-endian integers. The three
/// bytes following `verify_method` are padding, encoded as zero and ignored
/// on decode; the tag is the trailing field so the signed/chained portion
/// is exactly bytes `0..4036`.
///
/// ```text
/// offset 0    : u32 firmware_id
/// offset 4    : u32 number
/// offset 8    : u32 start_address
/// offset 12   : u32 size
/// offset 16   : u8  verify_method
/// offset 17   : pad[3]
/// offset 20   : content[4016]
/// offset 4036 : signature_or_hash[64]
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Fragment {
    pub firmware_id: u32,
    pub number: u32,
    pub start_address: u32,
    pub size: u32,
    pub verify_method: VerifyMethod,
    pub content: [u8; Self::CONTENT_SIZE],
    pub signature_or_hash: [u8; 64],
}

impl Fragment {
    /// Size of the encoded record in bytes.
    pub const SIZE: usize = 4100;

    /// Payload bytes carried by one fragment.
    pub const CONTENT_SIZE: usize = 4016;

    /// Length of the prefix covered by the trailing tag.
    pub const SIGNED_LEN: usize = 4036;

    /// A fragment with empty content, useful as a fill-in template.
    pub fn zeroed(verify_method: VerifyMethod) -> Self {
        Fragment {
            firmware_id: 0,
            number: 0,
            start_address: 0,
            size: 0,
            verify_method,
            content: [0u8; Self::CONTENT_SIZE],
            signature_or_hash: [0u8; 64],
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        self.encode_to(&mut buf);
        buf
    }

    /// Encode into a caller-provided buffer of exactly [`Self::SIZE`] bytes.
    pub fn encode_to(&self, buf: &mut [u8; Self::SIZE]) {
        buf[..4].copy_from_slice(&self.firmware_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.number.to_le_bytes());
        buf[8..12].copy_from_slice(&self.start_address.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16] = self.verify_method as u8;
        buf[17..20].fill(0);
        buf[20..4036].copy_from_slice(&self.content);
        buf[4036..4100].copy_from_slice(&self.signature_or_hash);
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != Self::SIZE {
            return Err(DecodeError::Length {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        let verify_method = VerifyMethod::from_byte(bytes[16])
            .ok_or(DecodeError::BadVerifyMethod(bytes[16]))?;

        Ok(Fragment {
            firmware_id: le_u32(&bytes[..4]),
            number: le_u32(&bytes[4..8]),
            start_address: le_u32(&bytes[8..12]),
            size: le_u32(&bytes[12..16]),
            verify_method,
            content: bytes[20..4036].try_into().expect("4016 bytes"),
            signature_or_hash: bytes[4036..4100].try_into().expect("64 bytes"),
        })
    }

    /// The encoded prefix covered by the trailing tag.
    pub fn signed_bytes(&self) -> [u8; Self::SIGNED_LEN] {
        let encoded = self.encode();
        encoded[..Self::SIGNED_LEN].try_into().expect("4036 bytes")
    }
}

impl core::fmt::Debug for Fragment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fragment")
            .field("firmware_id", &self.firmware_id)
            .field("number", &self.number)
            .field("start_address", &self.start_address)
            .field("size", &self.size)
            .field("verify_method", &self.verify_method)
            .finish_non_exhaustive()
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().expect("4 bytes"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    BadMagic,
    BadVerifyMethod(u8),
    Length { expected: usize, actual: usize },
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::BadMagic => write!(f, "metadata magic missing or unrecognized"),
            DecodeError::BadVerifyMethod(byte) => {
                write!(f, "unknown fragment verify method {byte:#04x}")
            }
            DecodeError::Length { expected, actual } => {
                write!(f, "record length {actual}, expected {expected}")
            }
        }
    }
}
