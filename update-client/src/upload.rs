//! Firmware image loading: HEX file in, metadata plus sliced fragments out.

use fwsign::{build_fragments, FragmentSigning};
use hexfile::HexFile;
use update_protocol::{Fragment, Metadata};

#[derive(Debug)]
pub enum UploadError {
    Hex(hexfile::HexFileError),
    /// The image must be one contiguous section.
    SectionCount(usize),
    /// The section is too short to carry a metadata record.
    NoMetadata(usize),
    Metadata(update_protocol::DecodeError),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Hex(e) => write!(f, "invalid HEX file: {e}"),
            UploadError::SectionCount(n) => {
                write!(f, "expected one contiguous section, found {n}")
            }
            UploadError::NoMetadata(len) => {
                write!(f, "section of {len} bytes cannot hold a metadata record")
            }
            UploadError::Metadata(e) => write!(f, "invalid leading metadata: {e}"),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<hexfile::HexFileError> for UploadError {
    fn from(e: hexfile::HexFileError) -> Self {
        UploadError::Hex(e)
    }
}

/// A signed firmware image ready for upload: the leading metadata record
/// and the firmware sliced into tagged fragments.
pub struct FirmwareImage {
    pub metadata: Metadata,
    pub fragments: Vec<Fragment>,
}

/// Load a signed single-section HEX image and slice it for upload.
///
/// The section starts with the 196-byte metadata record; everything after
/// it is firmware. Fragment addresses continue from the section start, so
/// the first fragment sits at `section.start + 196`.
pub fn load_firmware_image(
    hex_text: &str,
    signing: FragmentSigning<'_>,
) -> Result<FirmwareImage, UploadError> {
    let hex = HexFile::parse(hex_text)?;

    let sections = hex.sections();
    if sections.len() != 1 {
        return Err(UploadError::SectionCount(sections.len()));
    }
    let section = &sections[0];
    if section.data.len() < Metadata::SIZE {
        return Err(UploadError::NoMetadata(section.data.len()));
    }

    let metadata =
        Metadata::decode(&section.data[..Metadata::SIZE]).map_err(UploadError::Metadata)?;
    let firmware = &section.data[Metadata::SIZE..];
    let fragments = build_fragments(
        &metadata,
        firmware,
        section.start_address + Metadata::SIZE as u32,
        signing,
    );

    Ok(FirmwareImage {
        metadata,
        fragments,
    })
}
