//! Host-side signer: embed Ed25519 signatures into a firmware HEX image.
//!
//! The image's single section starts with the metadata record. The tool
//! fixes up `firmware_size` to the actual trailing length, signs the
//! firmware and the metadata prefix with the operator's key, and emits the
//! image again as HEX.

use std::path::PathBuf;

use clap::Parser as _;
use fwsign::{parse_openssh_private_key, sign_metadata, Keypair};
use hexfile::HexFile;
use log::info;
use update_protocol::Metadata;

#[derive(Debug, clap::Parser)]
#[command(name = "hexsign", about = "Sign a firmware HEX image")]
struct Args {
    /// Input HEX file.
    #[arg(short, long)]
    input: PathBuf,

    /// Output HEX file.
    #[arg(short, long)]
    output: PathBuf,

    /// OpenSSH Ed25519 private key file.
    #[arg(short, long)]
    key: PathBuf,
}

fn main() -> std::process::ExitCode {
    pretty_env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let key_text = std::fs::read_to_string(&args.key).map_err(Error::ReadKeyFile)?;
    let keypair = parse_openssh_private_key(&key_text)?;

    let hex_text = std::fs::read_to_string(&args.input).map_err(Error::ReadInputFile)?;
    let signed = sign_hex_image(&hex_text, &keypair)?;

    std::fs::write(&args.output, signed).map_err(Error::WriteOutputFile)?;
    info!("signed image written to {}", args.output.display());
    Ok(())
}

/// Sign the image: rewrite `firmware_size`, then fill in both signatures.
fn sign_hex_image(hex_text: &str, keypair: &Keypair) -> Result<String, Error> {
    let hex = HexFile::parse(hex_text)?;

    let sections = hex.sections();
    if sections.len() != 1 {
        return Err(Error::SectionCount(sections.len()));
    }
    let section = &sections[0];
    if section.data.len() < Metadata::SIZE {
        return Err(Error::NoMetadata(section.data.len()));
    }

    let mut metadata = Metadata::decode(&section.data[..Metadata::SIZE])?;
    let firmware = &section.data[Metadata::SIZE..];

    metadata.firmware_size = firmware.len() as u32;
    metadata.firmware_signature = keypair.sign(firmware);
    sign_metadata(&mut metadata, keypair);

    info!(
        "signed {} firmware bytes with key {}",
        firmware.len(),
        hex::encode(keypair.public())
    );

    let mut data = metadata.encode().to_vec();
    data.extend_from_slice(firmware);
    let mut out = HexFile::from_section(section.start_address, data);
    out.set_start_linear_address(hex.start_linear_address());

    Ok(out.emit())
}

#[derive(Debug)]
enum Error {
    Hex(hexfile::HexFileError),
    Key(fwsign::OpensshKeyError),
    Metadata(update_protocol::DecodeError),
    NoMetadata(usize),
    ReadInputFile(std::io::Error),
    ReadKeyFile(std::io::Error),
    SectionCount(usize),
    WriteOutputFile(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Hex(e) => write!(f, "invalid HEX file: {e}"),
            Error::Key(e) => write!(f, "invalid key file: {e}"),
            Error::Metadata(e) => write!(f, "invalid leading metadata: {e}"),
            Error::NoMetadata(len) => {
                write!(f, "section of {len} bytes cannot hold a metadata record")
            }
            Error::ReadInputFile(e) => write!(f, "failed to read input file: {e}"),
            Error::ReadKeyFile(e) => write!(f, "failed to read key file: {e}"),
            Error::SectionCount(n) => {
                write!(f, "expected one contiguous section, found {n}")
            }
            Error::WriteOutputFile(e) => write!(f, "failed to write output file: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<hexfile::HexFileError> for Error {
    fn from(e: hexfile::HexFileError) -> Self {
        Error::Hex(e)
    }
}

impl From<fwsign::OpensshKeyError> for Error {
    fn from(e: fwsign::OpensshKeyError) -> Self {
        Error::Key(e)
    }
}

impl From<update_protocol::DecodeError> for Error {
    fn from(e: update_protocol::DecodeError) -> Self {
        Error::Metadata(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwsign::verify;

    fn unsigned_image(firmware: &[u8]) -> String {
        let metadata = Metadata {
            fw_type: 4,
            version: 9,
            rollback_number: 1,
            firmware_id: 0xBEEF,
            start_address: 0x0800_00C4,
            // Deliberately wrong; the signer must fix it up.
            firmware_size: 1,
            name: [0u8; 32],
            firmware_signature: [0u8; 64],
            metadata_signature: [0u8; 64],
        };

        let mut data = metadata.encode().to_vec();
        data.extend_from_slice(firmware);
        HexFile::from_section(0x0800_0000, data).emit()
    }

    #[test]
    fn signs_and_fixes_up_the_image() {
        let keypair = Keypair::from_seed(&[17u8; 32]);
        let firmware: Vec<u8> = (0..5000u32).map(|i| (i % 127) as u8).collect();

        let signed = sign_hex_image(&unsigned_image(&firmware), &keypair).unwrap();
        let parsed = HexFile::parse(&signed).unwrap();
        let section = &parsed.sections()[0];
        assert_eq!(section.start_address, 0x0800_0000);

        let metadata = Metadata::decode(&section.data[..Metadata::SIZE]).unwrap();
        assert_eq!(metadata.firmware_size, firmware.len() as u32);
        assert_eq!(&section.data[Metadata::SIZE..], &firmware[..]);

        assert!(verify(
            &metadata.firmware_signature,
            &firmware,
            keypair.public()
        ));
        assert!(verify(
            &metadata.metadata_signature,
            &metadata.signed_bytes(),
            keypair.public()
        ));
    }

    #[test]
    fn refuses_images_without_metadata() {
        let keypair = Keypair::from_seed(&[17u8; 32]);
        let hex = HexFile::from_section(0, vec![0u8; 10]).emit();

        assert!(matches!(
            sign_hex_image(&hex, &keypair),
            Err(Error::NoMetadata(10))
        ));
    }
}
