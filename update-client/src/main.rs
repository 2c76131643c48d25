//! Command line client for the remote firmware update server.

use std::net::{SocketAddr, ToSocketAddrs as _};
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser as _;
use fwsign::FragmentSigning;
use log::{error, info};
use update_client::{load_firmware_image, UpdateClient};
use update_protocol::{
    DATA_ID_ERASE_SLOT, DATA_ID_FIRMWARE_NAME, DATA_ID_FIRMWARE_ROLLBACK,
    DATA_ID_FIRMWARE_TYPE, DATA_ID_FIRMWARE_UPDATE, DATA_ID_FIRMWARE_VERSION, DATA_ID_RESET,
};

const EXIT_OK: i32 = 0;
const EXIT_PARSE_FAILURE: i32 = -1;
const EXIT_ARGUMENT_OUT_OF_RANGE: i32 = -2;
const EXIT_METADATA_UPLOAD_FAILED: i32 = 1;
const EXIT_FRAGMENT_UPLOAD_FAILED: i32 = 2;
const EXIT_UNKNOWN_COMMAND: i32 = -10;

#[derive(Debug, clap::Parser)]
#[command(name = "update-client", about = "Remote firmware update client")]
struct Args {
    /// Destination IP address.
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    /// Destination UDP port.
    #[arg(short, long, default_value_t = 8)]
    port: u16,

    /// Local UDP port, if it must differ from an ephemeral one.
    #[arg(long, default_value_t = 0)]
    localport: u16,

    /// OpenSSH Ed25519 private key file.
    #[arg(short = 'k', long)]
    key: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Upload a signed HEX image. With a key, fragments are individually
    /// Ed25519 signed; without one, a SHA-512 hash chain is used.
    Upload { hex: PathBuf },
    /// Reset the device.
    Reset,
    /// Roll back to the given image, or without one to the previously
    /// installed firmware.
    Rollback { hex: Option<PathBuf> },
    /// Erase one fragment slot.
    Erase { slot: u32 },
    /// Read firmware version, type and name.
    Version,
}

fn main() {
    pretty_env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::InvalidSubcommand => EXIT_UNKNOWN_COMMAND,
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = e.print();
                    std::process::exit(EXIT_OK);
                }
                _ => EXIT_PARSE_FAILURE,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    std::process::exit(run(args));
}

fn run(args: Args) -> i32 {
    let remote = match resolve(&args.address, args.port) {
        Ok(remote) => remote,
        Err(message) => {
            error!("{message}");
            return EXIT_PARSE_FAILURE;
        }
    };

    let client = match UpdateClient::connect(args.localport, remote) {
        Ok(client) => client,
        Err(e) => {
            error!("cannot open socket: {e}");
            return EXIT_PARSE_FAILURE;
        }
    };

    match args.command {
        Command::Upload { hex } => upload(&client, &hex, args.key.as_deref()),
        Command::Reset => {
            info!("writing reset request");
            simple_write(&client, DATA_ID_RESET, &[0])
        }
        Command::Rollback { hex } => rollback(&client, hex.as_deref()),
        Command::Erase { slot } => {
            if slot > 255 {
                error!("slot index must fit into one byte: {slot}");
                return EXIT_ARGUMENT_OUT_OF_RANGE;
            }
            info!("writing slot erase request for slot {slot}");
            simple_write(&client, DATA_ID_ERASE_SLOT, &[slot as u8])
        }
        Command::Version => version(&client),
    }
}

fn resolve(address: &str, port: u16) -> Result<SocketAddr, String> {
    (address, port)
        .to_socket_addrs()
        .map_err(|e| format!("invalid address {address}:{port}: {e}"))?
        .next()
        .ok_or_else(|| format!("address {address}:{port} does not resolve"))
}

fn upload(client: &UpdateClient, hex: &std::path::Path, key: Option<&std::path::Path>) -> i32 {
    let keypair = match key.map(load_keypair).transpose() {
        Ok(keypair) => keypair,
        Err(code) => return code,
    };

    let hex_text = match std::fs::read_to_string(hex) {
        Ok(text) => text,
        Err(e) => {
            error!("cannot read {}: {e}", hex.display());
            return EXIT_PARSE_FAILURE;
        }
    };

    let signing = match &keypair {
        Some(keypair) => FragmentSigning::PerFragment(keypair),
        None => FragmentSigning::HashChain,
    };
    let image = match load_firmware_image(&hex_text, signing) {
        Ok(image) => image,
        Err(e) => {
            error!("{e}");
            return EXIT_PARSE_FAILURE;
        }
    };

    info!(
        "uploading \"{}\" version {:#x}, {} fragments",
        String::from_utf8_lossy(image.metadata.name_bytes()),
        image.metadata.version,
        image.fragments.len()
    );

    if let Err(e) = client.put_metadata(&image.metadata) {
        error!("metadata upload failed: {e}");
        return EXIT_METADATA_UPLOAD_FAILED;
    }
    info!("metadata uploaded");

    for fragment in &image.fragments {
        if let Err(e) = client.put_fragment(fragment) {
            error!("fragment {} upload failed: {e}", fragment.number);
            return EXIT_FRAGMENT_UPLOAD_FAILED;
        }
        info!(
            "fragment {} uploaded ({} bytes at {:#010x})",
            fragment.number, fragment.size, fragment.start_address
        );
    }

    if let Err(e) = client.write_data_by_id(DATA_ID_FIRMWARE_UPDATE, &image.metadata.encode()) {
        error!("update commit failed: {e}");
        return EXIT_METADATA_UPLOAD_FAILED;
    }

    info!("update committed, device resets to install");
    EXIT_OK
}

fn rollback(client: &UpdateClient, hex: Option<&std::path::Path>) -> i32 {
    let argument = match hex {
        Some(path) => {
            let hex_text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    error!("cannot read {}: {e}", path.display());
                    return EXIT_PARSE_FAILURE;
                }
            };
            match load_firmware_image(&hex_text, FragmentSigning::HashChain) {
                Ok(image) => image.metadata.encode().to_vec(),
                Err(e) => {
                    error!("{e}");
                    return EXIT_PARSE_FAILURE;
                }
            }
        }
        // A single zero byte targets the previously installed firmware.
        None => vec![0],
    };

    info!("writing rollback request");
    simple_write(client, DATA_ID_FIRMWARE_ROLLBACK, &argument)
}

fn version(client: &UpdateClient) -> i32 {
    match client.read_data_by_id(DATA_ID_FIRMWARE_VERSION) {
        Ok(data) if data.len() == 4 => {
            println!(
                "Firmware version: {}",
                u32::from_be_bytes(data.try_into().expect("4 bytes"))
            );
        }
        Ok(data) => {
            error!("invalid firmware version size: {}", data.len());
            return 1;
        }
        Err(e) => {
            error!("version read failed: {e}");
            return 1;
        }
    }

    match client.read_data_by_id(DATA_ID_FIRMWARE_TYPE) {
        Ok(data) if data.len() == 4 => {
            println!(
                "Firmware type: {}",
                u32::from_be_bytes(data.try_into().expect("4 bytes"))
            );
        }
        Ok(data) => {
            error!("invalid firmware type size: {}", data.len());
            return 1;
        }
        Err(e) => {
            error!("type read failed: {e}");
            return 1;
        }
    }

    match client.read_data_by_id(DATA_ID_FIRMWARE_NAME) {
        Ok(data) => println!("Firmware name: {}", String::from_utf8_lossy(&data)),
        Err(e) => {
            error!("name read failed: {e}");
            return 1;
        }
    }

    EXIT_OK
}

fn simple_write(client: &UpdateClient, id: u8, data: &[u8]) -> i32 {
    match client.write_data_by_id(id, data) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!("write failed: {e}");
            1
        }
    }
}

fn load_keypair(path: &std::path::Path) -> Result<fwsign::Keypair, i32> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        error!("cannot read {}: {e}", path.display());
        EXIT_PARSE_FAILURE
    })?;
    fwsign::parse_openssh_private_key(&text).map_err(|e| {
        error!("invalid key file {}: {e}", path.display());
        EXIT_PARSE_FAILURE
    })
}
