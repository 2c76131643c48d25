//! Stub device for function verification and debugging.
//!
//! Listens on a UDP port and runs the real update pipeline (transfer
//! framer, service router, verify-before-commit engine) over an in-memory
//! imitation flash. A commit or reset request re-arms the engine instead
//! of rebooting, and the journaled command is logged so an upload can be
//! followed end to end.

use std::net::UdpSocket;

use clap::Parser as _;
use fragstore::{CommandStore, FragmentArea, ImitationFlash, MemoryConfig};
use fwsign::Ed25519Validator;
use log::{debug, error, info};
use update_engine::{DeviceInfo, EngineConfig, UpdateEngine};
use update_protocol::{Metadata, MAX_DATAGRAM_SIZE};
use update_server::{Transfer, UpdateServer};

const KB: usize = 1024;
const SECTOR_SIZE: usize = 4 * KB;
const FLASH_SIZE: usize = 2 * KB * KB;
const AREA_SIZE: usize = FLASH_SIZE - JOURNAL_SIZE;
const JOURNAL_SIZE: usize = 12 * KB;

const TRANSFER_BUFFER_SIZE: usize = 5 * KB;
const FIRST_FLASH_ADDRESS: u32 = 0x0800_0000 + Metadata::SIZE as u32;

#[derive(Debug, clap::Parser)]
#[command(name = "testserver", about = "Stub update server over UDP")]
struct Args {
    /// UDP port to listen on.
    #[arg(short, long, default_value_t = 8)]
    port: u16,

    /// Operator public key, 32 hex bytes. Unsigned test uploads can use
    /// the well-known all-zero-seed key by omitting this.
    #[arg(short, long)]
    key: Option<String>,
}

fn main() -> std::process::ExitCode {
    pretty_env_logger::init();
    let args = Args::parse();

    let public_key = match public_key(args.key.as_deref()) {
        Ok(key) => key,
        Err(message) => {
            eprintln!("error: {message}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let socket = match UdpSocket::bind(("0.0.0.0", args.port)) {
        Ok(socket) => socket,
        Err(e) => {
            eprintln!("error: cannot bind UDP port {}: {e}", args.port);
            return std::process::ExitCode::FAILURE;
        }
    };
    info!("listening on port {}", args.port);

    let mut mem = vec![0xFFu8; FLASH_SIZE];
    let flash = ImitationFlash::new(&mut mem, SECTOR_SIZE);
    serve(&socket, &flash, public_key);

    std::process::ExitCode::SUCCESS
}

fn public_key(arg: Option<&str>) -> Result<[u8; 32], String> {
    let Some(arg) = arg else {
        // Development default, the keypair of an all-zero seed.
        return Ok(*fwsign::Keypair::from_seed(&[0u8; 32]).public());
    };

    let bytes = hex::decode(arg).map_err(|e| format!("invalid public key hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|_| String::from("public key must be 32 bytes"))
}

fn serve(socket: &UdpSocket, flash: &ImitationFlash<'_>, public_key: [u8; 32]) {
    let area = FragmentArea::new(
        flash,
        MemoryConfig {
            base_address: 0,
            memory_size: AREA_SIZE,
            sector_size: SECTOR_SIZE,
            erase_value: 0xFF,
        },
        Ed25519Validator::new(public_key),
    )
    .expect("fragment area layout");
    let journal = CommandStore::new(
        flash,
        MemoryConfig {
            base_address: AREA_SIZE as u32,
            memory_size: JOURNAL_SIZE,
            sector_size: SECTOR_SIZE,
            erase_value: 0xFF,
        },
    )
    .expect("journal layout");

    let engine = UpdateEngine::new(
        EngineConfig {
            device: DeviceInfo {
                version: 55,
                fw_type: 1,
                name: String::from("Testserver tool"),
            },
            public_key,
            first_flash_address: FIRST_FLASH_ADDRESS,
            max_firmware_size: (KB * KB) as u32,
        },
        area,
        journal,
    );

    let mut reassembly = vec![0u8; TRANSFER_BUFFER_SIZE];
    let mut transfer = Transfer::new(UpdateServer::new(engine), &mut reassembly)
        .expect("transfer buffer");

    let mut packet = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut response = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (received, from) = match socket.recv_from(&mut packet) {
            Ok(received) => received,
            Err(e) => {
                error!("recvfrom failed: {e}");
                continue;
            }
        };
        debug!("{received} bytes from {from}");

        let len = transfer.process(&packet[..received], &mut response);
        if len > 0 {
            if let Err(e) = socket.send_to(&response[..len], from) {
                error!("sendto failed: {e}");
            }
        }

        let engine = transfer.server_mut().handlers_mut();
        if engine.reset_requested() {
            match engine.journal().read_install_command() {
                Ok((command, metadata)) => info!(
                    "reset requested, journaled command {command:?} for firmware {:#010x}",
                    metadata.firmware_id
                ),
                Err(e) => info!("reset requested, no readable command ({e})"),
            }
            engine.take_reset_request();
            info!("engine re-armed");
        }
    }
}
