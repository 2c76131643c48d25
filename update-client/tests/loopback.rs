//! Client framing against a real UDP server on the loopback interface.

use std::net::UdpSocket;
use std::sync::mpsc;
use std::thread;

use update_client::{ClientError, UpdateClient};
use update_protocol::{
    Fragment, Metadata, Status, VerifyMethod, DATA_ID_FIRMWARE_NAME, DATA_ID_FIRMWARE_TYPE,
    DATA_ID_FIRMWARE_VERSION, MAX_DATAGRAM_SIZE,
};
use update_server::{Handlers, Transfer, UpdateServer};

/// Stub device: fixed identity reads, length-checking puts.
struct StubHandlers;

impl Handlers for StubHandlers {
    fn read_data_by_id(&mut self, id: u8, out: &mut [u8]) -> Result<usize, Status> {
        match id {
            DATA_ID_FIRMWARE_VERSION => {
                out[..4].copy_from_slice(&[0, 0, 0, 55]);
                Ok(4)
            }
            DATA_ID_FIRMWARE_TYPE => {
                out[..4].copy_from_slice(&[0, 0, 0, 1]);
                Ok(4)
            }
            DATA_ID_FIRMWARE_NAME => {
                let name = b"Testserver tool";
                out[..name.len()].copy_from_slice(name);
                Ok(name.len())
            }
            _ => Err(Status::NackOutOfRange),
        }
    }

    fn write_data_by_id(&mut self, _id: u8, _data: &[u8]) -> Result<(), Status> {
        Ok(())
    }

    fn put_metadata(&mut self, data: &[u8]) -> Result<(), Status> {
        // The reassembled request must carry exactly one record.
        if data.len() != Metadata::SIZE {
            return Err(Status::NackInvalidRequest);
        }
        Ok(())
    }

    fn put_fragment(&mut self, data: &[u8]) -> Result<(), Status> {
        if data.len() != Fragment::SIZE {
            return Err(Status::NackInvalidRequest);
        }
        Ok(())
    }
}

fn spawn_stub_server() -> u16 {
    let (port_tx, port_rx) = mpsc::channel();

    thread::spawn(move || {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind stub server");
        port_tx
            .send(socket.local_addr().expect("local addr").port())
            .expect("report port");

        let mut reassembly = vec![0u8; 5 * 1024];
        let mut transfer =
            Transfer::new(UpdateServer::new(StubHandlers), &mut reassembly).expect("transfer");

        let mut packet = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut response = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let Ok((received, from)) = socket.recv_from(&mut packet) else {
                return;
            };
            let len = transfer.process(&packet[..received], &mut response);
            if len > 0 {
                let _ = socket.send_to(&response[..len], from);
            }
        }
    });

    port_rx.recv().expect("stub server port")
}

fn sample_metadata() -> Metadata {
    Metadata {
        fw_type: 1,
        version: 2,
        rollback_number: 0,
        firmware_id: 3,
        start_address: 4,
        firmware_size: 5,
        name: [0u8; 32],
        firmware_signature: [0xAA; 64],
        metadata_signature: [0xBB; 64],
    }
}

#[test]
fn request_flows_over_loopback() {
    let port = spawn_stub_server();
    let client =
        UpdateClient::connect(0, format!("127.0.0.1:{port}").parse().unwrap()).unwrap();

    client.ping().expect("ping");

    let version = client.read_data_by_id(DATA_ID_FIRMWARE_VERSION).unwrap();
    assert_eq!(version, [0, 0, 0, 55]);

    let name = client.read_data_by_id(DATA_ID_FIRMWARE_NAME).unwrap();
    assert_eq!(name, b"Testserver tool");

    // 197-byte request, single packet.
    client.put_metadata(&sample_metadata()).expect("metadata");

    // 4101-byte request, reassembled from nine datagrams.
    let mut fragment = Fragment::zeroed(VerifyMethod::Ed25519);
    fragment.size = 1;
    client.put_fragment(&fragment).expect("fragment");

    client.write_data_by_id(0x13, &[0]).expect("write");

    // A NACK surfaces as an error carrying the SID and status byte.
    let err = client.read_data_by_id(0x7E).unwrap_err();
    match err {
        ClientError::Nack { sid, status } => {
            assert_eq!(sid, 0x02);
            assert_eq!(status, 0xE0);
        }
        other => panic!("unexpected error: {other}"),
    }
}
