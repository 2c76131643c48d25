//! UDP transport and request framing.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use log::debug;
use update_protocol::{
    Fragment, Metadata, Status, MAX_DATAGRAM_SIZE, MAX_REQUEST_PAYLOAD, SID_PING,
    SID_PUT_FRAGMENT, SID_PUT_METADATA, SID_READ_DATA_BY_ID, SID_WRITE_DATA_BY_ID,
    TRANSFER_MULTI_PACKET_DATA, TRANSFER_MULTI_PACKET_END, TRANSFER_MULTI_PACKET_INIT,
    TRANSFER_SINGLE_PACKET,
};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    /// The service answered with a NACK status.
    Nack { sid: u8, status: u8 },
    /// A response too short to carry a status byte.
    ShortResponse(usize),
    /// The transfer layer refused a framing packet.
    TransferNack(u8),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "socket error: {e}"),
            ClientError::Nack { sid, status } => {
                write!(f, "service {sid:#04x} answered NACK {status:#04x}")
            }
            ClientError::ShortResponse(len) => {
                write!(f, "response too short ({len} bytes)")
            }
            ClientError::TransferNack(status) => {
                write!(f, "transfer layer answered NACK {status:#04x}")
            }
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}

pub struct UpdateClient {
    socket: UdpSocket,
}

impl UpdateClient {
    /// Bind a local port (0 for any) and address the remote server.
    pub fn connect(local_port: u16, remote: SocketAddr) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))?;
        socket.set_read_timeout(Some(RESPONSE_TIMEOUT))?;
        socket.connect(remote)?;
        Ok(UpdateClient { socket })
    }

    pub fn ping(&self) -> Result<(), ClientError> {
        self.expect_ack(&[SID_PING]).map(|_| ())
    }

    pub fn read_data_by_id(&self, id: u8) -> Result<Vec<u8>, ClientError> {
        self.expect_ack(&[SID_READ_DATA_BY_ID, id])
    }

    pub fn write_data_by_id(&self, id: u8, data: &[u8]) -> Result<(), ClientError> {
        let mut request = vec![SID_WRITE_DATA_BY_ID, id];
        request.extend_from_slice(data);
        self.expect_ack(&request).map(|_| ())
    }

    pub fn put_metadata(&self, metadata: &Metadata) -> Result<(), ClientError> {
        let mut request = vec![SID_PUT_METADATA];
        request.extend_from_slice(&metadata.encode());
        self.expect_ack(&request).map(|_| ())
    }

    pub fn put_fragment(&self, fragment: &Fragment) -> Result<(), ClientError> {
        let mut request = vec![SID_PUT_FRAGMENT];
        request.extend_from_slice(&fragment.encode());
        self.expect_ack(&request).map(|_| ())
    }

    /// Issue one logical request and peel the service response down to the
    /// data bytes, turning any NACK into an error.
    fn expect_ack(&self, request: &[u8]) -> Result<Vec<u8>, ClientError> {
        let response = self.request(request)?;
        if response.len() < 2 {
            return Err(ClientError::ShortResponse(response.len()));
        }
        if response[1] != Status::AckOk.into() {
            return Err(ClientError::Nack {
                sid: response[0],
                status: response[1],
            });
        }
        Ok(response[2..].to_vec())
    }

    /// Frame one logical request: SINGLE when it fits a datagram,
    /// MULTI_INIT/DATA/END otherwise. Returns the service response with
    /// the transfer byte stripped.
    fn request(&self, request: &[u8]) -> Result<Vec<u8>, ClientError> {
        let response = if request.len() <= MAX_REQUEST_PAYLOAD {
            let mut packet = Vec::with_capacity(request.len() + 1);
            packet.push(TRANSFER_SINGLE_PACKET);
            packet.extend_from_slice(request);
            self.send_recv(&packet)?
        } else {
            debug!(
                "multi-packet transfer of {} bytes in {} chunks",
                request.len(),
                request.len().div_ceil(MAX_REQUEST_PAYLOAD)
            );

            let mut init = vec![TRANSFER_MULTI_PACKET_INIT];
            init.extend_from_slice(&(request.len() as u32).to_be_bytes());
            check_transfer_ack(&self.send_recv(&init)?)?;

            for chunk in request.chunks(MAX_REQUEST_PAYLOAD) {
                let mut packet = Vec::with_capacity(chunk.len() + 1);
                packet.push(TRANSFER_MULTI_PACKET_DATA);
                packet.extend_from_slice(chunk);
                check_transfer_ack(&self.send_recv(&packet)?)?;
            }

            self.send_recv(&[TRANSFER_MULTI_PACKET_END])?
        };

        if response.len() < 2 {
            return Err(ClientError::ShortResponse(response.len()));
        }

        // Strip the transfer control byte.
        Ok(response[1..].to_vec())
    }

    fn send_recv(&self, packet: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.socket.send(packet)?;

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let received = self.socket.recv(&mut buf)?;
        buf.truncate(received);
        Ok(buf)
    }
}

fn check_transfer_ack(response: &[u8]) -> Result<(), ClientError> {
    if response.len() != 3 || response[0] != TRANSFER_SINGLE_PACKET || response[1] != 0x00 {
        return Err(ClientError::ShortResponse(response.len()));
    }
    if response[2] != Status::AckOk.into() {
        return Err(ClientError::TransferNack(response[2]));
    }
    Ok(())
}
