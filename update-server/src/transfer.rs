// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Multi-packet transfer layer over a lossy datagram transport.
//!
//! Datagram byte 0 is the transfer code. A SINGLE packet carries one whole
//! logical request; a MULTI_INIT/MULTI_DATA/MULTI_END sequence reassembles
//! a larger request into the borrowed buffer before dispatch. Responses
//! are always single-packet.

use update_protocol::{
    Status, TRANSFER_MULTI_PACKET_DATA, TRANSFER_MULTI_PACKET_END, TRANSFER_MULTI_PACKET_INIT,
    TRANSFER_SINGLE_PACKET,
};

use crate::server::{Handlers, UpdateServer};
use crate::TransferError;

/// Smallest response buffer `process` will encode into: the transfer code
/// plus a service response with a little room for data.
const MINIMUM_RESPONSE_BUFFER: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Rx,
}

pub struct Transfer<'b, H: Handlers> {
    server: UpdateServer<H>,
    buf: &'b mut [u8],
    msg_size: usize,
    transfer_size: usize,
    state: State,
}

impl<'b, H: Handlers> Transfer<'b, H> {
    pub fn new(server: UpdateServer<H>, buf: &'b mut [u8]) -> Result<Self, TransferError> {
        if buf.len() < 2 {
            return Err(TransferError::BufferTooSmall);
        }
        Ok(Transfer {
            server,
            buf,
            msg_size: 0,
            transfer_size: 0,
            state: State::Idle,
        })
    }

    pub fn server(&self) -> &UpdateServer<H> {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut UpdateServer<H> {
        &mut self.server
    }

    /// Process one incoming datagram, encoding the response into
    /// `response`. Returns the number of response bytes; 0 means no
    /// response is sent (empty packet, unknown transfer code, or a packet
    /// that cannot fit the reassembly buffer).
    pub fn process(&mut self, packet: &[u8], response: &mut [u8]) -> usize {
        if packet.is_empty()
            || packet.len() > self.buf.len()
            || response.len() < MINIMUM_RESPONSE_BUFFER
        {
            return 0;
        }

        match packet[0] {
            TRANSFER_SINGLE_PACKET => self.handle_single(packet, response),
            TRANSFER_MULTI_PACKET_INIT => self.handle_init(packet, response),
            TRANSFER_MULTI_PACKET_DATA => self.handle_data(packet, response),
            TRANSFER_MULTI_PACKET_END => self.handle_end(packet, response),
            _ => 0,
        }
    }

    fn handle_single(&mut self, packet: &[u8], response: &mut [u8]) -> usize {
        // A SINGLE packet abandons any reassembly in progress.
        self.state = State::Idle;
        self.msg_size = 0;
        self.transfer_size = 0;

        if packet.len() < 2 {
            return transfer_response(Status::NackInvalidRequest, response);
        }

        self.dispatch_to(&packet[1..], response)
    }

    fn handle_init(&mut self, packet: &[u8], response: &mut [u8]) -> usize {
        if packet.len() != 5 {
            return transfer_response(Status::NackInvalidRequest, response);
        }

        let transfer_size =
            u32::from_be_bytes(packet[1..5].try_into().expect("4 bytes")) as usize;
        if transfer_size == 0 || transfer_size > self.buf.len() {
            return transfer_response(Status::NackOutOfRange, response);
        }

        self.state = State::Rx;
        self.msg_size = 0;
        self.transfer_size = transfer_size;

        transfer_response(Status::AckOk, response)
    }

    fn handle_data(&mut self, packet: &[u8], response: &mut [u8]) -> usize {
        // Wrong transfer order.
        if self.state != State::Rx {
            return transfer_response(Status::NackRequestFailed, response);
        }

        let data = &packet[1..];
        if data.is_empty() {
            return transfer_response(Status::NackInvalidRequest, response);
        }

        // Too large for the reassembly buffer.
        if data.len() > self.buf.len() - self.msg_size {
            return transfer_response(Status::NackOutOfRange, response);
        }

        // Larger than the initialized transfer.
        if self.msg_size + data.len() > self.transfer_size {
            return transfer_response(Status::NackInvalidRequest, response);
        }

        self.buf[self.msg_size..self.msg_size + data.len()].copy_from_slice(data);
        self.msg_size += data.len();

        transfer_response(Status::AckOk, response)
    }

    fn handle_end(&mut self, packet: &[u8], response: &mut [u8]) -> usize {
        // END carries exactly the control byte.
        if packet.len() != 1 {
            return transfer_response(Status::NackInvalidRequest, response);
        }

        if self.state != State::Rx {
            return transfer_response(Status::NackRequestFailed, response);
        }

        if self.msg_size != self.transfer_size {
            return transfer_response(Status::NackOutOfRange, response);
        }

        self.state = State::Idle;
        let msg_size = self.msg_size;

        let (request, server) = (&self.buf[..msg_size], &mut self.server);
        let response_len = {
            response[0] = TRANSFER_SINGLE_PACKET;
            server.process_request(request, &mut response[1..])
        };
        if response_len == 0 {
            return 0;
        }
        1 + response_len
    }

    fn dispatch_to(&mut self, request: &[u8], response: &mut [u8]) -> usize {
        response[0] = TRANSFER_SINGLE_PACKET;
        let response_len = self.server.process_request(request, &mut response[1..]);
        if response_len == 0 {
            return 0;
        }
        1 + response_len
    }
}

/// Encode a transfer-layer response: SINGLE framing, SID 0, status code.
fn transfer_response(status: Status, response: &mut [u8]) -> usize {
    response[0] = TRANSFER_SINGLE_PACKET;
    response[1] = 0x00;
    response[2] = status.into();
    3
}
