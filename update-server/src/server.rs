// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Service router: dispatches one logical request by its SID byte.

use update_protocol::{
    Status, SID_PING, SID_PUT_FRAGMENT, SID_PUT_METADATA, SID_READ_DATA_BY_ID,
    SID_WRITE_DATA_BY_ID,
};

const MINIMUM_RESPONSE_LENGTH: usize = 2;

/// The four services a device must provide.
///
/// Handlers are pure functions of their input plus device state; the
/// router is generic over the implementation, so a server cannot be
/// constructed with a service missing.
pub trait Handlers {
    /// Read the data behind a well-known identifier into `out`, returning
    /// the number of bytes produced.
    fn read_data_by_id(&mut self, id: u8, out: &mut [u8]) -> Result<usize, Status>;

    /// Write the data behind a well-known identifier.
    fn write_data_by_id(&mut self, id: u8, data: &[u8]) -> Result<(), Status>;

    /// Accept an uploaded metadata record.
    fn put_metadata(&mut self, data: &[u8]) -> Result<(), Status>;

    /// Accept an uploaded fragment record.
    fn put_fragment(&mut self, data: &[u8]) -> Result<(), Status>;
}

pub struct UpdateServer<H: Handlers> {
    handlers: H,
}

impl<H: Handlers> UpdateServer<H> {
    pub fn new(handlers: H) -> Self {
        UpdateServer { handlers }
    }

    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut H {
        &mut self.handlers
    }

    /// Process one logical request, encoding the response into `response`.
    ///
    /// Returns the number of response bytes, or 0 when no response can be
    /// encoded (empty request or a response buffer below two bytes).
    /// Response byte 0 is the request SID, byte 1 the status.
    pub fn process_request(&mut self, request: &[u8], response: &mut [u8]) -> usize {
        if request.is_empty() || response.len() < MINIMUM_RESPONSE_LENGTH {
            return 0;
        }

        let sid = request[0];
        match sid {
            SID_PING => self.handle_ping(request, response),
            SID_READ_DATA_BY_ID => self.handle_read_data_by_id(request, response),
            SID_WRITE_DATA_BY_ID => self.handle_write_data_by_id(request, response),
            SID_PUT_METADATA => self.handle_put_metadata(request, response),
            SID_PUT_FRAGMENT => self.handle_put_fragment(request, response),
            _ => basic_response(sid, Status::NackOutOfRange, response),
        }
    }

    fn handle_ping(&mut self, request: &[u8], response: &mut [u8]) -> usize {
        if request.len() != 1 {
            return basic_response(request[0], Status::NackInvalidRequest, response);
        }
        basic_response(request[0], Status::AckOk, response)
    }

    fn handle_read_data_by_id(&mut self, request: &[u8], response: &mut [u8]) -> usize {
        let sid = request[0];
        if request.len() != 2 {
            return basic_response(sid, Status::NackInvalidRequest, response);
        }
        if response.len() <= MINIMUM_RESPONSE_LENGTH {
            // No space for any actual data.
            return basic_response(sid, Status::NackInternalError, response);
        }

        let id = request[1];
        let (header, out) = response.split_at_mut(MINIMUM_RESPONSE_LENGTH);

        match self.handlers.read_data_by_id(id, out) {
            Ok(read_len) => {
                let read_len = read_len.min(out.len());
                header[0] = sid;
                header[1] = Status::AckOk.into();
                MINIMUM_RESPONSE_LENGTH + read_len
            }
            Err(status) => basic_response(sid, status, response),
        }
    }

    fn handle_write_data_by_id(&mut self, request: &[u8], response: &mut [u8]) -> usize {
        let sid = request[0];
        if request.len() < 3 {
            // Request must have sid + id + data.
            return basic_response(sid, Status::NackInvalidRequest, response);
        }

        let status = match self.handlers.write_data_by_id(request[1], &request[2..]) {
            Ok(()) => Status::AckOk,
            Err(status) => status,
        };
        basic_response(sid, status, response)
    }

    fn handle_put_metadata(&mut self, request: &[u8], response: &mut [u8]) -> usize {
        let sid = request[0];
        if request.len() < 2 {
            // Request must have sid + data.
            return basic_response(sid, Status::NackInvalidRequest, response);
        }

        let status = match self.handlers.put_metadata(&request[1..]) {
            Ok(()) => Status::AckOk,
            Err(status) => status,
        };
        basic_response(sid, status, response)
    }

    fn handle_put_fragment(&mut self, request: &[u8], response: &mut [u8]) -> usize {
        let sid = request[0];
        if request.len() < 2 {
            return basic_response(sid, Status::NackInvalidRequest, response);
        }

        let status = match self.handlers.put_fragment(&request[1..]) {
            Ok(()) => Status::AckOk,
            Err(status) => status,
        };
        basic_response(sid, status, response)
    }
}

fn basic_response(sid: u8, status: Status, response: &mut [u8]) -> usize {
    response[0] = sid;
    response[1] = status.into();
    MINIMUM_RESPONSE_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;
    use update_protocol::{
        DATA_ID_FIRMWARE_TYPE, DATA_ID_FIRMWARE_UPDATE, DATA_ID_FIRMWARE_VERSION,
    };

    /// Mock device: version reads back fixed bytes, the type ID is
    /// permanently busy, writes and puts record their input and answer
    /// with a configurable status.
    struct MockHandlers {
        write_data: Vec<u8>,
        result: Result<(), Status>,
    }

    impl MockHandlers {
        fn new() -> Self {
            MockHandlers {
                write_data: Vec::new(),
                result: Ok(()),
            }
        }
    }

    impl Handlers for MockHandlers {
        fn read_data_by_id(&mut self, id: u8, out: &mut [u8]) -> Result<usize, Status> {
            match id {
                DATA_ID_FIRMWARE_VERSION => {
                    if out.len() < 4 {
                        return Err(Status::NackInvalidRequest);
                    }
                    out[..4].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
                    Ok(4)
                }
                DATA_ID_FIRMWARE_TYPE => Err(Status::NackBusyRepeatRequest),
                _ => Err(Status::NackOutOfRange),
            }
        }

        fn write_data_by_id(&mut self, id: u8, data: &[u8]) -> Result<(), Status> {
            if id != DATA_ID_FIRMWARE_UPDATE {
                return Err(Status::NackOutOfRange);
            }
            self.write_data = data.to_vec();
            self.result
        }

        fn put_metadata(&mut self, data: &[u8]) -> Result<(), Status> {
            self.write_data = data.to_vec();
            self.result
        }

        fn put_fragment(&mut self, data: &[u8]) -> Result<(), Status> {
            self.write_data = data.to_vec();
            self.result
        }
    }

    fn server() -> UpdateServer<MockHandlers> {
        UpdateServer::new(MockHandlers::new())
    }

    #[test]
    fn degenerate_buffers_produce_no_response() {
        let mut server = server();
        let mut response = [0u8; 2];

        assert_eq!(server.process_request(&[], &mut response), 0);
        assert_eq!(server.process_request(&[0x00], &mut []), 0);
        assert_eq!(server.process_request(&[0x00], &mut response[..1]), 0);
    }

    #[test]
    fn unknown_sid_is_out_of_range() {
        let mut server = server();
        let mut response = [0u8; 2];

        let len = server.process_request(&[0x00], &mut response);
        assert_eq!(len, 2);
        assert_eq!(response, [0x00, 0xE0]);
    }

    #[test]
    fn ping() {
        let mut server = server();
        let mut response = [0u8; 2];

        let len = server.process_request(&[SID_PING], &mut response);
        assert_eq!(len, 2);
        assert_eq!(response, [SID_PING, 0x00]);

        // Anything but an empty body is rejected.
        let len = server.process_request(&[SID_PING, 0x20], &mut response);
        assert_eq!(len, 2);
        assert_eq!(response, [SID_PING, 0xE1]);
    }

    #[test]
    fn read_data_by_id_length_rules() {
        let mut server = server();
        let mut response = [0u8; 128];

        for request in [
            &[SID_READ_DATA_BY_ID][..],
            &[SID_READ_DATA_BY_ID, DATA_ID_FIRMWARE_VERSION, 0x00][..],
        ] {
            let len = server.process_request(request, &mut response);
            assert_eq!(len, 2);
            assert_eq!(response[..2], [SID_READ_DATA_BY_ID, 0xE1]);
        }
    }

    #[test]
    fn read_data_by_id_forwards_handler_status() {
        let mut server = server();
        let mut response = [0u8; 128];

        let len = server.process_request(&[SID_READ_DATA_BY_ID, 0x00], &mut response);
        assert_eq!((len, response[1]), (2, 0xE0));

        let len =
            server.process_request(&[SID_READ_DATA_BY_ID, DATA_ID_FIRMWARE_TYPE], &mut response);
        assert_eq!((len, response[1]), (2, 0xE2));
    }

    #[test]
    fn read_data_by_id_ok_appends_data() {
        let mut server = server();
        let mut response = [0u8; 128];

        let len = server.process_request(
            &[SID_READ_DATA_BY_ID, DATA_ID_FIRMWARE_VERSION],
            &mut response,
        );
        assert_eq!(len, 6);
        assert_eq!(
            response[..6],
            [SID_READ_DATA_BY_ID, 0x00, 0x11, 0x22, 0x33, 0x44]
        );
    }

    #[test]
    fn read_data_by_id_without_data_space_is_internal_error() {
        let mut server = server();
        let mut response = [0u8; 2];

        let len = server.process_request(
            &[SID_READ_DATA_BY_ID, DATA_ID_FIRMWARE_VERSION],
            &mut response,
        );
        assert_eq!(len, 2);
        assert_eq!(response, [SID_READ_DATA_BY_ID, 0xE4]);
    }

    #[test]
    fn write_data_by_id() {
        let mut server = server();
        let mut response = [0u8; 128];

        // Needs sid + id + at least one data byte.
        let len = server.process_request(&[SID_WRITE_DATA_BY_ID, 0x00], &mut response);
        assert_eq!((len, response[1]), (2, 0xE1));

        let len = server.process_request(&[SID_WRITE_DATA_BY_ID, 0x00, 0x11], &mut response);
        assert_eq!((len, response[1]), (2, 0xE0));

        let len = server.process_request(
            &[SID_WRITE_DATA_BY_ID, DATA_ID_FIRMWARE_UPDATE, 0xAA, 0xBB, 0xCC],
            &mut response,
        );
        assert_eq!(len, 2);
        assert_eq!(response[..2], [SID_WRITE_DATA_BY_ID, 0x00]);
        assert_eq!(server.handlers().write_data, [0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn put_metadata_and_fragment() {
        for sid in [SID_PUT_METADATA, SID_PUT_FRAGMENT] {
            let mut server = server();
            let mut response = [0u8; 128];

            let len = server.process_request(&[sid], &mut response);
            assert_eq!((len, response[1]), (2, 0xE1));

            let len = server.process_request(&[sid, 0xAA, 0xBB, 0xCC], &mut response);
            assert_eq!(len, 2);
            assert_eq!(response[..2], [sid, 0x00]);
            assert_eq!(server.handlers().write_data, [0xAA, 0xBB, 0xCC]);

            server.handlers_mut().result = Err(Status::NackRequestFailed);
            let len = server.process_request(&[sid, 0xAA], &mut response);
            assert_eq!((len, response[1]), (2, 0xE3));
        }
    }

    #[test]
    fn responses_echo_the_request_sid() {
        let mut server = server();
        let mut response = [0u8; 128];

        for request in [
            vec![SID_PING],
            vec![SID_READ_DATA_BY_ID, DATA_ID_FIRMWARE_VERSION],
            vec![SID_WRITE_DATA_BY_ID, DATA_ID_FIRMWARE_UPDATE, 0x01],
            vec![SID_PUT_METADATA, 0x01],
            vec![SID_PUT_FRAGMENT, 0x01],
            vec![0x7F],
        ] {
            let len = server.process_request(&request, &mut response);
            assert!(len >= 2);
            assert_eq!(response[0], request[0]);
        }
    }
}
