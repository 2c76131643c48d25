// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Request/transfer protocol engine of the update server.
//!
//! [`UpdateServer`] routes one reassembled logical request to a service
//! handler by its SID byte. [`Transfer`] frames logical requests over a
//! datagram transport that caps the payload size, reassembling
//! multi-packet requests into a borrowed buffer. Responses are always
//! single-packet.

#![no_std]

#[cfg(test)]
extern crate std;

mod server;
mod transfer;

pub use server::{Handlers, UpdateServer};
pub use transfer::Transfer;

/// Transfer layer construction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// The reassembly buffer cannot hold even a minimal request.
    BufferTooSmall,
}

impl core::fmt::Display for TransferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransferError::BufferTooSmall => write!(f, "reassembly buffer too small"),
        }
    }
}
