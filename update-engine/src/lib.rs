// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Device application layer of the update server.
//!
//! [`UpdateEngine`] implements the four protocol services over a fragment
//! store and a command journal: it answers the well-known data IDs, holds
//! uploaded metadata and fragments in a pending buffer, and on the commit
//! request verifies the complete image against the metadata signature
//! before anything durable happens. A verified commit writes the image to
//! the fragment store, records the install command in the journal and
//! requests a reset so the bootloader can consume it.

mod engine;
mod pending;

pub use engine::{DeviceInfo, EngineConfig, UpdateEngine};
