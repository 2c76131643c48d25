// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Fragment store and command journal over NOR-semantic flash.
//!
//! A flash region is mapped to one metadata record followed by a dense
//! array of equal-size fragment slots. A correctly completed upload leaves
//! the slots as a contiguous valid prefix followed by erased slots, which
//! lets [`FragmentArea::find_last_valid`] locate the last fragment with a
//! binary search even after a torn write.
//!
//! The [`CommandStore`] journal records install and rollback intent plus
//! install step progress in three disjoint sub-areas, using append-once
//! erase-value-encoded state slots so a crash at any point is resumable.

#![no_std]

#[cfg(test)]
extern crate std;

mod command;
mod flash;
mod imitation;
mod store;

pub use command::{Command, CommandStore, InstallStep};
pub use flash::{Flash, FlashError, MemoryConfig};
pub use imitation::ImitationFlash;
pub use store::{FindError, FragmentArea, Validator};

/// Domain result of a store or journal operation.
///
/// `Busy` is recoverable by retrying. `Invalid` signals tampering or a torn
/// write; the caller decides between quarantine and erase. `Param` is a
/// programmer error and is never recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Busy,
    Empty,
    Invalid,
    Param,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Busy => write!(f, "memory busy"),
            Error::Empty => write!(f, "record is erased"),
            Error::Invalid => write!(f, "record failed validation"),
            Error::Param => write!(f, "invalid parameter"),
        }
    }
}

impl From<FlashError> for Error {
    fn from(e: FlashError) -> Self {
        match e {
            FlashError::Busy => Error::Busy,
            FlashError::OutOfBounds | FlashError::Unaligned => Error::Param,
        }
    }
}
