// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Fragment area: one metadata record plus a dense array of fragment slots.

use update_protocol::{Fragment, Metadata};

use crate::flash::{Flash, MemoryConfig};
use crate::Error;

/// Record validation installed into a [`FragmentArea`] at init.
pub trait Validator {
    fn validate_metadata(&self, metadata: &Metadata) -> bool;

    fn validate_fragment(&self, fragment: &Fragment) -> bool;
}

/// Outcome of a find-last-fragment search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindError {
    /// No slot holds a valid fragment.
    Empty,
    /// The slot at this index holds data that fails validation. The area
    /// must be treated as untrustworthy.
    Invalid(usize),
    Busy,
}

impl core::fmt::Display for FindError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FindError::Empty => write!(f, "no valid fragment in the area"),
            FindError::Invalid(index) => write!(f, "invalid fragment in slot {index}"),
            FindError::Busy => write!(f, "memory busy"),
        }
    }
}

enum SlotState {
    Empty,
    Invalid,
    Valid,
}

/// One firmware slot: metadata sectors followed by fragment slots.
pub struct FragmentArea<'a, F: Flash, V: Validator> {
    flash: &'a F,
    config: MemoryConfig,
    validator: V,
    metadata_sectors: usize,
    fragment_sectors: usize,
}

impl<'a, F: Flash, V: Validator> FragmentArea<'a, F, V> {
    pub fn new(flash: &'a F, config: MemoryConfig, validator: V) -> Result<Self, Error> {
        config.check()?;

        let metadata_sectors = config.required_sectors(Metadata::SIZE);
        let fragment_sectors = config.required_sectors(Fragment::SIZE);
        if config.total_sectors() < metadata_sectors + fragment_sectors {
            return Err(Error::Param);
        }

        Ok(FragmentArea {
            flash,
            config,
            validator,
            metadata_sectors,
            fragment_sectors,
        })
    }

    /// Highest usable fragment slot index.
    pub fn max_index(&self) -> usize {
        let fragment_sectors = self.config.total_sectors() - self.metadata_sectors;
        fragment_sectors / self.fragment_sectors - 1
    }

    pub fn memory_config(&self) -> &MemoryConfig {
        &self.config
    }

    fn fragment_address(&self, index: usize) -> u32 {
        let sector_index = self.metadata_sectors + index * self.fragment_sectors;
        self.config.base_address + (sector_index * self.config.sector_size) as u32
    }

    /// Erase the whole area, metadata and fragment slots alike.
    pub fn erase_area(&self) -> Result<(), Error> {
        self.flash
            .erase(self.config.base_address, self.config.memory_size)
            .map_err(|_| Error::Busy)
    }

    pub fn read_metadata(&self) -> Result<Metadata, Error> {
        let mut buf = [0u8; Metadata::SIZE];
        self.flash
            .read(self.config.base_address, &mut buf)
            .map_err(|_| Error::Busy)?;

        if self.config.is_erased(&buf) {
            return Err(Error::Empty);
        }

        let metadata = Metadata::decode(&buf).map_err(|_| Error::Invalid)?;
        if !self.validator.validate_metadata(&metadata) {
            return Err(Error::Invalid);
        }

        Ok(metadata)
    }

    /// Erases the metadata sectors, then writes the validated record.
    pub fn write_metadata(&self, metadata: &Metadata) -> Result<(), Error> {
        if !self.validator.validate_metadata(metadata) {
            return Err(Error::Invalid);
        }

        let erase_size = self.metadata_sectors * self.config.sector_size;
        self.flash
            .erase(self.config.base_address, erase_size)
            .map_err(|_| Error::Busy)?;
        self.flash
            .write(self.config.base_address, &metadata.encode())
            .map_err(|_| Error::Busy)
    }

    pub fn read_fragment(&self, index: usize) -> Result<Fragment, Error> {
        let mut buf = [0u8; Fragment::SIZE];
        self.read_raw_slot(index, &mut buf)?;

        if self.config.is_erased(&buf) {
            return Err(Error::Empty);
        }

        let fragment = Fragment::decode(&buf).map_err(|_| Error::Invalid)?;
        if !self.validator.validate_fragment(&fragment) {
            return Err(Error::Invalid);
        }

        Ok(fragment)
    }

    /// Diagnostic read that skips the validator. Content that does not even
    /// decode as a fragment record still reports `Invalid`.
    pub fn read_fragment_force(&self, index: usize) -> Result<Fragment, Error> {
        let mut buf = [0u8; Fragment::SIZE];
        self.read_raw_slot(index, &mut buf)?;

        if self.config.is_erased(&buf) {
            return Err(Error::Empty);
        }

        Fragment::decode(&buf).map_err(|_| Error::Invalid)
    }

    /// Write a validated fragment into an empty slot. The slot is NOT
    /// erased first; a non-empty slot must be erased by the caller.
    pub fn write_fragment(&self, index: usize, fragment: &Fragment) -> Result<(), Error> {
        let address = self.slot_address_checked(index)?;

        if !self.validator.validate_fragment(fragment) {
            return Err(Error::Invalid);
        }

        self.flash
            .write(address, &fragment.encode())
            .map_err(|_| Error::Busy)
    }

    pub fn erase_slot(&self, index: usize) -> Result<(), Error> {
        let address = self.slot_address_checked(index)?;
        let erase_size = self.fragment_sectors * self.config.sector_size;
        self.flash.erase(address, erase_size).map_err(|_| Error::Busy)
    }

    /// Find the last valid fragment with a binary search over the slots.
    ///
    /// Sound only under the monotonicity invariant: valid slots form a
    /// contiguous prefix, everything after is erased. An invalid slot stops
    /// the search and is reported with its index.
    pub fn find_last_valid(&self) -> Result<usize, FindError> {
        let mut left = 0usize;
        let mut right = self.max_index();
        let mut last_valid = None;

        while left <= right {
            let middle = left + (right - left) / 2;

            match self.classify_slot(middle)? {
                SlotState::Empty => {
                    if middle == 0 {
                        // First possible index.
                        return Err(FindError::Empty);
                    }
                    right = middle - 1;
                }
                SlotState::Invalid => return Err(FindError::Invalid(middle)),
                SlotState::Valid => {
                    last_valid = Some(middle);
                    if middle == usize::MAX {
                        break;
                    }
                    left = middle + 1;
                }
            }
        }

        last_valid.ok_or(FindError::Empty)
    }

    /// Linear-scan fallback with semantics identical to
    /// [`find_last_valid`](Self::find_last_valid).
    pub fn find_last_valid_linear(&self) -> Result<usize, FindError> {
        let mut last_valid = None;

        for index in 0..=self.max_index() {
            match self.classify_slot(index)? {
                SlotState::Empty => break,
                SlotState::Invalid => return Err(FindError::Invalid(index)),
                SlotState::Valid => last_valid = Some(index),
            }
        }

        last_valid.ok_or(FindError::Empty)
    }

    fn slot_address_checked(&self, index: usize) -> Result<u32, Error> {
        if index > self.max_index() {
            return Err(Error::Param);
        }
        let address = self.fragment_address(index);
        if !self.config.contains(address, Fragment::SIZE) {
            return Err(Error::Param);
        }
        Ok(address)
    }

    fn read_raw_slot(&self, index: usize, buf: &mut [u8; Fragment::SIZE]) -> Result<(), Error> {
        let address = self.slot_address_checked(index)?;
        self.flash.read(address, buf).map_err(|_| Error::Busy)
    }

    fn classify_slot(&self, index: usize) -> Result<SlotState, FindError> {
        let mut buf = [0u8; Fragment::SIZE];
        self.read_raw_slot(index, &mut buf).map_err(|e| match e {
            Error::Busy => FindError::Busy,
            _ => FindError::Invalid(index),
        })?;

        if self.config.is_erased(&buf) {
            return Ok(SlotState::Empty);
        }

        let valid = match Fragment::decode(&buf) {
            Ok(fragment) => self.validator.validate_fragment(&fragment),
            Err(_) => false,
        };

        Ok(if valid {
            SlotState::Valid
        } else {
            SlotState::Invalid
        })
    }
}
