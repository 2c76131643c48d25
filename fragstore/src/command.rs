// SPDX-FileCopyrightText: 2025 Mikael Penttinen
// SPDX-License-Identifier: MIT

//! Command journal: durable install/rollback intent and install progress.
//!
//! Three disjoint sub-areas share one flash region, each padded to whole
//! sectors: the install command record, the previous-firmware history
//! record, and an array of eight append-once state slots. Writing a new
//! install command erases the state area, which is what keeps "state =
//! steps completed for this command" true across power loss.

use crc::{Crc, CRC_32_ISO_HDLC};
use update_protocol::Metadata;

use crate::flash::{Flash, MemoryConfig};
use crate::Error;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const COMMAND_MAGIC_INSTALL: u32 = 0xA5A5;
const COMMAND_MAGIC_ROLLBACK: u32 = 0xD17D;

const MAGIC_HISTORY_WRITTEN: u32 = 0xA1A1_A1A1;
const MAGIC_FIRMWARE_WRITTEN: u32 = 0xB2B2_B2B2;
const MAGIC_FAILED: u32 = 0xEEEE_EEEE;

const STATE_SLOTS: usize = 8;

const INSTALL_RECORD_LEN: usize = 4 + Metadata::SIZE + 4;
const HISTORY_RECORD_LEN: usize = Metadata::SIZE + 4;
const STATE_LEN: usize = STATE_SLOTS * 4;

/// Update command recorded for the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Record present but the command word is erased.
    None,
    Install,
    Rollback,
    /// Record present with an unrecognized command word.
    Error,
}

impl Command {
    fn magic(self) -> Option<u32> {
        match self {
            Command::Install => Some(COMMAND_MAGIC_INSTALL),
            Command::Rollback => Some(COMMAND_MAGIC_ROLLBACK),
            Command::None | Command::Error => None,
        }
    }
}

/// Install step progress, ordered by precedence: a torn state write can
/// never demote the recorded progress below what was already set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstallStep {
    None,
    HistoryWritten,
    FirmwareWritten,
    Failed,
}

impl InstallStep {
    fn magic(self) -> Option<u32> {
        match self {
            InstallStep::None => None,
            InstallStep::HistoryWritten => Some(MAGIC_HISTORY_WRITTEN),
            InstallStep::FirmwareWritten => Some(MAGIC_FIRMWARE_WRITTEN),
            InstallStep::Failed => Some(MAGIC_FAILED),
        }
    }
}

pub struct CommandStore<'a, F: Flash> {
    flash: &'a F,
    config: MemoryConfig,
    command_address: u32,
    history_address: u32,
    state_address: u32,
    command_sectors: usize,
    history_sectors: usize,
    state_sectors: usize,
}

impl<'a, F: Flash> CommandStore<'a, F> {
    pub fn new(flash: &'a F, config: MemoryConfig) -> Result<Self, Error> {
        config.check()?;

        let command_sectors = config.required_sectors(INSTALL_RECORD_LEN);
        let history_sectors = config.required_sectors(HISTORY_RECORD_LEN);
        let state_sectors = config.required_sectors(STATE_LEN);

        let total = command_sectors + history_sectors + state_sectors;
        if config.total_sectors() < total {
            return Err(Error::Param);
        }

        let sector_size = config.sector_size as u32;
        let command_address = config.base_address;
        let history_address = command_address + command_sectors as u32 * sector_size;
        let state_address = history_address + history_sectors as u32 * sector_size;

        Ok(CommandStore {
            flash,
            config,
            command_address,
            history_address,
            state_address,
            command_sectors,
            history_sectors,
            state_sectors,
        })
    }

    /// Record a new command. The install record and the whole step state
    /// are erased first, so the state always describes this command.
    pub fn write_install_command(&self, cmd: Command, metadata: &Metadata) -> Result<(), Error> {
        let magic = cmd.magic().ok_or(Error::Param)?;

        self.erase_install_command()?;
        self.erase_region(self.state_address, self.state_sectors)?;

        let mut record = [0u8; INSTALL_RECORD_LEN];
        record[..4].copy_from_slice(&magic.to_le_bytes());
        record[4..4 + Metadata::SIZE].copy_from_slice(&metadata.encode());
        let crc = CRC32.checksum(&record[..INSTALL_RECORD_LEN - 4]);
        record[INSTALL_RECORD_LEN - 4..].copy_from_slice(&crc.to_le_bytes());

        self.flash
            .write(self.command_address, &record)
            .map_err(|_| Error::Busy)
    }

    pub fn read_install_command(&self) -> Result<(Command, Metadata), Error> {
        let mut record = [0u8; INSTALL_RECORD_LEN];
        self.flash
            .read(self.command_address, &mut record)
            .map_err(|_| Error::Busy)?;

        if self.config.is_erased(&record) {
            return Err(Error::Empty);
        }

        let crc = CRC32.checksum(&record[..INSTALL_RECORD_LEN - 4]);
        if record[INSTALL_RECORD_LEN - 4..] != crc.to_le_bytes() {
            return Err(Error::Invalid);
        }

        let command = if self.config.is_erased(&record[..4]) {
            Command::None
        } else {
            match u32::from_le_bytes(record[..4].try_into().expect("4 bytes")) {
                COMMAND_MAGIC_INSTALL => Command::Install,
                COMMAND_MAGIC_ROLLBACK => Command::Rollback,
                _ => Command::Error,
            }
        };

        let metadata =
            Metadata::decode(&record[4..4 + Metadata::SIZE]).map_err(|_| Error::Invalid)?;

        Ok((command, metadata))
    }

    pub fn erase_install_command(&self) -> Result<(), Error> {
        self.erase_region(self.command_address, self.command_sectors)
    }

    /// Record the previously installed firmware, erase-then-write.
    pub fn write_history(&self, metadata: &Metadata) -> Result<(), Error> {
        self.erase_region(self.history_address, self.history_sectors)?;

        let mut record = [0u8; HISTORY_RECORD_LEN];
        record[..Metadata::SIZE].copy_from_slice(&metadata.encode());
        let crc = CRC32.checksum(&record[..Metadata::SIZE]);
        record[Metadata::SIZE..].copy_from_slice(&crc.to_le_bytes());

        self.flash
            .write(self.history_address, &record)
            .map_err(|_| Error::Busy)
    }

    pub fn read_history(&self) -> Result<Metadata, Error> {
        let mut record = [0u8; HISTORY_RECORD_LEN];
        self.flash
            .read(self.history_address, &mut record)
            .map_err(|_| Error::Busy)?;

        if self.config.is_erased(&record) {
            return Err(Error::Empty);
        }

        let crc = CRC32.checksum(&record[..Metadata::SIZE]);
        if record[Metadata::SIZE..] != crc.to_le_bytes() {
            return Err(Error::Invalid);
        }

        Metadata::decode(&record[..Metadata::SIZE]).map_err(|_| Error::Invalid)
    }

    /// Effective install progress: the highest-precedence magic present in
    /// any state slot. Unknown slot values count as no progress.
    pub fn get_status(&self) -> Result<InstallStep, Error> {
        let slots = self.read_state()?;

        for step in [
            InstallStep::Failed,
            InstallStep::FirmwareWritten,
            InstallStep::HistoryWritten,
        ] {
            if slots.contains(&step.magic().expect("not None")) {
                return Ok(step);
            }
        }

        Ok(InstallStep::None)
    }

    /// Advance the install progress. Idempotent: a magic already present is
    /// not appended again. Fails when every slot is taken.
    pub fn set_status(&self, step: InstallStep) -> Result<(), Error> {
        let magic = step.magic().ok_or(Error::Param)?;
        self.append_state(magic)
    }

    /// Append-once slot for application-defined progress values. The
    /// reserved step magics and the erase pattern are refused.
    pub fn set_user_status(&self, value: u32) -> Result<(), Error> {
        if self.is_reserved(value) {
            return Err(Error::Param);
        }
        self.append_state(value)
    }

    /// Whether an application-defined progress value has been recorded.
    pub fn get_user_status(&self, value: u32) -> Result<bool, Error> {
        if self.is_reserved(value) {
            return Err(Error::Param);
        }
        Ok(self.read_state()?.contains(&value))
    }

    fn is_reserved(&self, value: u32) -> bool {
        value == MAGIC_HISTORY_WRITTEN
            || value == MAGIC_FIRMWARE_WRITTEN
            || value == MAGIC_FAILED
            || value.to_le_bytes().iter().all(|&b| b == self.config.erase_value)
    }

    fn read_state(&self) -> Result<[u32; STATE_SLOTS], Error> {
        let mut buf = [0u8; STATE_LEN];
        self.flash
            .read(self.state_address, &mut buf)
            .map_err(|_| Error::Busy)?;

        let mut slots = [0u32; STATE_SLOTS];
        for (slot, chunk) in slots.iter_mut().zip(buf.chunks_exact(4)) {
            *slot = u32::from_le_bytes(chunk.try_into().expect("4 bytes"));
        }
        Ok(slots)
    }

    fn append_state(&self, magic: u32) -> Result<(), Error> {
        let mut buf = [0u8; STATE_LEN];
        self.flash
            .read(self.state_address, &mut buf)
            .map_err(|_| Error::Busy)?;

        for (index, chunk) in buf.chunks_exact(4).enumerate() {
            if chunk == magic.to_le_bytes() {
                return Ok(());
            }
            if self.config.is_erased(chunk) {
                let address = self.state_address + index as u32 * 4;
                return self
                    .flash
                    .write(address, &magic.to_le_bytes())
                    .map_err(|_| Error::Busy);
            }
        }

        // Every slot taken; the caller has exhausted the state area.
        Err(Error::Invalid)
    }

    fn erase_region(&self, address: u32, sectors: usize) -> Result<(), Error> {
        self.flash
            .erase(address, sectors * self.config.sector_size)
            .map_err(|_| Error::Busy)
    }
}
