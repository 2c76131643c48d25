//! Host-side update client: frames logical requests over UDP and drives
//! the upload, rollback, erase and version flows against a device running
//! the update server.

mod client;
mod upload;

pub use client::{ClientError, UpdateClient};
pub use upload::{load_firmware_image, FirmwareImage, UploadError};
