//! error.rs — fatal boot conditions
//!
//! Every fallible step of the boot sequence returns `Result<T, BootError>`.
//! Nothing here is recoverable: the entry point reports the error and halts.
//! Recoverable situations (unknown memory types, missing network, odd pixel
//! formats) are handled where they occur and never become a `BootError`.

use core::fmt;

use uefi::Status;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootError {
    /// The info block buffer cannot hold the next record.
    BufferTooSmall { requested: usize, available: usize },

    /// `reinit` found no resumable block in the buffer.
    InvalidInfoBlock(&'static str),

    /// The image failed validation or is internally inconsistent.
    InvalidElf(&'static str),

    /// `app.elf` is not on the boot volume.
    ImageNotFound,

    /// Fixed-address page allocation for a LOAD segment failed.
    AllocateFixed { addr: u64, pages: usize, status: Status },

    /// `GetMemoryMap` failed for a reason other than a short buffer.
    MemoryMap(Status),

    /// The firmware reported a descriptor layout other than version 1.
    UnsupportedDescriptorVersion(u32),

    /// `ExitBootServices` rejected the map key.
    ExitBootServices(Status),
}

impl BootError {
    /// Status reported by the fatal handler.
    pub fn status(&self) -> Status {
        match self {
            BootError::BufferTooSmall { .. } => Status::BUFFER_TOO_SMALL,
            BootError::InvalidInfoBlock(_) => Status::INVALID_PARAMETER,
            BootError::InvalidElf(_) | BootError::ImageNotFound => Status::LOAD_ERROR,
            BootError::AllocateFixed { status, .. } => *status,
            BootError::MemoryMap(status) => *status,
            BootError::UnsupportedDescriptorVersion(_) => Status::INCOMPATIBLE_VERSION,
            BootError::ExitBootServices(status) => *status,
        }
    }

    /// Short description without the variant payload.
    pub fn message(&self) -> &'static str {
        match self {
            BootError::BufferTooSmall { .. } => "boot info buffer is too small",
            BootError::InvalidInfoBlock(_) => "no resumable boot info block",
            BootError::InvalidElf(_) => "app.elf failed validation",
            BootError::ImageNotFound => "cannot load app.elf",
            BootError::AllocateFixed { .. } => "cannot allocate pages for segment",
            BootError::MemoryMap(_) => "GetMemoryMap failed",
            BootError::UnsupportedDescriptorVersion(_) => {
                "only memory descriptor version 1 is supported"
            }
            BootError::ExitBootServices(_) => "ExitBootServices failed",
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())?;
        match self {
            BootError::BufferTooSmall {
                requested,
                available,
            } => write!(f, " ({} bytes requested, {} available)", requested, available),
            BootError::InvalidInfoBlock(detail) | BootError::InvalidElf(detail) => {
                write!(f, ": {}", detail)
            }
            BootError::AllocateFixed {
                addr,
                pages,
                status,
            } => write!(f, " ({} pages at {:#x}): {:?}", pages, addr, status),
            BootError::UnsupportedDescriptorVersion(version) => write!(f, " (got {})", version),
            BootError::MemoryMap(status) | BootError::ExitBootServices(status) => {
                write!(f, ": {:?}", status)
            }
            BootError::ImageNotFound => Ok(()),
        }
    }
}
