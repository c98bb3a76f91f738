//! firmware.rs — capabilities the loader core needs from the platform
//!
//! Each trait covers one firmware service. The UEFI implementations live in
//! `platform`; tests substitute in-memory fakes.

use alloc::vec::Vec;

use uefi::Status;
use uniboot::Framebuffer;

use crate::netboot::NetbootTransport;

/// Physical memory at fixed addresses.
pub trait PhysicalMemory {
    /// Claim `pages` 4 KiB pages starting at `addr`.
    fn allocate_fixed(&self, addr: u64, pages: usize) -> Result<(), Status>;

    /// Copy `bytes` to physical address `addr`.
    ///
    /// # Safety
    /// `addr..addr + bytes.len()` must lie in pages claimed through
    /// `allocate_fixed` and must not overlap `bytes`.
    unsafe fn copy_raw(&self, addr: u64, bytes: &[u8]);

    /// Zero `len` bytes at physical address `addr`.
    ///
    /// # Safety
    /// Same ownership requirement as [`PhysicalMemory::copy_raw`].
    unsafe fn zero_raw(&self, addr: u64, len: usize);
}

/// Result of a successful `GetMemoryMap` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorTable {
    /// Bytes of the buffer filled with descriptors.
    pub size: usize,
    pub key: usize,
    pub descriptor_size: usize,
    pub descriptor_version: u32,
}

/// A failed `GetMemoryMap` call. `required` is meaningful for
/// `BUFFER_TOO_SMALL`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapQueryError {
    pub status: Status,
    pub required: usize,
}

/// Memory descriptor enumeration and the one-way exit from boot services.
pub trait MemoryMapFirmware: Sized {
    fn get_memory_map(&self, buf: &mut [u8]) -> Result<DescriptorTable, MapQueryError>;

    /// Leave boot services. Consumes the capability: nothing that needs boot
    /// services can run afterwards.
    fn exit_boot_services(self, key: usize) -> Result<(), Status>;
}

/// Task priority level control.
pub trait ExecutionPriority {
    /// Raise to the callback level and return the previous level.
    fn raise(&self) -> usize;

    fn restore(&self, previous: usize);
}

/// Raised-priority region; the previous level comes back on drop.
pub struct PriorityWindow<'a, P: ExecutionPriority + ?Sized> {
    priority: &'a P,
    previous: usize,
}

impl<'a, P: ExecutionPriority + ?Sized> PriorityWindow<'a, P> {
    pub fn open(priority: &'a P) -> Self {
        let previous = priority.raise();
        Self { priority, previous }
    }
}

impl<P: ExecutionPriority + ?Sized> Drop for PriorityWindow<'_, P> {
    fn drop(&mut self) {
        self.priority.restore(self.previous);
    }
}

/// Everything the boot sequence asks of the firmware before the memory map
/// is taken.
pub trait Platform: PhysicalMemory + MemoryMapFirmware + ExecutionPriority {
    type Netboot<'a>: NetbootTransport
    where
        Self: 'a;

    /// Read a whole file from the volume the loader was started from.
    fn read_file(&self, name: &str) -> Option<Vec<u8>>;

    /// Bring up the network interface; `None` when there is none.
    fn open_netboot(&self, nodename: Option<&str>) -> Option<Self::Netboot<'_>>;

    fn acpi_root(&self) -> Option<u64>;

    fn framebuffer(&self) -> Option<Framebuffer>;
}
