//! memory_map.rs — firmware memory map → portable MemoryMap entry
//!
//! This is the last thing the loader asks of the firmware: the map key it
//! reads is handed straight to `ExitBootServices`, so no allocation may happen
//! in between. The descriptor table is therefore fetched into the arena's own
//! unreserved tail, right behind the space kept for the entry and list
//! headers, and translated in place. A 24-byte area never outgrows the
//! descriptor it replaces, so area `i` is written at or before descriptor `i`.
//!
//! Layout inside the arena during collection:
//!
//! ```text
//!   cursor
//!   | EntryHeader | ListHeader | desc 0 | desc 1 | ... | desc n-1 |
//!                              | area 0 | area 1 | ...            (after)
//! ```

use core::mem::size_of;

use log::{info, warn};
use r_efi::efi;
use uefi::Status;
use uniboot::{EntryHeader, EntryType, ListHeader, ListRecord, MemoryArea, MemoryCategory};
use zerocopy::{AsBytes, FromBytes};

use crate::arena::BootInfoArena;
use crate::error::BootError;
use crate::firmware::MemoryMapFirmware;
use crate::PAGE_SIZE;

/// Bytes kept in front of the descriptor table for the entry and list headers.
const PREFIX: usize = EntryHeader::SIZE + ListHeader::SIZE;

/// `EFI_MEMORY_DESCRIPTOR`, version 1. Firmware may report a larger stride.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct MemoryDescriptor {
    pub ty: u32,
    pub pad: u32,
    pub phys_start: u64,
    pub virt_start: u64,
    pub page_count: u64,
    pub attribute: u64,
}

/// Portable category of a UEFI memory type; `None` for types the image has
/// no use for (persistent memory, OEM and OS-loader ranges).
pub fn classify(ty: u32) -> Option<MemoryCategory> {
    match ty {
        efi::RESERVED_MEMORY_TYPE
        | efi::RUNTIME_SERVICES_CODE
        | efi::RUNTIME_SERVICES_DATA
        | efi::MEMORY_MAPPED_IO
        | efi::MEMORY_MAPPED_IO_PORT_SPACE
        | efi::PAL_CODE => Some(MemoryCategory::Reserved),
        efi::UNUSABLE_MEMORY => Some(MemoryCategory::Unusable),
        efi::ACPI_RECLAIM_MEMORY => Some(MemoryCategory::Acpi),
        efi::LOADER_CODE
        | efi::LOADER_DATA
        | efi::BOOT_SERVICES_CODE
        | efi::BOOT_SERVICES_DATA
        | efi::CONVENTIONAL_MEMORY => Some(MemoryCategory::Ram),
        efi::ACPI_MEMORY_NVS => Some(MemoryCategory::Nvs),
        _ => None,
    }
}

/// Translate `size` bytes of descriptors at the start of `region` into
/// merged areas written over them. Returns the area count.
fn translate(region: &mut [u8], size: usize, descriptor_size: usize) -> usize {
    let mut count = 0usize;
    let mut last: Option<MemoryArea> = None;

    let mut at = 0usize;
    while at + descriptor_size <= size {
        let desc = MemoryDescriptor::read_from_prefix(&region[at..]).unwrap_or_default();
        at += descriptor_size;

        let Some(category) = classify(desc.ty) else {
            warn!(
                target: "memmap",
                "skipping memory descriptor of unknown type {:#x} at {:#x}",
                desc.ty, desc.phys_start
            );
            continue;
        };
        let length = desc.page_count * PAGE_SIZE;

        let area = match last {
            Some(mut prev) if prev.category == category as u32 && prev.end() == desc.phys_start => {
                prev.length += length;
                count -= 1;
                prev
            }
            _ => MemoryArea::new(category, desc.phys_start, length),
        };
        let out = count * MemoryArea::SIZE;
        region[out..out + MemoryArea::SIZE].copy_from_slice(area.as_bytes());
        last = Some(area);
        count += 1;
    }
    count
}

/// Append the MemoryMap entry and leave boot services with the key of the
/// map that entry was built from.
pub fn collect<F: MemoryMapFirmware>(
    firmware: F,
    arena: &mut BootInfoArena<'_>,
) -> Result<(), BootError> {
    // Console output is a firmware call too; nothing is logged once the
    // table is fetched apart from per-descriptor warnings.
    info!(target: "memmap", "collecting memory map and exiting boot services");

    let required = match firmware.get_memory_map(&mut []) {
        Ok(table) => table.size,
        Err(e) if e.status == Status::BUFFER_TOO_SMALL => e.required,
        Err(e) => return Err(BootError::MemoryMap(e.status)),
    };

    let scratch = arena.scratch();
    let available = scratch.len();
    if available < PREFIX + required {
        return Err(BootError::BufferTooSmall {
            requested: PREFIX + required,
            available,
        });
    }

    let table = firmware
        .get_memory_map(&mut scratch[PREFIX..])
        .map_err(|e| {
            if e.status == Status::BUFFER_TOO_SMALL {
                BootError::BufferTooSmall {
                    requested: PREFIX + e.required,
                    available,
                }
            } else {
                BootError::MemoryMap(e.status)
            }
        })?;
    if table.descriptor_version != efi::MEMORY_DESCRIPTOR_VERSION {
        return Err(BootError::UnsupportedDescriptorVersion(table.descriptor_version));
    }
    if table.descriptor_size < size_of::<MemoryDescriptor>() {
        return Err(BootError::MemoryMap(Status::BAD_BUFFER_SIZE));
    }

    let region = &mut scratch[PREFIX..];
    let size = table.size.min(region.len());
    let count = translate(region, size, table.descriptor_size);

    let payload = MemoryArea::payload_size(count);
    scratch[..EntryHeader::SIZE]
        .copy_from_slice(EntryHeader::new(EntryType::MemoryMap, payload).as_bytes());
    scratch[EntryHeader::SIZE..PREFIX].copy_from_slice(ListHeader::new(count as u32).as_bytes());
    arena.alloc(EntryHeader::SIZE + payload)?;

    firmware
        .exit_boot_services(table.key)
        .map_err(BootError::ExitBootServices)
}
