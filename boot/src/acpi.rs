//! acpi.rs — RSDP discovery over the UEFI configuration table

use core::ptr;

use uefi::table::cfg::{ConfigTableEntry, ACPI2_GUID, ACPI_GUID};

pub const RSDP_SIGNATURE: [u8; 8] = *b"RSD PTR ";

/// Address of the first ACPI 1.0 or 2.0 table that starts with the RSDP
/// signature.
///
/// # Safety
/// The address of every ACPI entry in `table` must be readable for 8 bytes.
pub unsafe fn find_acpi_root(table: &[ConfigTableEntry]) -> Option<u64> {
    table
        .iter()
        .filter(|entry| entry.guid == ACPI_GUID || entry.guid == ACPI2_GUID)
        .filter(|entry| !entry.address.is_null())
        // SAFETY: caller guarantees ACPI entries point at readable tables.
        .find(|entry| ptr::read_unaligned(entry.address.cast::<[u8; 8]>()) == RSDP_SIGNATURE)
        .map(|entry| entry.address as u64)
}
