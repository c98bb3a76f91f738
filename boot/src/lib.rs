//! uniboot_boot — UEFI stage-0 loader for a single ELF64 image
//!
//! The loader core (arena, ELF placement, memory map translation, netboot
//! receive loop, boot sequence) only talks to firmware through the capability
//! traits in [`firmware`], so it builds and tests on the host. The UEFI
//! bindings live in [`platform`]; the entry point is `main.rs`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod acpi;
pub mod arena;
pub mod boot;
pub mod config;
pub mod console;
pub mod elf;
pub mod error;
pub mod firmware;
pub mod framebuffer;
pub mod handoff;
pub mod memory_map;
pub mod netboot;
pub mod platform;

#[cfg(test)]
mod testing;

pub use arena::BootInfoArena;
pub use boot::{run, Handoff};
pub use error::BootError;

/// Size of the info block buffer owned by the entry point.
pub const INFO_BLOCK_SIZE: usize = 10240;

pub const PAGE_SIZE: u64 = 4096;

/// Optional configuration file on the boot volume.
pub const CONFIG_FILE: &str = "bootloader.cfg";

/// Image loaded when netboot is not selected or not available.
pub const IMAGE_FILE: &str = "app.elf";

#[inline]
pub const fn round_down(addr: u64, align: u64) -> u64 {
    addr & !(align - 1)
}

#[inline]
pub const fn round_up(addr: u64, align: u64) -> u64 {
    round_down(addr + align - 1, align)
}
