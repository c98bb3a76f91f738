//! main.rs — UEFI entry point for the uniboot loader

#![cfg_attr(target_os = "uefi", no_std)]
#![cfg_attr(target_os = "uefi", no_main)]

#[cfg(target_os = "uefi")]
use uefi::prelude::*;

#[cfg(target_os = "uefi")]
use uniboot_boot::{console, handoff, platform::UefiPlatform, BootError, INFO_BLOCK_SIZE};

/// Backing store for the info block; the image finds it through the handoff
/// registers and relies on 8-byte alignment of every record.
#[cfg(target_os = "uefi")]
#[repr(C, align(8))]
struct InfoBuffer([u8; INFO_BLOCK_SIZE]);

#[cfg(target_os = "uefi")]
#[entry]
fn efi_main(image: Handle, mut st: SystemTable<Boot>) -> Status {
    if uefi_services::init(&mut st).is_err() {
        return Status::ABORTED;
    }
    console::clear_screen(&mut st);
    #[cfg(feature = "serial")]
    if !console::attach_serial(&st, image) {
        log::warn!(target: "boot", "no serial port, logging to the console");
    }
    log::info!(target: "boot", "uniboot {}", env!("CARGO_PKG_VERSION"));

    // SAFETY: only used on the failure path, where `run` has returned and
    // the platform owning the original table has been dropped.
    let fatal_st = unsafe { st.unsafe_clone() };

    // Lives in this frame, which `enter` never leaves.
    let mut buffer = InfoBuffer([0; INFO_BLOCK_SIZE]);

    match uniboot_boot::run(UefiPlatform::new(image, st), &mut buffer.0) {
        // SAFETY: `run` only returns Ok after ExitBootServices succeeded.
        Ok(h) => unsafe { handoff::enter(h.entry, h.block.as_ptr()) },
        Err(err) => fatal(&fatal_st, &err),
    }
}

/// Report `err` and stop. Boot services are still up on every error path.
#[cfg(target_os = "uefi")]
fn fatal(st: &SystemTable<Boot>, err: &BootError) -> ! {
    log::error!(target: "fatal", "{} [{:?}]", err, err.status());
    st.boot_services().stall(10_000_000);
    loop {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: halting with interrupts on only waits for the next one.
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack))
        };
        #[cfg(not(target_arch = "x86_64"))]
        core::hint::spin_loop();
    }
}

#[cfg(not(target_os = "uefi"))]
fn main() {}
