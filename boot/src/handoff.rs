//! handoff.rs — the jump into the loaded image
//!
//! State at the first instruction of the image:
//! - boot services gone, interrupts off
//! - `EFER.NXE` set, so the image can map its data non-executable
//! - `rbp = 0` to terminate frame-pointer walks
//! - info block address in both `rdi` and `rcx`, so entry points built for
//!   either the SysV or the Microsoft x64 convention find it as argument 0

/// `IA32_EFER` model-specific register.
pub const IA32_EFER: u32 = 0xC000_0080;

/// No-execute enable.
pub const EFER_NXE: u64 = 1 << 11;

pub const fn with_nxe(efer: u64) -> u64 {
    efer | EFER_NXE
}

/// Jump to `entry` with `block` as its only argument.
///
/// # Safety
/// Boot services must have been exited, `entry` must be the entry point of
/// an image already placed in memory, and `block` must stay valid for as
/// long as the image uses it.
pub unsafe fn enter(entry: u64, block: *const u8) -> ! {
    #[cfg(target_arch = "x86_64")]
    {
        use core::arch::asm;

        let (lo, hi): (u32, u32);
        asm!("rdmsr", in("ecx") IA32_EFER, out("eax") lo, out("edx") hi, options(nomem, nostack));
        let efer = with_nxe(((hi as u64) << 32) | lo as u64);
        asm!(
            "wrmsr",
            in("ecx") IA32_EFER,
            in("eax") efer as u32,
            in("edx") (efer >> 32) as u32,
            options(nostack),
        );

        asm!(
            "xor ebp, ebp",
            "cli",
            "and rsp, -16",
            "call {entry}",
            "ud2",
            entry = in(reg) entry,
            in("rdi") block,
            in("rcx") block,
            options(noreturn),
        );
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (entry, block);
        loop {
            core::hint::spin_loop();
        }
    }
}
