//! boot.rs — the boot sequence, from empty buffer to handoff
//!
//! 1. fresh info block in the caller's buffer
//! 2. `bootloader.cfg` (optional)
//! 3. netboot when `boot=network` and an interface comes up
//! 4. otherwise `app.elf` from the boot volume
//! 5. place the image, record its headers, drop the image bytes
//! 6. ACPI root, 7. framebuffer
//! 8. memory map + ExitBootServices
//! 9. finalize
//!
//! Step 8 consumes the platform, so nothing that needs boot services can be
//! scheduled after it.

use alloc::vec::Vec;

use log::{info, warn};
use uniboot::AcpiInfo;

use crate::arena::BootInfoArena;
use crate::config::{BootConfig, BootSource};
use crate::error::BootError;
use crate::firmware::Platform;
use crate::netboot::{self, NetbootTransport};
use crate::{elf, memory_map, CONFIG_FILE, IMAGE_FILE};

/// Everything needed to jump into the image.
#[derive(Debug)]
pub struct Handoff<'buf> {
    pub entry: u64,
    /// The finished info block, exactly `header.length` bytes.
    pub block: &'buf [u8],
}

pub fn run<'buf, P: Platform>(platform: P, buffer: &'buf mut [u8]) -> Result<Handoff<'buf>, BootError> {
    let mut arena = BootInfoArena::init(buffer)?;

    let config = platform
        .read_file(CONFIG_FILE)
        .map(|bytes| BootConfig::from_bytes(&bytes))
        .unwrap_or_default();

    let mut image = None;
    if config.boot_source() == BootSource::Network {
        image = netboot_image(&platform, &config);
    }
    let image = match image {
        Some(image) => image,
        None => platform.read_file(IMAGE_FILE).ok_or(BootError::ImageNotFound)?,
    };
    info!(target: "boot", "image is {} bytes", image.len());

    let entry = elf::load(&image, &platform, &mut arena)?;
    drop(image);
    info!(target: "boot", "entry point {:#x}", entry);

    if let Some(root) = platform.acpi_root() {
        arena.append_entry(&AcpiInfo { root })?;
    }
    if let Some(fb) = platform.framebuffer() {
        info!(target: "boot", "framebuffer {}x{} at {:#x}", fb.width, fb.height, fb.base);
        arena.append_entry(&fb)?;
    }

    // the pool is gone after ExitBootServices; free everything first
    drop(config);
    memory_map::collect(platform, &mut arena)?;

    Ok(Handoff {
        entry,
        block: arena.finalize(),
    })
}

fn netboot_image<P: Platform>(platform: &P, config: &BootConfig) -> Option<Vec<u8>> {
    let Some(net) = platform.open_netboot(config.nodename()) else {
        warn!(target: "netboot", "network is not available, trying to load application from disk");
        return None;
    };
    info!(target: "netboot", "nodename: {}", net.nodename());

    let budget = config.get_u32("netboot_polls", netboot::POLL_BUDGET as u32) as usize;
    netboot::receive_image(net, platform, budget)
}
