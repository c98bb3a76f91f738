//! platform — the capability traits backed by real UEFI boot services
//!
//! Most calls go through the `uefi` crate. `GetMemoryMap`,
//! `ExitBootServices` and the TPL pair go straight through the raw r-efi
//! table: the map key has to travel from one call to the other untouched,
//! and the priority window must not allocate.

mod pxe;

use alloc::vec::Vec;
use core::ffi::c_void;
use core::ptr;

use log::{debug, warn};
use r_efi::efi;
use uefi::fs::Path;
use uefi::proto::console::gop::{GraphicsOutput, PixelFormat as GopFormat};
use uefi::proto::network::pxe::BaseCode;
use uefi::table::boot::{AllocateType, MemoryType, OpenProtocolAttributes, OpenProtocolParams};
use uefi::table::{Boot, SystemTable};
use uefi::{CString16, Handle, Status};
use uniboot::Framebuffer;

use crate::acpi::find_acpi_root;
use crate::console;
use crate::firmware::{
    DescriptorTable, ExecutionPriority, MapQueryError, MemoryMapFirmware, PhysicalMemory, Platform,
};
use crate::framebuffer::describe;

pub use pxe::PxeTransport;

/// Boot services plus the handle of the loaded loader image.
pub struct UefiPlatform {
    image: Handle,
    st: SystemTable<Boot>,
}

impl UefiPlatform {
    pub fn new(image: Handle, st: SystemTable<Boot>) -> Self {
        Self { image, st }
    }

    /// The firmware's own boot services table, which `uefi::BootServices`
    /// mirrors field for field.
    fn raw_boot_services(&self) -> *mut efi::BootServices {
        self.st.boot_services() as *const _ as *mut efi::BootServices
    }

    fn raw_image(&self) -> efi::Handle {
        // SAFETY: `Handle` is a transparent non-null `*mut c_void`.
        unsafe { core::mem::transmute::<Handle, *mut c_void>(self.image) }
    }
}

fn status(raw: efi::Status) -> Status {
    Status(raw.as_usize())
}

impl PhysicalMemory for UefiPlatform {
    fn allocate_fixed(&self, addr: u64, pages: usize) -> Result<(), Status> {
        self.st
            .boot_services()
            .allocate_pages(AllocateType::Address(addr), MemoryType::LOADER_DATA, pages)
            .map(|_| ())
            .map_err(|e| e.status())
    }

    unsafe fn copy_raw(&self, addr: u64, bytes: &[u8]) {
        ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len());
    }

    unsafe fn zero_raw(&self, addr: u64, len: usize) {
        ptr::write_bytes(addr as *mut u8, 0, len);
    }
}

impl MemoryMapFirmware for UefiPlatform {
    fn get_memory_map(&self, buf: &mut [u8]) -> Result<DescriptorTable, MapQueryError> {
        let bs = self.raw_boot_services();
        let mut size = buf.len();
        let mut key = 0usize;
        let mut descriptor_size = 0usize;
        let mut descriptor_version = 0u32;
        let map = if buf.is_empty() {
            ptr::null_mut()
        } else {
            buf.as_mut_ptr() as *mut efi::MemoryDescriptor
        };

        // SAFETY: `map` is null or points at `size` writable bytes.
        let raw = unsafe {
            ((*bs).get_memory_map)(
                &mut size,
                map,
                &mut key,
                &mut descriptor_size,
                &mut descriptor_version,
            )
        };
        if raw.is_error() {
            return Err(MapQueryError {
                status: status(raw),
                required: size,
            });
        }

        Ok(DescriptorTable {
            size,
            key,
            descriptor_size,
            descriptor_version,
        })
    }

    fn exit_boot_services(self, key: usize) -> Result<(), Status> {
        let bs = self.raw_boot_services();
        let port = console::detach_serial();
        // SAFETY: nothing allocated from the pool is alive past this call and
        // `self` is consumed, so no wrapper can reach boot services again.
        let raw = unsafe { ((*bs).exit_boot_services)(self.raw_image(), key) };
        if raw.is_error() {
            console::reattach_serial(port);
            return Err(status(raw));
        }
        Ok(())
    }
}

impl ExecutionPriority for UefiPlatform {
    fn raise(&self) -> usize {
        let bs = self.raw_boot_services();
        // SAFETY: the caller restores the returned level (see PriorityWindow).
        unsafe { ((*bs).raise_tpl)(efi::TPL_CALLBACK) }
    }

    fn restore(&self, previous: usize) {
        let bs = self.raw_boot_services();
        // SAFETY: `previous` was returned by the matching `raise`.
        unsafe { ((*bs).restore_tpl)(previous) }
    }
}

impl Platform for UefiPlatform {
    type Netboot<'a> = PxeTransport<'a> where Self: 'a;

    fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        let bs = self.st.boot_services();
        let path = CString16::try_from(name).ok()?;
        let mut fs = match bs.get_image_file_system(self.image) {
            Ok(fs) => fs,
            Err(e) => {
                warn!(target: "fs", "boot volume unavailable: {:?}", e.status());
                return None;
            }
        };
        match fs.read(Path::new(&path)) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(target: "fs", "{}: {:?}", name, e);
                None
            }
        }
    }

    fn open_netboot(&self, nodename: Option<&str>) -> Option<PxeTransport<'_>> {
        let bs = self.st.boot_services();
        let handle = bs.get_handle_for_protocol::<BaseCode>().ok()?;
        let base_code = bs.open_protocol_exclusive::<BaseCode>(handle).ok()?;
        PxeTransport::start(base_code, nodename)
    }

    fn acpi_root(&self) -> Option<u64> {
        // SAFETY: configuration table addresses stay mapped while boot
        // services are active.
        unsafe { find_acpi_root(self.st.config_table()) }
    }

    fn framebuffer(&self) -> Option<Framebuffer> {
        let bs = self.st.boot_services();
        let handle = bs.get_handle_for_protocol::<GraphicsOutput>().ok()?;
        // Shared open: an exclusive one would disconnect the console driver
        // the logger writes through.
        // SAFETY: only the mode is read; nothing is drawn through `gop`.
        let mut gop = unsafe {
            bs.open_protocol::<GraphicsOutput>(
                OpenProtocolParams {
                    handle,
                    agent: self.image,
                    controller: None,
                },
                OpenProtocolAttributes::GetProtocol,
            )
        }
        .ok()?;

        let mode = gop.current_mode_info();
        let base = match mode.pixel_format() {
            // no linear framebuffer to report
            GopFormat::BltOnly => 0,
            _ => gop.frame_buffer().as_mut_ptr() as u64,
        };
        Some(describe(
            base,
            mode.resolution(),
            mode.stride(),
            mode.pixel_format(),
            mode.pixel_bitmask(),
        ))
    }
}
