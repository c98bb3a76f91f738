//! console.rs — startup console reset and the serial log sink
//!
//! With the `serial` feature (and without `logging`) log records go to the
//! first Serial I/O port instead of the text console. Lines end in `\r\n`
//! like they do on ConOut.

use alloc::string::String;
use core::fmt::{self, Write};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use uefi::proto::console::serial::Serial;
use uefi::table::boot::{OpenProtocolAttributes, OpenProtocolParams};
use uefi::table::{Boot, SystemTable};
use uefi::Handle;

/// Serial I/O interface, null when detached.
static PORT: AtomicPtr<Serial> = AtomicPtr::new(ptr::null_mut());

static LOGGER: SerialLogger = SerialLogger;

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        !PORT.load(Ordering::Acquire).is_null()
    }

    fn log(&self, record: &Record<'_>) {
        let port = PORT.load(Ordering::Acquire);
        if port.is_null() {
            return;
        }
        let line = render(record.level(), record.target(), *record.args());
        // SAFETY: the pointer is only published while boot services are up;
        // `detach_serial` clears it before they go away.
        let _ = unsafe { (*port).write(line.as_bytes()) };
    }

    fn flush(&self) {}
}

/// Appends `\r` before every `\n`.
struct CrLf<'a>(&'a mut String);

impl Write for CrLf<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for (i, part) in s.split('\n').enumerate() {
            if i > 0 {
                self.0.push_str("\r\n");
            }
            self.0.push_str(part);
        }
        Ok(())
    }
}

fn render(level: Level, target: &str, args: fmt::Arguments<'_>) -> String {
    let mut line = String::new();
    let mut out = CrLf(&mut line);
    let _ = write!(out, "[{:>5} {}] {}\n", level, target, args);
    line
}

/// Blank the text console.
pub fn clear_screen(st: &mut SystemTable<Boot>) {
    let _ = st.stdout().clear();
}

/// Find a serial port and make it the log sink. Returns `false` when there
/// is no port or another logger is already installed.
pub fn attach_serial(st: &SystemTable<Boot>, agent: Handle) -> bool {
    let bs = st.boot_services();
    let Ok(handle) = bs.get_handle_for_protocol::<Serial>() else {
        return false;
    };
    // SAFETY: opened non-exclusively; the interface outlives the scoped
    // handle for as long as boot services are active.
    let opened = unsafe {
        bs.open_protocol::<Serial>(
            OpenProtocolParams {
                handle,
                agent,
                controller: None,
            },
            OpenProtocolAttributes::GetProtocol,
        )
    };
    let Ok(mut serial) = opened else {
        return false;
    };
    if log::set_logger(&LOGGER).is_err() {
        return false;
    }
    PORT.store(&mut *serial as *mut Serial, Ordering::Release);
    // Stays open until ExitBootServices.
    core::mem::forget(serial);
    log::set_max_level(LevelFilter::Info);
    true
}

/// Stop writing to the port. Returns the previous interface for
/// [`reattach_serial`].
pub fn detach_serial() -> *mut Serial {
    PORT.swap(ptr::null_mut(), Ordering::AcqRel)
}

/// Undo [`detach_serial`] when boot services turned out to survive.
pub fn reattach_serial(port: *mut Serial) {
    PORT.store(port, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_use_crlf() {
        assert_eq!(
            render(Level::Warn, "memmap", format_args!("a\nb")),
            "[ WARN memmap] a\r\nb\r\n"
        );
        assert_eq!(
            render(Level::Info, "boot", format_args!("entry point {:#x}", 0x10_0000)),
            "[ INFO boot] entry point 0x100000\r\n"
        );
    }

    #[test]
    fn detached_port_swallows_records() {
        reattach_serial(ptr::null_mut());
        assert!(detach_serial().is_null());
        assert!(!LOGGER.enabled(&Metadata::builder().level(Level::Error).build()));
    }
}
