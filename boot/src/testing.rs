//! In-memory stand-ins for firmware services, shared by the unit tests.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use std::sync::Once;

use uefi::Status;
use uniboot::{Framebuffer, Segment};
use zerocopy::AsBytes;

use crate::elf::{SectionHeader, PT_LOAD};
use crate::firmware::{
    DescriptorTable, ExecutionPriority, MapQueryError, MemoryMapFirmware, PhysicalMemory, Platform,
};
use crate::memory_map::MemoryDescriptor;
use crate::netboot::NetbootTransport;
use crate::PAGE_SIZE;

thread_local! {
    static TRACE: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

fn trace(event: String) {
    TRACE.with(|t| t.borrow_mut().push(event));
}

/// Drain this thread's record of fake firmware calls and log records.
pub fn take_trace() -> Vec<String> {
    TRACE.with(|t| t.take())
}

struct TraceLogger;

impl log::Log for TraceLogger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        trace(format!("log:{}", record.target()));
    }

    fn flush(&self) {}
}

static LOGGER: TraceLogger = TraceLogger;

/// Route log records into the per-thread trace, starting from an empty one.
pub fn capture_logs() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
    take_trace();
}

/// Builds minimal little-endian ELF64 executables.
pub struct ElfBuilder {
    entry: u64,
    segments: Vec<(Segment, Option<Vec<u8>>)>,
    sections: usize,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            segments: Vec::new(),
            sections: 0,
        }
    }

    /// A LOAD segment at `paddr` whose file bytes are `data`.
    pub fn load(mut self, paddr: u64, data: &[u8], memsz: u64) -> Self {
        let seg = Segment {
            ty: PT_LOAD,
            flags: 0x5,
            vaddr: paddr,
            paddr,
            filesz: data.len() as u64,
            memsz,
            align: PAGE_SIZE,
            ..Default::default()
        };
        self.segments.push((seg, Some(data.to_vec())));
        self
    }

    /// A program header copied as is.
    pub fn segment(mut self, seg: Segment) -> Self {
        self.segments.push((seg, None));
        self
    }

    pub fn sections(mut self, count: usize) -> Self {
        self.sections = count;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let phnum = self.segments.len();
        let phoff = 64u64;
        let shoff = phoff + 56 * phnum as u64;
        let mut data_at = shoff + 64 * self.sections as u64;

        let mut out = Vec::new();
        out.extend_from_slice(b"\x7fELF");
        out.extend_from_slice(&[2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&0x3eu16.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&self.entry.to_le_bytes());
        out.extend_from_slice(&phoff.to_le_bytes());
        out.extend_from_slice(&shoff.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&56u16.to_le_bytes());
        out.extend_from_slice(&(phnum as u16).to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&(self.sections as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        assert_eq!(out.len(), 64);

        let mut payload = Vec::new();
        for (seg, data) in &self.segments {
            let mut seg = *seg;
            if let Some(data) = data {
                seg.offset = data_at;
                data_at += data.len() as u64;
                payload.extend_from_slice(data);
            }
            out.extend_from_slice(seg.as_bytes());
        }
        for i in 0..self.sections {
            let sh = SectionHeader {
                name: i as u32,
                ty: 1,
                flags: 0x6,
                addr: 0x10_0000 + 0x100 * i as u64,
                size: 0x100,
                addralign: 16,
                ..Default::default()
            };
            out.extend_from_slice(sh.as_bytes());
        }
        out.extend_from_slice(&payload);
        out
    }
}

/// A window of physical memory starting at `base`.
pub struct FakeMemory {
    base: u64,
    bytes: RefCell<Vec<u8>>,
    pub allocations: RefCell<Vec<(u64, usize)>>,
    pub fail_allocations: Cell<bool>,
    pub writes: Cell<usize>,
}

impl FakeMemory {
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            base,
            bytes: RefCell::new(vec![0; len]),
            allocations: RefCell::new(Vec::new()),
            fail_allocations: Cell::new(false),
            writes: Cell::new(0),
        }
    }

    pub fn poison(&self, byte: u8) {
        self.bytes.borrow_mut().fill(byte);
    }

    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        let at = (addr - self.base) as usize;
        self.bytes.borrow()[at..at + len].to_vec()
    }

    fn page_claimed(&self, page: u64) -> bool {
        self.allocations
            .borrow()
            .iter()
            .any(|&(start, pages)| page >= start && page < start + pages as u64 * PAGE_SIZE)
    }

    fn assert_claimed(&self, addr: u64, len: usize) {
        let first = addr / PAGE_SIZE * PAGE_SIZE;
        let mut page = first;
        while page < addr + len as u64 {
            assert!(self.page_claimed(page), "write to unclaimed page {:#x}", page);
            page += PAGE_SIZE;
        }
    }
}

impl PhysicalMemory for FakeMemory {
    fn allocate_fixed(&self, addr: u64, pages: usize) -> Result<(), Status> {
        let end = addr + pages as u64 * PAGE_SIZE;
        let in_window = addr >= self.base && end <= self.base + self.bytes.borrow().len() as u64;
        let overlaps = (addr..end).step_by(PAGE_SIZE as usize).any(|p| self.page_claimed(p));
        if self.fail_allocations.get() || !in_window || overlaps {
            return Err(Status::NOT_FOUND);
        }
        self.allocations.borrow_mut().push((addr, pages));
        Ok(())
    }

    unsafe fn copy_raw(&self, addr: u64, bytes: &[u8]) {
        self.assert_claimed(addr, bytes.len());
        self.writes.set(self.writes.get() + 1);
        let at = (addr - self.base) as usize;
        self.bytes.borrow_mut()[at..at + bytes.len()].copy_from_slice(bytes);
    }

    unsafe fn zero_raw(&self, addr: u64, len: usize) {
        self.assert_claimed(addr, len);
        self.writes.set(self.writes.get() + 1);
        let at = (addr - self.base) as usize;
        self.bytes.borrow_mut()[at..at + len].fill(0);
    }
}

/// Scripted `GetMemoryMap` / `ExitBootServices`.
pub struct FakeFirmware {
    pub descriptors: Vec<MemoryDescriptor>,
    pub descriptor_size: usize,
    pub descriptor_version: u32,
    pub query_status: Option<Status>,
    pub exit_status: Option<Status>,
    pub exited_with: Cell<Option<usize>>,
    pub exit_calls: Cell<usize>,
}

impl FakeFirmware {
    pub const KEY: usize = 0x5eed;

    pub fn new(descriptors: Vec<MemoryDescriptor>) -> Self {
        Self {
            descriptors,
            descriptor_size: core::mem::size_of::<MemoryDescriptor>(),
            descriptor_version: 1,
            query_status: None,
            exit_status: None,
            exited_with: Cell::new(None),
            exit_calls: Cell::new(0),
        }
    }
}

impl MemoryMapFirmware for &FakeFirmware {
    fn get_memory_map(&self, buf: &mut [u8]) -> Result<DescriptorTable, MapQueryError> {
        trace(String::from("get_memory_map"));
        if let Some(status) = self.query_status {
            return Err(MapQueryError {
                status,
                required: 0,
            });
        }
        let size = self.descriptors.len() * self.descriptor_size;
        if buf.len() < size {
            return Err(MapQueryError {
                status: Status::BUFFER_TOO_SMALL,
                required: size,
            });
        }
        for (desc, out) in self
            .descriptors
            .iter()
            .zip(buf.chunks_exact_mut(self.descriptor_size))
        {
            out.fill(0xEE);
            desc.write_to_prefix(out);
        }
        Ok(DescriptorTable {
            size,
            key: FakeFirmware::KEY,
            descriptor_size: self.descriptor_size,
            descriptor_version: self.descriptor_version,
        })
    }

    fn exit_boot_services(self, key: usize) -> Result<(), Status> {
        trace(String::from("exit_boot_services"));
        self.exit_calls.set(self.exit_calls.get() + 1);
        if let Some(status) = self.exit_status {
            return Err(status);
        }
        self.exited_with.set(Some(key));
        Ok(())
    }
}

/// Task priority levels as plain numbers.
pub struct FakeTpl {
    pub level: Rc<Cell<usize>>,
    restores: Cell<usize>,
}

impl FakeTpl {
    pub const APPLICATION: usize = 4;
    pub const CALLBACK: usize = 8;

    pub fn level(&self) -> usize {
        self.level.get()
    }

    pub fn restored(&self) -> usize {
        self.restores.get()
    }
}

impl Default for FakeTpl {
    fn default() -> Self {
        Self {
            level: Rc::new(Cell::new(Self::APPLICATION)),
            restores: Cell::new(0),
        }
    }
}

impl ExecutionPriority for FakeTpl {
    fn raise(&self) -> usize {
        self.level.replace(Self::CALLBACK)
    }

    fn restore(&self, previous: usize) {
        self.restores.set(self.restores.get() + 1);
        self.level.set(previous);
    }
}

/// A host that finishes a transfer of `size` bytes on poll `complete_at`.
pub struct FakeNet {
    name: String,
    complete_at: usize,
    size: usize,
    image: Option<Vec<u8>>,
    /// A second, different transfer finishing on the given poll.
    pub then: Option<(usize, usize)>,
    pub polls: Rc<Cell<usize>>,
    pub closed: Rc<Cell<bool>>,
    pub observe_tpl: Option<Rc<Cell<usize>>>,
    pub seen_tpl: Rc<Cell<Option<usize>>>,
}

impl FakeNet {
    pub fn complete_after(polls: usize, size: usize) -> Self {
        Self {
            name: String::from("uniboot-525400123456"),
            complete_at: polls,
            size,
            image: None,
            then: None,
            polls: Rc::new(Cell::new(0)),
            closed: Rc::new(Cell::new(false)),
            observe_tpl: None,
            seen_tpl: Rc::new(Cell::new(None)),
        }
    }

    pub fn delivering(polls: usize, image: Vec<u8>) -> Self {
        let mut net = Self::complete_after(polls, image.len());
        net.image = Some(image);
        net
    }

    pub fn never() -> Self {
        Self::complete_after(usize::MAX, 0)
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = String::from(name);
        self
    }

    fn current(&self) -> Option<usize> {
        let n = self.polls.get();
        match self.then {
            Some((at, size)) if n >= at => Some(size),
            _ if n >= self.complete_at => Some(self.size),
            _ => None,
        }
    }
}

impl NetbootTransport for FakeNet {
    fn nodename(&self) -> &str {
        &self.name
    }

    fn poll(&mut self) -> bool {
        self.polls.set(self.polls.get() + 1);
        if let Some(level) = &self.observe_tpl {
            self.seen_tpl.set(Some(level.get()));
        }
        self.current().is_some()
    }

    fn received(&self) -> usize {
        self.current().unwrap_or(0)
    }

    fn close(&mut self) {
        self.closed.set(true);
    }

    fn into_image(self) -> Vec<u8> {
        let len = self.received();
        self.image.unwrap_or_else(|| vec![0xAB; len])
    }
}

/// Whole-platform fake for the boot sequence.
pub struct FakePlatform {
    pub memory: FakeMemory,
    pub firmware: FakeFirmware,
    pub tpl: FakeTpl,
    pub files: Vec<(&'static str, Vec<u8>)>,
    pub net: RefCell<Option<FakeNet>>,
    pub opened_with: RefCell<Option<Option<String>>>,
    pub acpi: Option<u64>,
    pub fb: Option<Framebuffer>,
    pub events: RefCell<Vec<&'static str>>,
}

impl FakePlatform {
    pub fn new(memory: FakeMemory, descriptors: Vec<MemoryDescriptor>) -> Self {
        Self {
            memory,
            firmware: FakeFirmware::new(descriptors),
            tpl: FakeTpl::default(),
            files: Vec::new(),
            net: RefCell::new(None),
            opened_with: RefCell::new(None),
            acpi: None,
            fb: None,
            events: RefCell::new(Vec::new()),
        }
    }

    pub fn file(mut self, name: &'static str, bytes: &[u8]) -> Self {
        self.files.push((name, bytes.to_vec()));
        self
    }
}

impl PhysicalMemory for &FakePlatform {
    fn allocate_fixed(&self, addr: u64, pages: usize) -> Result<(), Status> {
        self.memory.allocate_fixed(addr, pages)
    }

    unsafe fn copy_raw(&self, addr: u64, bytes: &[u8]) {
        self.memory.copy_raw(addr, bytes)
    }

    unsafe fn zero_raw(&self, addr: u64, len: usize) {
        self.memory.zero_raw(addr, len)
    }
}

impl MemoryMapFirmware for &FakePlatform {
    fn get_memory_map(&self, buf: &mut [u8]) -> Result<DescriptorTable, MapQueryError> {
        (&self.firmware).get_memory_map(buf)
    }

    fn exit_boot_services(self, key: usize) -> Result<(), Status> {
        self.events.borrow_mut().push("exit");
        (&self.firmware).exit_boot_services(key)
    }
}

impl ExecutionPriority for &FakePlatform {
    fn raise(&self) -> usize {
        self.tpl.raise()
    }

    fn restore(&self, previous: usize) {
        self.tpl.restore(previous)
    }
}

impl<'p> Platform for &'p FakePlatform {
    type Netboot<'a> = FakeNet where Self: 'a;

    fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, bytes)| bytes.clone())
    }

    fn open_netboot(&self, nodename: Option<&str>) -> Option<Self::Netboot<'_>> {
        *self.opened_with.borrow_mut() = Some(nodename.map(String::from));
        self.net.borrow_mut().take()
    }

    fn acpi_root(&self) -> Option<u64> {
        self.events.borrow_mut().push("acpi");
        self.acpi
    }

    fn framebuffer(&self) -> Option<Framebuffer> {
        self.events.borrow_mut().push("framebuffer");
        self.fb
    }
}
