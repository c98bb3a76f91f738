//! uniboot — info block handoff contract
//!
//! Passed from the loader ➞ booted image as the sole entry argument. The block
//! is a header followed by a run of `(EntryHeader, payload)` pairs and is
//! terminated purely by `InfoHeader::length`; there is no entry count.
//!
//! # Layout Notes
//! - Every record is `repr(C)` and little-endian.
//! - Padding that natural C packing would insert after a 32-bit field is
//!   spelled out as a zeroed `reserved` word, so `zerocopy::AsBytes` can
//!   serialize records without hidden bytes and the layout stays byte-exact
//!   with C consumers.
//! - All record sizes are multiples of 8, so entries written back to back
//!   from an 8-aligned base stay naturally aligned. Readers must still not
//!   rely on it; [`decode`] reads everything unaligned.

#![cfg_attr(not(test), no_std)]

pub mod decode;

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes};

pub use decode::{DecodeError, Entries, Entry, InfoBlock, Records};

/// Header magic, "unib" in little-endian byte order.
pub const UNIBOOT_MAGIC: u32 = 0x6269_6e75;

/// Only format revision produced by this loader.
pub const UNIBOOT_VERSION: u32 = 1;

/// Block header. `length` covers the header plus every entry written so far.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct InfoHeader {
    pub magic: u32,
    pub version: u32,
    pub length: u64,
}

impl InfoHeader {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub const fn new() -> Self {
        Self {
            magic: UNIBOOT_MAGIC,
            version: UNIBOOT_VERSION,
            length: Self::SIZE as u64,
        }
    }
}

/// Entry type tags. The numeric values are part of the consumer contract.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    AcpiInfo = 1,
    Framebuffer = 2,
    MemoryMap = 3,
    SegmentList = 4,
    SectionList = 5,
}

impl EntryType {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::AcpiInfo),
            2 => Some(Self::Framebuffer),
            3 => Some(Self::MemoryMap),
            4 => Some(Self::SegmentList),
            5 => Some(Self::SectionList),
            _ => None,
        }
    }
}

/// Precedes every payload; `length` is the payload size in bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct EntryHeader {
    pub ty: u32,
    pub reserved: u32,
    pub length: u64,
}

impl EntryHeader {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub const fn new(ty: EntryType, length: usize) -> Self {
        Self {
            ty: ty as u32,
            reserved: 0,
            length: length as u64,
        }
    }

    pub const fn entry_type(&self) -> Option<EntryType> {
        EntryType::from_raw(self.ty)
    }
}

/// Fixed-size payloads that can be appended as a whole entry.
pub trait Payload: AsBytes {
    const TYPE: EntryType;
}

/// Physical address of the ACPI Root System Description Pointer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct AcpiInfo {
    pub root: u64,
}

impl Payload for AcpiInfo {
    const TYPE: EntryType = EntryType::AcpiInfo;
}

/// Pixel layouts a consumer can draw into without firmware help.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Unknown = 0,
    /// 32 bpp, `0x00RRGGBB` in a little-endian word.
    RgbX888 = 1,
    Rgb332 = 2,
    Rgb565 = 3,
    Rgb2220 = 4,
}

impl PixelFormat {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::RgbX888,
            2 => Self::Rgb332,
            3 => Self::Rgb565,
            4 => Self::Rgb2220,
            _ => Self::Unknown,
        }
    }
}

/// Linear framebuffer geometry. `stride` is in pixels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct Framebuffer {
    pub base: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
}

impl Framebuffer {
    pub const fn pixel_format(&self) -> PixelFormat {
        PixelFormat::from_raw(self.format)
    }
}

impl Payload for Framebuffer {
    const TYPE: EntryType = EntryType::Framebuffer;
}

/// Count prefix shared by the list payloads (memory map, segments, sections).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct ListHeader {
    pub count: u32,
    pub reserved: u32,
}

impl ListHeader {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub const fn new(count: u32) -> Self {
        Self { count, reserved: 0 }
    }
}

/// Records that follow a [`ListHeader`] inside a list payload.
pub trait ListRecord: AsBytes + FromBytes + Copy {
    const LIST: EntryType;
    const SIZE: usize = core::mem::size_of::<Self>();

    /// Payload size of a list holding `count` records.
    fn payload_size(count: usize) -> usize {
        ListHeader::SIZE + count * Self::SIZE
    }
}

/// Portable memory categories.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryCategory {
    Ram = 1,
    Reserved = 2,
    Acpi = 3,
    Nvs = 4,
    Unusable = 5,
}

impl MemoryCategory {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Ram),
            2 => Some(Self::Reserved),
            3 => Some(Self::Acpi),
            4 => Some(Self::Nvs),
            5 => Some(Self::Unusable),
            _ => None,
        }
    }
}

/// One run of physical memory with a single category.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct MemoryArea {
    pub category: u32,
    pub reserved: u32,
    pub start: u64,
    pub length: u64,
}

impl MemoryArea {
    pub const fn new(category: MemoryCategory, start: u64, length: u64) -> Self {
        Self {
            category: category as u32,
            reserved: 0,
            start,
            length,
        }
    }

    pub const fn category(&self) -> Option<MemoryCategory> {
        MemoryCategory::from_raw(self.category)
    }

    /// First byte past the area.
    pub const fn end(&self) -> u64 {
        self.start + self.length
    }
}

impl ListRecord for MemoryArea {
    const LIST: EntryType = EntryType::MemoryMap;
}

bitflags! {
    /// `p_flags` of an ELF program header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 1 << 0;
        const WRITE = 1 << 1;
        const READ = 1 << 2;
    }
}

/// Verbatim copy of one ELF64 program header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct Segment {
    pub ty: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

impl Segment {
    pub const fn segment_flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_retain(self.flags)
    }
}

impl ListRecord for Segment {
    const LIST: EntryType = EntryType::SegmentList;
}

bitflags! {
    /// `sh_flags` of an ELF section header (the bits consumers care about).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SectionFlags: u64 {
        const WRITE = 1 << 0;
        const ALLOC = 1 << 1;
        const EXECINSTR = 1 << 2;
    }
}

/// ELF64 section header fields kept for the image's own introspection.
/// `name` is the raw offset into the section-name string table.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct Section {
    pub name: u32,
    pub ty: u32,
    pub flags: u64,
    pub addr: u64,
    pub size: u64,
    pub addralign: u64,
    pub entsize: u64,
}

impl Section {
    pub const fn section_flags(&self) -> SectionFlags {
        SectionFlags::from_bits_retain(self.flags)
    }
}

impl ListRecord for Section {
    const LIST: EntryType = EntryType::SectionList;
}
