//! elf.rs — ELF64 executable placement at physical addresses
//!
//! The image is validated in a fixed order (size, magic, class, type), every
//! table and segment range is bounds-checked against the image, and only then
//! are pages claimed and bytes copied. Segments go to `p_paddr`; no
//! relocation is performed.
//!
//! Adjacent LOAD segments may share a page (e.g. `.text` ending mid-page and
//! `.data` starting in the same page). The running end of the previous
//! allocation clamps the start of the next one so a page is claimed once.

use core::mem::size_of;

use log::debug;
use uniboot::{Section, Segment};
use xmas_elf::header::{self, Class};
use zerocopy::{AsBytes, FromBytes};

use crate::arena::BootInfoArena;
use crate::error::BootError;
use crate::firmware::PhysicalMemory;
use crate::{round_down, round_up, PAGE_SIZE};

pub const PT_LOAD: u32 = 1;

const EHDR_SIZE: usize = 64;

/// On-disk ELF64 section header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct SectionHeader {
    pub name: u32,
    pub ty: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

impl From<SectionHeader> for Section {
    fn from(sh: SectionHeader) -> Self {
        Section {
            name: sh.name,
            ty: sh.ty,
            flags: sh.flags,
            addr: sh.addr,
            size: sh.size,
            addralign: sh.addralign,
            entsize: sh.entsize,
        }
    }
}

/// Header fields the loader needs, copied out of the xmas-elf view.
#[derive(Clone, Copy, Debug)]
struct ImageHeader {
    entry: u64,
    phoff: u64,
    phentsize: u16,
    phnum: u16,
    shoff: u64,
    shentsize: u16,
    shnum: u16,
}

// xmas-elf reads the header in place and requires natural alignment.
#[repr(C, align(8))]
struct AlignedEhdr([u8; EHDR_SIZE]);

impl ImageHeader {
    fn parse(image: &[u8]) -> Result<Self, BootError> {
        if image.len() < EHDR_SIZE {
            return Err(BootError::InvalidElf("image is smaller than an ELF64 header"));
        }
        let mut raw = AlignedEhdr([0; EHDR_SIZE]);
        raw.0.copy_from_slice(&image[..EHDR_SIZE]);

        let parsed = header::parse_header(&raw.0).map_err(BootError::InvalidElf)?;
        if !matches!(parsed.pt1.class(), Class::SixtyFour) {
            return Err(BootError::InvalidElf("only 64-bit images are supported"));
        }
        if parsed.pt2.type_().as_type() != header::Type::Executable {
            return Err(BootError::InvalidElf("only executable images are supported"));
        }

        let pt2 = &parsed.pt2;
        Ok(Self {
            entry: pt2.entry_point(),
            phoff: pt2.ph_offset(),
            phentsize: pt2.ph_entry_size(),
            phnum: pt2.ph_count(),
            shoff: pt2.sh_offset(),
            shentsize: pt2.sh_entry_size(),
            shnum: pt2.sh_count(),
        })
    }
}

/// A bounds-checked header table inside the image.
struct Table<'a> {
    bytes: &'a [u8],
    stride: usize,
}

impl<'a> Table<'a> {
    fn locate<T>(image: &'a [u8], offset: u64, stride: u16, count: u16) -> Result<Self, BootError> {
        if count == 0 {
            return Ok(Self {
                bytes: &[],
                stride: size_of::<T>(),
            });
        }
        let stride = stride as usize;
        if stride < size_of::<T>() {
            return Err(BootError::InvalidElf("header table entry size too small"));
        }
        let bytes = usize::try_from(offset)
            .ok()
            .and_then(|start| Some((start, start.checked_add(stride * count as usize)?)))
            .and_then(|(start, end)| image.get(start..end))
            .ok_or(BootError::InvalidElf("header table outside image"))?;
        Ok(Self { bytes, stride })
    }

    fn records<T: FromBytes + Default + 'a>(&self) -> impl ExactSizeIterator<Item = T> + 'a {
        // Every chunk is at least `size_of::<T>()` long; see `locate`.
        self.bytes
            .chunks_exact(self.stride)
            .map(|chunk| T::read_from_prefix(chunk).unwrap_or_default())
    }
}

/// File bytes of a LOAD segment, after checking the segment is well formed.
fn segment_bytes<'a>(image: &'a [u8], seg: &Segment) -> Result<&'a [u8], BootError> {
    if seg.filesz > seg.memsz {
        return Err(BootError::InvalidElf("segment file size exceeds memory size"));
    }
    if seg
        .paddr
        .checked_add(seg.memsz)
        .and_then(|end| end.checked_add(PAGE_SIZE - 1))
        .is_none()
    {
        return Err(BootError::InvalidElf("segment wraps the address space"));
    }
    let start = usize::try_from(seg.offset).ok();
    let len = usize::try_from(seg.filesz).ok();
    start
        .zip(len)
        .and_then(|(start, len)| image.get(start..start.checked_add(len)?))
        .ok_or(BootError::InvalidElf("segment data outside image"))
}

/// Load `image` into physical memory, record its program and section headers
/// into `arena`, and return the entry point.
pub fn load<M>(image: &[u8], memory: &M, arena: &mut BootInfoArena<'_>) -> Result<u64, BootError>
where
    M: PhysicalMemory + ?Sized,
{
    let header = ImageHeader::parse(image)?;
    let phdrs = Table::locate::<Segment>(image, header.phoff, header.phentsize, header.phnum)?;
    let shdrs =
        Table::locate::<SectionHeader>(image, header.shoff, header.shentsize, header.shnum)?;

    // Pages below the last placed segment may belong to firmware, so a
    // segment may only reuse pages from the run the previous one claimed.
    let mut previous_start = 0u64;
    for seg in phdrs.records::<Segment>().filter(|s| s.ty == PT_LOAD) {
        segment_bytes(image, &seg)?;
        if seg.memsz == 0 {
            continue;
        }
        let start = round_down(seg.paddr, PAGE_SIZE);
        if start < previous_start {
            return Err(BootError::InvalidElf(
                "LOAD segments not in ascending physical order",
            ));
        }
        previous_start = start;
    }

    let mut previous_end = 0u64;
    for seg in phdrs.records::<Segment>().filter(|s| s.ty == PT_LOAD) {
        if seg.memsz == 0 {
            continue;
        }
        let data = segment_bytes(image, &seg)?;

        let start = round_down(seg.paddr, PAGE_SIZE).max(previous_end);
        let end = round_up(seg.paddr + seg.memsz, PAGE_SIZE);
        previous_end = previous_end.max(end);

        let pages = (end.saturating_sub(start) / PAGE_SIZE) as usize;
        if pages > 0 {
            memory
                .allocate_fixed(start, pages)
                .map_err(|status| BootError::AllocateFixed {
                    addr: start,
                    pages,
                    status,
                })?;
        }
        debug!(
            target: "loader",
            "segment paddr={:#x} filesz={:#x} memsz={:#x} ({} new pages at {:#x})",
            seg.paddr, seg.filesz, seg.memsz, pages, start
        );

        let fill = (seg.memsz - seg.filesz) as usize;
        // SAFETY: [paddr, paddr + memsz) lies in pages claimed by this or an
        // earlier segment; `data` lives in the image buffer, not in them.
        unsafe {
            if !data.is_empty() {
                memory.copy_raw(seg.paddr, data);
            }
            if fill > 0 {
                memory.zero_raw(seg.paddr + seg.filesz, fill);
            }
        }
    }

    arena.append_list(phdrs.records::<Segment>())?;
    arena.append_list(shdrs.records::<SectionHeader>().map(Section::from))?;

    Ok(header.entry)
}
