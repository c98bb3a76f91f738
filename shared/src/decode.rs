//! decode.rs — sequential reader for a finished info block
//!
//! Consumers walk entries from the first byte after the header while
//! `offset < header.length`. All reads are unaligned copies, so the block may
//! sit at any address.

use core::fmt;
use core::marker::PhantomData;

use zerocopy::FromBytes;

use crate::{
    AcpiInfo, EntryHeader, EntryType, Framebuffer, InfoHeader, ListHeader, ListRecord, MemoryArea,
    Section, Segment, UNIBOOT_MAGIC, UNIBOOT_VERSION,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the header claims (or than a header).
    Truncated { needed: usize, available: usize },
    BadMagic(u32),
    UnsupportedVersion(u32),
    /// An entry header or payload runs past `header.length`.
    EntryOverrun { offset: usize },
    /// A payload whose length does not match its type.
    PayloadSize { ty: u32, length: u64 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { needed, available } => {
                write!(f, "info block truncated: need {} bytes, have {}", needed, available)
            }
            DecodeError::BadMagic(m) => write!(f, "bad info block magic {:#010x}", m),
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported info block version {}", v),
            DecodeError::EntryOverrun { offset } => {
                write!(f, "entry at offset {:#x} runs past the block", offset)
            }
            DecodeError::PayloadSize { ty, length } => {
                write!(f, "entry type {} has malformed payload length {}", ty, length)
            }
        }
    }
}

/// A validated view over `header.length` bytes of an info block.
#[derive(Clone, Copy, Debug)]
pub struct InfoBlock<'a> {
    header: InfoHeader,
    bytes: &'a [u8],
}

impl<'a> InfoBlock<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        let header = InfoHeader::read_from_prefix(bytes).ok_or(DecodeError::Truncated {
            needed: InfoHeader::SIZE,
            available: bytes.len(),
        })?;
        if header.magic != UNIBOOT_MAGIC {
            return Err(DecodeError::BadMagic(header.magic));
        }
        if header.version != UNIBOOT_VERSION {
            return Err(DecodeError::UnsupportedVersion(header.version));
        }

        let length = usize::try_from(header.length).unwrap_or(usize::MAX);
        if length < InfoHeader::SIZE || length > bytes.len() {
            return Err(DecodeError::Truncated {
                needed: length,
                available: bytes.len(),
            });
        }

        Ok(Self {
            header,
            bytes: &bytes[..length],
        })
    }

    /// View the block handed over by the loader.
    ///
    /// # Safety
    /// `ptr` must point to a readable info block whose header `length` bytes
    /// stay valid and unmodified for `'a`.
    pub unsafe fn from_ptr(ptr: *const u8) -> Result<Self, DecodeError> {
        // SAFETY: caller guarantees at least a header is readable at `ptr`.
        let head = unsafe { core::slice::from_raw_parts(ptr, InfoHeader::SIZE) };
        let header = InfoHeader::read_from(head).ok_or(DecodeError::Truncated {
            needed: InfoHeader::SIZE,
            available: 0,
        })?;
        if header.magic != UNIBOOT_MAGIC {
            return Err(DecodeError::BadMagic(header.magic));
        }
        let length = usize::try_from(header.length).unwrap_or(usize::MAX);
        // SAFETY: caller guarantees `length` bytes are readable.
        Self::parse(unsafe { core::slice::from_raw_parts(ptr, length) })
    }

    pub fn header(&self) -> InfoHeader {
        self.header
    }

    /// Total block size, header included.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.len() == InfoHeader::SIZE
    }

    pub fn entries(&self) -> Entries<'a> {
        Entries {
            bytes: self.bytes,
            offset: InfoHeader::SIZE,
            failed: false,
        }
    }

    pub fn acpi_root(&self) -> Option<u64> {
        self.entries().find_map(|e| match e {
            Ok(Entry::AcpiInfo(info)) => Some(info.root),
            _ => None,
        })
    }

    pub fn framebuffer(&self) -> Option<Framebuffer> {
        self.entries().find_map(|e| match e {
            Ok(Entry::Framebuffer(fb)) => Some(fb),
            _ => None,
        })
    }

    pub fn memory_map(&self) -> Option<Records<'a, MemoryArea>> {
        self.entries().find_map(|e| match e {
            Ok(Entry::MemoryMap(areas)) => Some(areas),
            _ => None,
        })
    }
}

/// One decoded entry.
#[derive(Clone, Debug)]
pub enum Entry<'a> {
    AcpiInfo(AcpiInfo),
    Framebuffer(Framebuffer),
    MemoryMap(Records<'a, MemoryArea>),
    SegmentList(Records<'a, Segment>),
    SectionList(Records<'a, Section>),
    /// A tag this reader does not know; skipped by length.
    Unknown { ty: u32, payload: &'a [u8] },
}

/// Sequential entry iterator. Stops after the first error.
#[derive(Clone, Debug)]
pub struct Entries<'a> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Entries<'a> {
    /// Byte offset of the next entry from the start of the block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn decode(&mut self) -> Result<Entry<'a>, DecodeError> {
        let at = self.offset;
        let header = EntryHeader::read_from_prefix(&self.bytes[at..])
            .ok_or(DecodeError::EntryOverrun { offset: at })?;
        let start = at + EntryHeader::SIZE;
        let end = usize::try_from(header.length)
            .ok()
            .and_then(|len| start.checked_add(len))
            .filter(|&end| end <= self.bytes.len())
            .ok_or(DecodeError::EntryOverrun { offset: at })?;
        let payload = &self.bytes[start..end];
        self.offset = end;

        let bad_size = DecodeError::PayloadSize {
            ty: header.ty,
            length: header.length,
        };
        let entry = match header.entry_type() {
            Some(EntryType::AcpiInfo) => Entry::AcpiInfo(AcpiInfo::read_from(payload).ok_or(bad_size)?),
            Some(EntryType::Framebuffer) => {
                Entry::Framebuffer(Framebuffer::read_from(payload).ok_or(bad_size)?)
            }
            Some(EntryType::MemoryMap) => Entry::MemoryMap(Records::parse(payload).ok_or(bad_size)?),
            Some(EntryType::SegmentList) => Entry::SegmentList(Records::parse(payload).ok_or(bad_size)?),
            Some(EntryType::SectionList) => Entry::SectionList(Records::parse(payload).ok_or(bad_size)?),
            None => Entry::Unknown {
                ty: header.ty,
                payload,
            },
        };
        Ok(entry)
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<Entry<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        let item = self.decode();
        self.failed = item.is_err();
        Some(item)
    }
}

/// Records of a list payload, read one at a time.
#[derive(Clone, Debug)]
pub struct Records<'a, T> {
    bytes: &'a [u8],
    _record: PhantomData<T>,
}

impl<'a, T: ListRecord> Records<'a, T> {
    /// `payload` must be exactly a list header plus `count` records.
    fn parse(payload: &'a [u8]) -> Option<Self> {
        let header = ListHeader::read_from_prefix(payload)?;
        if payload.len() != T::payload_size(header.count as usize) {
            return None;
        }
        Some(Self {
            bytes: &payload[ListHeader::SIZE..],
            _record: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        let start = index.checked_mul(T::SIZE)?;
        T::read_from_prefix(self.bytes.get(start..)?)
    }
}

impl<'a, T: ListRecord> Iterator for Records<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let record = T::read_from_prefix(self.bytes)?;
        self.bytes = &self.bytes[T::SIZE..];
        Some(record)
    }
}
