//! arena.rs — append-only writer for the info block
//!
//! Bump allocator over a caller-owned buffer. The header's `length` always
//! equals the cursor, so a block handed over at any point is well formed.
//! Reservations never move and are never freed.

use core::mem::size_of;

use uniboot::{
    EntryHeader, InfoHeader, ListHeader, ListRecord, Payload, UNIBOOT_MAGIC, UNIBOOT_VERSION,
};
use zerocopy::{AsBytes, FromBytes};

use crate::error::BootError;

pub struct BootInfoArena<'buf> {
    buf: &'buf mut [u8],
    cursor: usize,
}

impl<'buf> BootInfoArena<'buf> {
    /// Zero `buf` and write a fresh header.
    pub fn init(buf: &'buf mut [u8]) -> Result<Self, BootError> {
        buf.fill(0);
        if buf.len() < InfoHeader::SIZE {
            return Err(BootError::BufferTooSmall {
                requested: InfoHeader::SIZE,
                available: buf.len(),
            });
        }
        InfoHeader::new().write_to_prefix(&mut *buf);
        Ok(Self {
            buf,
            cursor: InfoHeader::SIZE,
        })
    }

    /// Resume appending to a block already present in `buf`. Only the bytes
    /// past the recorded length are zeroed.
    pub fn reinit(buf: &'buf mut [u8]) -> Result<Self, BootError> {
        let header = InfoHeader::read_from_prefix(&*buf).ok_or(BootError::BufferTooSmall {
            requested: InfoHeader::SIZE,
            available: buf.len(),
        })?;
        if header.magic != UNIBOOT_MAGIC {
            return Err(BootError::InvalidInfoBlock("missing magic"));
        }
        if header.version != UNIBOOT_VERSION {
            return Err(BootError::InvalidInfoBlock("unsupported version"));
        }
        let cursor = usize::try_from(header.length)
            .ok()
            .filter(|&len| len >= InfoHeader::SIZE && len <= buf.len())
            .ok_or(BootError::InvalidInfoBlock("length outside buffer"))?;

        buf[cursor..].fill(0);
        Ok(Self { buf, cursor })
    }

    /// Bytes still free.
    pub fn available(&self) -> usize {
        self.buf.len() - self.cursor
    }

    /// Bytes written so far, header included.
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Reserve `n` bytes at the cursor. On failure nothing changes.
    pub fn alloc(&mut self, n: usize) -> Result<&mut [u8], BootError> {
        if n > self.available() {
            return Err(BootError::BufferTooSmall {
                requested: n,
                available: self.available(),
            });
        }
        let start = self.cursor;
        self.cursor += n;
        self.store_length();
        Ok(&mut self.buf[start..self.cursor])
    }

    /// Reserve exactly `size_of::<T>()` bytes and write `record` there.
    pub fn push<T: AsBytes>(&mut self, record: &T) -> Result<(), BootError> {
        let slot = self.alloc(size_of::<T>())?;
        slot.copy_from_slice(record.as_bytes());
        Ok(())
    }

    /// Append a complete fixed-size entry.
    pub fn append_entry<T: Payload>(&mut self, payload: &T) -> Result<(), BootError> {
        let header = EntryHeader::new(T::TYPE, size_of::<T>());
        let slot = self.alloc(EntryHeader::SIZE + size_of::<T>())?;
        let (head, body) = slot.split_at_mut(EntryHeader::SIZE);
        head.copy_from_slice(header.as_bytes());
        body.copy_from_slice(payload.as_bytes());
        Ok(())
    }

    /// Append a list entry holding every record of `records`, in order.
    pub fn append_list<T, I>(&mut self, records: I) -> Result<(), BootError>
    where
        T: ListRecord,
        I: ExactSizeIterator<Item = T>,
    {
        let count = records.len();
        let count32 = u32::try_from(count).map_err(|_| BootError::BufferTooSmall {
            requested: usize::MAX,
            available: self.available(),
        })?;
        let payload = T::payload_size(count);
        let slot = self.alloc(EntryHeader::SIZE + payload)?;

        let (head, body) = slot.split_at_mut(EntryHeader::SIZE);
        head.copy_from_slice(EntryHeader::new(T::LIST, payload).as_bytes());
        let (list, items) = body.split_at_mut(ListHeader::SIZE);
        list.copy_from_slice(ListHeader::new(count32).as_bytes());
        for (record, out) in records.zip(items.chunks_exact_mut(T::SIZE)) {
            out.copy_from_slice(record.as_bytes());
        }
        Ok(())
    }

    /// Unreserved tail of the buffer. Contents are only kept if a later
    /// `alloc` covers them.
    pub fn scratch(&mut self) -> &mut [u8] {
        &mut self.buf[self.cursor..]
    }

    /// Close the block. The returned slice is exactly `header.length` bytes.
    pub fn finalize(self) -> &'buf [u8] {
        let Self { buf, cursor } = self;
        &buf[..cursor]
    }

    fn store_length(&mut self) {
        let header = InfoHeader {
            length: self.cursor as u64,
            ..InfoHeader::new()
        };
        header.write_to_prefix(&mut self.buf[..]);
    }
}
