//! protocol.rs — netboot wire format and receive session
//!
//! Every datagram starts with a 16-byte little-endian header:
//!
//! ```text
//!   +--------+--------+--------+--------+
//!   | magic  | cookie |  cmd   |  arg   |   then command data
//!   +--------+--------+--------+--------+
//! ```
//!
//! The host drives the transfer: `QUERY` to find the node, `SEND_FILE` to
//! start, a run of `DATA` packets whose `arg` is the byte offset, then `BOOT`.
//! Each accepted command is answered with `ACK` carrying the same cookie.
//! Replies to `DATA` carry the offset the node expects next, so a host that
//! lost a packet can rewind.

use alloc::vec::Vec;

use log::{debug, info, warn};
use zerocopy::{AsBytes, FromBytes};

pub const NB_MAGIC: u32 = 0xAA77_4217;

/// UDP port the node listens on.
pub const NB_SERVER_PORT: u16 = 33330;

/// Largest image a session accepts.
pub const NB_MAX_IMAGE: usize = 32 * 1024 * 1024;

/// Largest datagram payload read from the interface.
pub const NB_MAX_PACKET: usize = 1452;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, AsBytes)]
pub struct NbHeader {
    pub magic: u32,
    pub cookie: u32,
    pub cmd: u32,
    pub arg: u32,
}

impl NbHeader {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub const fn new(cookie: u32, cmd: u32, arg: u32) -> Self {
        Self {
            magic: NB_MAGIC,
            cookie,
            cmd,
            arg,
        }
    }
}

pub const NB_ACK: u32 = 0;
pub const NB_SEND_FILE: u32 = 2;
pub const NB_DATA: u32 = 3;
pub const NB_BOOT: u32 = 4;
pub const NB_QUERY: u32 = 5;

pub const NB_ERROR: u32 = 0x8000_0000;
pub const NB_ERROR_BAD_CMD: u32 = 0x8000_0001;
pub const NB_ERROR_BAD_PARAM: u32 = 0x8000_0002;
pub const NB_ERROR_TOO_LARGE: u32 = 0x8000_0003;

/// Commands a node understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Query,
    SendFile { size: u32 },
    Data { offset: u32, data: &'a [u8] },
    Boot,
    Other(u32),
}

/// A datagram with a valid header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message<'a> {
    pub cookie: u32,
    pub command: Command<'a>,
}

impl<'a> Message<'a> {
    /// `None` for short datagrams and foreign magic.
    pub fn decode(packet: &'a [u8]) -> Option<Self> {
        let header = NbHeader::read_from_prefix(packet)?;
        if header.magic != NB_MAGIC {
            return None;
        }
        let data = &packet[NbHeader::SIZE..];
        let command = match header.cmd {
            NB_QUERY => Command::Query,
            NB_SEND_FILE => Command::SendFile { size: header.arg },
            NB_DATA => Command::Data {
                offset: header.arg,
                data,
            },
            NB_BOOT => Command::Boot,
            other => Command::Other(other),
        };
        Some(Self {
            cookie: header.cookie,
            command,
        })
    }
}

/// Answer to send back to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply<'a> {
    pub header: NbHeader,
    pub data: &'a [u8],
}

impl<'a> Reply<'a> {
    fn ack(cookie: u32, arg: u32) -> Self {
        Self {
            header: NbHeader::new(cookie, NB_ACK, arg),
            data: &[],
        }
    }

    fn error(cookie: u32, code: u32) -> Self {
        Self {
            header: NbHeader::new(cookie, code, 0),
            data: &[],
        }
    }

    /// Serialize into `out`; returns the datagram length.
    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        let len = NbHeader::SIZE + self.data.len();
        let out = out.get_mut(..len)?;
        let (head, body) = out.split_at_mut(NbHeader::SIZE);
        head.copy_from_slice(self.header.as_bytes());
        body.copy_from_slice(self.data);
        Some(len)
    }
}

/// Receive state for one node.
pub struct Session {
    /// NUL-terminated, as sent in `QUERY` replies.
    nodename: Vec<u8>,
    image: Vec<u8>,
    receiving: bool,
    complete: bool,
}

impl Session {
    pub fn new(nodename: &str) -> Self {
        let mut name = Vec::with_capacity(nodename.len() + 1);
        name.extend_from_slice(nodename.as_bytes());
        name.push(0);
        Self {
            nodename: name,
            image: Vec::new(),
            receiving: false,
            complete: false,
        }
    }

    pub fn nodename(&self) -> &str {
        let name = &self.nodename[..self.nodename.len() - 1];
        core::str::from_utf8(name).unwrap_or("")
    }

    /// A `BOOT` command arrived after data.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bytes received in the current transfer.
    pub fn received(&self) -> usize {
        self.image.len()
    }

    pub fn into_image(self) -> Vec<u8> {
        self.image
    }

    /// Feed one datagram. Returns the reply to send, if any.
    pub fn handle<'s>(&'s mut self, packet: &[u8]) -> Option<Reply<'s>> {
        let msg = Message::decode(packet)?;
        let cookie = msg.cookie;
        let reply = match msg.command {
            Command::Query => Reply {
                header: NbHeader::new(cookie, NB_ACK, 0),
                data: &self.nodename,
            },
            Command::SendFile { size } => {
                if size as usize > NB_MAX_IMAGE {
                    warn!(target: "netboot", "refusing {} byte image", size);
                    return Some(Reply::error(cookie, NB_ERROR_TOO_LARGE));
                }
                info!(target: "netboot", "receiving {} bytes", size);
                self.image.clear();
                self.receiving = true;
                self.complete = false;
                Reply::ack(cookie, 0)
            }
            Command::Data { offset, data } => {
                if !self.receiving {
                    return Some(Reply::error(cookie, NB_ERROR_BAD_CMD));
                }
                let expected = self.image.len();
                if offset as usize != expected {
                    debug!(target: "netboot", "out of order data at {:#x}, want {:#x}", offset, expected);
                    return Some(Reply::ack(cookie, expected as u32));
                }
                if expected + data.len() > NB_MAX_IMAGE {
                    self.receiving = false;
                    return Some(Reply::error(cookie, NB_ERROR_TOO_LARGE));
                }
                self.image.extend_from_slice(data);
                Reply::ack(cookie, self.image.len() as u32)
            }
            Command::Boot => {
                if !self.receiving || self.image.is_empty() {
                    return Some(Reply::error(cookie, NB_ERROR_BAD_PARAM));
                }
                self.receiving = false;
                self.complete = true;
                Reply::ack(cookie, 0)
            }
            Command::Other(cmd) => {
                debug!(target: "netboot", "unsupported command {:#x}", cmd);
                Reply::error(cookie, NB_ERROR_BAD_CMD)
            }
        };
        Some(reply)
    }
}
