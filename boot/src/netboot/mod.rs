//! netboot — receive the image over the network instead of the boot volume
//!
//! The receive loop runs inside a raised-priority window so firmware timer
//! callbacks do not steal cycles from packet handling. The window is an RAII
//! guard, so the previous priority comes back however the loop ends.

pub mod protocol;

use alloc::vec::Vec;

use log::{info, warn};

use crate::firmware::{ExecutionPriority, PriorityWindow};

/// Anything smaller cannot be a bootable image.
pub const MIN_IMAGE_SIZE: usize = 4096;

/// Polls before giving up and booting from disk.
pub const POLL_BUDGET: usize = 1 << 22;

/// An open netboot session on one interface.
pub trait NetbootTransport {
    fn nodename(&self) -> &str;

    /// Service the interface once. Returns `true` once the host has sent
    /// `BOOT` for a complete transfer.
    fn poll(&mut self) -> bool;

    /// Bytes of the current transfer received so far.
    fn received(&self) -> usize;

    /// Stop the interface; no traffic may be in flight afterwards.
    fn close(&mut self);

    fn into_image(self) -> Vec<u8>
    where
        Self: Sized;
}

/// Poll `net` until a complete transfer of at least [`MIN_IMAGE_SIZE`] bytes
/// arrives or `max_polls` runs out. The session is closed either way.
pub fn receive_image<N, P>(mut net: N, priority: &P, max_polls: usize) -> Option<Vec<u8>>
where
    N: NetbootTransport,
    P: ExecutionPriority + ?Sized,
{
    let window = PriorityWindow::open(priority);

    let mut accepted = false;
    for _ in 0..max_polls {
        if !net.poll() {
            continue;
        }
        if net.received() < MIN_IMAGE_SIZE {
            // too small to be an image; wait for the host to resend
            continue;
        }
        accepted = true;
        break;
    }

    net.close();
    drop(window);

    if accepted {
        info!(target: "netboot", "received {} bytes", net.received());
        Some(net.into_image())
    } else {
        warn!(target: "netboot", "no image after {} polls", max_polls);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNet, FakeTpl};

    #[test]
    fn short_transfer_keeps_polling() {
        let tpl = FakeTpl::default();
        let net = FakeNet::complete_after(2, 2048);
        let polls = net.polls.clone();
        let closed = net.closed.clone();

        assert_eq!(receive_image(net, &tpl, 50), None);
        assert_eq!(polls.get(), 50);
        assert!(closed.get());
        assert_eq!(tpl.restored(), 1);
    }

    #[test]
    fn large_transfer_is_accepted_and_session_closed() {
        let tpl = FakeTpl::default();
        let net = FakeNet::complete_after(3, 8192);
        let polls = net.polls.clone();
        let closed = net.closed.clone();

        let image = receive_image(net, &tpl, 50).unwrap();
        assert_eq!(image.len(), 8192);
        assert_eq!(polls.get(), 3);
        assert!(closed.get());
        assert_eq!(tpl.level(), FakeTpl::APPLICATION);
        assert_eq!(tpl.restored(), 1);
    }

    #[test]
    fn late_large_transfer_after_small_one() {
        let tpl = FakeTpl::default();
        let mut net = FakeNet::complete_after(1, 1024);
        net.then = Some((4, 8192));

        let image = receive_image(net, &tpl, 10).unwrap();
        assert_eq!(image.len(), 8192);
    }

    #[test]
    fn loop_runs_at_raised_priority() {
        let tpl = FakeTpl::default();
        let mut net = FakeNet::complete_after(1, 4096);
        net.observe_tpl = Some(tpl.level.clone());
        let seen = net.seen_tpl.clone();

        receive_image(net, &tpl, 10).unwrap();
        assert_eq!(seen.get(), Some(FakeTpl::CALLBACK));
    }
}
