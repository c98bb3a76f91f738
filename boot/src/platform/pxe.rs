//! pxe.rs — netboot sessions over the PXE Base Code UDP interface

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, info, warn};
use uefi::proto::network::pxe::{BaseCode, DhcpV4Packet, IpFilter, IpFilters, UdpOpFlags};
use uefi::proto::network::IpAddress;
use uefi::table::boot::ScopedProtocol;

use crate::netboot::protocol::{Session, NB_MAX_PACKET, NB_SERVER_PORT};
use crate::netboot::NetbootTransport;

/// A started PXE interface bound to [`NB_SERVER_PORT`].
pub struct PxeTransport<'a> {
    pxe: ScopedProtocol<'a, BaseCode>,
    session: Session,
    rx: [u8; NB_MAX_PACKET],
    tx: [u8; NB_MAX_PACKET],
    running: bool,
}

impl<'a> PxeTransport<'a> {
    /// Start the interface and run DHCP. `None` when either fails.
    pub fn start(mut pxe: ScopedProtocol<'a, BaseCode>, nodename: Option<&str>) -> Option<Self> {
        if let Err(e) = pxe.start(false) {
            warn!(target: "netboot", "PXE start failed: {:?}", e.status());
            return None;
        }
        if let Err(e) = pxe.dhcp(false) {
            warn!(target: "netboot", "DHCP failed: {:?}", e.status());
            let _ = pxe.stop();
            return None;
        }
        let filter = IpFilter::new(IpFilters::STATION_IP | IpFilters::BROADCAST, &[]);
        if let Err(e) = pxe.set_ip_filter(&filter) {
            debug!(target: "netboot", "IP filter not set: {:?}", e.status());
        }

        let name = match nodename {
            Some(name) => String::from(name),
            None => default_nodename(pxe.mode().dhcp_ack.as_ref()),
        };
        info!(target: "netboot", "listening on udp/{}", NB_SERVER_PORT);

        Some(Self {
            pxe,
            session: Session::new(&name),
            rx: [0; NB_MAX_PACKET],
            tx: [0; NB_MAX_PACKET],
            running: true,
        })
    }
}

/// `uniboot-` followed by the interface MAC in lowercase hex.
fn default_nodename(ack: &DhcpV4Packet) -> String {
    mac_nodename(&ack.bootp_hw_addr)
}

fn mac_nodename(hw_addr: &[u8; 16]) -> String {
    let mac: Vec<String> = hw_addr[..6].iter().map(|b| format!("{:02x}", b)).collect();
    format!("uniboot-{}", mac.concat())
}

impl NetbootTransport for PxeTransport<'_> {
    fn nodename(&self) -> &str {
        self.session.nodename()
    }

    fn poll(&mut self) -> bool {
        let mut src_ip = IpAddress::new_v4([0; 4]);
        let mut src_port = 0u16;
        let mut dest_port = NB_SERVER_PORT;

        let len = match self.pxe.udp_read(
            UdpOpFlags::ANY_SRC_IP | UdpOpFlags::ANY_SRC_PORT | UdpOpFlags::USE_FILTER,
            None,
            Some(&mut dest_port),
            Some(&mut src_ip),
            Some(&mut src_port),
            None,
            &mut self.rx,
        ) {
            Ok(len) => len,
            // timeouts and foreign traffic
            Err(_) => return self.session.is_complete(),
        };

        if let Some(reply) = self.session.handle(&self.rx[..len]) {
            if let Some(n) = reply.encode(&mut self.tx) {
                let mut port = NB_SERVER_PORT;
                if let Err(e) = self.pxe.udp_write(
                    UdpOpFlags::empty(),
                    &src_ip,
                    src_port,
                    None,
                    None,
                    Some(&mut port),
                    None,
                    &self.tx[..n],
                ) {
                    debug!(target: "netboot", "reply dropped: {:?}", e.status());
                }
            }
        }
        self.session.is_complete()
    }

    fn received(&self) -> usize {
        self.session.received()
    }

    fn close(&mut self) {
        if self.running {
            let _ = self.pxe.stop();
            self.running = false;
        }
    }

    fn into_image(mut self) -> Vec<u8> {
        self.close();
        self.session.into_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodename_from_hardware_address() {
        let mut hw = [0u8; 16];
        hw[..6].copy_from_slice(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        hw[6] = 0xff;
        assert_eq!(mac_nodename(&hw), "uniboot-525400123456");
    }
}
