use core::net::Ipv4Addr;

use num_enum::{FromPrimitive, IntoPrimitive};

use super::option_fsm::{Protocol, Verdict};
use crate::wire::ProtocolType;

#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
enum OptionCode {
    #[num_enum(default)]
    Unknown = 0,
    IpCompression = 2,
    IpAddress = 3,
    Dns1 = 129,
    Dns2 = 131,
}

/// One negotiated address-valued option of our own configure-request.
struct IpOption {
    address: Ipv4Addr,
    is_rejected: bool,
    naks: u8,
}

impl IpOption {
    fn new(address: Ipv4Addr) -> Self {
        Self {
            address,
            is_rejected: false,
            naks: 0,
        }
    }

    fn get(&self) -> Option<Ipv4Addr> {
        if self.is_rejected || self.address.is_unspecified() {
            None
        } else {
            Some(self.address)
        }
    }

    fn nacked(&mut self, data: &[u8], is_rej: bool, retry_cap: u8) {
        if is_rej {
            self.is_rejected = true;
            return;
        }
        self.naks = self.naks.saturating_add(1);
        match <[u8; 4]>::try_from(data) {
            Ok(data) => {
                let hint = Ipv4Addr::from(data);
                if !hint.is_unspecified() {
                    self.address = hint;
                } else if self.naks > retry_cap {
                    // The peer keeps naking without a usable hint; stop
                    // asking so negotiation can converge.
                    self.is_rejected = true;
                }
            }
            // Peer wants us to use an address that's not 4 bytes.
            // Should never happen, but mark the option as rejected to
            // avoid an endless loop.
            Err(_) => self.is_rejected = true,
        }
    }
}

/// Status of the IPv4 connection.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ipv4Status {
    /// Our address.
    pub address: Option<Ipv4Addr>,
    /// The peer's address. Doubles as the default gateway.
    pub peer_address: Option<Ipv4Addr>,
    /// DNS servers learned from (or assigned by) the peer.
    pub dns_servers: [Option<Ipv4Addr>; 2],
}

pub(crate) struct Ipv4cp {
    /// Include DNS options in our own request (dial-out side).
    request_dns: bool,
    dns_retry_cap: u8,

    /// Address learned from the peer's configure-request.
    peer_address: Ipv4Addr,
    /// Address we hand a peer that requests one with `0.0.0.0`.
    offer_peer: Ipv4Addr,
    /// DNS servers we hand a requesting peer.
    dns_offer: [Ipv4Addr; 2],

    address: IpOption,
    dns_server_1: IpOption,
    dns_server_2: IpOption,

    nak_hint: [u8; 4],
}

impl Ipv4cp {
    pub fn new(
        local_address: Ipv4Addr,
        offer_peer: Ipv4Addr,
        dns: [Ipv4Addr; 2],
        request_dns: bool,
        dns_retry_cap: u8,
    ) -> Self {
        Self {
            request_dns,
            dns_retry_cap,
            peer_address: Ipv4Addr::UNSPECIFIED,
            offer_peer,
            dns_offer: dns,
            address: IpOption::new(local_address),
            dns_server_1: IpOption::new(if request_dns { dns[0] } else { Ipv4Addr::UNSPECIFIED }),
            dns_server_2: IpOption::new(if request_dns { dns[1] } else { Ipv4Addr::UNSPECIFIED }),
            nak_hint: [0; 4],
        }
    }

    pub fn status(&self) -> Ipv4Status {
        let peer_address = if self.peer_address.is_unspecified() {
            // Nothing negotiated; fall back to the configured address.
            if self.offer_peer.is_unspecified() {
                None
            } else {
                Some(self.offer_peer)
            }
        } else {
            Some(self.peer_address)
        };

        Ipv4Status {
            address: self.address.get(),
            peer_address,
            dns_servers: [self.dns_server_1.get(), self.dns_server_2.get()],
        }
    }
}

impl Protocol for Ipv4cp {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::IPv4CP
    }

    fn peer_options_start(&mut self) {}

    fn peer_option_received(&mut self, code: u8, data: &[u8]) -> Verdict<'_> {
        let opt = OptionCode::from(code);
        trace!("IPv4CP: rx option {:?} {:?} {:?}", code, opt, data);
        match opt {
            OptionCode::IpAddress => match <[u8; 4]>::try_from(data) {
                Ok(raw) => {
                    let addr = Ipv4Addr::from(raw);
                    if addr.is_unspecified() {
                        // The peer is asking us for an address.
                        if self.offer_peer.is_unspecified() {
                            Verdict::Rej
                        } else {
                            self.nak_hint = self.offer_peer.octets();
                            Verdict::Nack(&self.nak_hint)
                        }
                    } else {
                        self.peer_address = addr;
                        Verdict::Ack
                    }
                }
                Err(_) => Verdict::Rej,
            },
            OptionCode::Dns1 | OptionCode::Dns2 => match <[u8; 4]>::try_from(data) {
                Ok(raw) => {
                    let offered = self.dns_offer[if opt == OptionCode::Dns1 { 0 } else { 1 }];
                    let addr = Ipv4Addr::from(raw);
                    if addr.is_unspecified() {
                        if offered.is_unspecified() {
                            Verdict::Rej
                        } else {
                            self.nak_hint = offered.octets();
                            Verdict::Nack(&self.nak_hint)
                        }
                    } else {
                        Verdict::Ack
                    }
                }
                Err(_) => Verdict::Rej,
            },
            // Accepted but never used: we impose no compression.
            OptionCode::IpCompression => Verdict::Ack,
            OptionCode::Unknown => Verdict::Rej,
        }
    }

    fn own_options(&mut self, mut f: impl FnMut(u8, &[u8])) {
        if !self.address.is_rejected {
            f(OptionCode::IpAddress.into(), &self.address.address.octets());
        }
        if self.request_dns {
            if !self.dns_server_1.is_rejected {
                f(OptionCode::Dns1.into(), &self.dns_server_1.address.octets());
            }
            if !self.dns_server_2.is_rejected {
                f(OptionCode::Dns2.into(), &self.dns_server_2.address.octets());
            }
        }
    }

    fn own_option_nacked(&mut self, code: u8, data: &[u8], is_rej: bool) {
        let opt = OptionCode::from(code);
        trace!("IPv4CP nak {:?} {:?} {:?} {:?}", code, opt, data, is_rej);
        match opt {
            OptionCode::IpAddress => self.address.nacked(data, is_rej, u8::MAX),
            OptionCode::Dns1 => self.dns_server_1.nacked(data, is_rej, self.dns_retry_cap),
            OptionCode::Dns2 => self.dns_server_2.nacked(data, is_rej, self.dns_retry_cap),
            _ => {}
        }
    }
}
