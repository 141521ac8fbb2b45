use core::net::Ipv4Addr;

/// Which end of the link we are.
///
/// The link itself is symmetric; the role only decides who asks for
/// addresses and who offers them during IPCP.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Dial-out side: requests an address (and DNS servers) from the peer.
    Client,
    /// Dial-in side: offers the peer an address and DNS servers.
    Server,
}

/// An authentication protocol, as negotiated in the LCP auth option.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthProtocol {
    None,
    Pap,
    Chap,
}

/// Credentials this endpoint presents when the peer demands authentication.
#[derive(Copy, Clone)]
pub enum Auth<'a> {
    None,
    Pap {
        username: &'a [u8],
        password: &'a [u8],
    },
    Chap {
        name: &'a [u8],
        secret: &'a [u8],
    },
}

impl Auth<'_> {
    pub(crate) fn protocol(&self) -> AuthProtocol {
        match self {
            Auth::None => AuthProtocol::None,
            Auth::Pap { .. } => AuthProtocol::Pap,
            Auth::Chap { .. } => AuthProtocol::Chap,
        }
    }
}

/// Callbacks used when this endpoint verifies the peer.
///
/// Only the methods for the configured [`Config::require_auth`] protocol are
/// ever called. `chap_secret` doubles as the responder-side secret directory:
/// when answering an incoming challenge the challenger's name is looked up
/// here first, falling back to the secret in [`Auth::Chap`].
pub trait Verifier {
    /// Check a PAP username/password pair.
    fn verify_pap(&self, username: &[u8], password: &[u8]) -> bool {
        let _ = (username, password);
        false
    }

    /// Return the CHAP secret for `name`, or `None` if unknown.
    fn chap_secret<'s>(&'s self, name: &[u8]) -> Option<&'s [u8]> {
        let _ = name;
        None
    }

    /// Fill `out` with random challenge bytes, returning how many were
    /// written. The value may contain embedded zero bytes; its length is
    /// carried explicitly on the wire.
    fn chap_challenge(&self, out: &mut [u8]) -> usize {
        let _ = out;
        0
    }
}

/// Timing and retry knobs. All durations are in units of [`tick()`] calls.
///
/// [`tick()`]: crate::pppos::PPPoS::tick
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tunables {
    /// Ticks between retransmissions of an unanswered control packet.
    pub protocol_timeout: u16,
    /// Ticks of serial silence before a partial inbound frame is abandoned.
    pub inter_byte_timeout: u16,
    pub lcp_max_retries: u8,
    pub pap_max_retries: u8,
    pub chap_max_retries: u8,
    pub ipcp_max_retries: u8,
    /// How many NAK rounds to spend insisting on DNS servers before
    /// accepting whatever the peer last offered.
    pub dns_retry_cap: u8,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            protocol_timeout: 30,
            inter_byte_timeout: 3,
            lcp_max_retries: 20,
            pap_max_retries: 4,
            chap_max_retries: 20,
            ipcp_max_retries: 20,
            dns_retry_cap: 2,
        }
    }
}

/// Static configuration for one PPP endpoint.
#[derive(Copy, Clone)]
pub struct Config<'a> {
    pub role: Role,
    /// Credentials we present if the peer demands authentication.
    pub auth: Auth<'a>,
    /// Authentication we demand from the peer (advertised in LCP).
    pub require_auth: AuthProtocol,
    /// Secret directory and entropy source; required when `require_auth`
    /// is not `None`.
    pub verifier: Option<&'a dyn Verifier>,
    /// Name sent along with CHAP challenges we issue.
    pub hostname: &'a [u8],
    /// Our IPv4 address. `0.0.0.0` means ask the peer for one.
    pub local_address: Ipv4Addr,
    /// Address offered to a peer that requests one. `0.0.0.0` means we have
    /// none to offer.
    pub peer_address: Ipv4Addr,
    /// DNS servers offered to the peer (server) or defaults to request
    /// (client, `0.0.0.0` to ask).
    pub dns_servers: [Ipv4Addr; 2],
    /// Maximum receive unit we advertise.
    pub mru: u16,
    pub tunables: Tunables,
}

impl<'a> Config<'a> {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            auth: Auth::None,
            require_auth: AuthProtocol::None,
            verifier: None,
            hostname: b"",
            local_address: Ipv4Addr::UNSPECIFIED,
            peer_address: Ipv4Addr::UNSPECIFIED,
            dns_servers: [Ipv4Addr::UNSPECIFIED; 2],
            mru: 1500,
            tunables: Tunables::default(),
        }
    }
}
