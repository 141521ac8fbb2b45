mod chap;
mod ipv4cp;
mod lcp;
mod option_fsm;
mod pap;

use self::chap::{Chap, State as ChapState};
use self::ipv4cp::Ipv4cp;
use self::lcp::Lcp;
use self::option_fsm::{FsmConfig, OptionFsm, State};
use self::pap::{Pap, State as PapState};
use crate::config::{Auth, AuthProtocol, Config, Role};
use crate::wire::{Packet, ProtocolType};
use crate::{InvalidStateError, NotConnectedError};

pub use self::ipv4cp::Ipv4Status;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Dead,
    Establish,
    Auth,
    Network,
    Open,
    /// A sub-protocol gave up (retries exhausted, auth failure). The link
    /// stays here until it is closed and reopened.
    Failed,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub phase: Phase,
    /// True once any authentication demanded by either side has completed.
    pub authenticated: bool,
    /// The peer naked or rejected our demand that it authenticate itself.
    pub auth_refused: bool,
    /// Largest frame the peer will accept; use as the interface MTU.
    pub peer_mru: u16,
    /// IPv4 configuration obtained from IPv4CP. None if IPv4CP is not up.
    pub ipv4: Option<Ipv4Status>,
}

/// The protocol half of an endpoint: LCP, the two auth machines and IPCP,
/// glued together by the phase machine. Transport-agnostic; the pppos/pppoe
/// endpoints own framing and queues around this.
pub(crate) struct Ppp<'a> {
    phase: Phase,
    closing: bool,
    authenticated: bool,
    require_auth: AuthProtocol,
    pub(crate) lcp: OptionFsm<Lcp>,
    pub(crate) pap: Pap<'a>,
    pub(crate) chap: Chap<'a>,
    pub(crate) ipv4cp: OptionFsm<Ipv4cp>,
}

impl<'a> Ppp<'a> {
    pub fn new(config: Config<'a>) -> Self {
        let t = config.tunables;
        let (pap_user, pap_pass) = match config.auth {
            Auth::Pap { username, password } => (username, password),
            _ => (&[][..], &[][..]),
        };
        let (chap_name, chap_secret) = match config.auth {
            Auth::Chap { name, secret } => (name, secret),
            _ => (&[][..], &[][..]),
        };

        Self {
            phase: Phase::Dead,
            closing: false,
            authenticated: false,
            require_auth: config.require_auth,
            lcp: OptionFsm::new(
                Lcp::new(config.auth.protocol(), config.require_auth, config.mru),
                FsmConfig {
                    timeout: t.protocol_timeout,
                    max_retries: t.lcp_max_retries,
                },
            ),
            pap: Pap::new(
                pap_user,
                pap_pass,
                config.verifier,
                config.require_auth == AuthProtocol::Pap,
                FsmConfig {
                    timeout: t.protocol_timeout,
                    max_retries: t.pap_max_retries,
                },
            ),
            chap: Chap::new(
                chap_name,
                chap_secret,
                config.hostname,
                config.verifier,
                config.require_auth == AuthProtocol::Chap,
                FsmConfig {
                    timeout: t.protocol_timeout,
                    max_retries: t.chap_max_retries,
                },
            ),
            ipv4cp: OptionFsm::new(
                Ipv4cp::new(
                    config.local_address,
                    config.peer_address,
                    config.dns_servers,
                    matches!(config.role, Role::Client),
                    t.dns_retry_cap,
                ),
                FsmConfig {
                    timeout: t.protocol_timeout,
                    max_retries: t.ipcp_max_retries,
                },
            ),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> Status {
        Status {
            phase: self.phase,
            authenticated: self.authenticated,
            auth_refused: self.lcp.proto().auth_refused,
            peer_mru: self.lcp.proto().peer_mru,
            ipv4: if self.ipv4cp.state() == State::Opened {
                Some(self.ipv4cp.proto().status())
            } else {
                None
            },
        }
    }

    pub fn link_is_up(&self) -> bool {
        self.phase == Phase::Open
    }

    pub fn open(&mut self) -> Result<(), InvalidStateError> {
        match self.phase {
            Phase::Dead => {
                self.phase = Phase::Establish;
                Ok(())
            }
            _ => Err(InvalidStateError),
        }
    }

    pub fn close(&mut self, mut tx: impl FnMut(Packet<'_>)) -> Result<(), InvalidStateError> {
        match self.phase {
            Phase::Dead => Err(InvalidStateError),
            Phase::Failed => {
                self.reset_all();
                Ok(())
            }
            _ => {
                self.closing = true;
                self.authenticated = false;
                self.pap.abort();
                self.chap.abort();
                self.ipv4cp.abort();
                self.lcp.close(&mut tx);
                if matches!(self.lcp.state(), State::Closed | State::Failed) {
                    self.reset_all();
                }
                Ok(())
            }
        }
    }

    pub fn send_ping(
        &mut self,
        data: &[u8],
        tx: impl FnMut(Packet<'_>),
    ) -> Result<(), NotConnectedError> {
        if self.lcp.state() != State::Opened {
            return Err(NotConnectedError);
        }
        self.lcp.send_echo_request(data, tx);
        Ok(())
    }

    pub fn ping_outstanding(&self) -> Option<u8> {
        self.lcp.ping_outstanding()
    }

    pub fn rechallenge(&mut self, tx: impl FnMut(Packet<'_>)) {
        self.chap.rechallenge(tx);
    }

    pub fn received(&mut self, pkt: &mut [u8], mut tx: impl FnMut(Packet<'_>)) {
        if pkt.len() < 2 {
            return;
        }
        let proto = u16::from_be_bytes(unwrap!(pkt[0..2].try_into()));

        match proto.into() {
            ProtocolType::LCP => self.lcp.handle(pkt, &mut tx),
            ProtocolType::PAP => self.pap.handle(pkt, &mut tx),
            ProtocolType::CHAP => self.chap.handle(pkt, &mut tx),
            ProtocolType::IPv4CP => self.ipv4cp.handle(pkt, &mut tx),
            // Data frames are intercepted by the transport layer.
            ProtocolType::IPv4 => debug!("PPP: stray IPv4 frame in control path"),
            ProtocolType::Unknown => tx(self.lcp.send_protocol_reject(pkt)),
        }
    }

    pub fn tick(&mut self, mut tx: impl FnMut(Packet<'_>)) {
        self.lcp.tick(&mut tx);
        self.pap.tick(&mut tx);
        self.chap.tick(&mut tx);
        self.ipv4cp.tick(&mut tx);
    }

    pub fn poll(&mut self, mut tx: impl FnMut(Packet<'_>)) {
        let old_phase = self.phase;

        if self.closing {
            if matches!(self.lcp.state(), State::Closed | State::Failed) {
                self.reset_all();
                info!("PPP link phase {:?} -> {:?}", old_phase, self.phase);
            }
            return;
        }

        // LCP dropping out from under the upper layers tears them down,
        // whatever phase we were in.
        if matches!(self.phase, Phase::Auth | Phase::Network | Phase::Open) {
            match self.lcp.state() {
                State::Opened => {}
                State::Failed => self.fail(),
                State::Closed => {
                    info!("PPP: link terminated by peer");
                    self.reset_network();
                    self.phase = Phase::Dead;
                }
                _ => {
                    // Peer started renegotiating; redo auth and network.
                    debug!("PPP: LCP renegotiation, restarting upper layers");
                    self.reset_network();
                    self.phase = Phase::Establish;
                }
            }
        }

        match self.phase {
            Phase::Dead | Phase::Failed => {}
            Phase::Establish => {
                if self.lcp.state() == State::Closed {
                    self.lcp.open(&mut tx);
                }

                match self.lcp.state() {
                    State::Failed => self.fail(),
                    State::Opened => {
                        if self.require_auth != AuthProtocol::None && self.lcp.proto().auth_refused
                        {
                            warn!("PPP: peer refused to authenticate, dropping link");
                            self.fail();
                        } else {
                            let generate = self.lcp.proto().auth_required;
                            let verify = self.require_auth;
                            if generate == AuthProtocol::None && verify == AuthProtocol::None {
                                self.authenticated = true;
                                self.phase = Phase::Network;
                                self.ipv4cp.open(&mut tx);
                            } else {
                                self.authenticated = false;
                                self.phase = Phase::Auth;
                                if generate == AuthProtocol::Pap || verify == AuthProtocol::Pap {
                                    self.pap.open(generate == AuthProtocol::Pap, &mut tx);
                                }
                                if generate == AuthProtocol::Chap || verify == AuthProtocol::Chap {
                                    self.chap.open(generate == AuthProtocol::Chap, &mut tx);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Phase::Auth => {
                let generate = self.lcp.proto().auth_required;
                let verify = self.require_auth;
                let pap_needed = generate == AuthProtocol::Pap || verify == AuthProtocol::Pap;
                let chap_needed = generate == AuthProtocol::Chap || verify == AuthProtocol::Chap;

                if (pap_needed && self.pap.state() == PapState::Failed)
                    || (chap_needed && self.chap.state() == ChapState::Failed)
                {
                    warn!("PPP: authentication failed");
                    self.fail();
                } else if (!pap_needed || self.pap.state() == PapState::Opened)
                    && (!chap_needed || self.chap.state() == ChapState::Opened)
                {
                    info!("PPP: authenticated");
                    self.authenticated = true;
                    self.phase = Phase::Network;
                    self.ipv4cp.open(&mut tx);
                }
            }
            Phase::Network => match self.ipv4cp.state() {
                State::Opened => self.phase = Phase::Open,
                State::Failed => self.fail(),
                // Peer bounced IPCP; negotiate again.
                State::Closed => self.ipv4cp.open(&mut tx),
                _ => {}
            },
            Phase::Open => {
                if self.chap.state() == ChapState::Failed {
                    // A failed rechallenge revokes authentication.
                    warn!("PPP: rechallenge failed, dropping link");
                    self.fail();
                } else if self.ipv4cp.state() != State::Opened {
                    self.phase = Phase::Network;
                }
            }
        }

        if old_phase != self.phase {
            info!("PPP link phase {:?} -> {:?}", old_phase, self.phase);
        }
    }

    fn fail(&mut self) {
        self.authenticated = false;
        self.pap.abort();
        self.chap.abort();
        self.ipv4cp.abort();
        self.phase = Phase::Failed;
    }

    fn reset_network(&mut self) {
        self.authenticated = false;
        self.pap.abort();
        self.chap.abort();
        self.ipv4cp.abort();
    }

    fn reset_all(&mut self) {
        self.lcp.abort();
        self.reset_network();
        self.closing = false;
        self.phase = Phase::Dead;
    }

    /// Hard reset to Dead without a terminate handshake.
    pub fn reset(&mut self) {
        self.reset_all();
    }

    /// Sum of reply-id mismatches across all four machines.
    pub fn bad_ids(&self) -> u32 {
        self.lcp
            .bad_ids
            .wrapping_add(self.pap.bad_ids)
            .wrapping_add(self.chap.bad_ids)
            .wrapping_add(self.ipv4cp.bad_ids)
    }

    /// Sum of malformed control packets across all four machines.
    pub fn malformed(&self) -> u32 {
        self.lcp
            .malformed
            .wrapping_add(self.pap.malformed)
            .wrapping_add(self.chap.malformed)
            .wrapping_add(self.ipv4cp.malformed)
    }
}
