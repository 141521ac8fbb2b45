use heapless::Vec;
use md5::{Digest, Md5};
use num_enum::{FromPrimitive, IntoPrimitive};

use super::option_fsm::FsmConfig;
use crate::config::Verifier;
use crate::wire::{PPPPayload, Packet, Payload, ProtocolType};

#[derive(FromPrimitive, IntoPrimitive, Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
enum Code {
    #[num_enum(default)]
    Unknown = 0,
    Challenge = 1,
    Response = 2,
    Success = 3,
    Failure = 4,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum State {
    Closed,
    /// Responder with nothing outstanding, waiting to be challenged.
    AwaitChallenge,
    /// Our challenge is out, waiting for the peer's response.
    ChallengeSent,
    /// Our response is out, waiting for success/failure.
    ResponseSent,
    Opened,
    Failed,
}

pub(crate) const MAX_CHALLENGE: usize = 48;
const HASH_LEN: usize = 16;

/// MD5 over id || secret || challenge-value.
///
/// The challenge length is carried explicitly: the value may legally contain
/// embedded zero bytes.
fn chap_hash(id: u8, secret: &[u8], challenge: &[u8]) -> [u8; HASH_LEN] {
    let mut ctx = Md5::new();
    ctx.update([id]);
    ctx.update(secret);
    ctx.update(challenge);
    ctx.finalize().into()
}

/// Challenge Handshake Authentication Protocol (MD5 only), both directions.
///
/// As challenger we draw entropy and look up peer secrets through the
/// [`Verifier`]; as responder we answer with our configured name/secret,
/// preferring a directory hit for the challenger's name if the verifier has
/// one. A midstream rechallenge is permitted from Opened.
pub(crate) struct Chap<'a> {
    state: State,
    id: u8,
    sent_id: u8,
    retries: u8,
    timer: Option<u16>,
    cfg: FsmConfig,

    name: &'a [u8],
    secret: &'a [u8],
    hostname: &'a [u8],
    verifier: Option<&'a dyn Verifier>,

    generate: bool,
    verify: bool,
    local_done: bool,
    peer_done: bool,

    /// Random value of our outstanding challenge.
    challenge: Vec<u8, MAX_CHALLENGE>,
    /// Id of the challenge we last responded to.
    resp_id: Option<u8>,

    pub(crate) bad_ids: u32,
    pub(crate) malformed: u32,
}

impl<'a> Chap<'a> {
    pub fn new(
        name: &'a [u8],
        secret: &'a [u8],
        hostname: &'a [u8],
        verifier: Option<&'a dyn Verifier>,
        verify: bool,
        cfg: FsmConfig,
    ) -> Self {
        assert!(name.len() <= u8::MAX as usize);
        assert!(secret.len() <= u8::MAX as usize);
        Self {
            state: State::Closed,
            id: 1,
            sent_id: 1,
            retries: 0,
            timer: None,
            cfg,
            name,
            secret,
            hostname,
            verifier,
            generate: false,
            verify,
            local_done: false,
            peer_done: false,
            challenge: Vec::new(),
            resp_id: None,
            bad_ids: 0,
            malformed: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn open(&mut self, generate: bool, tx: impl FnMut(Packet<'_>)) {
        if self.state != State::Closed {
            return;
        }
        self.generate = generate;
        self.local_done = !generate;
        self.peer_done = !self.verify;
        self.retries = 0;

        if self.verify {
            self.state = State::ChallengeSent;
            self.send_challenge(true, tx);
        } else if generate {
            self.state = State::AwaitChallenge;
        } else {
            self.state = State::Opened;
        }
    }

    pub fn abort(&mut self) {
        self.state = State::Closed;
        self.timer = None;
        self.retries = 0;
        self.local_done = false;
        self.peer_done = false;
        self.challenge.clear();
        self.resp_id = None;
    }

    /// Re-verify the peer without dropping the link. Only valid once opened.
    pub fn rechallenge(&mut self, tx: impl FnMut(Packet<'_>)) {
        if self.state != State::Opened || !self.verify {
            return;
        }
        // Any timer left over from an earlier phase is cancelled before the
        // fresh challenge arms its own.
        self.timer = None;
        self.retries = 0;
        self.peer_done = false;
        self.state = State::ChallengeSent;
        self.send_challenge(true, tx);
        debug!("CHAP: rechallenge started");
    }

    pub fn handle(&mut self, pkt: &[u8], tx: impl FnMut(Packet<'_>)) {
        if pkt.len() < 6 {
            warn!("CHAP: packet too short");
            self.malformed = self.malformed.wrapping_add(1);
            return;
        }
        let code = Code::from(pkt[2]);
        let id = pkt[3];
        let len = u16::from_be_bytes(unwrap!(pkt[4..6].try_into())) as usize;
        if len < 4 || len + 2 > pkt.len() {
            warn!("CHAP: packet len too short");
            self.malformed = self.malformed.wrapping_add(1);
            return;
        }
        let payload = &pkt[6..len + 2];

        debug!("CHAP: rx {:?}", code);
        let old_state = self.state;
        match code {
            Code::Challenge => self.received_challenge(id, payload, tx),
            Code::Response => self.received_response(id, payload, tx),
            Code::Success => {
                if self.resp_id == Some(id) {
                    self.resp_id = None;
                    self.local_done = true;
                    info!("CHAP: peer accepted our response");
                    self.maybe_open();
                } else {
                    self.bad_ids = self.bad_ids.wrapping_add(1);
                }
            }
            Code::Failure => {
                if self.resp_id == Some(id) {
                    self.resp_id = None;
                    warn!("CHAP: peer rejected our response");
                    self.fail();
                } else {
                    self.bad_ids = self.bad_ids.wrapping_add(1);
                }
            }
            Code::Unknown => {
                debug!("CHAP: ignoring unknown code");
                self.malformed = self.malformed.wrapping_add(1);
            }
        }

        if old_state != self.state {
            debug!("CHAP: state {:?} -> {:?}", old_state, self.state);
        }
    }

    pub fn tick(&mut self, tx: impl FnMut(Packet<'_>)) {
        let Some(t) = self.timer else { return };
        if t > 1 {
            self.timer = Some(t - 1);
            return;
        }
        self.timer = None;

        if self.state == State::ChallengeSent {
            if self.retries >= self.cfg.max_retries {
                warn!("CHAP: retries exhausted, authentication failed");
                self.fail();
            } else {
                self.retries += 1;
                // Same id, same random value: the challenge was lost.
                self.send_challenge(false, tx);
            }
        }
    }

    fn received_challenge(&mut self, id: u8, payload: &[u8], mut tx: impl FnMut(Packet<'_>)) {
        if !self.generate {
            debug!("CHAP: not configured to answer challenges, ignoring");
            return;
        }
        let Some((value, challenger_name)) = parse_value_name(payload) else {
            self.malformed = self.malformed.wrapping_add(1);
            return;
        };

        // Secret for this challenger: directory lookup first, then our
        // configured secret.
        let secret = match self.verifier.and_then(|v| v.chap_secret(challenger_name)) {
            Some(s) => s,
            None => self.secret,
        };
        if secret.is_empty() {
            warn!("CHAP: no secret for challenger, ignoring challenge");
            return;
        }

        let hash = chap_hash(id, secret, value);
        self.resp_id = Some(id);
        self.local_done = false;
        if matches!(self.state, State::AwaitChallenge | State::ResponseSent | State::Opened) {
            self.state = State::ResponseSent;
        }
        tx(Packet {
            proto: ProtocolType::CHAP,
            payload: Payload::PPP(Code::Response.into(), id, PPPPayload::Chap(&hash, self.name)),
        });
    }

    fn received_response(&mut self, id: u8, payload: &[u8], mut tx: impl FnMut(Packet<'_>)) {
        if self.state != State::ChallengeSent {
            debug!("CHAP: unexpected response in state {:?}", self.state);
            return;
        }
        if id != self.sent_id {
            self.bad_ids = self.bad_ids.wrapping_add(1);
            return;
        }
        let Some((value, responder_name)) = parse_value_name(payload) else {
            self.malformed = self.malformed.wrapping_add(1);
            return;
        };

        let verdict = match self.verifier.and_then(|v| v.chap_secret(responder_name)) {
            Some(secret) => {
                let expected = chap_hash(id, secret, &self.challenge);
                value == expected
            }
            None => {
                warn!("CHAP: unknown responder name");
                false
            }
        };

        if verdict {
            tx(Packet {
                proto: ProtocolType::CHAP,
                payload: Payload::PPP(Code::Success.into(), id, PPPPayload::Raw(&[])),
            });
            self.timer = None;
            self.peer_done = true;
            info!("CHAP: peer verified");
            self.maybe_open();
        } else {
            tx(Packet {
                proto: ProtocolType::CHAP,
                payload: Payload::PPP(Code::Failure.into(), id, PPPPayload::Raw(&[])),
            });
            warn!("CHAP: peer failed verification");
            self.fail();
        }
    }

    fn send_challenge(&mut self, renew: bool, mut tx: impl FnMut(Packet<'_>)) {
        if renew {
            let mut random = [0u8; MAX_CHALLENGE];
            let n = match self.verifier {
                Some(v) => v.chap_challenge(&mut random),
                None => 0,
            };
            if n == 0 {
                warn!("CHAP: no entropy source configured, cannot challenge");
                self.fail();
                return;
            }
            let n = n.min(MAX_CHALLENGE);
            self.challenge.clear();
            unwrap!(self.challenge.extend_from_slice(&random[..n]).ok());
            self.sent_id = self.next_id();
        }

        self.timer = Some(self.cfg.timeout);
        debug!("CHAP: tx Challenge id {}", self.sent_id);
        tx(Packet {
            proto: ProtocolType::CHAP,
            payload: Payload::PPP(
                Code::Challenge.into(),
                self.sent_id,
                PPPPayload::Chap(&self.challenge, self.hostname),
            ),
        });
    }

    fn maybe_open(&mut self) {
        if self.local_done && self.peer_done && self.state != State::Failed {
            self.state = State::Opened;
            self.timer = None;
            self.retries = 0;
        }
    }

    fn fail(&mut self) {
        self.state = State::Failed;
        self.timer = None;
    }

    fn next_id(&mut self) -> u8 {
        self.id = self.id.wrapping_add(1);
        self.id
    }
}

/// value-size(1) | value | name
fn parse_value_name(payload: &[u8]) -> Option<(&[u8], &[u8])> {
    let vlen = *payload.first()? as usize;
    let value = payload.get(1..1 + vlen)?;
    let name = payload.get(1 + vlen..)?;
    Some((value, name))
}
