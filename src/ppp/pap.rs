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
    AuthReq = 1,
    AuthAck = 2,
    AuthNak = 3,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum State {
    Closed,
    /// Our auth-request is out, waiting for the ack.
    ReqSent,
    /// Nothing (more) to send; waiting for the peer's auth-request.
    PeerWait,
    Opened,
    Failed,
}

// Empty message field of an ack/nak: just the msg-length byte.
const EMPTY_MSG: [u8; 1] = [0];

/// Password Authentication Protocol, both directions.
///
/// "generate" means the peer demanded credentials from us during LCP;
/// "verify" means we demanded credentials from the peer. Either, both or
/// neither may be active on one link.
pub(crate) struct Pap<'a> {
    state: State,
    id: u8,
    sent_id: u8,
    retries: u8,
    timer: Option<u16>,
    cfg: FsmConfig,

    username: &'a [u8],
    password: &'a [u8],
    verifier: Option<&'a dyn Verifier>,

    generate: bool,
    verify: bool,
    local_done: bool,
    peer_done: bool,

    /// Peer naked our credentials at least once.
    pub(crate) naked: bool,
    pub(crate) bad_ids: u32,
    pub(crate) malformed: u32,
}

impl<'a> Pap<'a> {
    pub fn new(
        username: &'a [u8],
        password: &'a [u8],
        verifier: Option<&'a dyn Verifier>,
        verify: bool,
        cfg: FsmConfig,
    ) -> Self {
        assert!(username.len() <= u8::MAX as usize);
        assert!(password.len() <= u8::MAX as usize);
        Self {
            state: State::Closed,
            id: 1,
            sent_id: 1,
            retries: 0,
            timer: None,
            cfg,
            username,
            password,
            verifier,
            generate: false,
            verify,
            local_done: false,
            peer_done: false,
            naked: false,
            bad_ids: 0,
            malformed: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn open(&mut self, generate: bool, mut tx: impl FnMut(Packet<'_>)) {
        if self.state != State::Closed {
            return;
        }
        self.generate = generate;
        self.local_done = !generate;
        self.peer_done = !self.verify;
        self.retries = 0;

        if generate {
            self.sent_id = self.next_id();
            self.timer = Some(self.cfg.timeout);
            self.state = State::ReqSent;
            tx(self.send_auth_request());
        } else if self.verify {
            self.state = State::PeerWait;
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
    }

    pub fn handle(&mut self, pkt: &[u8], mut tx: impl FnMut(Packet<'_>)) {
        if pkt.len() < 6 {
            warn!("PAP: packet too short");
            self.malformed = self.malformed.wrapping_add(1);
            return;
        }
        let code = Code::from(pkt[2]);
        let id = pkt[3];
        let len = u16::from_be_bytes(unwrap!(pkt[4..6].try_into())) as usize;
        if len < 4 || len + 2 > pkt.len() {
            warn!("PAP: packet len too short");
            self.malformed = self.malformed.wrapping_add(1);
            return;
        }
        let payload = &pkt[6..len + 2];

        debug!("PAP: rx {:?}", code);
        let old_state = self.state;
        match (code, self.state) {
            (Code::AuthAck, State::ReqSent) => {
                if id != self.sent_id {
                    self.bad_ids = self.bad_ids.wrapping_add(1);
                    return;
                }
                self.local_done = true;
                self.timer = None;
                self.state = if self.peer_done { State::Opened } else { State::PeerWait };
            }
            (Code::AuthNak, State::ReqSent) => {
                if id != self.sent_id {
                    self.bad_ids = self.bad_ids.wrapping_add(1);
                    return;
                }
                warn!("PAP: peer naked our credentials");
                self.naked = true;
                self.sent_id = self.next_id();
                self.timer = Some(self.cfg.timeout);
                tx(self.send_auth_request());
            }
            (Code::AuthReq, State::ReqSent) | (Code::AuthReq, State::PeerWait) => {
                let ok = match parse_auth_request(payload) {
                    Some((user, pass)) => match self.verifier {
                        // No verifier but the peer insists on presenting
                        // credentials: wave them through.
                        None if !self.verify => true,
                        None => {
                            warn!("PAP: verification demanded but no verifier configured");
                            false
                        }
                        Some(v) => v.verify_pap(user, pass),
                    },
                    None => {
                        self.malformed = self.malformed.wrapping_add(1);
                        false
                    }
                };

                if ok {
                    tx(self.send_result(Code::AuthAck, id));
                    self.peer_done = true;
                    if self.local_done {
                        self.timer = None;
                        self.state = State::Opened;
                    }
                } else {
                    info!("PAP: rejecting peer credentials");
                    tx(self.send_result(Code::AuthNak, id));
                }
            }
            // A repeated auth-request after we opened: the ack was lost.
            (Code::AuthReq, State::Opened) => tx(self.send_result(Code::AuthAck, id)),
            x => debug!("PAP: ignoring {:?} in state {:?}", x, self.state),
        }

        if old_state != self.state {
            debug!("PAP: state {:?} -> {:?}", old_state, self.state);
        }
    }

    pub fn tick(&mut self, mut tx: impl FnMut(Packet<'_>)) {
        let Some(t) = self.timer else { return };
        if t > 1 {
            self.timer = Some(t - 1);
            return;
        }
        self.timer = None;

        if self.state == State::ReqSent {
            if self.retries >= self.cfg.max_retries {
                warn!("PAP: retries exhausted, authentication failed");
                self.state = State::Failed;
            } else {
                self.retries += 1;
                self.timer = Some(self.cfg.timeout);
                tx(self.send_auth_request());
            }
        }
    }

    fn next_id(&mut self) -> u8 {
        self.id = self.id.wrapping_add(1);
        self.id
    }

    fn send_auth_request(&mut self) -> Packet<'a> {
        debug!("PAP: tx {:?} id {}", Code::AuthReq, self.sent_id);
        Packet {
            proto: ProtocolType::PAP,
            payload: Payload::PPP(
                Code::AuthReq.into(),
                self.sent_id,
                PPPPayload::Pap(self.username, self.password),
            ),
        }
    }

    fn send_result(&mut self, code: Code, id: u8) -> Packet<'static> {
        debug!("PAP: tx {:?} id {}", code, id);
        Packet {
            proto: ProtocolType::PAP,
            payload: Payload::PPP(code.into(), id, PPPPayload::Raw(&EMPTY_MSG)),
        }
    }
}

fn parse_auth_request(payload: &[u8]) -> Option<(&[u8], &[u8])> {
    let ulen = *payload.first()? as usize;
    let user = payload.get(1..1 + ulen)?;
    let plen = *payload.get(1 + ulen)? as usize;
    let pass = payload.get(2 + ulen..2 + ulen + plen)?;
    Some((user, pass))
}
