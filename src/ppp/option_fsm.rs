use heapless::Vec;

use crate::wire::{
    Code, OptionVal, Options, PPPPayload, Packet, Payload, ProtocolType, MAX_OPTIONS,
    MAX_OPTION_LEN,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Verdict<'a> {
    Ack,
    Nack(&'a [u8]),
    Rej,
}

pub(crate) trait Protocol {
    fn protocol(&self) -> ProtocolType;

    fn own_options(&mut self, f: impl FnMut(u8, &[u8]));
    fn own_option_nacked(&mut self, code: u8, data: &[u8], is_rej: bool);

    fn peer_options_start(&mut self);
    fn peer_option_received(&mut self, code: u8, data: &[u8]) -> Verdict;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum State {
    Closed,
    ReqSent,
    AckReceived,
    AckSent,
    Opened,
    Stopping,
    Failed,
}

/// Retransmission knobs for one machine instance.
#[derive(Debug, Copy, Clone)]
pub(crate) struct FsmConfig {
    pub timeout: u16,
    pub max_retries: u8,
}

/// The configure-request/ack/nak/reject machine shared by LCP and IPCP.
///
/// Protocol-specific option handling is delegated through [`Protocol`]; this
/// type owns identifiers, the retransmit timer and the retry budget. A reply
/// whose id does not match the outstanding request id is dropped without
/// touching any state.
pub(crate) struct OptionFsm<P> {
    id: u8,
    sent_id: u8,
    state: State,
    retries: u8,
    timer: Option<u16>,
    cfg: FsmConfig,
    pending_echo: Option<u8>,
    pub(crate) bad_ids: u32,
    pub(crate) malformed: u32,
    proto: P,
}

impl<P: Protocol> OptionFsm<P> {
    pub fn new(proto: P, cfg: FsmConfig) -> Self {
        Self {
            id: 1,
            sent_id: 1,
            state: State::Closed,
            retries: 0,
            timer: None,
            cfg,
            pending_echo: None,
            bad_ids: 0,
            malformed: 0,
            proto,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn proto(&self) -> &P {
        &self.proto
    }

    pub fn _proto_mut(&mut self) -> &mut P {
        &mut self.proto
    }

    pub fn ping_outstanding(&self) -> Option<u8> {
        self.pending_echo
    }

    pub fn open(&mut self, mut tx: impl FnMut(Packet<'_>)) {
        if self.state == State::Closed {
            self.retries = 0;
            self.pending_echo = None;
            self.state = State::ReqSent;
            tx(self.send_configure_request(true));
        }
    }

    /// Start a graceful shutdown: send terminate-request and wait for the
    /// ack (or for the retry budget to run out).
    pub fn close(&mut self, mut tx: impl FnMut(Packet<'_>)) {
        match self.state {
            State::Closed | State::Stopping => {}
            State::Failed => self.state = State::Closed,
            _ => {
                self.retries = 0;
                self.sent_id = self.next_id();
                self.timer = Some(self.cfg.timeout);
                self.state = State::Stopping;
                tx(self.send_terminate_request());
            }
        }
    }

    /// Drop back to Closed immediately, without telling the peer.
    pub fn abort(&mut self) {
        self.state = State::Closed;
        self.timer = None;
        self.retries = 0;
        self.pending_echo = None;
    }

    pub fn handle(&mut self, pkt: &mut [u8], mut tx: impl FnMut(Packet<'_>)) {
        if pkt.len() < 6 {
            warn!("PPP packet too short");
            self.malformed = self.malformed.wrapping_add(1);
            return;
        }
        let code = Code::from(pkt[2]);
        let id = pkt[3];
        let len = u16::from_be_bytes(unwrap!(pkt[4..6].try_into())) as usize;
        if len < 4 || len + 2 > pkt.len() {
            warn!("PPP packet len too short");
            self.malformed = self.malformed.wrapping_add(1);
            return;
        }
        let pkt = &mut pkt[..len + 2];

        // Replies must carry the id of our outstanding request; anything
        // else is stale and must not disturb the machine or its timer.
        if matches!(code, Code::ConfigureAck | Code::ConfigureNack | Code::ConfigureRej)
            && id != self.sent_id
        {
            self.bad_ids = self.bad_ids.wrapping_add(1);
            warn!(
                "{:?}: dropping {:?} id {} (expected {})",
                self.proto.protocol(),
                code,
                id,
                self.sent_id
            );
            return;
        }

        debug!("{:?}: rx {:?}", self.proto.protocol(), code);
        let old_state = self.state;
        match (code, self.state) {
            // reply EchoReq on state Opened, ignore in all other states (including Closed!)
            (Code::EchoReq, State::Opened) => tx(self.send_echo_reply(pkt)),
            (Code::EchoReq, x) => {
                debug!("ignoring unexpected EchoReq in state {:?}", x)
            }

            (Code::EchoReply, _) => {
                if self.pending_echo == Some(id) {
                    self.pending_echo = None;
                    debug!("{:?}: ping id {} answered", self.proto.protocol(), id);
                }
            }

            // DiscardReqs are, well, discarded.
            (Code::DiscardReq, _) => {}

            (_, State::Failed) => {}

            // in state Closed, reply to any packet with TerminateAck (except to EchoReq!)
            (_, State::Closed) => tx(self.send_terminate_ack(id)),

            // we're on our way out; don't renegotiate
            (Code::ConfigureReq, State::Stopping) => {}

            (Code::ConfigureReq, _) => {
                if let Some(resp) = self.received_configure_req(pkt) {
                    let ack_byte: u8 = Code::ConfigureAck.into();
                    let acked = matches!(&resp.payload, Payload::PPP(c, _, _) if *c == ack_byte);
                    tx(resp);

                    match (acked, self.state) {
                        (_, State::Closed) | (_, State::Stopping) | (_, State::Failed) => {
                            unreachable!()
                        }
                        (true, State::ReqSent) => self.state = State::AckSent,
                        (true, State::AckReceived) => {
                            self.state = State::Opened;
                            self.timer = None;
                            self.retries = 0;
                        }
                        (true, State::AckSent) => self.state = State::AckSent,
                        (true, State::Opened) => {
                            // Peer renegotiates.
                            self.state = State::AckSent;
                            tx(self.send_configure_request(true));
                        }
                        (false, State::AckSent) => self.state = State::ReqSent,
                        (false, State::Opened) => {
                            self.state = State::ReqSent;
                            tx(self.send_configure_request(true));
                        }
                        (false, _) => {}
                    }
                }
            }

            (Code::ConfigureAck, State::ReqSent) => {
                self.state = State::AckReceived;
                self.timer = None;
            }
            (Code::ConfigureAck, State::AckSent) => {
                self.state = State::Opened;
                self.timer = None;
                self.retries = 0;
            }
            (Code::ConfigureAck, State::AckReceived) | (Code::ConfigureAck, State::Opened) => {
                // Out of sync; renegotiate.
                self.state = State::ReqSent;
                tx(self.send_configure_request(true));
            }

            (Code::ConfigureNack, s) | (Code::ConfigureRej, s) if s != State::Stopping => {
                let is_rej = code == Code::ConfigureRej;
                let body = &pkt[6..];

                if parse_options(body, |code, data| {
                    self.proto.own_option_nacked(code, data, is_rej)
                })
                .is_err()
                {
                    self.malformed = self.malformed.wrapping_add(1);
                    return;
                }

                match self.state {
                    State::AckSent => {}
                    _ => self.state = State::ReqSent,
                }
                // Options changed, so the next request is a fresh one.
                self.retries = 0;
                tx(self.send_configure_request(true));
            }

            (Code::TerminateReq, State::Opened) | (Code::TerminateReq, State::Stopping) => {
                self.state = State::Closed;
                self.timer = None;
                tx(self.send_terminate_ack(id));
            }
            (Code::TerminateReq, _) => {
                self.state = State::ReqSent;
                tx(self.send_terminate_ack(id));
            }

            (Code::TerminateAck, State::Stopping) => {
                self.state = State::Closed;
                self.timer = None;
                info!("{:?}: terminated", self.proto.protocol());
            }
            (Code::TerminateAck, _) => {}

            (Code::CodeRej, _) | (Code::ProtocolRej, _) => {
                warn!("{:?}: peer rejected our packet ({:?})", self.proto.protocol(), code);
            }

            (Code::Unknown, _) => tx(self.send_code_reject(pkt)),

            x => debug!("ignoring unexpected packet {:?} in state {:?}", x, self.state),
        };

        if old_state != self.state {
            debug!(
                "{:?}: state {:?} -> {:?}",
                self.proto.protocol(),
                old_state,
                self.state
            );
        }
    }

    /// Drive the retransmit timer by one tick.
    pub fn tick(&mut self, mut tx: impl FnMut(Packet<'_>)) {
        let Some(t) = self.timer else { return };
        if t > 1 {
            self.timer = Some(t - 1);
            return;
        }
        self.timer = None;

        match self.state {
            State::ReqSent | State::AckSent => {
                if self.retries >= self.cfg.max_retries {
                    warn!("{:?}: retries exhausted, giving up", self.proto.protocol());
                    self.state = State::Failed;
                } else {
                    self.retries += 1;
                    debug!(
                        "{:?}: retransmit ConfigureReq id {} (try {})",
                        self.proto.protocol(),
                        self.sent_id,
                        self.retries
                    );
                    // Same id: it's the same request, just lost.
                    tx(self.send_configure_request(false));
                }
            }
            State::Stopping => {
                if self.retries >= self.cfg.max_retries {
                    self.state = State::Closed;
                } else {
                    self.retries += 1;
                    self.timer = Some(self.cfg.timeout);
                    tx(self.send_terminate_request());
                }
            }
            _ => {}
        }
    }

    fn next_id(&mut self) -> u8 {
        self.id = self.id.wrapping_add(1);
        self.id
    }

    fn send_configure_request(&mut self, renew: bool) -> Packet<'static> {
        if renew {
            self.sent_id = self.next_id();
        }

        let mut opts: Vec<OptionVal, MAX_OPTIONS> = Vec::new();
        let mut overflow = false;
        self.proto.own_options(|code, data| {
            if opts.push(OptionVal::new(code, data)).is_err() {
                overflow = true;
            }
        });
        if overflow {
            warn!("tx ConfigureReq: too many options, truncated");
        }

        self.timer = Some(self.cfg.timeout);
        Packet {
            proto: self.proto.protocol(),
            payload: Payload::PPP(
                Code::ConfigureReq.into(),
                self.sent_id,
                PPPPayload::Options(Options(opts)),
            ),
        }
    }

    fn send_terminate_request(&mut self) -> Packet<'static> {
        Packet {
            proto: self.proto.protocol(),
            payload: Payload::PPP(Code::TerminateReq.into(), self.sent_id, PPPPayload::Raw(&[])),
        }
    }

    fn send_terminate_ack(&mut self, id: u8) -> Packet<'static> {
        Packet {
            proto: self.proto.protocol(),
            payload: Payload::PPP(Code::TerminateAck.into(), id, PPPPayload::Raw(&[])),
        }
    }

    fn send_code_reject<'a>(&mut self, pkt: &'a [u8]) -> Packet<'a> {
        Packet {
            proto: self.proto.protocol(),
            payload: Payload::PPP(Code::CodeRej.into(), self.next_id(), PPPPayload::Raw(&pkt[2..])),
        }
    }

    // TODO maybe this should be in PPP because it's only for LCP
    pub fn send_protocol_reject<'a>(&mut self, pkt: &'a [u8]) -> Packet<'a> {
        Packet {
            proto: self.proto.protocol(),
            payload: Payload::PPP(Code::ProtocolRej.into(), self.next_id(), PPPPayload::Raw(pkt)),
        }
    }

    /// Send an LCP echo-request carrying `data`, remembering its id so a
    /// matching reply can be recognized.
    pub fn send_echo_request(&mut self, data: &[u8], mut tx: impl FnMut(Packet<'_>)) {
        let mut payload: Vec<u8, 64> = Vec::new();
        // Magic number: we always emit zero.
        let _ = payload.extend_from_slice(&[0; 4]);
        let n = data.len().min(payload.capacity() - payload.len());
        let _ = payload.extend_from_slice(&data[..n]);

        let id = self.next_id();
        self.pending_echo = Some(id);
        tx(Packet {
            proto: self.proto.protocol(),
            payload: Payload::PPP(Code::EchoReq.into(), id, PPPPayload::Raw(&payload)),
        });
    }

    fn send_echo_reply<'a>(&mut self, pkt: &'a mut [u8]) -> Packet<'a> {
        pkt[2] = Code::EchoReply.into();
        // Replies carry a zeroed magic number.
        if pkt.len() >= 10 {
            pkt[6..10].fill(0);
        }
        Packet {
            proto: self.proto.protocol(),
            payload: Payload::Raw(&pkt[2..]),
        }
    }

    fn received_configure_req(&mut self, pkt: &[u8]) -> Option<Packet<'static>> {
        let id = pkt[3];
        let body = &pkt[6..];

        let mut code = Code::ConfigureAck;
        let mut opts: Vec<OptionVal, MAX_OPTIONS> = Vec::new();
        let mut overflow = false;

        self.proto.peer_options_start();
        let parsed = parse_options(body, |ocode, odata| {
            let (ret_code, data) = match self.proto.peer_option_received(ocode, odata) {
                Verdict::Ack => (Code::ConfigureAck, odata),
                Verdict::Nack(data) => (Code::ConfigureNack, data),
                Verdict::Rej => (Code::ConfigureRej, odata),
            };

            // Rejects trump naks, naks trump acks; the reply lists only
            // options at the winning severity.
            if code < ret_code {
                code = ret_code;
                opts.clear();
            }

            if code == ret_code {
                if data.len() > MAX_OPTION_LEN {
                    overflow = true;
                } else if opts.push(OptionVal::new(ocode, data)).is_err() {
                    overflow = true;
                }
            }
        });

        if parsed.is_err() || overflow {
            // Don't reply to a request we couldn't fully parse; the peer
            // will retransmit.
            self.malformed = self.malformed.wrapping_add(1);
            warn!("{:?}: dropped unparseable ConfigureReq", self.proto.protocol());
            return None;
        }

        Some(Packet {
            proto: self.proto.protocol(),
            payload: Payload::PPP(code.into(), id, PPPPayload::Options(Options(opts))),
        })
    }
}

/// Walk a TLV option list, validating each length against the remaining
/// payload. Any inconsistency fails the whole list.
pub(crate) fn parse_options(
    mut pkt: &[u8],
    mut f: impl FnMut(u8, &[u8]),
) -> Result<(), MalformedError> {
    while !pkt.is_empty() {
        if pkt.len() < 2 {
            return Err(MalformedError);
        }

        let code = pkt[0];
        let len = pkt[1] as usize;

        if pkt.len() < len {
            return Err(MalformedError);
        }
        if len < 2 {
            return Err(MalformedError);
        }

        let data = &pkt[2..len];
        f(code, data);
        pkt = &pkt[len..];
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MalformedError;

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec as HVec;

    const TIMEOUT: u16 = 5;
    const MAX_RETRIES: u8 = 3;

    struct Stub {
        mru_nacked: u32,
        rejected: HVec<u8, 8>,
    }

    impl Stub {
        fn new() -> Self {
            Self {
                mru_nacked: 0,
                rejected: HVec::new(),
            }
        }
    }

    impl Protocol for Stub {
        fn protocol(&self) -> ProtocolType {
            ProtocolType::LCP
        }

        fn own_options(&mut self, mut f: impl FnMut(u8, &[u8])) {
            f(1, &[0x05, 0xdc]);
        }

        fn own_option_nacked(&mut self, code: u8, _data: &[u8], is_rej: bool) {
            if is_rej {
                self.rejected.push(code).unwrap();
            } else if code == 1 {
                self.mru_nacked += 1;
            }
        }

        fn peer_options_start(&mut self) {}

        fn peer_option_received(&mut self, code: u8, _data: &[u8]) -> Verdict {
            match code {
                1 => Verdict::Ack,
                5 => Verdict::Nack(&[0xaa]),
                _ => Verdict::Rej,
            }
        }
    }

    type Out = HVec<HVec<u8, 128>, 8>;

    fn fsm() -> OptionFsm<Stub> {
        OptionFsm::new(
            Stub::new(),
            FsmConfig {
                timeout: TIMEOUT,
                max_retries: MAX_RETRIES,
            },
        )
    }

    fn cap(out: &mut Out) -> impl FnMut(Packet<'_>) + '_ {
        |pkt: Packet<'_>| {
            let mut v: HVec<u8, 128> = HVec::new();
            v.resize(pkt.buffer_len(), 0).unwrap();
            pkt.emit(&mut v);
            out.push(v).unwrap();
        }
    }

    fn pkt(code: u8, id: u8, body: &[u8]) -> HVec<u8, 128> {
        let mut v: HVec<u8, 128> = HVec::new();
        v.extend_from_slice(&[0xc0, 0x21, code, id]).unwrap();
        v.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes()).unwrap();
        v.extend_from_slice(body).unwrap();
        v
    }

    /// (code, id, payload)
    fn parse(frame: &[u8]) -> (u8, u8, &[u8]) {
        (frame[2], frame[3], &frame[6..])
    }

    fn open_fully(f: &mut OptionFsm<Stub>) -> u8 {
        let mut out = Out::new();
        f.open(cap(&mut out));
        let (code, id, _) = parse(&out[0]);
        assert_eq!(code, 1);

        let mut out = Out::new();
        let mut peer_req = pkt(1, 0x42, &[1, 4, 0x05, 0xdc]);
        f.handle(&mut peer_req, cap(&mut out));
        assert_eq!(parse(&out[0]).0, 2); // we acked
        assert_eq!(f.state(), State::AckSent);

        let mut out = Out::new();
        let mut ack = pkt(2, id, &[1, 4, 0x05, 0xdc]);
        f.handle(&mut ack, cap(&mut out));
        assert_eq!(f.state(), State::Opened);
        id
    }

    #[test]
    fn open_negotiation_completes() {
        let mut f = fsm();
        open_fully(&mut f);
    }

    #[test]
    fn ids_increment_per_fresh_request() {
        let mut f = fsm();
        let mut out = Out::new();
        f.open(cap(&mut out));
        let (_, first_id, _) = parse(&out[0]);

        // A nak makes the fsm re-request with the next id.
        let mut out = Out::new();
        let mut nak = pkt(3, first_id, &[1, 4, 0x02, 0x00]);
        f.handle(&mut nak, cap(&mut out));
        let (code, second_id, _) = parse(&out[0]);
        assert_eq!(code, 1);
        assert_eq!(second_id, first_id.wrapping_add(1));
        assert_eq!(f.proto().mru_nacked, 1);
    }

    #[test]
    fn retransmit_keeps_id_and_respects_budget() {
        let mut f = fsm();
        let mut out = Out::new();
        f.open(cap(&mut out));
        let (_, id, _) = parse(&out[0]);

        let mut sends = 0;
        for _ in 0..((TIMEOUT as usize + 1) * (MAX_RETRIES as usize + 2)) {
            let mut out = Out::new();
            f.tick(cap(&mut out));
            for frame in &out {
                let (code, rid, _) = parse(frame);
                assert_eq!(code, 1);
                assert_eq!(rid, id, "retransmit must not change the id");
                sends += 1;
            }
        }
        assert_eq!(sends, MAX_RETRIES as usize);
        assert_eq!(f.state(), State::Failed);
    }

    #[test]
    fn mismatched_ack_id_is_dropped() {
        let mut f = fsm();
        let mut out = Out::new();
        f.open(cap(&mut out));
        let (_, id, _) = parse(&out[0]);

        let mut out = Out::new();
        let mut ack = pkt(2, id.wrapping_add(7), &[1, 4, 0x05, 0xdc]);
        f.handle(&mut ack, cap(&mut out));
        assert!(out.is_empty());
        assert_eq!(f.state(), State::ReqSent);
        assert_eq!(f.bad_ids, 1);

        // The real ack still works afterwards.
        let mut out = Out::new();
        let mut ack = pkt(2, id, &[1, 4, 0x05, 0xdc]);
        f.handle(&mut ack, cap(&mut out));
        assert_eq!(f.state(), State::AckReceived);
    }

    #[test]
    fn reject_takes_precedence_over_nak() {
        let mut f = fsm();
        let mut out = Out::new();
        f.open(cap(&mut out));

        // Option 5 would be naked, option 99 is unknown: the reply must be
        // a reject listing only the unknown option.
        let mut req = pkt(1, 9, &[5, 3, 0x01, 99, 4, 0xde, 0xad]);
        let mut out = Out::new();
        f.handle(&mut req, cap(&mut out));
        let (code, id, body) = parse(&out[0]);
        assert_eq!(code, 4);
        assert_eq!(id, 9);
        assert_eq!(body, &[99, 4, 0xde, 0xad]);
        assert_eq!(f.state(), State::ReqSent);
    }

    #[test]
    fn malformed_request_gets_no_reply() {
        let mut f = fsm();
        let mut out = Out::new();
        f.open(cap(&mut out));

        // Option length runs past the payload.
        let mut req = pkt(1, 9, &[1, 40, 0x05]);
        let mut out = Out::new();
        f.handle(&mut req, cap(&mut out));
        assert!(out.is_empty());
        assert_eq!(f.malformed, 1);
    }

    #[test]
    fn echo_request_answered_with_zeroed_magic() {
        let mut f = fsm();
        open_fully(&mut f);

        let mut req = pkt(9, 0x55, &[0x12, 0x34, 0x56, 0x78, b'h', b'i']);
        let mut out = Out::new();
        f.handle(&mut req, cap(&mut out));
        let (code, id, body) = parse(&out[0]);
        assert_eq!(code, 10);
        assert_eq!(id, 0x55);
        assert_eq!(body, &[0, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn ping_id_clears_on_matching_reply() {
        let mut f = fsm();
        open_fully(&mut f);

        let mut out = Out::new();
        f.send_echo_request(b"x", cap(&mut out));
        let (code, id, body) = parse(&out[0]);
        assert_eq!(code, 9);
        assert_eq!(body, &[0, 0, 0, 0, b'x']);
        assert_eq!(f.ping_outstanding(), Some(id));

        // A reply with the wrong id is ignored.
        let mut reply = pkt(10, id.wrapping_add(1), &[0, 0, 0, 0, b'x']);
        f.handle(&mut reply, |_| panic!("no tx expected"));
        assert_eq!(f.ping_outstanding(), Some(id));

        let mut reply = pkt(10, id, &[0, 0, 0, 0, b'x']);
        f.handle(&mut reply, |_| panic!("no tx expected"));
        assert_eq!(f.ping_outstanding(), None);
    }

    #[test]
    fn close_handshake() {
        let mut f = fsm();
        open_fully(&mut f);

        let mut out = Out::new();
        f.close(cap(&mut out));
        let (code, id, _) = parse(&out[0]);
        assert_eq!(code, 5);
        assert_eq!(f.state(), State::Stopping);

        let mut ack = pkt(6, id, &[]);
        f.handle(&mut ack, |_| panic!("no tx expected"));
        assert_eq!(f.state(), State::Closed);
    }

    #[test]
    fn close_gives_up_after_retries() {
        let mut f = fsm();
        open_fully(&mut f);

        let mut out = Out::new();
        f.close(cap(&mut out));
        for _ in 0..((TIMEOUT as usize + 1) * (MAX_RETRIES as usize + 2)) {
            let mut out = Out::new();
            f.tick(cap(&mut out));
        }
        assert_eq!(f.state(), State::Closed);
    }

    #[test]
    fn peer_terminate_in_opened() {
        let mut f = fsm();
        open_fully(&mut f);

        let mut req = pkt(5, 9, &[]);
        let mut out = Out::new();
        f.handle(&mut req, cap(&mut out));
        let (code, id, _) = parse(&out[0]);
        assert_eq!(code, 6);
        assert_eq!(id, 9);
        assert_eq!(f.state(), State::Closed);
    }

    #[test]
    fn unknown_code_is_code_rejected() {
        let mut f = fsm();
        open_fully(&mut f);

        let mut req = pkt(0x0d, 3, &[0xab]);
        let mut out = Out::new();
        f.handle(&mut req, cap(&mut out));
        let (code, _, body) = parse(&out[0]);
        assert_eq!(code, 7);
        // The rejected packet is echoed back, minus the protocol field.
        assert_eq!(body, &[0x0d, 3, 0, 5, 0xab]);
    }
}
