//! Packet-oriented transport: PPP packets carried whole by an outer
//! encapsulation such as PPPoE. No HDLC framing, byte stuffing or FCS; the
//! outer layer delimits and checks packets.
//!
//! Outbound packets are handed to a sink closure. The sink owns each packet
//! for the duration of the call (copy or transmit before returning); the
//! endpoint never touches a packet after handing it over.

use core::ops::Range;

use crate::ppp::{Ppp, Status};
use crate::wire::{Packet, ProtocolType};
use crate::{Config, Counters, InvalidStateError, NotConnectedError, SendError};

const TX_SCRATCH: usize = 560;

/// Packet-oriented PPP endpoint.
pub struct PPPoE<'a> {
    ppp: Ppp<'a>,
    frames_in: u32,
    frames_out: u32,
    dropped_tx: u32,
}

impl<'a> PPPoE<'a> {
    pub fn new(config: Config<'a>) -> Self {
        Self {
            ppp: Ppp::new(config),
            frames_in: 0,
            frames_out: 0,
            dropped_tx: 0,
        }
    }

    pub fn status(&self) -> Status {
        self.ppp.status()
    }

    pub fn counters(&self) -> Counters {
        Counters {
            frames_in: self.frames_in,
            frames_out: self.frames_out,
            bad_ids: self.ppp.bad_ids(),
            malformed: self.ppp.malformed(),
            dropped_tx: self.dropped_tx,
            ..Counters::default()
        }
    }

    pub fn open(&mut self) -> Result<(), InvalidStateError> {
        self.ppp.open()
    }

    pub fn close(&mut self, mut sink: impl FnMut(&[u8])) -> Result<(), InvalidStateError> {
        let mut frames = 0;
        self.ppp
            .close(|pkt: Packet<'_>| emit_packet(&mut frames, &mut sink, pkt))?;
        self.frames_out = self.frames_out.wrapping_add(frames);
        Ok(())
    }

    /// Hand one received PPP packet (starting at the protocol field) to the
    /// endpoint. For an IPv4 datagram the payload range within `pkt` is
    /// returned for the caller's IP stack; control packets are dispatched
    /// internally and may produce output through `sink`.
    pub fn handle(&mut self, pkt: &mut [u8], mut sink: impl FnMut(&[u8])) -> Option<Range<usize>> {
        self.frames_in = self.frames_in.wrapping_add(1);

        if pkt.len() >= 2 && pkt[0] == 0x00 && pkt[1] == 0x21 {
            return Some(2..pkt.len());
        }

        let mut frames = 0;
        self.ppp
            .received(pkt, |p: Packet<'_>| emit_packet(&mut frames, &mut sink, p));
        self.ppp
            .poll(|p: Packet<'_>| emit_packet(&mut frames, &mut sink, p));
        self.frames_out = self.frames_out.wrapping_add(frames);
        None
    }

    /// Advance the phase machine; produces output when there is progress to
    /// make (e.g. the first configure-request after `open()`).
    pub fn poll(&mut self, mut sink: impl FnMut(&[u8])) {
        let mut frames = 0;
        self.ppp
            .poll(|p: Packet<'_>| emit_packet(&mut frames, &mut sink, p));
        self.frames_out = self.frames_out.wrapping_add(frames);
    }

    /// Deliver one base tick for the retransmit timers.
    pub fn tick(&mut self, mut sink: impl FnMut(&[u8])) {
        let mut frames = 0;
        self.ppp
            .tick(|p: Packet<'_>| emit_packet(&mut frames, &mut sink, p));
        self.ppp
            .poll(|p: Packet<'_>| emit_packet(&mut frames, &mut sink, p));
        self.frames_out = self.frames_out.wrapping_add(frames);
    }

    /// Encapsulate an IPv4 datagram into `out` (protocol field prepended).
    /// Returns the encoded length. Fails if IPCP is not up.
    pub fn send(&mut self, pkt: &[u8], out: &mut [u8]) -> Result<usize, SendError> {
        if !self.ppp.link_is_up() {
            self.dropped_tx = self.dropped_tx.wrapping_add(1);
            return Err(SendError::NotConnected);
        }
        let total = 2 + pkt.len();
        if total > out.len() {
            return Err(SendError::BufferFull);
        }
        let proto: u16 = ProtocolType::IPv4.into();
        out[0..2].copy_from_slice(&proto.to_be_bytes());
        out[2..total].copy_from_slice(pkt);
        self.frames_out = self.frames_out.wrapping_add(1);
        Ok(total)
    }

    pub fn send_ping(
        &mut self,
        data: &[u8],
        mut sink: impl FnMut(&[u8]),
    ) -> Result<(), NotConnectedError> {
        let mut frames = 0;
        self.ppp
            .send_ping(data, |p: Packet<'_>| emit_packet(&mut frames, &mut sink, p))?;
        self.frames_out = self.frames_out.wrapping_add(frames);
        Ok(())
    }

    pub fn ping_outstanding(&self) -> Option<u8> {
        self.ppp.ping_outstanding()
    }

    pub fn rechallenge(&mut self, mut sink: impl FnMut(&[u8])) {
        let mut frames = 0;
        self.ppp
            .rechallenge(|p: Packet<'_>| emit_packet(&mut frames, &mut sink, p));
        self.frames_out = self.frames_out.wrapping_add(frames);
    }
}

fn emit_packet(frames: &mut u32, sink: &mut impl FnMut(&[u8]), pkt: Packet<'_>) {
    let len = pkt.buffer_len();
    if len > TX_SCRATCH {
        warn!("tx control packet too large, dropped");
        return;
    }
    let mut buf = [0; TX_SCRATCH];
    pkt.emit(&mut buf[..len]);
    sink(&buf[..len]);
    *frames += 1;
}
