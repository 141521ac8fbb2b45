//! PPP over Serial: the async-HDLC framed endpoint.

mod crc;
mod frame_reader;
mod frame_writer;
mod pool;

use heapless::Deque;
use heapless::Vec;

use self::frame_reader::{FrameReader, RxEvent};
use self::frame_writer::FrameWriter;
use self::pool::{Chain, PacketPool};
use crate::ppp::{Phase, Ppp, Status};
use crate::wire::{Packet, ProtocolType};
use crate::{Config, Counters, InvalidStateError, NotConnectedError, QueueFullError, SendError};

pub use self::frame_reader::NOISE_MAX;
pub use self::frame_writer::BufferFullError;

/// Scratch space for one encoded control packet before framing.
const TX_SCRATCH: usize = 560;

/// Capacity of the raw (unframed) transmit queue.
const RAW_TX: usize = 256;

/// Return value from [`PPPoS::poll()`] and [`PPPoS::tick()`].
pub enum PPPoSAction {
    /// No action needed to take.
    None,
    /// PPP produced serial output: transmit `tx_buf[..n]`.
    Transmit(usize),
    /// An IPv4 datagram was received. Redeem it with
    /// [`PPPoS::read_received`] (or drop it with [`PPPoS::release`]).
    Received(IpFrame),
    /// Bytes arrived outside any frame, e.g. a modem status line.
    Noise(Vec<u8, NOISE_MAX>),
}

/// Handle to a received IPv4 datagram still held in the endpoint's pool.
pub struct IpFrame {
    chain: Chain,
}

impl IpFrame {
    /// Payload length (without the PPP protocol field).
    pub fn len(&self) -> usize {
        self.chain.len().saturating_sub(2)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Main PPPoS endpoint.
///
/// Sans-IO: serial input goes in through [`consume()`](Self::consume),
/// output comes back through the `tx_buf` passed to [`poll()`](Self::poll)
/// and friends, and the periodic timer is delivered through
/// [`tick()`](Self::tick). `SEG`/`NSEG` size the receive pool; a single
/// segment must hold the largest expected control frame, while IPv4 data
/// chains across segments as needed.
pub struct PPPoS<'a, const SEG: usize = 512, const NSEG: usize = 8> {
    ppp: Ppp<'a>,
    reader: FrameReader,
    pool: PacketPool<SEG, NSEG>,
    pending: Option<RxEvent>,
    raw_tx: Deque<u8, RAW_TX>,
    inter_byte_timeout: u16,
    last_phase: Phase,
    frames_out: u32,
    dropped_tx: u32,
}

impl<'a, const SEG: usize, const NSEG: usize> PPPoS<'a, SEG, NSEG> {
    /// Create a new endpoint in phase [`Dead`](crate::Phase::Dead); call
    /// [`open()`](Self::open) to start connecting.
    pub fn new(config: Config<'a>) -> Self {
        let inter_byte_timeout = config.tunables.inter_byte_timeout;
        Self {
            ppp: Ppp::new(config),
            reader: FrameReader::new(),
            pool: PacketPool::new(),
            pending: None,
            raw_tx: Deque::new(),
            inter_byte_timeout,
            last_phase: Phase::Dead,
            frames_out: 0,
            dropped_tx: 0,
        }
    }

    pub fn status(&self) -> Status {
        self.ppp.status()
    }

    pub fn counters(&self) -> Counters {
        Counters {
            frames_in: self.reader.frames_in,
            frames_out: self.frames_out,
            crc_errors: self.reader.crc_errors,
            partial_timeouts: self.reader.partial_timeouts,
            control_overflows: self.reader.control_overflows,
            alloc_failures: self.pool.alloc_failures,
            bad_ids: self.ppp.bad_ids(),
            malformed: self.reader.malformed.wrapping_add(self.ppp.malformed()),
            dropped_tx: self.dropped_tx,
            noise_bytes: self.reader.noise_bytes,
        }
    }

    /// Start opening the connection. The first configure-request goes out on
    /// the next [`poll()`](Self::poll).
    pub fn open(&mut self) -> Result<(), InvalidStateError> {
        self.ppp.open()
    }

    /// Start a graceful shutdown: terminate-request, then reset once the
    /// peer acks (or the retry budget runs out).
    pub fn close(&mut self, tx_buf: &mut [u8]) -> Result<PPPoSAction, InvalidStateError> {
        let mut frames = 0;
        let mut drops = 0;
        let mut w = FrameWriter::new(tx_buf);
        self.ppp
            .close(|pkt: Packet<'_>| emit_control(&mut w, &mut frames, &mut drops, pkt))?;
        self.frames_out = self.frames_out.wrapping_add(frames);
        self.dropped_tx = self.dropped_tx.wrapping_add(drops);
        self.purge_if_down();
        Ok(action_from(&w))
    }

    /// Tear everything down immediately (no terminate handshake) and start
    /// connecting from scratch.
    pub fn restart(&mut self) -> Result<(), InvalidStateError> {
        self.ppp.reset();
        self.purge_if_down();
        self.ppp.open()
    }

    /// Consume data received from the serial connection.
    ///
    /// After calling `consume`, `poll` must be called to process the
    /// consumed data.
    ///
    /// Returns how many bytes were actually consumed. If less than
    /// `data.len()`, `consume` must be called again with the remaining data
    /// after the next `poll`.
    pub fn consume(&mut self, data: &[u8]) -> usize {
        if self.pending.is_some() {
            return 0;
        }
        let (n, ev) = self.reader.consume(&mut self.pool, data);
        if ev.is_some() {
            self.pending = ev;
        }
        n
    }

    /// Process received data and generate data to be sent.
    ///
    /// The return value tells you what action to take; see [`PPPoSAction`].
    pub fn poll(&mut self, tx_buf: &mut [u8]) -> PPPoSAction {
        match self.pending.take() {
            Some(RxEvent::Noise(noise)) => return PPPoSAction::Noise(noise),
            Some(RxEvent::Frame(chain)) => {
                let head = self.pool.head_slice(&chain);
                if head.len() >= 2 && head[0] == 0x00 && head[1] == 0x21 {
                    return PPPoSAction::Received(IpFrame { chain });
                }

                // Control frames always fit one segment; copy out so the
                // pool is free while the machines run.
                let mut buf = [0u8; SEG];
                let n = self.pool.copy_from(&chain, 0, &mut buf);
                self.pool.free_chain(chain);

                let mut frames = 0;
                let mut drops = 0;
                let mut w = FrameWriter::new(tx_buf);
                self.drain_raw(&mut w);
                self.ppp.received(&mut buf[..n], |pkt: Packet<'_>| {
                    emit_control(&mut w, &mut frames, &mut drops, pkt)
                });
                self.ppp
                    .poll(|pkt: Packet<'_>| emit_control(&mut w, &mut frames, &mut drops, pkt));
                self.frames_out = self.frames_out.wrapping_add(frames);
                self.dropped_tx = self.dropped_tx.wrapping_add(drops);
                self.purge_if_down();
                return action_from(&w);
            }
            None => {}
        }

        let mut frames = 0;
        let mut drops = 0;
        let mut w = FrameWriter::new(tx_buf);
        self.drain_raw(&mut w);
        self.ppp
            .poll(|pkt: Packet<'_>| emit_control(&mut w, &mut frames, &mut drops, pkt));
        self.frames_out = self.frames_out.wrapping_add(frames);
        self.dropped_tx = self.dropped_tx.wrapping_add(drops);
        self.purge_if_down();
        action_from(&w)
    }

    /// Deliver one base tick: drives retransmit timers and the inter-byte
    /// idle timeout.
    pub fn tick(&mut self, tx_buf: &mut [u8]) -> PPPoSAction {
        if let Some(ev) = self.reader.on_tick(&mut self.pool, self.inter_byte_timeout) {
            if self.pending.is_none() {
                self.pending = Some(ev);
            }
        }

        let mut frames = 0;
        let mut drops = 0;
        let mut w = FrameWriter::new(tx_buf);
        self.ppp
            .tick(|pkt: Packet<'_>| emit_control(&mut w, &mut frames, &mut drops, pkt));
        self.ppp
            .poll(|pkt: Packet<'_>| emit_control(&mut w, &mut frames, &mut drops, pkt));
        self.frames_out = self.frames_out.wrapping_add(frames);
        self.dropped_tx = self.dropped_tx.wrapping_add(drops);
        self.purge_if_down();
        action_from(&w)
    }

    /// Send an IPv4 datagram.
    ///
    /// Encodes into `tx_buf` and returns the encoded length `n`; transmit
    /// `tx_buf[..n]` over the serial connection. Fails if IPCP is not up.
    pub fn send(&mut self, pkt: &[u8], tx_buf: &mut [u8]) -> Result<usize, SendError> {
        if !self.ppp.link_is_up() {
            self.dropped_tx = self.dropped_tx.wrapping_add(1);
            return Err(SendError::NotConnected);
        }

        let mut w = FrameWriter::new_with_asyncmap(tx_buf, self.ppp.lcp.proto().asyncmap_remote);
        let proto: u16 = ProtocolType::IPv4.into();
        w.start()?;
        w.append(&proto.to_be_bytes())?;
        w.append(pkt)?;
        w.finish()?;
        self.frames_out = self.frames_out.wrapping_add(1);
        Ok(w.len())
    }

    /// Queue bytes to be sent without any framing, ahead of PPP traffic.
    /// Used for the modem AT dialog before the link starts.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<(), QueueFullError> {
        if data.len() > RAW_TX - self.raw_tx.len() {
            return Err(QueueFullError);
        }
        for &b in data {
            unwrap!(self.raw_tx.push_back(b).ok());
        }
        Ok(())
    }

    /// Send an LCP echo-request carrying `data`. A matching reply clears
    /// [`ping_outstanding()`](Self::ping_outstanding).
    pub fn send_ping(&mut self, data: &[u8], tx_buf: &mut [u8]) -> Result<usize, NotConnectedError> {
        let mut frames = 0;
        let mut drops = 0;
        let mut w = FrameWriter::new(tx_buf);
        self.ppp
            .send_ping(data, |pkt: Packet<'_>| emit_control(&mut w, &mut frames, &mut drops, pkt))?;
        self.frames_out = self.frames_out.wrapping_add(frames);
        self.dropped_tx = self.dropped_tx.wrapping_add(drops);
        Ok(w.len())
    }

    pub fn ping_outstanding(&self) -> Option<u8> {
        self.ppp.ping_outstanding()
    }

    /// Issue a fresh CHAP challenge on an opened, verifying link.
    pub fn rechallenge(&mut self, tx_buf: &mut [u8]) -> PPPoSAction {
        let mut frames = 0;
        let mut drops = 0;
        let mut w = FrameWriter::new(tx_buf);
        self.ppp
            .rechallenge(|pkt: Packet<'_>| emit_control(&mut w, &mut frames, &mut drops, pkt));
        self.frames_out = self.frames_out.wrapping_add(frames);
        self.dropped_tx = self.dropped_tx.wrapping_add(drops);
        action_from(&w)
    }

    /// Copy a received datagram into `out` (IP header first, so an aligned
    /// buffer keeps it aligned) and release its pool segments.
    /// Returns the number of bytes copied.
    pub fn read_received(&mut self, frame: IpFrame, out: &mut [u8]) -> usize {
        let n = self.pool.copy_from(&frame.chain, 2, out);
        self.pool.free_chain(frame.chain);
        n
    }

    /// Drop a received datagram without reading it.
    pub fn release(&mut self, frame: IpFrame) {
        self.pool.free_chain(frame.chain);
    }

    fn drain_raw(&mut self, w: &mut FrameWriter<'_>) {
        while let Some(&b) = self.raw_tx.front() {
            if w.append_unframed(&[b]).is_err() {
                // Out of buffer; the rest goes out on a later poll.
                break;
            }
            self.raw_tx.pop_front();
        }
    }

    /// On a transition into Dead or Failed, release everything queued.
    fn purge_if_down(&mut self) {
        let phase = self.ppp.phase();
        if phase != self.last_phase {
            if matches!(phase, Phase::Dead | Phase::Failed) {
                if let Some(RxEvent::Frame(chain)) = self.pending.take() {
                    self.pool.free_chain(chain);
                }
                self.raw_tx.clear();
                self.reader.reset(&mut self.pool);
            }
            self.last_phase = phase;
        }
    }
}

fn emit_control(w: &mut FrameWriter<'_>, frames: &mut u32, drops: &mut u32, pkt: Packet<'_>) {
    let len = pkt.buffer_len();
    if len > TX_SCRATCH {
        warn!("tx control packet too large, dropped");
        *drops += 1;
        return;
    }
    let mut buf = [0; TX_SCRATCH];
    pkt.emit(&mut buf[..len]);

    let r = w
        .start()
        .and_then(|_| w.append(&buf[..len]))
        .and_then(|_| w.finish());
    match r {
        Ok(()) => *frames += 1,
        Err(BufferFullError) => {
            // Partial garbage may be in the buffer; the peer resyncs on the
            // next flag and the retransmit timer covers the loss.
            warn!("tx buffer full, control frame dropped");
            *drops += 1;
        }
    }
}

fn action_from(w: &FrameWriter<'_>) -> PPPoSAction {
    if w.is_empty() {
        PPPoSAction::None
    } else {
        PPPoSAction::Transmit(w.len())
    }
}
