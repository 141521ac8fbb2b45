use heapless::Vec;

use super::crc::{crc16, GOOD_RESIDUE, SEED_AFTER_ADDRESS};
use super::pool::{Chain, PacketPool, SegmentFull};

/// Bytes received outside any frame are batched up to this size before being
/// handed to the non-PPP consumer (modem "CONNECT" strings and the like).
pub const NOISE_MAX: usize = 64;

#[derive(Copy, Clone, Debug)]
enum State {
    /// Hunting for a flag; bytes here are line noise.
    Start,
    /// Flag seen, expecting the 0xFF address byte.
    Address,
    /// Inside a frame.
    Data,
    /// Frame given up on; eat bytes until the next flag.
    Discard,
}

pub(crate) enum RxEvent {
    /// A complete frame with good CRC. Starts at the 2-byte protocol field.
    Frame(Chain),
    /// Bytes that did not belong to any frame.
    Noise(Vec<u8, NOISE_MAX>),
}

pub(crate) struct FrameReader {
    state: State,
    escape: bool,
    chain: Option<Chain>,
    noise: Vec<u8, NOISE_MAX>,
    idle_ticks: u16,

    pub frames_in: u32,
    pub crc_errors: u32,
    pub malformed: u32,
    pub partial_timeouts: u32,
    pub control_overflows: u32,
    pub noise_bytes: u32,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            state: State::Start,
            escape: false,
            chain: None,
            noise: Vec::new(),
            idle_ticks: 0,
            frames_in: 0,
            crc_errors: 0,
            malformed: 0,
            partial_timeouts: 0,
            control_overflows: 0,
            noise_bytes: 0,
        }
    }

    /// Feed serial bytes. Stops early when a frame or noise batch completes;
    /// call again with the remaining data.
    pub fn consume<const SEG: usize, const NSEG: usize>(
        &mut self,
        pool: &mut PacketPool<SEG, NSEG>,
        data: &[u8],
    ) -> (usize, Option<RxEvent>) {
        for (i, &b) in data.iter().enumerate() {
            self.idle_ticks = 0;
            match (self.state, b) {
                (State::Start, 0x7e) => {
                    self.state = State::Address;
                    if let Some(ev) = self.flush_noise() {
                        return (i + 1, Some(ev));
                    }
                }
                (State::Start, 0xff) => {
                    // Opening flag lost in transit; tolerate it by treating
                    // the address byte as the start of a frame.
                    self.state = State::Data;
                    if let Some(ev) = self.flush_noise() {
                        return (i + 1, Some(ev));
                    }
                }
                (State::Start, b) => {
                    self.noise_bytes = self.noise_bytes.wrapping_add(1);
                    if self.noise.push(b).is_err() {
                        let ev = self.flush_noise();
                        let _ = self.noise.push(b);
                        return (i + 1, ev);
                    }
                }
                (State::Address, 0xff) => self.state = State::Data,
                (State::Address, 0x7e) => {}
                (State::Address, b) => {
                    // Not a PPP header after all.
                    self.state = State::Start;
                    self.noise_bytes = self.noise_bytes.wrapping_add(1);
                    let _ = self.noise.push(b);
                }
                (State::Data, 0x7e) => {
                    let done = self.end_of_frame(pool);
                    self.state = State::Address;
                    if let Some(chain) = done {
                        self.frames_in = self.frames_in.wrapping_add(1);
                        return (i + 1, Some(RxEvent::Frame(chain)));
                    }
                }
                (State::Data, 0x7d) => self.escape = true,
                (State::Data, mut b) => {
                    if self.escape {
                        self.escape = false;
                        b ^= 0x20;
                    }
                    if self.store(pool, b).is_err() {
                        self.state = State::Discard;
                    }
                }
                (State::Discard, 0x7e) => {
                    self.state = State::Address;
                    self.escape = false;
                }
                (State::Discard, _) => {}
            }
        }
        (data.len(), None)
    }

    /// Advance the inter-byte idle timer. Past `limit` ticks of silence any
    /// partial frame is abandoned and pending noise is flushed out.
    pub fn on_tick<const SEG: usize, const NSEG: usize>(
        &mut self,
        pool: &mut PacketPool<SEG, NSEG>,
        limit: u16,
    ) -> Option<RxEvent> {
        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if self.idle_ticks <= limit {
            return None;
        }
        self.idle_ticks = 0;
        if let Some(chain) = self.chain.take() {
            pool.free_chain(chain);
            self.partial_timeouts = self.partial_timeouts.wrapping_add(1);
            debug!("partial frame abandoned after {} idle ticks", limit);
        }
        self.state = State::Start;
        self.escape = false;
        self.flush_noise()
    }

    pub fn reset<const SEG: usize, const NSEG: usize>(&mut self, pool: &mut PacketPool<SEG, NSEG>) {
        if let Some(chain) = self.chain.take() {
            pool.free_chain(chain);
        }
        self.state = State::Start;
        self.escape = false;
        self.noise.clear();
        self.idle_ticks = 0;
    }

    fn flush_noise(&mut self) -> Option<RxEvent> {
        if self.noise.is_empty() {
            None
        } else {
            Some(RxEvent::Noise(core::mem::take(&mut self.noise)))
        }
    }

    fn store<const SEG: usize, const NSEG: usize>(
        &mut self,
        pool: &mut PacketPool<SEG, NSEG>,
        b: u8,
    ) -> Result<(), ()> {
        if self.chain.is_none() {
            // Partial packets are created lazily, on the first payload byte.
            match pool.new_chain() {
                Some(c) => self.chain = Some(c),
                None => return Err(()),
            }
        }
        let chain = unwrap!(self.chain.as_mut());
        match pool.append(chain, b) {
            Ok(()) => Ok(()),
            Err(SegmentFull) => {
                // Only IPv4 data frames may chain extra segments. The frame
                // is identifiable once control + protocol are stored.
                let head = pool.head_slice(chain);
                let is_ipv4 = head.len() >= 3 && head[0] == 0x03 && head[1] == 0x00 && head[2] == 0x21;
                if is_ipv4 && pool.grow(chain).is_some() {
                    unwrap!(pool.append(chain, b).ok());
                    Ok(())
                } else {
                    if !is_ipv4 {
                        self.control_overflows = self.control_overflows.wrapping_add(1);
                        warn!("control frame overflowed a segment, dropping");
                    }
                    let chain = unwrap!(self.chain.take());
                    pool.free_chain(chain);
                    Err(())
                }
            }
        }
    }

    fn end_of_frame<const SEG: usize, const NSEG: usize>(
        &mut self,
        pool: &mut PacketPool<SEG, NSEG>,
    ) -> Option<Chain> {
        let mut chain = self.chain.take()?;

        if self.escape {
            // 0x7D directly before the closing flag is an abort sequence.
            self.escape = false;
            self.malformed = self.malformed.wrapping_add(1);
            pool.free_chain(chain);
            return None;
        }

        // Control byte, 2-byte protocol, 2-byte FCS at minimum.
        if chain.len() < 5 || pool.head_slice(&chain)[0] != 0x03 {
            self.malformed = self.malformed.wrapping_add(1);
            pool.free_chain(chain);
            return None;
        }

        let crc = pool.fold_slices(&chain, SEED_AFTER_ADDRESS, |seed, bytes| crc16(seed, bytes));
        if crc != GOOD_RESIDUE {
            self.crc_errors = self.crc_errors.wrapping_add(1);
            warn!("frame dropped, bad FCS");
            pool.free_chain(chain);
            return None;
        }

        // Strip control in front, FCS in back; the frame now starts at the
        // protocol field.
        pool.trim_front(&mut chain, 1);
        let len = chain.len();
        pool.truncate(&mut chain, len - 2);
        Some(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pppos::frame_writer::FrameWriter;

    type Pool = PacketPool<128, 4>;

    fn frame(payload: &[u8]) -> ([u8; 256], usize) {
        let mut buf = [0; 256];
        let mut w = FrameWriter::new_with_asyncmap(&mut buf, 0);
        w.start().unwrap();
        w.append(payload).unwrap();
        w.finish().unwrap();
        let n = w.len();
        (buf, n)
    }

    fn feed<const SEG: usize, const NSEG: usize>(
        r: &mut FrameReader,
        pool: &mut PacketPool<SEG, NSEG>,
        mut data: &[u8],
    ) -> Option<RxEvent> {
        let mut ev = None;
        while !data.is_empty() {
            let (n, e) = r.consume(pool, data);
            data = &data[n..];
            if e.is_some() {
                assert!(ev.is_none(), "more than one event");
                ev = e;
            }
        }
        ev
    }

    fn expect_frame<const SEG: usize, const NSEG: usize>(
        pool: &PacketPool<SEG, NSEG>,
        ev: Option<RxEvent>,
    ) -> ([u8; 256], usize) {
        match ev {
            Some(RxEvent::Frame(c)) => {
                let mut out = [0; 256];
                let n = pool.copy_from(&c, 0, &mut out);
                (out, n)
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn round_trip() {
        let mut pool = Pool::new();
        let mut r = FrameReader::new();
        let payload = [0xc0, 0x21, 0x01, 0x01, 0x00, 0x04];
        let (buf, n) = frame(&payload);

        let ev = feed(&mut r, &mut pool, &buf[..n]);
        let (out, len) = expect_frame(&pool, ev);
        assert_eq!(&out[..len], &payload);
    }

    #[test]
    fn bad_crc_dropped() {
        // Configure-request with the FCS zeroed out.
        let bytes = [
            0x7e, 0xff, 0x03, 0xc0, 0x21, 0x01, 0x01, 0x00, 0x0a, 0x01, 0x04, 0x05, 0xdc, 0x00,
            0x00, 0x7e,
        ];
        let mut pool = Pool::new();
        let mut r = FrameReader::new();
        let ev = feed(&mut r, &mut pool, &bytes);
        assert!(ev.is_none());
        assert_eq!(r.crc_errors, 1);
        assert_eq!(pool.free_segments(), 4);
    }

    #[test]
    fn escape_sequences_recovered() {
        let payload = [0x00, 0x21, 0x7e, 0x7d, 0x13, 0x99];
        let (buf, n) = frame(&payload);
        // The writer must have stuffed flag and escape inside the body.
        assert!(buf[3..n - 1].windows(2).any(|w| w == [0x7d, 0x5e]));
        assert!(buf[3..n - 1].windows(2).any(|w| w == [0x7d, 0x5d]));

        let mut pool = Pool::new();
        let mut r = FrameReader::new();
        let ev = feed(&mut r, &mut pool, &buf[..n]);
        let (out, len) = expect_frame(&pool, ev);
        assert_eq!(&out[..len], &payload);
    }

    #[test]
    fn missing_opening_flag_tolerated() {
        let payload = [0xc0, 0x21, 0x09, 0x02, 0x00, 0x04];
        let (buf, n) = frame(&payload);

        let mut pool = Pool::new();
        let mut r = FrameReader::new();
        // Drop the leading 0x7e.
        let ev = feed(&mut r, &mut pool, &buf[1..n]);
        let (out, len) = expect_frame(&pool, ev);
        assert_eq!(&out[..len], &payload);
    }

    #[test]
    fn noise_is_surfaced_before_frames() {
        let payload = [0xc0, 0x21, 0x01, 0x01, 0x00, 0x04];
        let (buf, n) = frame(&payload);

        let mut pool = Pool::new();
        let mut r = FrameReader::new();
        let mut data: heapless::Vec<u8, 300> = heapless::Vec::new();
        data.extend_from_slice(b"\r\nCONNECT 115200\r\n").unwrap();
        data.extend_from_slice(&buf[..n]).unwrap();

        let (consumed, ev) = r.consume(&mut pool, &data);
        match ev {
            Some(RxEvent::Noise(noise)) => assert_eq!(&noise[..], b"\r\nCONNECT 115200\r\n"),
            _ => panic!("expected noise"),
        }
        let ev = feed(&mut r, &mut pool, &data[consumed..]);
        let (out, len) = expect_frame(&pool, ev);
        assert_eq!(&out[..len], &payload);
    }

    #[test]
    fn ipv4_frames_chain_across_segments() {
        let mut payload: heapless::Vec<u8, 256> = heapless::Vec::new();
        payload.extend_from_slice(&[0x00, 0x21]).unwrap();
        for i in 0..100u8 {
            payload.push(i).unwrap();
        }
        let (buf, n) = frame(&payload);

        let mut pool: PacketPool<32, 8> = PacketPool::new();
        let mut r = FrameReader::new();
        let mut data = &buf[..n];
        let mut got = None;
        while !data.is_empty() {
            let (c, ev) = r.consume(&mut pool, data);
            data = &data[c..];
            if ev.is_some() {
                got = ev;
            }
        }
        match got {
            Some(RxEvent::Frame(c)) => {
                assert!(pool.segment_count(&c) > 1);
                let mut out = [0; 256];
                let len = pool.copy_from(&c, 0, &mut out);
                assert_eq!(&out[..len], &payload[..]);
            }
            _ => panic!("expected a chained frame"),
        }
    }

    #[test]
    fn oversized_control_frame_dropped() {
        let mut payload: heapless::Vec<u8, 256> = heapless::Vec::new();
        payload.extend_from_slice(&[0xc0, 0x21]).unwrap();
        for i in 0..100u8 {
            payload.push(i).unwrap();
        }
        let (buf, n) = frame(&payload);

        let mut pool: PacketPool<32, 8> = PacketPool::new();
        let mut r = FrameReader::new();
        let ev = feed(&mut r, &mut pool, &buf[..n]);
        assert!(ev.is_none());
        assert_eq!(r.control_overflows, 1);
        assert_eq!(pool.free_segments(), 8);

        // The reader recovers for the next frame.
        let payload = [0xc0, 0x21, 0x01, 0x01, 0x00, 0x04];
        let (buf, n) = frame(&payload);
        let ev = feed(&mut r, &mut pool, &buf[..n]);
        let (out, len) = expect_frame(&pool, ev);
        assert_eq!(&out[..len], &payload);
    }

    #[test]
    fn partial_frame_times_out() {
        let payload = [0xc0, 0x21, 0x01, 0x01, 0x00, 0x04];
        let (buf, n) = frame(&payload);

        let mut pool = Pool::new();
        let mut r = FrameReader::new();
        // Feed half a frame, then go idle.
        let _ = r.consume(&mut pool, &buf[..n / 2]);
        for _ in 0..4 {
            assert!(r.on_tick(&mut pool, 3).is_none());
        }
        assert_eq!(r.partial_timeouts, 1);
        assert_eq!(pool.free_segments(), 4);

        // A fresh frame still parses.
        let ev = feed(&mut r, &mut pool, &buf[..n]);
        let (out, len) = expect_frame(&pool, ev);
        assert_eq!(&out[..len], &payload);
    }
}
