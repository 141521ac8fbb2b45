//! Single-producer single-consumer byte ring between the serial receive
//! interrupt and the endpoint task.
//!
//! The ring itself lives in a `static` (or anywhere that outlives both
//! halves); [`RxRing::split`] hands the producer half to the ISR and the
//! consumer half to the task running the endpoint:
//!
//! ```ignore
//! static FLAGS: EventFlags = EventFlags::new();
//! let mut ring: RxRing<1024> = RxRing::new();
//! let (mut rx_isr, mut rx_task) = ring.split(&FLAGS);
//! // ISR: rx_isr.push_byte(b);
//! // task: let n = rx_task.pop_slice(&mut chunk); ppp.consume(&chunk[..n]);
//! ```

use heapless::spsc::{Consumer, Producer, Queue};

use crate::events::{EventFlags, RX_BYTES};

/// The ring is saturated; the pushed byte was dropped.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingFullError;

pub struct RxRing<const N: usize> {
    queue: Queue<u8, N>,
}

impl<const N: usize> RxRing<N> {
    pub const fn new() -> Self {
        Self { queue: Queue::new() }
    }

    pub fn split<'a>(&'a mut self, flags: &'a EventFlags) -> (RxProducer<'a, N>, RxConsumer<'a, N>) {
        let (prod, cons) = self.queue.split();
        (
            RxProducer {
                prod,
                flags,
                since_post: 0,
                dropped: 0,
            },
            RxConsumer { cons },
        )
    }
}

impl<const N: usize> Default for RxRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-side half of the ring.
pub struct RxProducer<'a, const N: usize> {
    prod: Producer<'a, u8, N>,
    flags: &'a EventFlags,
    since_post: u16,
    dropped: u32,
}

impl<const N: usize> RxProducer<'_, N> {
    /// Push one received byte. Safe from interrupt context.
    ///
    /// Posts [`RX_BYTES`] when a `0x7E` flag byte arrives or enough bytes
    /// have accumulated since the last post, so the task wakes at frame
    /// boundaries without a per-byte event. On overrun the byte is dropped
    /// and counted; no event is raised.
    pub fn push_byte(&mut self, b: u8) -> Result<(), RingFullError> {
        if self.prod.enqueue(b).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
            return Err(RingFullError);
        }
        self.since_post += 1;
        if b == 0x7e || self.since_post as usize >= N / 2 {
            self.since_post = 0;
            self.flags.post(RX_BYTES);
        }
        Ok(())
    }

    /// How many bytes have been dropped due to ring overrun.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// Task-side half of the ring.
pub struct RxConsumer<'a, const N: usize> {
    cons: Consumer<'a, u8, N>,
}

impl<const N: usize> RxConsumer<'_, N> {
    /// Drain up to `out.len()` bytes, returning how many were copied.
    pub fn pop_slice(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.cons.dequeue() {
                Some(b) => {
                    out[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        !self.cons.ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    #[test]
    fn flag_byte_posts_event() {
        let flags = EventFlags::new();
        let mut ring: RxRing<16> = RxRing::new();
        let (mut prod, mut cons) = ring.split(&flags);

        prod.push_byte(0x41).unwrap();
        assert_eq!(flags.peek(), 0);
        prod.push_byte(0x7e).unwrap();
        assert_eq!(flags.take(), events::RX_BYTES);

        let mut out = [0; 4];
        assert_eq!(cons.pop_slice(&mut out), 2);
        assert_eq!(&out[..2], &[0x41, 0x7e]);
        assert!(cons.is_empty());
    }

    #[test]
    fn threshold_posts_event() {
        let flags = EventFlags::new();
        let mut ring: RxRing<8> = RxRing::new();
        let (mut prod, _cons) = ring.split(&flags);

        for b in 0..3 {
            prod.push_byte(b + 1).unwrap();
        }
        // 4th byte crosses N/2.
        prod.push_byte(0x55).unwrap();
        assert_eq!(flags.take(), events::RX_BYTES);
    }

    #[test]
    fn overrun_drops_and_counts() {
        let flags = EventFlags::new();
        let mut ring: RxRing<4> = RxRing::new();
        let (mut prod, _cons) = ring.split(&flags);

        // Capacity of an SPSC queue of size N is N-1.
        for b in 0..3 {
            prod.push_byte(b).unwrap();
        }
        assert_eq!(prod.push_byte(0xff), Err(RingFullError));
        assert_eq!(prod.dropped(), 1);
    }
}
