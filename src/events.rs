//! Event-flag word shared between interrupt-context producers and the
//! endpoint task.
//!
//! Producers (serial ISR, IP stack, periodic timer, API calls) OR bits into
//! the word; the endpoint task consumes the whole word in one atomic swap and
//! services the set bits in a fixed order: [`STOP`], [`START`], [`TX_RAW`],
//! [`TX_IP`], [`CHAP_RECHALLENGE`], [`TIMER`], [`RX_BYTES`], [`RX_PACKETS`].
//! All bits are edge-triggered.

use core::sync::atomic::{AtomicU32, Ordering};

pub const START: u32 = 1 << 0;
pub const STOP: u32 = 1 << 1;
pub const TIMER: u32 = 1 << 2;
pub const RX_BYTES: u32 = 1 << 3;
pub const RX_PACKETS: u32 = 1 << 4;
pub const TX_IP: u32 = 1 << 5;
pub const TX_RAW: u32 = 1 << 6;
pub const CHAP_RECHALLENGE: u32 = 1 << 7;

pub struct EventFlags(AtomicU32);

impl EventFlags {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Post one or more events. Safe from any context, including interrupts.
    pub fn post(&self, events: u32) {
        self.0.fetch_or(events, Ordering::Release);
    }

    /// Consume all pending events.
    pub fn take(&self) -> u32 {
        self.0.swap(0, Ordering::AcqRel)
    }

    /// Look at pending events without consuming them.
    pub fn peek(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_accumulates_until_taken() {
        let flags = EventFlags::new();
        assert_eq!(flags.take(), 0);

        flags.post(RX_BYTES);
        flags.post(TIMER | TX_IP);
        assert_eq!(flags.peek(), RX_BYTES | TIMER | TX_IP);

        assert_eq!(flags.take(), RX_BYTES | TIMER | TX_IP);
        assert_eq!(flags.take(), 0);
    }
}
