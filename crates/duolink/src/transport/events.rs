// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge from the radio driver's callback context into `tick()`.
//!
//! Callbacks must not block or allocate: each received datagram is copied
//! into a fixed-size slot on a bounded lock-free queue; the TX confirmation
//! flips an atomic flag. `tick()` drains the queue on the link's own
//! context, so the state machine itself is never touched from the driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

use crate::config::{MAC_LEN, MAX_FRAME};

/// Queue depth: pairing bursts are paced in seconds, keepalives in hundreds
/// of milliseconds, so a handful of slots absorbs any realistic interleaving.
const RX_QUEUE_DEPTH: usize = 8;

/// One received datagram, copied verbatim in callback context.
#[derive(Clone, Copy)]
pub struct InboundDatagram {
    pub source: [u8; MAC_LEN],
    len: u8,
    buf: [u8; MAX_FRAME],
}

impl InboundDatagram {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..usize::from(self.len)]
    }
}

struct Shared {
    rx: ArrayQueue<InboundDatagram>,
    awaiting_confirm: AtomicBool,
    confirm_peer: Mutex<[u8; MAC_LEN]>,
}

/// Cheaply clonable sink the host wires into the driver's RX and TX-confirm
/// callbacks.
#[derive(Clone)]
pub struct RadioEvents {
    shared: Arc<Shared>,
}

impl RadioEvents {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                rx: ArrayQueue::new(RX_QUEUE_DEPTH),
                awaiting_confirm: AtomicBool::new(false),
                confirm_peer: Mutex::new([0u8; MAC_LEN]),
            }),
        }
    }

    /// RX callback entry point: copy the datagram onto the queue.
    ///
    /// Oversized or surplus datagrams are dropped here; the protocol treats
    /// loss as routine.
    pub fn rx(&self, source: [u8; MAC_LEN], payload: &[u8]) {
        if payload.len() > MAX_FRAME {
            log::debug!("[RadioEvents::rx] oversized datagram dropped");
            return;
        }
        let mut datagram = InboundDatagram {
            source,
            len: payload.len() as u8,
            buf: [0u8; MAX_FRAME],
        };
        datagram.buf[..payload.len()].copy_from_slice(payload);
        if self.shared.rx.push(datagram).is_err() {
            log::debug!("[RadioEvents::rx] queue full, datagram dropped");
        }
    }

    /// TX-confirm callback entry point.
    ///
    /// Clears the waiting flag only for a successful confirmation from the
    /// peer the link is waiting on.
    pub fn tx_confirm(&self, address: [u8; MAC_LEN], delivered: bool) {
        if !delivered {
            return;
        }
        if *self.shared.confirm_peer.lock() == address {
            self.shared.awaiting_confirm.store(false, Ordering::Release);
        }
    }

    /// Arm the confirmation gate before a unicast to `peer`.
    pub(crate) fn arm_confirm(&self, peer: [u8; MAC_LEN], waiting: bool) {
        *self.shared.confirm_peer.lock() = peer;
        self.shared.awaiting_confirm.store(waiting, Ordering::Release);
    }

    /// Whether the TX confirmation is still outstanding.
    pub(crate) fn confirm_pending(&self) -> bool {
        self.shared.awaiting_confirm.load(Ordering::Acquire)
    }

    /// Force the gate open (send timeout).
    pub(crate) fn clear_confirm(&self) {
        self.shared.awaiting_confirm.store(false, Ordering::Release);
    }

    /// Pop the next queued datagram, if any.
    pub(crate) fn pop(&self) -> Option<InboundDatagram> {
        self.shared.rx.pop()
    }
}

impl Default for RadioEvents {
    fn default() -> Self {
        Self::new()
    }
}
