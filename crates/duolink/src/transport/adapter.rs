// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Radio façade: send gating and RX draining over the external driver.
//!
//! The radio is a singleton resource with one unicast in flight at a time.
//! A waiting flag armed before each confirmed send gates the path; it is
//! cleared by the TX-confirm callback or by the send timeout. The wait is a
//! busy poll that yields cooperatively between checks.

use crate::config::{BROADCAST_ADDRESS, MAC_LEN, SEND_TIMEOUT_MS};
use crate::error::Error;
use crate::time::Clock;

use super::events::{InboundDatagram, RadioEvents};
use super::RadioDriver;

/// Owns the driver and the callback bridge.
pub struct RadioLink<R: RadioDriver> {
    driver: R,
    events: RadioEvents,
}

impl<R: RadioDriver> RadioLink<R> {
    pub fn new(mut driver: R) -> Self {
        let events = RadioEvents::new();
        driver.attach(events.clone());
        Self { driver, events }
    }

    /// The sink the host can also wire into out-of-band delivery paths.
    pub fn events(&self) -> RadioEvents {
        self.events.clone()
    }

    pub fn driver(&self) -> &R {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut R {
        &mut self.driver
    }

    /// Next queued inbound datagram, if any.
    pub fn poll(&mut self) -> Option<InboundDatagram> {
        self.events.pop()
    }

    /// Broadcast a frame. Broadcasts are fire-and-forget: no confirmation
    /// is awaited and link quality is not touched.
    pub fn broadcast(&mut self, frame: &[u8]) -> bool {
        match self.driver.send(BROADCAST_ADDRESS, frame) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[RadioLink::broadcast] send failed: {}", e);
                false
            }
        }
    }

    /// Unicast a frame to `dest` and, when `wait` is set, hold until the
    /// TX confirmation arrives or the send timeout expires.
    ///
    /// Returns `true` when the frame is considered delivered. With `wait`
    /// unset the outcome is optimistic: confirmation was not requested.
    pub fn unicast<C: Clock>(
        &mut self,
        dest: [u8; MAC_LEN],
        frame: &[u8],
        wait: bool,
        clock: &C,
    ) -> bool {
        self.events.arm_confirm(dest, wait);
        let sent_at = clock.now_ms();
        if let Err(e) = self.driver.send(dest, frame) {
            log::warn!("[RadioLink::unicast] send failed: {}", e);
            self.events.clear_confirm();
            return false;
        }
        while self.events.confirm_pending()
            && clock.now_ms().wrapping_sub(sent_at) < SEND_TIMEOUT_MS
        {
            std::thread::yield_now();
        }
        if self.events.confirm_pending() {
            log::debug!("[RadioLink::unicast] {}", Error::TxTimeout);
            self.events.clear_confirm();
            return false;
        }
        true
    }
}
