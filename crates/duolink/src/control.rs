// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adaptive control over keepalive pacing and transmit power.
//!
//! The keepalive interval follows an additive-increase /
//! multiplicative-decrease rule: quiet healthy links slow their probing,
//! loss intensifies it. Transmit power walks downward one quarter-dBm at a
//! time while recent sends are perfect, and back up on any loss; a
//! reduction immediately followed by loss raises the adaptive minimum so
//! the same mistake is not repeated at once.

use crate::config::{
    KEEPALIVE_MAX_MS, KEEPALIVE_MIN_MS, KEEPALIVE_START_MS, KEEPALIVE_STEP_MS,
    TX_POWER_MAX, TX_POWER_MIN_DEFAULT, TX_POWER_PUNISH_INTERVALS, TX_POWER_SETTLE_INTERVALS,
};
use crate::transport::RadioDriver;

/// Adaptive keepalive interval.
#[derive(Debug)]
pub struct KeepaliveSchedule {
    interval_ms: u32,
}

impl KeepaliveSchedule {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval_ms: KEEPALIVE_START_MS,
        }
    }

    /// Back to the starting interval (entering `initialised`).
    pub fn reset(&mut self) {
        self.interval_ms = KEEPALIVE_START_MS;
    }

    #[must_use]
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    /// Additive increase after a confirmed send.
    pub fn on_success(&mut self) {
        self.interval_ms = (self.interval_ms + KEEPALIVE_STEP_MS).min(KEEPALIVE_MAX_MS);
    }

    /// Multiplicative decrease after a failed or timed-out send.
    pub fn on_failure(&mut self) {
        self.interval_ms = (self.interval_ms / 2).max(KEEPALIVE_MIN_MS);
    }
}

impl Default for KeepaliveSchedule {
    fn default() -> Self {
        Self::new()
    }
}

/// Adaptive transmit power state, in quarter-dBm units.
#[derive(Debug)]
pub struct TxPowerControl {
    current: u8,
    min: u8,
    max: u8,
    last_change_ms: u32,
    last_change_downward: bool,
}

impl TxPowerControl {
    /// Start from the power the radio reports (entering `initialised`).
    #[must_use]
    pub fn new(current: u8) -> Self {
        Self {
            current: current.clamp(TX_POWER_MIN_DEFAULT, TX_POWER_MAX),
            min: TX_POWER_MIN_DEFAULT,
            max: TX_POWER_MAX,
            last_change_ms: 0,
            last_change_downward: false,
        }
    }

    #[must_use]
    pub fn current(&self) -> u8 {
        self.current
    }

    #[must_use]
    pub fn min(&self) -> u8 {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> u8 {
        self.max
    }

    /// Run one adjustment round before a keepalive goes out in `connected`.
    ///
    /// `send_q` saturated means the last 32 unicasts all confirmed: probe
    /// downward. Anything else probes upward, and punishes a reduction that
    /// was immediately followed by loss by raising the minimum.
    pub fn on_keepalive<R: RadioDriver>(
        &mut self,
        radio: &mut R,
        send_q: u32,
        interval_ms: u32,
        now: u32,
    ) {
        if send_q == u32::MAX {
            let settled = now.wrapping_sub(self.last_change_ms)
                > interval_ms.saturating_mul(TX_POWER_SETTLE_INTERVALS);
            if self.current == self.min && self.min > TX_POWER_MIN_DEFAULT && settled {
                self.min -= 1;
            }
            self.reduce(radio, now);
        } else {
            let recent = now.wrapping_sub(self.last_change_ms)
                < interval_ms.saturating_mul(TX_POWER_PUNISH_INTERVALS);
            if self.last_change_downward && recent && self.min < self.max {
                self.min += 1;
            }
            self.increase(radio, now);
        }
    }

    /// Step down one quarter-dBm if above the adaptive minimum.
    pub fn reduce<R: RadioDriver>(&mut self, radio: &mut R, now: u32) -> bool {
        if self.current <= self.min {
            return false;
        }
        if radio.set_max_tx_power(self.current - 1).is_err() {
            log::warn!("[TxPowerControl::reduce] radio refused {}", self.current - 1);
            return false;
        }
        self.current -= 1;
        self.last_change_ms = now;
        self.last_change_downward = true;
        log::debug!(
            "[TxPowerControl::reduce] now {:.2} dBm",
            f32::from(self.current) * 0.25
        );
        true
    }

    /// Step up one quarter-dBm if below the ceiling.
    pub fn increase<R: RadioDriver>(&mut self, radio: &mut R, now: u32) -> bool {
        if self.current >= self.max {
            return false;
        }
        if radio.set_max_tx_power(self.current + 1).is_err() {
            log::warn!(
                "[TxPowerControl::increase] radio refused {}",
                self.current + 1
            );
            return false;
        }
        self.current += 1;
        self.last_change_ms = now;
        self.last_change_downward = false;
        log::debug!(
            "[TxPowerControl::increase] now {:.2} dBm",
            f32::from(self.current) * 0.25
        );
        true
    }
}
