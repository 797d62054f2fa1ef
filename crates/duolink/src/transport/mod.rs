// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Radio transport layer.
//!
//! The link consumes an abstract connectionless datagram radio with built-in
//! per-peer symmetric encryption (ESP-NOW-shaped): broadcast and unicast
//! frames, a TX-confirm callback per completed send, and an RX callback per
//! received datagram.
//!
//! # Modules
//!
//! - `events` - lock-free bridge from the driver's callback context into
//!   `tick()`
//! - `adapter` - send gating (one unicast in flight) and RX queue draining
//!
//! # Threading
//!
//! The driver's callbacks run on its own execution context and may preempt
//! `tick()`. [`RadioEvents`] is the only type they touch: it enqueues a copy
//! of each datagram on a bounded lock-free queue and flips an atomic
//! confirmation flag, never blocking and never allocating.

pub mod adapter;
pub mod events;

pub use adapter::RadioLink;
pub use events::{InboundDatagram, RadioEvents};

use crate::config::{KEY_LEN, MAC_LEN};
use crate::error::Result;

/// Capability set required from the external radio driver.
///
/// `register_peer` must be idempotent. `send` enqueues the frame and
/// returns immediately; completion is reported through the TX-confirm
/// callback the driver wires to [`RadioEvents::tx_confirm`].
pub trait RadioDriver {
    /// Hand the driver its event sink. Called once, before [`Self::init`].
    ///
    /// A driver whose callbacks are C function pointers stashes the sink in
    /// its callback bridge; everything else closes over it.
    fn attach(&mut self, events: RadioEvents);

    /// Bring the radio up on `channel`.
    fn init(&mut self, channel: u8) -> Result<()>;

    /// The device's own address. Stable after [`Self::init`].
    fn local_address(&self) -> [u8; MAC_LEN];

    /// Current channel.
    fn channel(&self) -> u8;

    /// Tune to `channel`. Channels 1..13 must be accepted unconditionally;
    /// 14 only under the driver's regional policy.
    fn set_channel(&mut self, channel: u8) -> Result<()>;

    /// Current maximum transmit power in quarter-dBm units.
    fn max_tx_power(&self) -> u8;

    /// Set the maximum transmit power in quarter-dBm units.
    fn set_max_tx_power(&mut self, quarter_dbm: u8) -> Result<()>;

    /// Install the group key used for link-layer encryption.
    fn set_primary_key(&mut self, key: &[u8; KEY_LEN]) -> Result<()>;

    /// Register `address` as a peer on `channel`, optionally encrypted.
    fn register_peer(
        &mut self,
        address: [u8; MAC_LEN],
        channel: u8,
        key: Option<&[u8; KEY_LEN]>,
    ) -> Result<()>;

    /// Forget a registered peer.
    fn deregister_peer(&mut self, address: [u8; MAC_LEN]) -> Result<()>;

    /// Whether `address` is currently registered.
    fn has_peer(&self, address: [u8; MAC_LEN]) -> bool;

    /// Enqueue a frame to `dest` (the all-ones address broadcasts).
    fn send(&mut self, dest: [u8; MAC_LEN], frame: &[u8]) -> Result<()>;

    /// Congestion figure for `channel`, used only by automatic channel
    /// selection; 0 means quiet. Drivers without scan support keep the
    /// default.
    fn survey(&mut self, channel: u8) -> i32 {
        let _ = channel;
        0
    }
}
