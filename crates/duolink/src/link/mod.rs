// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Link orchestrator
//!
//! [`Link`] is the entry point: it owns the radio façade, the persistence
//! store, the key material, both quality registers, the adaptive control
//! state, and the three frame buffers, and advances the six-state connection
//! machine every time the host calls [`Link::tick`].
//!
//! ## State machine
//!
//! ```text
//! uninitialised --init ok--> initialised --pair info present--> connecting
//!                                 |
//!                                 +--no pair info--> pairing
//!                                                       |
//!             RX PAIRING (sender wins tie) / RX PAIRING_ACK (local wins tie)
//!                                                       v
//!                                                    paired
//!                                                       |
//!                     RX PAIRING_ACK with tie-win / RX KEEPALIVE
//!                                                       v
//!                                                  connecting
//!                                                       |
//!                                      quality > connect floor
//!                                                       v
//!                            connected <-> disconnected (score hysteresis)
//! ```
//!
//! ## Execution model
//!
//! Single-threaded cooperative: the host drives `tick()` from its main
//! loop. The radio's RX / TX-confirm callbacks run on the driver's context
//! and only touch the lock-free bridge in [`crate::transport::events`];
//! every state mutation happens on the `tick()` context, in program order.

mod state;

pub use state::LinkState;

use crate::config::{
    BROADCAST_ADDRESS, BUTTON_HOLD_MS, ECHO_MISS_INTERVALS, KEY_LEN, MAC_LEN, MAX_FRAME,
    PAIRING_INTERVAL_MS, TX_POWER_MAX,
};
use crate::control::{KeepaliveSchedule, TxPowerControl};
use crate::error::{Error, Result};
use crate::gpio::{DigitalInput, DigitalOutput};
use crate::keys::KeyManager;
use crate::protocol::frame::{self, Frame, KeepaliveBody, PairingAckBody, PairingBody};
use crate::protocol::record::{MessageReader, MessageWriter, Scalar};
use crate::quality::QualityRegisters;
use crate::store::{PairingRecord, PairingStore};
use crate::time::Clock;
use crate::transport::{RadioDriver, RadioEvents, RadioLink};

struct ButtonConfig {
    pin: Box<dyn DigitalInput>,
    normally_closed: bool,
    pressed_since: Option<u32>,
}

struct IndicatorConfig {
    pin: Box<dyn DigitalOutput>,
    inverted: bool,
    lit: bool,
    interval_ms: u32,
    last_toggle_ms: u32,
}

impl IndicatorConfig {
    fn set(&mut self, lit: bool) {
        self.lit = lit;
        self.pin.write(lit != self.inverted);
    }
}

/// An encrypted point-to-point link between exactly two peers.
pub struct Link<R: RadioDriver, S: PairingStore, C: Clock> {
    state: LinkState,
    radio: RadioLink<R>,
    store: S,
    clock: C,
    keys: KeyManager,
    quality: QualityRegisters,
    schedule: KeepaliveSchedule,
    tx_power: TxPowerControl,

    local_address: [u8; MAC_LEN],
    local_name: Option<String>,
    remote_address: [u8; MAC_LEN],
    remote_name: Option<String>,

    pairing_channel: u8,
    comm_channel: u8,
    encryption_enabled: bool,
    automatic_tx_power: bool,
    pairing_info_read: bool,
    pairing_info_written: bool,

    // Timers, wrapping milliseconds.
    last_local_activity: u32,
    prev_local_activity: u32,
    last_remote_activity: u32,
    echoed_local_activity: u32,

    // One protocol frame (pairing / ACK / keepalive), rebroadcast as-is.
    protocol_buf: [u8; MAX_FRAME],
    protocol_len: usize,
    writer: MessageWriter,
    inbox: MessageReader,
    data_received: bool,

    on_pairing: Option<Box<dyn FnMut()>>,
    on_paired: Option<Box<dyn FnMut()>>,
    on_connected: Option<Box<dyn FnMut()>>,
    on_disconnected: Option<Box<dyn FnMut()>>,
    on_message: Option<Box<dyn FnMut(&mut MessageReader)>>,

    button: Option<ButtonConfig>,
    indicator: Option<IndicatorConfig>,
}

impl<R: RadioDriver, S: PairingStore, C: Clock> Link<R, S, C> {
    pub fn new(driver: R, store: S, clock: C) -> Self {
        Self {
            state: LinkState::Uninitialised,
            radio: RadioLink::new(driver),
            store,
            clock,
            keys: KeyManager::new(),
            quality: QualityRegisters::new(),
            schedule: KeepaliveSchedule::new(),
            tx_power: TxPowerControl::new(TX_POWER_MAX),
            local_address: [0u8; MAC_LEN],
            local_name: None,
            remote_address: [0u8; MAC_LEN],
            remote_name: None,
            pairing_channel: 1,
            comm_channel: 0,
            encryption_enabled: true,
            automatic_tx_power: true,
            pairing_info_read: false,
            pairing_info_written: false,
            last_local_activity: 0,
            prev_local_activity: 0,
            last_remote_activity: 0,
            echoed_local_activity: 0,
            protocol_buf: [0u8; MAX_FRAME],
            protocol_len: 0,
            writer: MessageWriter::new(),
            inbox: MessageReader::new(),
            data_received: false,
            on_pairing: None,
            on_paired: None,
            on_connected: None,
            on_disconnected: None,
            on_message: None,
            button: None,
            indicator: None,
        }
    }

    // ------------------------------------------------------------------
    // Configuration (before `begin`)
    // ------------------------------------------------------------------

    pub fn set_local_name(&mut self, name: &str) {
        self.local_name = Some(name.to_string());
    }

    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    #[must_use]
    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    /// Run the association in the clear. Why would you?
    pub fn disable_encryption(&mut self) {
        self.encryption_enabled = false;
    }

    pub fn set_automatic_tx_power(&mut self, enabled: bool) {
        self.automatic_tx_power = enabled;
    }

    pub fn configure_pairing_button(
        &mut self,
        pin: impl DigitalInput + 'static,
        normally_closed: bool,
    ) {
        self.button = Some(ButtonConfig {
            pin: Box::new(pin),
            normally_closed,
            pressed_since: None,
        });
    }

    pub fn configure_indicator(&mut self, pin: impl DigitalOutput + 'static, inverted: bool) {
        self.indicator = Some(IndicatorConfig {
            pin: Box::new(pin),
            inverted,
            lit: false,
            interval_ms: 0,
            last_toggle_ms: 0,
        });
    }

    pub fn set_pairing_callback(&mut self, callback: impl FnMut() + 'static) -> &mut Self {
        self.on_pairing = Some(Box::new(callback));
        self
    }

    pub fn set_paired_callback(&mut self, callback: impl FnMut() + 'static) -> &mut Self {
        self.on_paired = Some(Box::new(callback));
        self
    }

    pub fn set_connected_callback(&mut self, callback: impl FnMut() + 'static) -> &mut Self {
        self.on_connected = Some(Box::new(callback));
        self
    }

    pub fn set_disconnected_callback(&mut self, callback: impl FnMut() + 'static) -> &mut Self {
        self.on_disconnected = Some(Box::new(callback));
        self
    }

    pub fn set_message_callback(
        &mut self,
        callback: impl FnMut(&mut MessageReader) + 'static,
    ) -> &mut Self {
        self.on_message = Some(Box::new(callback));
        self
    }

    /// The sink the host wires into the radio driver's callbacks. The
    /// driver handed to [`Link::new`] is attached automatically; this is
    /// for test harnesses and out-of-band delivery paths.
    #[must_use]
    pub fn events(&self) -> RadioEvents {
        self.radio.events()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Set the channels, load any persisted pairing, and ready the machine
    /// for [`Link::tick`]. `comm_channel` 0 selects automatically.
    pub fn begin(&mut self, comm_channel: u8, pairing_channel: u8) {
        self.comm_channel = comm_channel;
        self.pairing_channel = pairing_channel;
        if let Some(record) = self.store.load() {
            log::info!(
                "[Link::begin] persisted pairing with {}",
                format_address(&record.remote_address)
            );
            self.remote_address = record.remote_address;
            self.keys.install(&record.primary_key, &record.local_key);
            self.remote_name = record.remote_name;
            self.pairing_info_read = true;
        }
        let now = self.clock.now_ms();
        // Back-date the activity timer so the first tick initialises at once.
        self.last_local_activity = now.wrapping_sub(PAIRING_INTERVAL_MS + 1);
        if let Some(indicator) = &mut self.indicator {
            indicator.set(false);
            indicator.last_toggle_ms = now;
        }
    }

    /// Advance the state machine, timers, and indicator. Call from the
    /// host's main loop.
    pub fn tick(&mut self) {
        self.drain_radio();
        self.deliver_inbox();
        match self.state {
            LinkState::Uninitialised => self.tick_uninitialised(),
            LinkState::Initialised => self.tick_initialised(),
            LinkState::Pairing | LinkState::Paired => self.tick_broadcasting(),
            LinkState::Connecting => self.tick_connecting(),
            LinkState::Connected => self.tick_connected(),
            LinkState::Disconnected => self.tick_disconnected(),
            LinkState::Started | LinkState::Scanning => {}
        }
        self.poll_button();
        self.drive_indicator();
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// AND of the send and echo quality registers.
    #[must_use]
    pub fn link_quality(&self) -> u32 {
        self.quality.link_quality()
    }

    /// Popcount of [`Self::link_quality`], in `[0, 32]`.
    #[must_use]
    pub fn link_quality_score(&self) -> u32 {
        self.quality.score()
    }

    /// Tear down the association: erase persistence, deregister the peer,
    /// clear keys and the remote name, and restart from `initialised`.
    pub fn reset_pairing(&mut self) -> bool {
        if let Err(e) = self.store.erase() {
            log::error!("[Link::reset_pairing] {}", e);
            return false;
        }
        if self.remote_address != [0u8; MAC_LEN] {
            if let Err(e) = self.radio.driver_mut().deregister_peer(self.remote_address) {
                log::warn!("[Link::reset_pairing] deregister: {}", e);
            }
        }
        self.remote_address = [0u8; MAC_LEN];
        self.remote_name = None;
        self.keys.clear();
        self.pairing_info_read = false;
        self.pairing_info_written = false;
        if self.state == LinkState::Connected {
            fire(&mut self.on_disconnected);
        }
        self.set_state(LinkState::Initialised);
        true
    }

    // ------------------------------------------------------------------
    // Application data
    // ------------------------------------------------------------------

    /// Append a scalar field to the outbound message.
    pub fn add<T: Scalar>(&mut self, value: T) -> bool {
        report_add(self.writer.add(value))
    }

    /// Append a string field to the outbound message.
    pub fn add_str(&mut self, value: &str) -> bool {
        report_add(self.writer.add_str(value))
    }

    /// Append an array field to the outbound message.
    pub fn add_array<T: Scalar>(&mut self, values: &[T]) -> bool {
        report_add(self.writer.add_array(values))
    }

    /// Send the accumulated message. Confirmation is no guarantee of
    /// delivery, but failure is a guarantee of failure.
    pub fn send_message(&mut self, wait: bool) -> bool {
        if self.state != LinkState::Connected {
            log::debug!("[Link::send_message] {}", Error::UnexpectedState);
            self.writer.clear();
            return false;
        }
        let (buf, len) = self.writer.frame();
        let total = match frame::finish_data(buf, len) {
            Ok(total) => total,
            Err(e) => {
                log::error!("[Link::send_message] {}", e);
                self.writer.clear();
                return false;
            }
        };
        let delivered = {
            let (buf, _) = self.writer.frame();
            let frame_bytes = &buf[..total];
            // Re-register dropped peers before unicasting.
            Self::unicast_gated(
                &mut self.radio,
                &mut self.quality,
                &mut self.schedule,
                &self.clock,
                self.remote_address,
                self.comm_channel,
                self.encryption_enabled.then(|| *self.keys.local()),
                frame_bytes,
                wait,
            )
        };
        self.writer.clear();
        delivered
    }

    /// Remaining unread fields in the received message.
    #[must_use]
    pub fn data_available(&self) -> u8 {
        self.inbox.data_available()
    }

    /// Masked tag of the next received field.
    #[must_use]
    pub fn next_tag(&self) -> Option<u8> {
        self.inbox.next_tag()
    }

    /// Length of the next received string/array field (0 for scalars).
    #[must_use]
    pub fn next_length(&self) -> u8 {
        self.inbox.next_length()
    }

    /// Retrieve the next received field as a scalar.
    pub fn retrieve<T: Scalar>(&mut self) -> Option<T> {
        report_retrieve(self.inbox.retrieve())
    }

    /// Retrieve the next received field as a string.
    pub fn retrieve_str(&mut self) -> Option<String> {
        report_retrieve(self.inbox.retrieve_str())
    }

    /// Retrieve the next received field as an array; returns the element
    /// count.
    pub fn retrieve_array<T: Scalar>(&mut self, into: &mut [T]) -> Option<usize> {
        report_retrieve(self.inbox.retrieve_array(into))
    }

    /// Skip the next received field.
    pub fn skip(&mut self) -> bool {
        self.inbox.skip()
    }

    /// Discard the received message so another can land.
    pub fn clear_received(&mut self) {
        self.inbox.clear();
    }

    // ------------------------------------------------------------------
    // RX dispatch
    // ------------------------------------------------------------------

    fn drain_radio(&mut self) {
        while let Some(datagram) = self.radio.poll() {
            match frame::decode(datagram.bytes()) {
                Ok(Frame::Pairing(body)) => self.on_rx_pairing(&body),
                Ok(Frame::PairingAck(body)) => self.on_rx_pairing_ack(&body),
                Ok(Frame::Keepalive(body)) => self.on_rx_keepalive(&body),
                Ok(Frame::Data { field_count, raw }) => self.on_rx_data(field_count, raw),
                Err(e) => {
                    // RX errors are silent: drop the frame, touch nothing.
                    log::debug!(
                        "[Link::rx] {} byte frame from {} dropped: {}",
                        datagram.bytes().len(),
                        format_address(&datagram.source),
                        e
                    );
                }
            }
        }
    }

    fn on_rx_pairing(&mut self, body: &PairingBody<'_>) {
        if self.state != LinkState::Pairing {
            log::debug!(
                "[Link::rx] pairing message ignored in state {}",
                self.state
            );
            return;
        }
        self.remote_address = body.address;
        if self.remote_name.is_none() && !body.name.is_empty() {
            self.remote_name = Some(String::from_utf8_lossy(body.name).into_owned());
        }
        if !tie_break(&body.address, &self.local_address) {
            log::debug!("[Link::rx] local device wins tie, ignoring pairing message");
            return;
        }
        // The sender wins the tie: its channel and keys prevail.
        log::info!(
            "[Link::rx] remote device {} wins tie, adopting its keys and channel {}",
            format_address(&body.address),
            body.channel
        );
        self.comm_channel = body.channel;
        self.keys.install(&body.primary_key, &body.local_key);
        self.complete_pairing();
    }

    fn on_rx_pairing_ack(&mut self, body: &PairingAckBody<'_>) {
        match self.state {
            LinkState::Pairing => {
                if self.remote_address == [0u8; MAC_LEN] {
                    self.remote_address = body.address;
                    if self.remote_name.is_none() && !body.name.is_empty() {
                        self.remote_name = Some(String::from_utf8_lossy(body.name).into_owned());
                    }
                }
                if tie_break(&self.local_address, &body.address) && self.ack_matches(body) {
                    self.complete_pairing();
                } else {
                    log::debug!("[Link::rx] unexpected pairing ACK contents");
                }
            }
            LinkState::Paired => {
                if !self.ack_matches(body) {
                    log::debug!("[Link::rx] pairing ACK doesn't match");
                    return;
                }
                if tie_break(&self.local_address, &body.address) {
                    log::info!("[Link::rx] tie winner, connecting");
                    self.enter_connecting();
                } else {
                    log::debug!("[Link::rx] tie loser, waiting for connection");
                }
            }
            _ => {
                log::debug!("[Link::rx] pairing ACK ignored in state {}", self.state);
            }
        }
    }

    fn on_rx_keepalive(&mut self, body: &KeepaliveBody) {
        self.last_remote_activity = body.local_activity;
        self.echoed_local_activity = body.echoed_activity;
        log::trace!(
            "[Link::rx] keepalive, peer power {}/{}/{} quarter-dBm",
            body.min_tx_power,
            body.current_tx_power,
            body.max_tx_power
        );
        match self.state {
            LinkState::Pairing => {
                // The peer already believes it is paired with someone.
                log::debug!("[Link::rx] keepalive during pairing, pairing failed");
            }
            LinkState::Paired => {
                if self.keepalive_matches(body) {
                    log::info!("[Link::rx] paired, connecting");
                    self.enter_connecting();
                } else {
                    log::debug!("[Link::rx] keepalive with unexpected contents");
                }
            }
            LinkState::Connecting | LinkState::Connected | LinkState::Disconnected => {
                if !self.keepalive_matches(body) {
                    log::debug!("[Link::rx] keepalive with unexpected contents");
                    return;
                }
                if body.echoed_activity == self.prev_local_activity {
                    self.quality.on_echo_match();
                } else {
                    log::trace!(
                        "[Link::rx] echo off by {} ms",
                        self.prev_local_activity
                            .wrapping_sub(body.echoed_activity)
                    );
                }
            }
            _ => {
                log::debug!("[Link::rx] keepalive ignored in state {}", self.state);
            }
        }
    }

    fn on_rx_data(&mut self, field_count: u8, raw: &[u8]) {
        if self.inbox.data_available() > 0 {
            // One inbound message at a time until the application clears it.
            log::debug!("[Link::rx] data frame dropped, inbox occupied");
            return;
        }
        self.inbox.load(raw);
        self.data_received = true;
        log::debug!("[Link::rx] data frame with {} fields", field_count);
    }

    fn deliver_inbox(&mut self) {
        if !self.data_received {
            return;
        }
        self.data_received = false;
        if let Some(callback) = self.on_message.as_mut() {
            callback(&mut self.inbox);
        } else {
            // Nobody listening: mark it read so it doesn't clog the buffer.
            self.inbox.clear();
        }
    }

    fn ack_matches(&self, body: &PairingAckBody<'_>) -> bool {
        body.channel == self.comm_channel
            && body.address == self.remote_address
            && body.remote_address == self.local_address
            && &body.primary_key == self.keys.primary()
            && &body.local_key == self.keys.local()
    }

    fn keepalive_matches(&self, body: &KeepaliveBody) -> bool {
        body.channel == self.comm_channel
            && body.address == self.remote_address
            && body.remote_address == self.local_address
    }

    // ------------------------------------------------------------------
    // Tick handlers
    // ------------------------------------------------------------------

    fn tick_uninitialised(&mut self) {
        let now = self.clock.now_ms();
        if now.wrapping_sub(self.last_local_activity) <= PAIRING_INTERVAL_MS {
            return;
        }
        self.advance_timers();
        match self.initialise_radio() {
            Ok(()) => {
                self.tx_power = TxPowerControl::new(self.radio.driver().max_tx_power());
                log::info!(
                    "[Link] radio up, address {}, starting TX power {:.2} dBm",
                    format_address(&self.local_address),
                    f32::from(self.tx_power.current()) * 0.25
                );
                self.set_state(LinkState::Initialised);
                // Cascaded startup: run the initialised step in the same tick.
                self.tick_initialised();
            }
            Err(e) => log::warn!("[Link] {}", e),
        }
    }

    fn initialise_radio(&mut self) -> Result<()> {
        let driver = self.radio.driver_mut();
        driver
            .init(self.pairing_channel)
            .map_err(|_| Error::RadioInitFailed)?;
        self.local_address = driver.local_address();
        if self.comm_channel == 0 {
            self.comm_channel = least_congested_channel(driver);
            log::info!(
                "[Link] automatic channel suggestion: {}",
                self.comm_channel
            );
        }
        driver
            .register_peer(BROADCAST_ADDRESS, self.pairing_channel, None)
            .map_err(|_| Error::PeerRegisterFailed)?;
        Ok(())
    }

    fn tick_initialised(&mut self) {
        self.advance_timers();
        self.quality.reset();
        self.schedule.reset();
        if self.pairing_info_read {
            // Warm start: the association came from persistence.
            self.install_association();
            fire(&mut self.on_paired);
            self.enter_connecting();
            return;
        }
        if self.encryption_enabled {
            if let Err(e) = self.keys.choose() {
                // Stay in `initialised`; the next tick retries.
                log::error!("[Link] {}", e);
                return;
            }
        } else {
            self.keys.clear();
        }
        if self.radio.driver().channel() != self.pairing_channel {
            if let Err(e) = self.radio.driver_mut().set_channel(self.pairing_channel) {
                log::warn!("[Link] {}: {}", Error::ChannelSetFailed, e);
            }
        }
        if !self.build_pairing_frame() {
            return;
        }
        self.set_state(LinkState::Pairing);
        fire(&mut self.on_pairing);
    }

    /// Broadcast the prepared pairing or pairing-ACK frame at the pairing
    /// cadence.
    fn tick_broadcasting(&mut self) {
        let now = self.clock.now_ms();
        if now.wrapping_sub(self.last_local_activity) <= PAIRING_INTERVAL_MS {
            return;
        }
        let frame_bytes = &self.protocol_buf[..self.protocol_len];
        self.radio.broadcast(frame_bytes);
        self.advance_timers();
    }

    fn tick_connecting(&mut self) {
        let now = self.clock.now_ms();
        if now.wrapping_sub(self.last_local_activity) <= self.schedule.interval_ms() {
            return;
        }
        self.send_keepalive(false);
        self.advance_timers();
        if self.quality.connect_grade() {
            if !self.pairing_info_read && !self.pairing_info_written {
                self.write_pairing_info();
            }
            self.set_state(LinkState::Connected);
            self.indicator_steady_on();
            fire(&mut self.on_connected);
        }
    }

    fn tick_connected(&mut self) {
        let now = self.clock.now_ms();
        if now.wrapping_sub(self.last_local_activity) > self.schedule.interval_ms() {
            self.send_keepalive(true);
            self.advance_timers();
            if self.quality.below_drop_threshold() {
                self.set_state(LinkState::Disconnected);
                fire(&mut self.on_disconnected);
            }
        }
        // An echo overdue by three intervals is a loss even if nothing else
        // moved.
        let now = self.clock.now_ms();
        if now.wrapping_sub(self.echoed_local_activity)
            > self.schedule.interval_ms().saturating_mul(ECHO_MISS_INTERVALS)
        {
            self.echoed_local_activity = now;
            self.quality.on_missed_echo();
        }
    }

    fn tick_disconnected(&mut self) {
        let now = self.clock.now_ms();
        if now.wrapping_sub(self.last_local_activity) <= self.schedule.interval_ms() {
            return;
        }
        self.send_keepalive(false);
        self.advance_timers();
        if self.quality.above_recover_threshold() {
            self.set_state(LinkState::Connected);
            self.indicator_steady_on();
            fire(&mut self.on_connected);
        }
    }

    // ------------------------------------------------------------------
    // Pairing completion and transitions
    // ------------------------------------------------------------------

    /// Install the agreed keys, register the peer, and move to `paired`.
    fn complete_pairing(&mut self) {
        if !self.install_association() {
            return;
        }
        if !self.build_pairing_ack_frame() {
            return;
        }
        self.set_state(LinkState::Paired);
        fire(&mut self.on_paired);
    }

    /// Install the primary key (when encrypting) and register the remote
    /// peer on the communication channel.
    fn install_association(&mut self) -> bool {
        let key = self.encryption_enabled.then(|| *self.keys.local());
        let driver = self.radio.driver_mut();
        if self.encryption_enabled {
            if let Err(e) = driver.set_primary_key(self.keys.primary()) {
                log::error!("[Link] primary key install failed: {}", e);
                return false;
            }
        }
        if let Err(e) = driver.register_peer(self.remote_address, self.comm_channel, key.as_ref())
        {
            log::error!("[Link] {}: {}", Error::PeerRegisterFailed, e);
            return false;
        }
        true
    }

    fn enter_connecting(&mut self) {
        if self.comm_channel != 0 && self.radio.driver().channel() != self.comm_channel {
            if let Err(e) = self.radio.driver_mut().set_channel(self.comm_channel) {
                log::warn!("[Link] {}: {}", Error::ChannelSetFailed, e);
            }
        }
        self.set_state(LinkState::Connecting);
    }

    fn write_pairing_info(&mut self) {
        let record = PairingRecord {
            remote_address: self.remote_address,
            primary_key: *self.keys.primary(),
            local_key: *self.keys.local(),
            remote_name: self.remote_name.clone(),
        };
        match self.store.save(&record) {
            Ok(()) => {
                // Written at most once per session.
                self.pairing_info_written = true;
                log::info!("[Link] pairing written to store");
            }
            Err(e) => {
                // The session still works, it is simply not remembered.
                log::error!("[Link] {}: {}", Error::PersistenceFailed, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Frame building and sending
    // ------------------------------------------------------------------

    fn build_pairing_frame(&mut self) -> bool {
        let name = self.local_name.as_deref().unwrap_or("");
        match frame::encode_pairing(
            &mut self.protocol_buf,
            self.comm_channel,
            &self.local_address,
            self.keys.primary(),
            self.keys.local(),
            name.as_bytes(),
        ) {
            Ok(len) => {
                self.protocol_len = len;
                true
            }
            Err(e) => {
                log::error!("[Link] pairing frame build failed: {}", e);
                false
            }
        }
    }

    fn build_pairing_ack_frame(&mut self) -> bool {
        let name = self.local_name.as_deref().unwrap_or("");
        match frame::encode_pairing_ack(
            &mut self.protocol_buf,
            self.comm_channel,
            &self.local_address,
            &self.remote_address,
            self.keys.primary(),
            self.keys.local(),
            name.as_bytes(),
        ) {
            Ok(len) => {
                self.protocol_len = len;
                true
            }
            Err(e) => {
                log::error!("[Link] pairing ACK frame build failed: {}", e);
                false
            }
        }
    }

    fn send_keepalive(&mut self, adjust_power: bool) {
        let body = KeepaliveBody {
            channel: self.comm_channel,
            address: self.local_address,
            remote_address: self.remote_address,
            local_activity: self.last_local_activity,
            echoed_activity: self.last_remote_activity,
            min_tx_power: self.tx_power.min(),
            current_tx_power: self.tx_power.current(),
            max_tx_power: self.tx_power.max(),
        };
        match frame::encode_keepalive(&mut self.protocol_buf, &body) {
            Ok(len) => self.protocol_len = len,
            Err(e) => {
                log::error!("[Link] keepalive build failed: {}", e);
                return;
            }
        }
        if adjust_power && self.automatic_tx_power {
            let now = self.clock.now_ms();
            self.tx_power.on_keepalive(
                self.radio.driver_mut(),
                self.quality.send_q(),
                self.schedule.interval_ms(),
                now,
            );
        }
        self.quality.on_keepalive_sent();
        let delivered = Self::unicast_gated(
            &mut self.radio,
            &mut self.quality,
            &mut self.schedule,
            &self.clock,
            self.remote_address,
            self.comm_channel,
            self.encryption_enabled.then(|| *self.keys.local()),
            {
                // Safe split: protocol_buf is not touched by the send path.
                let len = self.protocol_len;
                &self.protocol_buf[..len]
            },
            true,
        );
        log::trace!(
            "[Link] keepalive {} sendQ:{:08x} echoQ:{:08x}",
            if delivered { "confirmed" } else { "lost" },
            self.quality.send_q(),
            self.quality.echo_q()
        );
    }

    /// Shared unicast path: lazy peer re-registration, quality bookkeeping,
    /// and keepalive-interval adaptation.
    #[allow(clippy::too_many_arguments)]
    fn unicast_gated(
        radio: &mut RadioLink<R>,
        quality: &mut QualityRegisters,
        schedule: &mut KeepaliveSchedule,
        clock: &C,
        dest: [u8; MAC_LEN],
        channel: u8,
        key: Option<[u8; KEY_LEN]>,
        frame_bytes: &[u8],
        wait: bool,
    ) -> bool {
        let driver = radio.driver_mut();
        if !driver.has_peer(dest) {
            if let Err(e) = driver.register_peer(dest, channel, key.as_ref()) {
                log::warn!("[Link] {}: {}", Error::PeerRegisterFailed, e);
            }
        }
        quality.on_send_attempt();
        let delivered = radio.unicast(dest, frame_bytes, wait, clock);
        if delivered {
            quality.on_send_confirmed();
            schedule.on_success();
        } else {
            schedule.on_failure();
        }
        delivered
    }

    // ------------------------------------------------------------------
    // Timers, button, indicator
    // ------------------------------------------------------------------

    fn advance_timers(&mut self) {
        self.prev_local_activity = self.last_local_activity;
        self.last_local_activity = self.clock.now_ms();
    }

    fn set_state(&mut self, state: LinkState) {
        log::debug!("[Link] state {} -> {}", self.state, state);
        self.state = state;
        if let Some(indicator) = &mut self.indicator {
            indicator.interval_ms = state.indicator_interval_ms();
        }
    }

    fn indicator_steady_on(&mut self) {
        if let Some(indicator) = &mut self.indicator {
            indicator.interval_ms = 0;
            indicator.set(true);
        }
    }

    fn poll_button(&mut self) {
        let now = self.clock.now_ms();
        let mut fire_reset = false;
        if let Some(button) = &mut self.button {
            let pressed = button.pin.read() == button.normally_closed;
            if pressed {
                match button.pressed_since {
                    None => button.pressed_since = Some(now),
                    Some(since) => {
                        if now.wrapping_sub(since) > BUTTON_HOLD_MS {
                            button.pressed_since = None;
                            fire_reset = true;
                        }
                    }
                }
            } else {
                button.pressed_since = None;
            }
        }
        if fire_reset {
            let ok = self.reset_pairing();
            log::info!(
                "[Link] pairing reset via button: {}",
                if ok { "OK" } else { "failed" }
            );
        }
    }

    fn drive_indicator(&mut self) {
        let now = self.clock.now_ms();
        if let Some(indicator) = &mut self.indicator {
            if indicator.interval_ms > 0
                && now.wrapping_sub(indicator.last_toggle_ms) > indicator.interval_ms
            {
                indicator.last_toggle_ms = now;
                let lit = !indicator.lit;
                indicator.set(lit);
            }
        }
    }
}

/// Compare two addresses most-significant byte first; the numerically
/// greater one wins. For any two distinct addresses exactly one ordering
/// holds, which is what breaks the symmetric pairing race.
fn tie_break(a: &[u8; MAC_LEN], b: &[u8; MAC_LEN]) -> bool {
    a > b
}

/// Pick the least congested of the three non-overlapping 2.4 GHz channels.
fn least_congested_channel<R: RadioDriver>(driver: &mut R) -> u8 {
    let c1 = driver.survey(1);
    let c6 = driver.survey(6);
    let c11 = driver.survey(11);
    if c1 < c6 && c1 < c11 {
        1
    } else if c6 < c1 && c6 < c11 {
        6
    } else {
        11
    }
}

fn fire(callback: &mut Option<Box<dyn FnMut()>>) {
    if let Some(callback) = callback {
        callback();
    }
}

fn report_add(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            log::debug!("[Link::add] {}", e);
            false
        }
    }
}

fn report_retrieve<T>(result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("[Link::retrieve] {}", e);
            None
        }
    }
}

fn format_address(address: &[u8; MAC_LEN]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        address[0], address[1], address[2], address[3], address[4], address[5]
    )
}
