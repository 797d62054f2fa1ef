// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # duolink - encrypted point-to-point link between two wireless peers
//!
//! Establishes and maintains a paired connection between exactly two
//! microcontroller peers over a connectionless datagram radio with built-in
//! per-peer symmetric encryption: broadcast discovery and key exchange, a
//! deterministic tie break for the symmetric race, persistence of the
//! pairing, sliding-window link-quality tracking, adaptive keepalive pacing
//! and transmit power, and a typed record format for application payloads.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use duolink::{Link, SystemClock};
//!
//! let mut link = Link::new(my_radio, my_store, SystemClock::new());
//! link.set_local_name("sensor-a");
//! link.set_connected_callback(|| println!("connected"));
//! link.set_message_callback(|msg| {
//!     while msg.data_available() > 0 {
//!         // inspect msg.next_tag() and retrieve typed fields
//!         msg.skip();
//!     }
//! });
//! link.begin(0, 1);
//!
//! loop {
//!     link.tick();
//!     if link.connected() {
//!         link.add(42u16);
//!         link.add_str("hello");
//!         link.send_message(true);
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                        Application                            |
//! |      add/retrieve typed records | callbacks | tick()          |
//! +---------------------------------------------------------------+
//! |                       Link orchestrator                       |
//! |  six-state FSM | tie break | persistence trigger | indicator  |
//! +---------------------------------------------------------------+
//! | quality registers | keepalive schedule | TX power control     |
//! +---------------------------------------------------------------+
//! |        frame codec (CRC32 trailer) | record writer/reader     |
//! +---------------------------------------------------------------+
//! |   radio facade (send gating, RX queue) | pairing store        |
//! +---------------------------------------------------------------+
//! |      external radio driver | NV store | clock | GPIO          |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Link`] | The orchestrator; owns everything, driven by `tick()` |
//! | [`RadioDriver`] | Capability trait the host radio must provide |
//! | [`PairingStore`] | Persistence of the pairing tuple |
//! | [`MessageReader`] / [`MessageWriter`] | Typed application records |
//! | [`Clock`] | Monotonic millisecond time source |
//!
//! The pairing exchange broadcasts both keys in the clear and trusts the
//! first responder; it protects against passive convenience, not an active
//! attacker.

/// Protocol constants - the single source of truth.
pub mod config;
/// Adaptive keepalive pacing and transmit power control.
pub mod control;
/// Error and result types.
pub mod error;
/// GPIO seams for the pairing button and indicator LED.
pub mod gpio;
/// Key generation, clearing, and installation.
pub mod keys;
/// The connection state machine and public facade.
pub mod link;
/// Frame codec and typed record format.
pub mod protocol;
/// Link-quality registers.
pub mod quality;
/// Pairing persistence backends.
pub mod store;
/// Time source abstraction.
pub mod time;
/// Radio driver trait, callback bridge, and send gating.
pub mod transport;

pub use error::{Error, Result};
pub use link::{Link, LinkState};
pub use protocol::record::{tag, MessageReader, MessageWriter, Scalar};
pub use store::{KvStore, PairingRecord, PairingStore, RawStore};
pub use time::{Clock, ManualClock, SystemClock};
pub use transport::{RadioDriver, RadioEvents};
