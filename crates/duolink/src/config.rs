// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global configuration - single source of truth for protocol constants.
//!
//! This module centralizes every wire-format, timing, and threshold constant
//! used by the link. **NEVER hardcode these values elsewhere!**

// =======================================================================
// Frame geometry
// =======================================================================

/// Maximum datagram size accepted by the radio, **including** the CRC trailer.
pub const MAX_FRAME: usize = 250;

/// Frames are zero-padded up to this size before the CRC trailer is appended.
pub const MIN_FRAME: usize = 60;

/// Reserved bytes a data frame can never spend on user fields
/// (type tag + field count + slack kept for the link layer).
pub const PACKET_OVERHEAD: usize = 6;

/// Length of the CRC32 trailer.
pub const CRC_LEN: usize = 4;

/// Length of a peer address.
pub const MAC_LEN: usize = 6;

/// Length of both symmetric keys.
pub const KEY_LEN: usize = 16;

/// Destination address for broadcast frames.
pub const BROADCAST_ADDRESS: [u8; MAC_LEN] = [0xFF; MAC_LEN];

/// Writer capacity: a field must fit below this offset
/// (`MAX_FRAME` minus the CRC trailer minus `PACKET_OVERHEAD`).
pub const RECORD_CAPACITY: usize = MAX_FRAME - CRC_LEN - PACKET_OVERHEAD;

// =======================================================================
// Timing
// =======================================================================

/// How long a unicast send waits for its TX confirmation.
pub const SEND_TIMEOUT_MS: u32 = 100;

/// Cadence of pairing / pairing-ACK broadcasts, and of radio init retries.
pub const PAIRING_INTERVAL_MS: u32 = 5_000;

/// Keepalive interval when a session starts.
pub const KEEPALIVE_START_MS: u32 = 250;

/// Keepalive interval floor under sustained loss.
pub const KEEPALIVE_MIN_MS: u32 = 50;

/// Keepalive interval ceiling on a quiet, healthy link.
pub const KEEPALIVE_MAX_MS: u32 = 1_000;

/// Additive step applied to the keepalive interval after a confirmed send.
pub const KEEPALIVE_STEP_MS: u32 = 100;

/// A keepalive echo is considered missed after this many intervals.
pub const ECHO_MISS_INTERVALS: u32 = 3;

/// How long the pairing button must be held to reset the pairing.
pub const BUTTON_HOLD_MS: u32 = 5_000;

// =======================================================================
// Link quality thresholds
// =======================================================================

/// `connecting` promotes to `connected` once the AND of both quality
/// registers exceeds this (the top eight attempts succeeded on both sides).
pub const QUALITY_CONNECT_FLOOR: u32 = 0xFF00_0000;

/// `connected` demotes to `disconnected` below this popcount score.
pub const QUALITY_LOWER_THRESHOLD: u32 = 12;

/// `disconnected` recovers to `connected` at or above this popcount score.
pub const QUALITY_UPPER_THRESHOLD: u32 = 18;

// =======================================================================
// Transmit power (quarter-dBm units)
// =======================================================================

/// Default floor for the adaptive minimum TX power (2.25 dBm).
pub const TX_POWER_MIN_DEFAULT: u8 = 9;

/// Ceiling for TX power (20 dBm).
pub const TX_POWER_MAX: u8 = 80;

/// Keepalive intervals that must elapse at the minimum power before the
/// minimum itself is allowed to creep downward.
pub const TX_POWER_SETTLE_INTERVALS: u32 = 100;

/// A reduction followed by loss within this many keepalive intervals raises
/// the minimum power (punishes a hasty reduction).
pub const TX_POWER_PUNISH_INTERVALS: u32 = 5;

// =======================================================================
// Indicator LED blink intervals per state (ms; 0 = steady on)
// =======================================================================

pub const INDICATOR_INITIALISED_MS: u32 = 50;
pub const INDICATOR_PAIRING_MS: u32 = 100;
pub const INDICATOR_PAIRED_MS: u32 = 250;
pub const INDICATOR_CONNECTING_MS: u32 = 500;
pub const INDICATOR_CONNECTED_MS: u32 = 0;
pub const INDICATOR_DISCONNECTED_MS: u32 = 75;

// =======================================================================
// Persisted pairing layout (raw byte-addressable backends)
// =======================================================================

/// Total persisted blob: address | primary key | local key | CRC32.
pub const PAIRING_BLOB_LEN: usize = MAC_LEN + KEY_LEN + KEY_LEN + CRC_LEN;

/// Offset of the remote address inside the blob.
pub const PAIRING_ADDRESS_OFFSET: usize = 0;

/// Offset of the primary key inside the blob.
pub const PAIRING_PRIMARY_OFFSET: usize = MAC_LEN;

/// Offset of the local key inside the blob.
pub const PAIRING_LOCAL_OFFSET: usize = MAC_LEN + KEY_LEN;

/// Offset of the big-endian CRC32 inside the blob.
pub const PAIRING_CRC_OFFSET: usize = MAC_LEN + KEY_LEN + KEY_LEN;

/// Namespace used by key/value persistence backends.
pub const STORE_NAMESPACE: &str = "duolink";
