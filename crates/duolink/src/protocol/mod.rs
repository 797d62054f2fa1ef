// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire protocol: frame codec, CRC trailer, and the typed record format.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `crc` | CRC32 trailer computation and verification |
//! | `cursor` | Bounds-checked read/write cursors |
//! | `frame` | PAIRING / PAIRING_ACK / KEEPALIVE / DATA encode + decode |
//! | `record` | Tag-per-field application record writer/reader |

pub mod crc;
pub mod cursor;
pub mod frame;
pub mod record;

pub use frame::{Frame, KeepaliveBody, PairingAckBody, PairingBody};
pub use record::{MessageReader, MessageWriter, Scalar};
