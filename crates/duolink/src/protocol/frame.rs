// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame codec.
//!
//! Every frame on the wire shares one layout:
//!
//! ```text
//! +--------+---------------------+------------------+---------+-----------+
//! | [0]    | [1]                 | [2..]            | pad     | trailer   |
//! | type   | channel (protocol)  | type-specific    | 0x00 to | CRC32     |
//! | tag    | field count (DATA)  | body             | 60 B    | 4 B, BE   |
//! +--------+---------------------+------------------+---------+-----------+
//! ```
//!
//! A frame whose recomputed CRC32 does not match its trailer is silently
//! discarded by the caller; the decoder reports it as [`Error::BadCrc`].

use super::crc;
use super::cursor::{Cursor, CursorMut};
use crate::config::{CRC_LEN, KEY_LEN, MAC_LEN, MAX_FRAME, MIN_FRAME};
use crate::error::{Error, Result};

/// Frame type tags.
pub const FRAME_PAIRING: u8 = 0;
pub const FRAME_PAIRING_ACK: u8 = 1;
pub const FRAME_KEEPALIVE: u8 = 2;
pub const FRAME_DATA: u8 = 3;

/// Decoded view of a pairing broadcast: the sender's identity and both keys
/// in the clear (pairing trusts the first responder).
#[derive(Debug, PartialEq, Eq)]
pub struct PairingBody<'a> {
    pub channel: u8,
    pub address: [u8; MAC_LEN],
    pub primary_key: [u8; KEY_LEN],
    pub local_key: [u8; KEY_LEN],
    pub name: &'a [u8],
}

/// Decoded view of a pairing acknowledgement: everything the sender believes
/// about the association, echoed so the peer can verify both sides agree.
#[derive(Debug, PartialEq, Eq)]
pub struct PairingAckBody<'a> {
    pub channel: u8,
    pub address: [u8; MAC_LEN],
    pub remote_address: [u8; MAC_LEN],
    pub primary_key: [u8; KEY_LEN],
    pub local_key: [u8; KEY_LEN],
    pub name: &'a [u8],
}

/// Decoded view of a keepalive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveBody {
    pub channel: u8,
    pub address: [u8; MAC_LEN],
    pub remote_address: [u8; MAC_LEN],
    /// Sender's activity timestamp at its last send.
    pub local_activity: u32,
    /// The receiver timestamp the sender last saw, echoed back.
    pub echoed_activity: u32,
    pub min_tx_power: u8,
    pub current_tx_power: u8,
    pub max_tx_power: u8,
}

/// A validated inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Pairing(PairingBody<'a>),
    PairingAck(PairingAckBody<'a>),
    Keepalive(KeepaliveBody),
    /// Data frames are handed over whole (header + records + pad + CRC) so
    /// the inbox can take a verbatim copy.
    Data { field_count: u8, raw: &'a [u8] },
}

fn finish(buf: &mut [u8; MAX_FRAME], mut cursor_end: usize) -> Result<usize> {
    if cursor_end > MAX_FRAME - CRC_LEN {
        return Err(Error::BufferFull);
    }
    while cursor_end < MIN_FRAME {
        buf[cursor_end] = 0x00;
        cursor_end += 1;
    }
    Ok(crc::append(buf, cursor_end))
}

/// Encode a PAIRING broadcast. Returns the total frame length.
pub fn encode_pairing(
    buf: &mut [u8; MAX_FRAME],
    channel: u8,
    address: &[u8; MAC_LEN],
    primary_key: &[u8; KEY_LEN],
    local_key: &[u8; KEY_LEN],
    name: &[u8],
) -> Result<usize> {
    if name.len() > usize::from(u8::MAX) {
        return Err(Error::BufferFull);
    }
    let end = {
        let mut w = CursorMut::new(&mut buf[..MAX_FRAME - CRC_LEN]);
        w.write_u8(FRAME_PAIRING)?;
        w.write_u8(channel)?;
        w.write_bytes(address)?;
        w.write_bytes(primary_key)?;
        w.write_bytes(local_key)?;
        w.write_u8(name.len() as u8)?;
        w.write_bytes(name)?;
        w.offset()
    };
    finish(buf, end)
}

/// Encode a PAIRING_ACK broadcast. Returns the total frame length.
pub fn encode_pairing_ack(
    buf: &mut [u8; MAX_FRAME],
    channel: u8,
    address: &[u8; MAC_LEN],
    remote_address: &[u8; MAC_LEN],
    primary_key: &[u8; KEY_LEN],
    local_key: &[u8; KEY_LEN],
    name: &[u8],
) -> Result<usize> {
    if name.len() > usize::from(u8::MAX) {
        return Err(Error::BufferFull);
    }
    let end = {
        let mut w = CursorMut::new(&mut buf[..MAX_FRAME - CRC_LEN]);
        w.write_u8(FRAME_PAIRING_ACK)?;
        w.write_u8(channel)?;
        w.write_bytes(address)?;
        w.write_bytes(remote_address)?;
        w.write_bytes(primary_key)?;
        w.write_bytes(local_key)?;
        w.write_u8(name.len() as u8)?;
        w.write_bytes(name)?;
        w.offset()
    };
    finish(buf, end)
}

/// Encode a KEEPALIVE. Returns the total frame length.
pub fn encode_keepalive(buf: &mut [u8; MAX_FRAME], body: &KeepaliveBody) -> Result<usize> {
    let end = {
        let mut w = CursorMut::new(&mut buf[..MAX_FRAME - CRC_LEN]);
        w.write_u8(FRAME_KEEPALIVE)?;
        w.write_u8(body.channel)?;
        w.write_bytes(&body.address)?;
        w.write_bytes(&body.remote_address)?;
        w.write_u32_be(body.local_activity)?;
        w.write_u32_be(body.echoed_activity)?;
        w.write_u8(body.min_tx_power)?;
        w.write_u8(body.current_tx_power)?;
        w.write_u8(body.max_tx_power)?;
        w.offset()
    };
    finish(buf, end)
}

/// Pad a prepared data frame (header + records already at `buf[..len]`) and
/// append the CRC trailer. Returns the total frame length.
pub fn finish_data(buf: &mut [u8; MAX_FRAME], len: usize) -> Result<usize> {
    buf[0] = FRAME_DATA;
    finish(buf, len)
}

/// Validate and decode an inbound frame.
pub fn decode(raw: &[u8]) -> Result<Frame<'_>> {
    if raw.len() < MIN_FRAME + CRC_LEN {
        return Err(Error::ShortFrame);
    }
    if !crc::verify(raw) {
        return Err(Error::BadCrc);
    }
    let body = &raw[..raw.len() - CRC_LEN];
    let mut r = Cursor::new(body);
    let kind = r.read_u8()?;
    match kind {
        FRAME_PAIRING => {
            let channel = r.read_u8()?;
            let address = r.read_array::<MAC_LEN>()?;
            let primary_key = r.read_array::<KEY_LEN>()?;
            let local_key = r.read_array::<KEY_LEN>()?;
            let name_len = r.read_u8()? as usize;
            let name = r.read_bytes(name_len)?;
            Ok(Frame::Pairing(PairingBody {
                channel,
                address,
                primary_key,
                local_key,
                name,
            }))
        }
        FRAME_PAIRING_ACK => {
            let channel = r.read_u8()?;
            let address = r.read_array::<MAC_LEN>()?;
            let remote_address = r.read_array::<MAC_LEN>()?;
            let primary_key = r.read_array::<KEY_LEN>()?;
            let local_key = r.read_array::<KEY_LEN>()?;
            let name_len = r.read_u8()? as usize;
            let name = r.read_bytes(name_len)?;
            Ok(Frame::PairingAck(PairingAckBody {
                channel,
                address,
                remote_address,
                primary_key,
                local_key,
                name,
            }))
        }
        FRAME_KEEPALIVE => {
            let channel = r.read_u8()?;
            let address = r.read_array::<MAC_LEN>()?;
            let remote_address = r.read_array::<MAC_LEN>()?;
            let local_activity = r.read_u32_be()?;
            let echoed_activity = r.read_u32_be()?;
            let min_tx_power = r.read_u8()?;
            let current_tx_power = r.read_u8()?;
            let max_tx_power = r.read_u8()?;
            Ok(Frame::Keepalive(KeepaliveBody {
                channel,
                address,
                remote_address,
                local_activity,
                echoed_activity,
                min_tx_power,
                current_tx_power,
                max_tx_power,
            }))
        }
        FRAME_DATA => Ok(Frame::Data {
            field_count: raw[1],
            raw,
        }),
        _ => Err(Error::UnknownType),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_A: [u8; 6] = [0xAA; 6];
    const ADDR_B: [u8; 6] = [0xBB; 6];
    const PRIMARY: [u8; 16] = [0x11; 16];
    const LOCAL: [u8; 16] = [0x22; 16];

    #[test]
    fn test_pairing_roundtrip() {
        let mut buf = [0u8; MAX_FRAME];
        let len = encode_pairing(&mut buf, 6, &ADDR_A, &PRIMARY, &LOCAL, b"node-a").expect("fits");
        assert_eq!(len, MIN_FRAME + CRC_LEN);
        match decode(&buf[..len]).expect("valid") {
            Frame::Pairing(p) => {
                assert_eq!(p.channel, 6);
                assert_eq!(p.address, ADDR_A);
                assert_eq!(p.primary_key, PRIMARY);
                assert_eq!(p.local_key, LOCAL);
                assert_eq!(p.name, b"node-a");
            }
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_pairing_layout_offsets() {
        let mut buf = [0u8; MAX_FRAME];
        encode_pairing(&mut buf, 1, &ADDR_A, &PRIMARY, &LOCAL, b"hi").expect("fits");
        assert_eq!(buf[0], FRAME_PAIRING);
        assert_eq!(buf[1], 1);
        assert_eq!(&buf[2..8], &ADDR_A);
        assert_eq!(&buf[8..24], &PRIMARY);
        assert_eq!(&buf[24..40], &LOCAL);
        assert_eq!(buf[40], 2);
        assert_eq!(&buf[41..43], b"hi");
        // Padded with zeros up to MIN_FRAME.
        assert!(buf[43..MIN_FRAME].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pairing_ack_roundtrip() {
        let mut buf = [0u8; MAX_FRAME];
        let len = encode_pairing_ack(&mut buf, 11, &ADDR_B, &ADDR_A, &PRIMARY, &LOCAL, b"")
            .expect("fits");
        match decode(&buf[..len]).expect("valid") {
            Frame::PairingAck(p) => {
                assert_eq!(p.channel, 11);
                assert_eq!(p.address, ADDR_B);
                assert_eq!(p.remote_address, ADDR_A);
                assert_eq!(p.primary_key, PRIMARY);
                assert_eq!(p.local_key, LOCAL);
                assert!(p.name.is_empty());
            }
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_keepalive_roundtrip_and_endianness() {
        let body = KeepaliveBody {
            channel: 1,
            address: ADDR_A,
            remote_address: ADDR_B,
            local_activity: 0x0102_0304,
            echoed_activity: 0xAABB_CCDD,
            min_tx_power: 9,
            current_tx_power: 40,
            max_tx_power: 80,
        };
        let mut buf = [0u8; MAX_FRAME];
        let len = encode_keepalive(&mut buf, &body).expect("fits");
        // Timestamps go big-endian at fixed offsets.
        assert_eq!(&buf[14..18], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&buf[18..22], &[0xAA, 0xBB, 0xCC, 0xDD]);
        match decode(&buf[..len]).expect("valid") {
            Frame::Keepalive(k) => assert_eq!(k, body),
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_short_frame_rejected() {
        let buf = [0u8; MIN_FRAME + CRC_LEN - 1];
        assert_eq!(decode(&buf), Err(Error::ShortFrame));
    }

    #[test]
    fn test_corrupted_crc_rejected() {
        let mut buf = [0u8; MAX_FRAME];
        let len = encode_pairing(&mut buf, 1, &ADDR_A, &PRIMARY, &LOCAL, b"").expect("fits");
        buf[len - 1] ^= 0x01;
        assert_eq!(decode(&buf[..len]), Err(Error::BadCrc));
    }

    #[test]
    fn test_corrupted_body_rejected() {
        let mut buf = [0u8; MAX_FRAME];
        let len = encode_pairing(&mut buf, 1, &ADDR_A, &PRIMARY, &LOCAL, b"x").expect("fits");
        buf[10] ^= 0x80;
        assert_eq!(decode(&buf[..len]), Err(Error::BadCrc));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut buf = [0u8; MAX_FRAME];
        let len = encode_pairing(&mut buf, 1, &ADDR_A, &PRIMARY, &LOCAL, b"").expect("fits");
        buf[0] = 7;
        let len = crate::protocol::crc::append(&mut buf, len - CRC_LEN);
        assert_eq!(decode(&buf[..len]), Err(Error::UnknownType));
    }

    #[test]
    fn test_data_frame_passthrough() {
        let mut buf = [0u8; MAX_FRAME];
        buf[1] = 3;
        let len = finish_data(&mut buf, 10).expect("fits");
        assert_eq!(len, MIN_FRAME + CRC_LEN);
        match decode(&buf[..len]).expect("valid") {
            Frame::Data { field_count, raw } => {
                assert_eq!(field_count, 3);
                assert_eq!(raw.len(), len);
            }
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_long_name_still_decodes() {
        let name = [b'n'; 64];
        let mut buf = [0u8; MAX_FRAME];
        let len = encode_pairing(&mut buf, 1, &ADDR_A, &PRIMARY, &LOCAL, &name).expect("fits");
        // 40-byte fixed body + 1 length byte + 64 name bytes > MIN_FRAME, no pad.
        assert_eq!(len, 41 + 64 + CRC_LEN);
        match decode(&buf[..len]).expect("valid") {
            Frame::Pairing(p) => assert_eq!(p.name.len(), 64),
            other => panic!("wrong frame: {:?}", other),
        }
    }
}
