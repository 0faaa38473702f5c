//! Relay board status frame
//!
//! Reply to the `status` command: after trimming a leading `:` and
//! whitespace, characters 6..10 are a 4-hex-digit bitfield. The first byte
//! covers channels 1-8, the second channels 9-16, bit `i` set means channel
//! `i + 1` is energized.

use serde::Serialize;

use errors::{GatewayError, GatewayResult};

const BITFIELD_OFFSET: usize = 6;
const BITFIELD_LEN: usize = 4;
const MIN_FRAME_LEN: usize = BITFIELD_OFFSET + BITFIELD_LEN;

/// Channels covered by the two-byte bitfield
pub const FRAME_CHANNELS: u16 = 16;

/// Decoded channel bitfield of one board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelBits([u8; 2]);

impl ChannelBits {
    /// Whether 1-based `channel` is energized; channels past 16 read as off
    pub fn is_energized(&self, channel: u16) -> bool {
        if channel == 0 || channel > FRAME_CHANNELS {
            return false;
        }
        let index = usize::from(channel - 1);
        self.0[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn bytes(&self) -> [u8; 2] {
        self.0
    }
}

/// Parse a status reply into its channel bitfield
pub fn parse_status_frame(response: &str) -> GatewayResult<ChannelBits> {
    let frame = response.trim().trim_start_matches(':').trim_start();

    let field = frame
        .get(BITFIELD_OFFSET..MIN_FRAME_LEN)
        .ok_or_else(|| mismatch("status frame too short", response))?;

    let byte = |range: std::ops::Range<usize>| {
        field
            .get(range)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| mismatch("status bitfield is not hex", response))
    };

    Ok(ChannelBits([byte(0..2)?, byte(2..4)?]))
}

fn mismatch(message: &str, raw: &str) -> GatewayError {
    GatewayError::mismatch("relay-status", message, Some(raw.to_string()))
}

/// One channel as read back from the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReading {
    pub locker: i32,
    pub channel: u16,
    pub energized: bool,
}

/// Hardware readback of one board
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardStatus {
    pub board_index: usize,
    pub port: String,
    pub raw: String,
    pub channels: Vec<ChannelReading>,
}

impl BoardStatus {
    pub fn energized_lockers(&self) -> impl Iterator<Item = i32> + '_ {
        self.channels.iter().filter(|c| c.energized).map(|c| c.locker)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::ErrorKind;

    #[test]
    fn test_ff00_means_first_eight_on() {
        let bits = parse_status_frame(":FE0102FF00AB\r\n").unwrap();
        for channel in 1..=8 {
            assert!(bits.is_energized(channel), "channel {channel}");
        }
        for channel in 9..=16 {
            assert!(!bits.is_energized(channel), "channel {channel}");
        }
    }

    #[test]
    fn test_bit_positions() {
        // 0x05 = channels 1 and 3, 0x80 = channel 16
        let bits = parse_status_frame("  : FE01020580").unwrap();
        assert_eq!(bits.bytes(), [0x05, 0x80]);
        assert!(bits.is_energized(1));
        assert!(!bits.is_energized(2));
        assert!(bits.is_energized(3));
        assert!(bits.is_energized(16));
        assert!(!bits.is_energized(0));
        assert!(!bits.is_energized(17));
    }

    #[test]
    fn test_short_or_garbled_frame() {
        let err = parse_status_frame(":FE01").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
        assert_eq!(err.raw_response(), Some(":FE01"));

        assert!(parse_status_frame("FE0102ZZ00").is_err());
        assert!(parse_status_frame("").is_err());
    }
}
