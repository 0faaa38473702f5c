//! Locker number to physical relay address mapping
//!
//! Board order is port order: locker `n` lives on board `(n-1) / cpb` at
//! channel `(n-1) % cpb + 1`.

use serde::Serialize;

use errors::{GatewayError, GatewayResult};

/// Default relay channels per board
pub const DEFAULT_CHANNELS_PER_BOARD: u16 = 16;

/// Resolved physical address of a locker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayAddress {
    pub locker: i32,
    pub port: String,
    pub board_index: usize,
    /// 1-based channel within the board
    pub channel: u16,
}

/// Pure mapping of a locker number onto `(board_index, channel)`.
///
/// Callers must range-check `locker` first; this only does the arithmetic.
pub fn map_channel(locker: i32, channels_per_board: u16) -> (usize, u16) {
    let zero_based = (locker - 1) as usize;
    let cpb = usize::from(channels_per_board);
    (zero_based / cpb, (zero_based % cpb) as u16 + 1)
}

/// Maps locker numbers onto configured serial ports
#[derive(Debug, Clone)]
pub struct ChannelMapper {
    ports: Vec<String>,
    channels_per_board: u16,
    max: Option<i32>,
}

impl ChannelMapper {
    pub fn new(ports: Vec<String>, channels_per_board: u16, max: Option<i32>) -> Self {
        Self {
            ports,
            channels_per_board: channels_per_board.max(1),
            max,
        }
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    pub fn channels_per_board(&self) -> u16 {
        self.channels_per_board
    }

    /// Number of addressable lockers: `boards * cpb`, capped by the configured max
    pub fn capacity(&self) -> i32 {
        let physical = self.ports.len() as i32 * i32::from(self.channels_per_board);
        match self.max {
            Some(max) if max >= 0 => physical.min(max),
            _ => physical,
        }
    }

    /// Resolve a locker number, rejecting it before any I/O when out of range
    pub fn resolve(&self, locker: i32) -> GatewayResult<RelayAddress> {
        self.ensure_ports()?;

        let capacity = self.capacity();
        if locker < 1 || locker > capacity {
            return Err(GatewayError::invalid_address(
                locker.to_string(),
                format!("locker must be within 1..={capacity}"),
            ));
        }

        let (board_index, channel) = map_channel(locker, self.channels_per_board);
        let port = self.port(board_index)?.to_string();
        Ok(RelayAddress {
            locker,
            port,
            board_index,
            channel,
        })
    }

    /// Port path of a board
    pub fn port(&self, board_index: usize) -> GatewayResult<&str> {
        self.ensure_ports()?;
        self.ports.get(board_index).map(String::as_str).ok_or_else(|| {
            GatewayError::invalid_address(
                format!("board {board_index}"),
                format!("only {} boards configured", self.ports.len()),
            )
        })
    }

    /// Addressable locker numbers wired to a board
    pub fn board_lockers(&self, board_index: usize) -> std::ops::RangeInclusive<i32> {
        let cpb = i32::from(self.channels_per_board);
        let first = board_index as i32 * cpb + 1;
        let last = (first + cpb - 1).min(self.capacity());
        first..=last
    }

    fn ensure_ports(&self) -> GatewayResult<()> {
        if self.ports.is_empty() {
            return Err(GatewayError::Configuration(
                "No serial ports configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::ErrorKind;

    fn mapper(boards: usize) -> ChannelMapper {
        let ports = (0..boards).map(|i| format!("/dev/ttyUSB{i}")).collect();
        ChannelMapper::new(ports, DEFAULT_CHANNELS_PER_BOARD, None)
    }

    #[test]
    fn test_first_locker_of_each_board() {
        assert_eq!(map_channel(1, 16), (0, 1));
        assert_eq!(map_channel(16, 16), (0, 16));
        assert_eq!(map_channel(17, 16), (1, 1));
        assert_eq!(map_channel(33, 16), (2, 1));
        assert_eq!(map_channel(9, 8), (1, 1));
    }

    #[test]
    fn test_every_locker_maps_in_range() {
        let mapper = mapper(3);
        for locker in 1..=mapper.capacity() {
            let addr = mapper.resolve(locker).unwrap();
            assert!(addr.board_index < 3);
            assert!((1..=16).contains(&addr.channel));
            assert_eq!(addr.port, format!("/dev/ttyUSB{}", addr.board_index));
            assert!(mapper.board_lockers(addr.board_index).contains(&locker));
        }
    }

    #[test]
    fn test_out_of_range_is_invalid_address() {
        let mapper = mapper(2);
        for locker in [0, -5, 33, i32::MAX] {
            let err = mapper.resolve(locker).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidAddress, "locker {locker}");
        }
    }

    #[test]
    fn test_max_caps_capacity() {
        let mapper = ChannelMapper::new(vec!["/dev/ttyUSB0".into()], 16, Some(10));
        assert_eq!(mapper.capacity(), 10);
        assert!(mapper.resolve(10).is_ok());
        assert!(mapper.resolve(11).is_err());
        assert_eq!(mapper.board_lockers(0), 1..=10);
    }

    #[test]
    fn test_no_ports_is_configuration_error() {
        let mapper = mapper(0);
        let err = mapper.resolve(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_board_lockers() {
        let mapper = mapper(2);
        assert_eq!(mapper.board_lockers(1), 17..=32);
        assert!(mapper.port(2).is_err());
    }
}
