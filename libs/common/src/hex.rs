//! Wire byte formatting for packet logs
//! Relay boards and projectors speak ASCII, so logs show both forms.

use std::fmt::Write;

/// Encode bytes to uppercase hex string separated by spaces
/// Example: [0x12, 0x34, 0xAB] -> "12 34 AB"
pub fn format_hex_pretty(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        // Writing to String buffer is infallible - no need for expect
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Render bytes as ASCII with control characters escaped
/// Example: b"ka 01 01\r" -> "ka 01 01\\r"
pub fn printable(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len());
    for &byte in data {
        match byte {
            b'\r' => result.push_str("\\r"),
            b'\n' => result.push_str("\\n"),
            b'\t' => result.push_str("\\t"),
            0x20..=0x7E => result.push(byte as char),
            _ => {
                let _ = write!(&mut result, "\\x{:02X}", byte);
            },
        }
    }
    result
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_hex_pretty() {
        assert_eq!(format_hex_pretty(&[0x12, 0x34, 0xAB]), "12 34 AB");
        assert_eq!(format_hex_pretty(&[]), "");
        assert_eq!(format_hex_pretty(&[0x0F]), "0F");
    }

    #[test]
    fn test_printable_escapes_controls() {
        assert_eq!(printable(b"%1POWR 1\r"), "%1POWR 1\\r");
        assert_eq!(printable(b"OK\r\n"), "OK\\r\\n");
        assert_eq!(printable(&[0x00, b'A']), "\\x00A");
    }
}
