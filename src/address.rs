use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::{Result, TreadmillError};

/// Validated Bluetooth device address in `XX:XX:XX:XX:XX:XX` form
///
/// The original text is kept verbatim, so `"aa:BB:01:02:03:04"` displays
/// exactly as it was given. Hex digits are accepted in either case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress {
    text: String,
    octets: [u8; 6],
}

impl DeviceAddress {
    /// Parse an address string
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::InvalidAddress`] carrying the rejected input
    /// unless it is six `:`-separated fields of exactly two hex digits each.
    pub fn from_string(text: &str) -> Result<Self> {
        let invalid = || TreadmillError::InvalidAddress(text.to_string());

        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(Self {
            text: text.to_string(),
            octets,
        })
    }

    /// The address exactly as it was parsed
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The six address bytes, most significant first
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.octets
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for DeviceAddress {
    type Err = TreadmillError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
    }
}

impl TryFrom<&str> for DeviceAddress {
    type Error = TreadmillError;

    fn try_from(value: &str) -> Result<Self> {
        Self::from_string(value)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = TreadmillError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_string(&value)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_addresses_round_trip_verbatim() {
        let test_cases = vec![
            ("12:34:56:78:9A:BC", [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]),
            ("00:11:22:33:44:55", [0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            ("AA:bb:01:02:03:04", [0xAA, 0xBB, 0x01, 0x02, 0x03, 0x04]),
            ("ff:ee:dd:cc:bb:aa", [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]),
        ];

        for (text, expected) in test_cases {
            let address = DeviceAddress::from_string(text)
                .unwrap_or_else(|e| panic!("{text} should parse: {e}"));
            assert_eq!(address.to_string(), text);
            assert_eq!(address.as_str(), text);
            assert_eq!(address.octets(), expected);
        }
    }

    #[test]
    fn test_invalid_addresses_are_rejected() {
        let invalid = vec![
            "12:34:56:78:9A",       // Too short
            "12:34:56:78:9A:BC:DE", // Too long
            "12:34:56:78:9A:XY",    // Invalid hex
            "12-34-56-78-9A-BC",    // Wrong separator
            "",                     // Empty string
            "12:34:56:78:9A:BC::",  // Extra separator
            "1:234:56:78:9A:BC",    // Wrong segment length
            "12:34:56:78:9A:B",     // Short segment
            "12:34:56:78:9A:+F",    // Sign is not a hex digit
            " 12:34:56:78:9A:BC",   // Leading whitespace
        ];

        for text in invalid {
            match DeviceAddress::from_string(text) {
                Err(TreadmillError::InvalidAddress(rejected)) => assert_eq!(rejected, text),
                other => panic!("{text:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_via_traits() {
        let parsed: DeviceAddress = "0a:0B:0c:0D:0e:0F".parse().unwrap();
        let converted = DeviceAddress::try_from("0a:0B:0c:0D:0e:0F").unwrap();
        assert_eq!(parsed, converted);
        assert!(DeviceAddress::try_from(String::from("bogus")).is_err());
    }

    #[test]
    fn test_serde_uses_text_form() {
        let address = DeviceAddress::from_string("Aa:00:11:22:33:44").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"Aa:00:11:22:33:44\"");

        let back: DeviceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);

        assert!(serde_json::from_str::<DeviceAddress>("\"not-an-address\"").is_err());
    }
}
