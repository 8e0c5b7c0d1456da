use std::fmt;
use std::str::FromStr;

use crate::error::LinkError;

/// Width of a link address in bytes.
pub const MAC_LEN: usize = 6;

/// Reserved all-ones broadcast address recognized by every station.
pub const BROADCAST: MacAddr = MacAddr([0xFF; MAC_LEN]);

/// A fixed-width link-layer address identifying one station.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; MAC_LEN]);

impl MacAddr {
    /// Create an address from raw bytes.
    pub const fn new(bytes: [u8; MAC_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse an address from the first [`MAC_LEN`] bytes of a slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; MAC_LEN] = bytes.get(..MAC_LEN)?.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Raw address bytes.
    pub fn octets(&self) -> [u8; MAC_LEN] {
        self.0
    }

    /// Returns true for the reserved broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

impl From<[u8; MAC_LEN]> for MacAddr {
    fn from(bytes: [u8; MAC_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for MacAddr {
    type Err = LinkError;

    /// Parses `aa:bb:cc:dd:ee:ff` (`-` is accepted as a separator too).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LinkError::InvalidAddress(s.to_string());
        let mut out = [0u8; MAC_LEN];
        let mut parts = s.split([':', '-']);

        for octet in out.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_roundtrip() {
        let addr = MacAddr::new([0x24, 0x6f, 0x28, 0x01, 0xab, 0xff]);
        let text = addr.to_string();
        assert_eq!(text, "24:6f:28:01:ab:ff");
        assert_eq!(text.parse::<MacAddr>().unwrap(), addr);
    }

    #[test]
    fn parse_accepts_dash_separator() {
        let addr: MacAddr = "FF-FF-FF-FF-FF-FF".parse().unwrap();
        assert!(addr.is_broadcast());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("24:6f:28:01:ab".parse::<MacAddr>().is_err());
        assert!("24:6f:28:01:ab:ff:00".parse::<MacAddr>().is_err());
        assert!("24:6f:28:01:ab:zz".parse::<MacAddr>().is_err());
        assert!("246f:28:01:ab:ff".parse::<MacAddr>().is_err());
    }

    #[test]
    fn from_slice_requires_full_width() {
        assert!(MacAddr::from_slice(&[1, 2, 3]).is_none());
        let addr = MacAddr::from_slice(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(addr.octets(), [1, 2, 3, 4, 5, 6]);
    }
}
