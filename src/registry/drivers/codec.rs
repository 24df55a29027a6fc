//! Helpers for packing a driver's typed config into
//! [`crate::config::DeviceConfig`]'s opaque buffer as length-prefixed JSON.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CONFIG_BUF_LEN;

/// Encodes `value` as JSON into `buf`, prefixed by a little-endian `u16`
/// length. Returns `false` if the encoding doesn't fit.
pub fn encode_into(buf: &mut [u8; CONFIG_BUF_LEN], value: &impl Serialize) -> bool {
    let Ok(json) = serde_json::to_vec(value) else {
        return false;
    };
    if json.len() + 2 > CONFIG_BUF_LEN {
        return false;
    }
    buf.fill(0);
    buf[0..2].copy_from_slice(&(json.len() as u16).to_le_bytes());
    buf[2..2 + json.len()].copy_from_slice(&json);
    true
}

/// Decodes a value previously written by [`encode_into`].
pub fn decode_from<T: DeserializeOwned>(buf: &[u8; CONFIG_BUF_LEN]) -> Option<T> {
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if len == 0 || 2 + len > CONFIG_BUF_LEN {
        return None;
    }
    serde_json::from_slice(&buf[2..2 + len]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn round_trips_through_buffer() {
        let mut buf = [0u8; CONFIG_BUF_LEN];
        assert!(encode_into(&mut buf, &Point { x: 3, y: -4 }));
        let back: Point = decode_from(&buf).unwrap();
        assert_eq!(back, Point { x: 3, y: -4 });
    }

    #[test]
    fn empty_buffer_decodes_to_none() {
        let buf = [0u8; CONFIG_BUF_LEN];
        assert_eq!(decode_from::<Point>(&buf), None);
    }
}
