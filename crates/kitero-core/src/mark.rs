//! Firewall mark encoding for (interface, slot) pairs.

use crate::error::ConfigError;

/// Smallest `b` such that `2^b >= n`, for `n >= 1`.
fn bits_for(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        32 - (n - 1).leading_zeros()
    }
}

/// Packs an (interface, slot) pair into a 32-bit firewall mark.
///
/// Interface occupies the top `b_if` bits (1-based, 0 reserved for "no
/// interface"); slot occupies the next `b_slot` bits. Either field may be
/// omitted, in which case it contributes no bits to mark or mask.
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    b_if: u32,
    b_slot: u32,
}

impl Mark {
    pub fn new(num_interfaces: u32, max_users: u32) -> Result<Self, ConfigError> {
        let b_if = bits_for(num_interfaces + 1);
        let b_slot = bits_for(max_users);
        if b_if + b_slot > 32 {
            return Err(ConfigError::MarkOverflow(b_if + b_slot));
        }
        Ok(Self { b_if, b_slot })
    }

    /// Returns `(mark, mask)` as `0x`-prefixed 8 hex digit strings.
    pub fn at(&self, interface_index: Option<u32>, slot: Option<u32>) -> (String, String) {
        let mut mark: u32 = 0;
        let mut mask: u32 = 0;
        if let Some(i) = interface_index {
            let shift = 32 - self.b_if;
            mask |= ((1u64 << self.b_if) - 1) as u32 << shift;
            mark |= (i + 1) << shift;
        }
        if let Some(s) = slot {
            let shift = 32 - self.b_if - self.b_slot;
            mask |= ((1u64 << self.b_slot) - 1) as u32 << shift;
            mark |= s << shift;
        }
        (format!("0x{:08x}", mark), format!("0x{:08x}", mask))
    }

    pub fn interface_bits(&self) -> u32 {
        self.b_if
    }

    pub fn slot_bits(&self) -> u32 {
        self.b_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing() {
        let mark = Mark::new(7, 8).unwrap();
        assert_eq!(mark.interface_bits(), 3);
        assert_eq!(mark.slot_bits(), 3);
    }

    #[test]
    fn encoding_values() {
        let mark = Mark::new(15, 8).unwrap();
        assert_eq!(mark.interface_bits(), 4);
        assert_eq!(mark.slot_bits(), 3);
        assert_eq!(
            mark.at(Some(1), None),
            ("0x20000000".to_string(), "0xf0000000".to_string())
        );
        assert_eq!(
            mark.at(None, Some(1)),
            ("0x02000000".to_string(), "0x0e000000".to_string())
        );
        assert_eq!(
            mark.at(Some(7), Some(3)),
            ("0x86000000".to_string(), "0xfe000000".to_string())
        );
    }

    #[test]
    fn overflow_is_rejected() {
        // 17 interfaces needs 5 bits, 1<<28 users needs 28 bits: 33 total.
        assert!(Mark::new(17, 1 << 28).is_err());
    }

    #[test]
    fn mark_is_subset_of_mask() {
        let mark = Mark::new(7, 256).unwrap();
        for i in 0..7 {
            for s in 0..256 {
                let (m, k) = mark.at(Some(i), Some(s));
                let m = u32::from_str_radix(&m[2..], 16).unwrap();
                let k = u32::from_str_radix(&k[2..], 16).unwrap();
                assert_eq!(m & k, m);
            }
        }
    }
}
