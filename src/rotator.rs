//! Round-robin selection over the configured sensor addresses.

use crate::mac_address::MacAddress;

/// Ordered, fixed list of sensor addresses with a cursor.
///
/// The cursor always points at a valid entry. The first selected device is
/// the first configured one, and [`advance`](Self::advance) wraps from the
/// last entry back to the first.
#[derive(Debug, Clone)]
pub struct DeviceRotator {
    addresses: Vec<MacAddress>,
    index: usize,
}

impl DeviceRotator {
    /// Create a rotator, or `None` when no addresses are given.
    pub fn new(addresses: Vec<MacAddress>) -> Option<Self> {
        if addresses.is_empty() {
            return None;
        }
        Some(Self {
            addresses,
            index: 0,
        })
    }

    /// Address of the device currently selected.
    pub fn current(&self) -> MacAddress {
        self.addresses[self.index]
    }

    /// Move to the next address, wrapping around at the end.
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.addresses.len();
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Always false; a rotator holds at least one address.
    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: MacAddress = MacAddress([0xA, 0, 0, 0, 0, 0]);
    const B: MacAddress = MacAddress([0xB, 0, 0, 0, 0, 0]);
    const C: MacAddress = MacAddress([0xC, 0, 0, 0, 0, 0]);

    #[test]
    fn test_starts_at_first_address() {
        let rotator = DeviceRotator::new(vec![A, B, C]).unwrap();
        assert_eq!(rotator.current(), A);
    }

    #[test]
    fn test_advance_cycles() {
        let mut rotator = DeviceRotator::new(vec![A, B, C]).unwrap();
        let mut visited = vec![rotator.current()];
        for _ in 0..5 {
            rotator.advance();
            visited.push(rotator.current());
        }
        assert_eq!(visited, vec![A, B, C, A, B, C]);
    }

    #[test]
    fn test_single_address_wraps_to_itself() {
        let mut rotator = DeviceRotator::new(vec![A]).unwrap();
        rotator.advance();
        assert_eq!(rotator.current(), A);
        assert_eq!(rotator.len(), 1);
    }

    #[test]
    fn test_empty_list_rejected() {
        assert!(DeviceRotator::new(vec![]).is_none());
    }
}
