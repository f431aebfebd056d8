use crate::WARP_SIZE;
use bitvec::field::BitField;
use bitvec::BitArr;

pub type Inner = BitArr!(for WARP_SIZE, in u32);

/// Warp-level active mask.
///
/// Bitmask where a 1 at position i means that lane i is active for the
/// current instruction.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ActiveMask(Inner);

impl ActiveMask {
    /// Active mask with all lanes inactive.
    pub const ZERO: Self = ActiveMask(Inner::ZERO);

    #[must_use]
    pub fn all_ones() -> Self {
        Self::ZERO.inverted()
    }

    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0.load()
    }

    #[must_use]
    pub fn inverted(mut self) -> Self {
        self.0 = !self.0;
        self
    }

    #[must_use]
    pub fn num_active(&self) -> usize {
        self.0.count_ones()
    }
}

impl From<u32> for ActiveMask {
    fn from(value: u32) -> Self {
        let mut mask = Inner::ZERO;
        mask.store(value);
        Self(mask)
    }
}

impl std::ops::Deref for ActiveMask {
    type Target = Inner;
    fn deref(&self) -> &Inner {
        &self.0
    }
}

impl std::ops::DerefMut for ActiveMask {
    fn deref_mut(&mut self) -> &mut Inner {
        &mut self.0
    }
}

impl std::fmt::Display for ActiveMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_bit_string())
    }
}

/// Format as a binary string.
pub trait ToBitString {
    fn to_bit_string(&self) -> String;
}

impl<A, O> ToBitString for bitvec::slice::BitSlice<A, O>
where
    A: bitvec::store::BitStore,
    O: bitvec::order::BitOrder,
{
    fn to_bit_string(&self) -> String {
        self.iter()
            .rev()
            .map(|b| if *b { "1" } else { "0" })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::ActiveMask;

    #[test]
    fn double_inversion_roundtrips() {
        for value in [0u32, 1, 0x8000_0001, 0xdead_beef, u32::MAX] {
            let mask = ActiveMask::from(value);
            assert_eq!(mask.inverted().inverted(), mask);
            assert_eq!(mask.inverted().as_u32(), !value);
        }
    }

    #[test]
    fn num_active_counts_set_bits() {
        assert_eq!(ActiveMask::ZERO.num_active(), 0);
        assert_eq!(ActiveMask::all_ones().num_active(), 32);
        assert_eq!(ActiveMask::from(0b1011u32).num_active(), 3);
    }
}
