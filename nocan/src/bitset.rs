//! 64 bit topic set.

/// Length of the wire form of a [`Bitset64`].
pub const BITSET_LEN: usize = 8;

/// Set of up to 64 topics, one bit per topic.
///
/// On the wire byte `i` holds topics `8 * i` to `8 * i + 7`, least
/// significant bit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Bitset64(u64);

impl Bitset64 {
    pub const fn new() -> Self {
        Bitset64(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Bitset64(bits)
    }

    pub const fn from_bytes(bytes: [u8; BITSET_LEN]) -> Self {
        Bitset64(u64::from_le_bytes(bytes))
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn to_bytes(&self) -> [u8; BITSET_LEN] {
        self.0.to_le_bytes()
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, topic: u8) -> bool {
        topic < 64 && self.0 & (1 << topic) != 0
    }

    /// Set every bit of `mask`.
    pub fn add(&mut self, mask: Bitset64) {
        self.0 |= mask.0;
    }

    /// Clear every bit of `mask`.
    pub fn subtract(&mut self, mask: Bitset64) {
        self.0 &= !mask.0;
    }

    /// Set topics in ascending order.
    pub fn iter(&self) -> Topics {
        Topics(self.0)
    }
}

impl IntoIterator for Bitset64 {
    type Item = u8;
    type IntoIter = Topics;

    fn into_iter(self) -> Topics {
        Topics(self.0)
    }
}

impl TryFrom<&[u8]> for Bitset64 {
    type Error = ();

    /// Read a wire mask, which must be exactly [`BITSET_LEN`] bytes.
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; BITSET_LEN] = value.try_into().map_err(|_| ())?;
        Ok(Bitset64::from_bytes(bytes))
    }
}

impl FromIterator<u8> for Bitset64 {
    /// Collect topics, ignoring any above 63.
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = Bitset64::new();
        for topic in iter.into_iter().filter(|&topic| topic < 64) {
            set.0 |= 1 << topic;
        }
        set
    }
}

/// Iterator over the topics of a [`Bitset64`].
#[derive(Debug, Clone)]
pub struct Topics(u64);

impl Iterator for Topics {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.0 == 0 {
            return None;
        }

        let topic = self.0.trailing_zeros() as u8;
        // clear lowest set bit
        self.0 &= self.0 - 1;
        Some(topic)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.0.count_ones() as usize;
        (len, Some(len))
    }
}

impl ExactSizeIterator for Topics {}
