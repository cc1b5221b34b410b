/// The set of pieces a peer claims to hold, one bit per piece, most
/// significant bit first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    pub bits: Vec<u8>, // raw bytes
}

impl Bitfield {
    pub fn from_bytes(bits: impl Into<Vec<u8>>) -> Self {
        Bitfield { bits: bits.into() }
    }

    pub fn from_piece_count(count: usize) -> Self {
        let num_bytes = count.div_ceil(8);
        Bitfield {
            bits: vec![0; num_bytes],
        }
    }

    pub fn has_piece(&self, index: usize) -> bool {
        let byte = index / 8;
        let bit = 7 - (index % 8); // MSB first
        if byte >= self.bits.len() {
            return false;
        }
        self.bits[byte] & (1 << bit) != 0
    }

    /// Sets the bit for `index`, growing the field if needed.
    pub fn set_piece(&mut self, index: usize) {
        let byte = index / 8;
        let bit = 7 - (index % 8);
        if byte >= self.bits.len() {
            self.bits.resize(byte + 1, 0);
        }
        self.bits[byte] |= 1 << bit;
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

impl FromIterator<usize> for Bitfield {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut bitfield = Bitfield::default();
        for index in iter {
            bitfield.set_piece(index);
        }
        bitfield
    }
}
