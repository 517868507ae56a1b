//! Bit-field pack/unpack helpers over fixed-width hardware words.
//!
//! Hardware manuals describe register and record fields as inclusive `hi:lo` bit ranges. A
//! [`Field`] captures one such range and provides `const` accessors for both 32-bit and 64-bit
//! words. [`WordField`] additionally names the 32-bit word of a multi-word record (fault buffer
//! entries, access counter notifications) a field lives in.

/// Inclusive `hi:lo` bit range within a hardware word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    pub hi: u32,
    pub lo: u32,
}

impl Field {
    /// Field spanning bits `hi:lo` (manual notation, high bit first).
    pub const fn new(hi: u32, lo: u32) -> Self {
        assert!(hi >= lo && hi < 64);
        Self { hi, lo }
    }

    /// Single-bit field.
    pub const fn bit(bit: u32) -> Self {
        Self::new(bit, bit)
    }

    #[inline]
    pub const fn width(self) -> u32 {
        self.hi - self.lo + 1
    }

    /// Mask of the field's bits in place (not shifted down).
    #[inline]
    pub const fn mask(self) -> u64 {
        if self.width() == 64 {
            u64::MAX
        } else {
            ((1u64 << self.width()) - 1) << self.lo
        }
    }

    /// Largest value the field can hold.
    #[inline]
    pub const fn max_value(self) -> u64 {
        self.mask() >> self.lo
    }

    #[inline]
    pub const fn fits(self, value: u64) -> bool {
        value <= self.max_value()
    }

    /// Extracts the field from a 64-bit word.
    #[inline]
    pub const fn get(self, word: u64) -> u64 {
        (word & self.mask()) >> self.lo
    }

    /// Shifts `value` into place. Bits that do not fit are dropped.
    #[inline]
    pub const fn value(self, value: u64) -> u64 {
        (value << self.lo) & self.mask()
    }

    /// Replaces the field in `word` with `value`.
    #[inline]
    pub const fn set(self, word: u64, value: u64) -> u64 {
        (word & !self.mask()) | self.value(value)
    }

    /// 32-bit flavour of [`Field::get`]. The field must lie within bits 31:0.
    #[inline]
    pub const fn get32(self, word: u32) -> u32 {
        self.get(word as u64) as u32
    }

    /// 32-bit flavour of [`Field::value`]. The field must lie within bits 31:0.
    #[inline]
    pub const fn value32(self, value: u32) -> u32 {
        self.value(value as u64) as u32
    }

    #[inline]
    pub const fn set32(self, word: u32, value: u32) -> u32 {
        self.set(word as u64, value as u64) as u32
    }

    /// Tests a single-bit field.
    #[inline]
    pub const fn is_set(self, word: u64) -> bool {
        self.get(word) != 0
    }
}

/// A [`Field`] located in a given 32-bit word of a multi-word record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WordField {
    pub word: usize,
    pub field: Field,
}

impl WordField {
    pub const fn new(word: usize, hi: u32, lo: u32) -> Self {
        assert!(hi < 32);
        Self {
            word,
            field: Field::new(hi, lo),
        }
    }

    pub const fn bit(word: usize, bit: u32) -> Self {
        Self::new(word, bit, bit)
    }

    /// Reads the field; words past the end of the record read as zero.
    #[inline]
    pub fn get(self, words: &[u32]) -> u32 {
        words
            .get(self.word)
            .map_or(0, |&word| self.field.get32(word))
    }

    /// Writes the field; writes past the end of the record are dropped.
    #[inline]
    pub fn set(self, words: &mut [u32], value: u32) {
        if let Some(word) = words.get_mut(self.word) {
            *word = self.field.set32(*word, value);
        }
    }

    #[inline]
    pub fn is_set(self, words: &[u32]) -> bool {
        self.get(words) != 0
    }
}

/// Decodes little-endian 32-bit words from a raw record.
pub fn words_from_le_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Encodes 32-bit words as a little-endian record.
pub fn words_to_le_bytes(words: &[u32], out: &mut [u8]) {
    for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

/// Combines a `hi`/`lo` pair of 32-bit halves.
#[inline]
pub const fn join_u64(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}
