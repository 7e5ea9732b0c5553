//! Growable bit set.
//!
//! Used by the page allocator (one bit per page, set = used) and by the
//! garbage collector (one bit per OID, set = reached or pending).

// Bit indices are u64 OIDs/page ids; on 64-bit targets they fit usize.
#![allow(clippy::cast_possible_truncation)]

const WORD_BITS: u64 = 64;

/// A fixed-length bit set that can be grown explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    len: u64,
}

impl Bitmap {
    /// A bitmap of `len` cleared bits.
    #[must_use]
    pub fn new(len: u64) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS) as usize],
            len,
        }
    }

    /// Number of bits tracked.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read a bit. Indices past the end read as clear.
    #[must_use]
    pub fn get(&self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[(index / WORD_BITS) as usize] & (1 << (index % WORD_BITS)) != 0
    }

    /// Set a bit, returning whether it was previously clear. Indices past the
    /// end are ignored.
    pub fn set(&mut self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        let word = &mut self.words[(index / WORD_BITS) as usize];
        let mask = 1 << (index % WORD_BITS);
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    /// Clear a bit, returning whether it was previously set.
    pub fn clear(&mut self, index: u64) -> bool {
        if index >= self.len {
            return false;
        }
        let word = &mut self.words[(index / WORD_BITS) as usize];
        let mask = 1 << (index % WORD_BITS);
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    /// Clear every bit.
    pub fn reset(&mut self) {
        self.words.fill(0);
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// Extend to `new_len` bits; the added bits are clear.
    pub fn grow(&mut self, new_len: u64) {
        if new_len <= self.len {
            return;
        }
        self.words.resize(new_len.div_ceil(WORD_BITS) as usize, 0);
        self.len = new_len;
    }

    /// Indices of the set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = u64> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let base = i as u64 * WORD_BITS;
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = u64::from(rest.trailing_zeros());
                rest &= rest - 1;
                Some(base + bit)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let mut bits = Bitmap::new(130);
        assert!(bits.set(0));
        assert!(bits.set(64));
        assert!(bits.set(129));
        assert!(!bits.set(64), "second set reports already set");
        assert!(bits.get(129));
        assert!(!bits.get(128));
        assert!(bits.clear(64));
        assert!(!bits.get(64));
        assert_eq!(bits.count_ones(), 2);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut bits = Bitmap::new(10);
        assert!(!bits.set(10));
        assert!(!bits.get(1_000));
        assert_eq!(bits.count_ones(), 0);
    }

    #[test]
    fn test_iter_ones_ascending() {
        let mut bits = Bitmap::new(300);
        for i in [299, 3, 64, 65, 128] {
            bits.set(i);
        }
        assert_eq!(bits.iter_ones().collect::<Vec<_>>(), vec![3, 64, 65, 128, 299]);
    }

    #[test]
    fn test_grow_keeps_bits() {
        let mut bits = Bitmap::new(5);
        bits.set(4);
        bits.grow(200);
        assert_eq!(bits.len(), 200);
        assert!(bits.get(4));
        assert!(bits.set(199));
        bits.reset();
        assert_eq!(bits.count_ones(), 0);
    }
}
