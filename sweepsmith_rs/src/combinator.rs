//! Mixed-radix addressing of the unpacked parameter grid.
//!
//! A variation is identified either by its global index in `[0, V)` or by
//! its digits, one per unpacked dimension (the position of the chosen value
//! inside that dimension's list). Dimensions are ordered the way they were
//! marked for unpacking and the LAST dimension varies fastest, so the
//! ordering matches a nested loop written in declaration order.

/// Digits of one variation, one entry per unpacked dimension.
pub type IndexCombination = Vec<usize>;

/// Total number of variations for the given dimension sizes.
/// Returns 1 for an empty grid (a single variation with nothing swept) and
/// 0 when any dimension is empty.
pub fn total_variations(radices: &[usize]) -> usize {
    radices.iter().product()
}

// =============================================================================
// Ranking / Unranking
// =============================================================================

/// Convert a global variation index to its digits.
///
/// Returns None if the index exceeds the number of variations.
pub fn unrank_mixed_radix(index: usize, radices: &[usize]) -> Option<IndexCombination> {
    if index >= total_variations(radices) {
        return None;
    }

    let mut digits = vec![0usize; radices.len()];
    let mut remaining = index;
    for dim in (0..radices.len()).rev() {
        digits[dim] = remaining % radices[dim];
        remaining /= radices[dim];
    }
    Some(digits)
}

/// Compute the global index of a set of digits (inverse of unrank).
///
/// Returns None when the digit count does not match the grid or any digit
/// is out of range for its dimension.
pub fn rank_mixed_radix(digits: &[usize], radices: &[usize]) -> Option<usize> {
    if digits.len() != radices.len() {
        return None;
    }

    let mut index = 0usize;
    for (&digit, &radix) in digits.iter().zip(radices) {
        if digit >= radix {
            return None;
        }
        index = index * radix + digit;
    }
    Some(index)
}

/// Every global index whose digits agree with `fixed` on the constrained
/// dimensions. `fixed[dim] == None` leaves that dimension free.
///
/// Indices are returned in ascending order.
pub fn matching_indices(fixed: &[Option<usize>], radices: &[usize]) -> Vec<usize> {
    debug_assert_eq!(fixed.len(), radices.len());
    // Walk only the free sub-grid: constrained dimensions collapse to a
    // single digit, so the walk costs the number of matches, not V.
    let free_radices: Vec<usize> = fixed
        .iter()
        .zip(radices)
        .map(|(digit, &radix)| if digit.is_some() { 1 } else { radix })
        .collect();

    SeekableIndexIterator::new(&free_radices)
        .filter_map(|free_digits| {
            let digits: Vec<usize> = fixed
                .iter()
                .zip(free_digits)
                .map(|(digit, free)| digit.unwrap_or(free))
                .collect();
            rank_mixed_radix(&digits, radices)
        })
        .collect()
}

// =============================================================================
// Seekable Iterator (odometer)
// =============================================================================

/// Digit iterator over the grid that can start from any global index in
/// O(k) time, where k is the number of dimensions, instead of stepping
/// through every earlier variation.
#[derive(Debug, Clone)]
pub struct SeekableIndexIterator {
    radices: Vec<usize>,
    current: IndexCombination,
    exhausted: bool,
}

impl SeekableIndexIterator {
    /// Create an iterator starting at `start_index` (0-based). An index past
    /// the end yields an exhausted iterator.
    pub fn starting_at(radices: &[usize], start_index: usize) -> Self {
        match unrank_mixed_radix(start_index, radices) {
            Some(current) => Self {
                radices: radices.to_vec(),
                current,
                exhausted: false,
            },
            None => Self {
                radices: radices.to_vec(),
                current: Vec::new(),
                exhausted: true,
            },
        }
    }

    pub fn new(radices: &[usize]) -> Self {
        Self::starting_at(radices, 0)
    }

    /// Global index of the next digits to be yielded.
    pub fn current_global_index(&self) -> Option<usize> {
        if self.exhausted {
            return None;
        }
        rank_mixed_radix(&self.current, &self.radices)
    }

    /// Advance like an odometer: bump the rightmost digit, carrying left.
    fn advance(&mut self) {
        for dim in (0..self.current.len()).rev() {
            self.current[dim] += 1;
            if self.current[dim] < self.radices[dim] {
                return;
            }
            self.current[dim] = 0;
        }
        // Carry fell off the leftmost dimension (or the grid has no
        // dimensions at all, which holds exactly one variation).
        self.exhausted = true;
    }
}

impl Iterator for SeekableIndexIterator {
    type Item = IndexCombination;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let digits = self.current.clone();
        self.advance();
        Some(digits)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.current_global_index() {
            Some(index) => total_variations(&self.radices) - index,
            None => 0,
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SeekableIndexIterator {}
