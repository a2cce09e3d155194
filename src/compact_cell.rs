/// Provides information on the content of a cell column in a [`CompactHeightfield`](crate::CompactHeightfield).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactCell {
    /// Index to the first span in the column.
    index: u32,
    /// Number of spans in the column.
    count: u8,
}

impl CompactCell {
    /// Index to the first span in the column.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of spans in the column.
    pub fn count(&self) -> u8 {
        self.count
    }

    pub(crate) fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    pub(crate) fn set_count(&mut self, count: u8) {
        self.count = count;
    }

    pub(crate) fn inc_count(&mut self) {
        debug_assert!(self.count < u8::MAX, "column exceeds 255 spans");
        self.count += 1;
    }

    /// Iterates over the span indices of this column.
    #[inline]
    pub fn span_range(&self) -> std::ops::Range<usize> {
        self.index as usize..self.index as usize + self.count as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "column exceeds 255 spans")]
    fn column_span_count_is_capped() {
        let mut cell = CompactCell::default();
        for _ in 0..=u8::MAX as usize {
            cell.inc_count();
        }
    }
}
