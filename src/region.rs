use std::ops::{Deref, DerefMut};

/// The id of a region in a [`CompactHeightfield`](crate::CompactHeightfield).
///
/// The high bit marks border regions; [`RegionId::id`] strips it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct RegionId(pub u16);

impl Deref for RegionId {
    type Target = u16;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RegionId {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        RegionId(value)
    }
}

impl RegionId {
    /// The null region, used for spans that do not belong to any region.
    pub const NONE: Self = Self(0);

    /// Heightfield border flag. Spans at the field border get this region so
    /// the partitioning leaves them alone.
    pub const BORDER: u16 = 0x8000;

    /// The region id with the border flag stripped.
    #[inline]
    pub fn id(&self) -> u16 {
        self.0 & !Self::BORDER
    }

    /// Whether the region lies at the heightfield border.
    #[inline]
    pub fn is_border(&self) -> bool {
        self.0 & Self::BORDER != 0
    }

    /// Whether the span belongs to any region at all.
    #[inline]
    pub fn is_some(&self) -> bool {
        self.id() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_flag_is_stripped_from_id() {
        let region = RegionId(RegionId::BORDER | 7);
        assert_eq!(region.id(), 7);
        assert!(region.is_border());
        assert!(region.is_some());
    }

    #[test]
    fn none_is_not_some() {
        assert!(!RegionId::NONE.is_some());
        assert!(!RegionId(RegionId::BORDER).is_some());
    }
}
