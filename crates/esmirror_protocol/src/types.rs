//! Core type definitions for the mirror protocol.

use std::fmt;

/// Document field holding the packed row locator.
pub const CTID_FIELD: &str = "esm_ctid";
/// Document field holding the creating command id.
pub const CMIN_FIELD: &str = "esm_cmin";
/// Document field holding the superseding command id.
pub const CMAX_FIELD: &str = "esm_cmax";
/// Document field holding the creating transaction id.
pub const XMIN_FIELD: &str = "esm_xmin";
/// Document field holding the superseding transaction id.
pub const XMAX_FIELD: &str = "esm_xmax";
/// Well-known id of the document holding the in-progress/aborted xid set.
pub const ABORTED_XIDS_DOC: &str = "esm_aborted_xids";

/// Physical locator of a row: a block number plus an in-block offset.
///
/// Locators pack into a single `u64` (`block` in the high 32 bits, `offset`
/// in the low 16) and double as the search engine's document id when the
/// mirror is locator-keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowLocator {
    /// Block number.
    pub block: u32,
    /// Offset within the block.
    pub offset: u16,
}

impl RowLocator {
    /// Creates a new row locator.
    #[must_use]
    pub const fn new(block: u32, offset: u16) -> Self {
        Self { block, offset }
    }

    /// Packs the locator into its 64-bit wire form.
    #[must_use]
    pub const fn to_packed(self) -> u64 {
        ((self.block as u64) << 32) | self.offset as u64
    }

    /// Recovers a locator from its 64-bit wire form.
    #[must_use]
    pub const fn from_packed(packed: u64) -> Self {
        Self {
            block: (packed >> 32) as u32,
            offset: packed as u16,
        }
    }
}

impl fmt::Display for RowLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

/// Identity of a mirrored document: a physical row locator or an externally
/// supplied opaque id. Exactly one is used per document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocKey {
    /// Locator-keyed document; the packed locator is the document id.
    Ctid(RowLocator),
    /// Externally keyed document.
    External(String),
}

/// Transactional visibility metadata carried on every mirrored document.
///
/// A document lacking `xmax` is visible to any reader whose snapshot saw
/// `xmin` commit; once `xmax` is set the document is visible only to readers
/// whose snapshot predates that transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityStamp {
    /// Creating transaction id.
    pub xmin: u64,
    /// Creating command id within `xmin`.
    pub cmin: u32,
    /// Superseding transaction id, once the row version is superseded.
    pub xmax: Option<u64>,
    /// Superseding command id within `xmax`.
    pub cmax: Option<u32>,
}

impl VisibilityStamp {
    /// Creates a stamp for a freshly created row version.
    #[must_use]
    pub const fn new(xmin: u64, cmin: u32) -> Self {
        Self {
            xmin,
            cmin,
            xmax: None,
            cmax: None,
        }
    }

    /// Sets the superseding transaction/command pair.
    #[must_use]
    pub const fn superseded_by(mut self, xmax: u64, cmax: u32) -> Self {
        self.xmax = Some(xmax);
        self.cmax = Some(cmax);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_packing_round_trip() {
        let locator = RowLocator::new(7, 3);
        let packed = locator.to_packed();
        assert_eq!(packed, (7u64 << 32) | 3);
        assert_eq!(RowLocator::from_packed(packed), locator);
    }

    #[test]
    fn locator_packing_extremes() {
        let locator = RowLocator::new(u32::MAX, u16::MAX);
        assert_eq!(RowLocator::from_packed(locator.to_packed()), locator);

        let zero = RowLocator::new(0, 0);
        assert_eq!(zero.to_packed(), 0);
    }

    #[test]
    fn locator_display() {
        assert_eq!(RowLocator::new(7, 3).to_string(), "(7,3)");
    }

    #[test]
    fn stamp_superseded() {
        let stamp = VisibilityStamp::new(100, 0).superseded_by(200, 4);
        assert_eq!(stamp.xmin, 100);
        assert_eq!(stamp.xmax, Some(200));
        assert_eq!(stamp.cmax, Some(4));
    }
}
