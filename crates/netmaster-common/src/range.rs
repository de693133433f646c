//! Tag ranges - VLAN/VXLAN identifier sets
//!
//! A range specification is a comma-separated list of `tag` or `start-end`
//! items, e.g. `"100-200,300,400-410"`. Parsed ranges are kept sorted and
//! merged so membership is a binary search.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RangeError;

/// Identifier kind managed by a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Vlan,
    Vxlan,
}

impl TagKind {
    /// All kinds, in teardown order
    pub const ALL: [TagKind; 2] = [TagKind::Vlan, TagKind::Vxlan];

    /// Lowest valid tag
    pub const fn min_tag(self) -> u32 {
        1
    }

    /// Highest valid tag
    pub const fn max_tag(self) -> u32 {
        match self {
            TagKind::Vlan => 4095,
            TagKind::Vxlan => 0x00FF_FFFF,
        }
    }

    /// Maximum number of comma-separated ranges accepted
    pub const fn max_ranges(self) -> usize {
        match self {
            TagKind::Vlan => usize::MAX,
            TagKind::Vxlan => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TagKind::Vlan => "vlan",
            TagKind::Vxlan => "vxlan",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive tag range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagRange {
    pub start: u32,
    pub end: u32,
}

impl TagRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, tag: u32) -> bool {
        self.start <= tag && tag <= self.end
    }

    /// Number of tags in the range
    pub fn count(&self) -> u64 {
        (u64::from(self.end) + 1).saturating_sub(u64::from(self.start))
    }
}

/// Sorted, non-overlapping set of tag ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRanges {
    ranges: Vec<TagRange>,
}

impl TagRanges {
    /// Build from arbitrary ranges, sorting and merging overlaps
    pub fn from_ranges(mut ranges: Vec<TagRange>) -> Self {
        ranges.sort();
        let mut merged: Vec<TagRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }
        Self { ranges: merged }
    }

    /// Membership check, `O(log r)`
    pub fn contains(&self, tag: u32) -> bool {
        let idx = self.ranges.partition_point(|r| r.end < tag);
        self.ranges.get(idx).is_some_and(|r| r.contains(tag))
    }

    /// Tags from `tags` that fall outside this set
    pub fn outside<'a, I>(&self, tags: I) -> Vec<u32>
    where
        I: IntoIterator<Item = &'a u32>,
    {
        tags.into_iter()
            .copied()
            .filter(|tag| !self.contains(*tag))
            .collect()
    }

    /// Total number of tags
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(TagRange::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[TagRange] {
        &self.ranges
    }

    /// Iterate every tag in ascending order
    pub fn tags(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|r| r.start..=r.end)
    }
}

impl fmt::Display for TagRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if r.start == r.end {
                write!(f, "{}", r.start)?;
            } else {
                write!(f, "{}-{}", r.start, r.end)?;
            }
        }
        Ok(())
    }
}

/// Range specification parser capability
pub trait RangeParser: Send + Sync {
    /// Parse `spec` into a validated tag set for `kind`
    fn parse(&self, spec: &str, kind: TagKind) -> Result<TagRanges, RangeError>;
}

/// Reference parser for `a,b-c` style specifications
#[derive(Debug, Clone, Copy, Default)]
pub struct TagRangeParser;

impl TagRangeParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_tag(kind: TagKind, item: &str, raw: &str) -> Result<u32, RangeError> {
        let tag: u32 = raw.trim().parse().map_err(|_| RangeError::Malformed {
            kind,
            item: item.to_string(),
        })?;
        if tag < kind.min_tag() || tag > kind.max_tag() {
            return Err(RangeError::OutOfBounds {
                kind,
                tag,
                min: kind.min_tag(),
                max: kind.max_tag(),
            });
        }
        Ok(tag)
    }
}

impl RangeParser for TagRangeParser {
    fn parse(&self, spec: &str, kind: TagKind) -> Result<TagRanges, RangeError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(RangeError::Empty(kind));
        }

        let items: Vec<&str> = spec.split(',').map(str::trim).collect();
        if items.len() > kind.max_ranges() {
            return Err(RangeError::TooManyRanges {
                kind,
                max: kind.max_ranges(),
                got: items.len(),
            });
        }

        let mut ranges = Vec::with_capacity(items.len());
        for item in items {
            let mut bounds = item.split('-');
            let (start, end) = match (bounds.next(), bounds.next(), bounds.next()) {
                (Some(single), None, None) => {
                    let tag = Self::parse_tag(kind, item, single)?;
                    (tag, tag)
                }
                (Some(lo), Some(hi), None) => (
                    Self::parse_tag(kind, item, lo)?,
                    Self::parse_tag(kind, item, hi)?,
                ),
                _ => {
                    return Err(RangeError::Malformed {
                        kind,
                        item: item.to_string(),
                    })
                }
            };
            if start > end {
                return Err(RangeError::Inverted { kind, start, end });
            }
            ranges.push(TagRange::new(start, end));
        }

        Ok(TagRanges::from_ranges(ranges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_vlan_ranges() {
        let parser = TagRangeParser::new();
        let ranges = parser.parse("100-200, 300,150-250", TagKind::Vlan).unwrap();

        assert_eq!(ranges.ranges(), &[TagRange::new(100, 250), TagRange::new(300, 300)]);
        assert_eq!(ranges.len(), 152);
        assert!(ranges.contains(100));
        assert!(ranges.contains(300));
        assert!(!ranges.contains(251));
        assert_eq!(ranges.to_string(), "100-250,300");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let parser = TagRangeParser::new();

        assert!(matches!(parser.parse("", TagKind::Vlan), Err(RangeError::Empty(_))));
        assert!(matches!(
            parser.parse("10-x", TagKind::Vlan),
            Err(RangeError::Malformed { .. })
        ));
        assert!(matches!(
            parser.parse("1-2-3", TagKind::Vlan),
            Err(RangeError::Malformed { .. })
        ));
        assert!(matches!(
            parser.parse("200-100", TagKind::Vlan),
            Err(RangeError::Inverted { start: 200, end: 100, .. })
        ));
        assert!(matches!(
            parser.parse("4000-5000", TagKind::Vlan),
            Err(RangeError::OutOfBounds { tag: 5000, .. })
        ));
        assert!(matches!(
            parser.parse("0", TagKind::Vlan),
            Err(RangeError::OutOfBounds { tag: 0, .. })
        ));
    }

    #[test]
    fn test_vxlan_single_range() {
        let parser = TagRangeParser::new();

        let ranges = parser.parse("10000-20000", TagKind::Vxlan).unwrap();
        assert_eq!(ranges.len(), 10001);

        assert!(matches!(
            parser.parse("1-10,20-30", TagKind::Vxlan),
            Err(RangeError::TooManyRanges { max: 1, got: 2, .. })
        ));
    }

    #[test]
    fn test_outside() {
        let ranges = TagRangeParser::new().parse("150-160", TagKind::Vlan).unwrap();
        let leased = [120, 150, 155, 170];

        assert_eq!(ranges.outside(&leased), vec![120, 170]);
        assert!(ranges.outside(&[150, 160]).is_empty());
    }

    #[test]
    fn test_inverted_stored_range_counts_zero() {
        let range: TagRange = serde_json::from_str(r#"{"start": 200, "end": 100}"#).unwrap();

        assert_eq!(range.count(), 0);
        assert_eq!(TagRange::new(7, 7).count(), 1);
        assert_eq!(TagRange::new(1, 0x00FF_FFFF).count(), 0x00FF_FFFF);
    }

    proptest! {
        #[test]
        fn prop_merged_ranges_match_naive_membership(
            raw in prop::collection::vec((1u32..4000, 0u32..50), 1..8),
            probe in 1u32..4095,
        ) {
            let ranges: Vec<TagRange> = raw.iter().map(|(s, l)| TagRange::new(*s, s + l)).collect();
            let naive = ranges.iter().any(|r| r.contains(probe));
            let merged = TagRanges::from_ranges(ranges);

            prop_assert_eq!(merged.contains(probe), naive);
            for pair in merged.ranges().windows(2) {
                prop_assert!(pair[0].end + 1 < pair[1].start);
            }
        }
    }
}
