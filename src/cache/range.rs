use std::cmp::Ordering;
use std::fmt;

use super::CacheError;

/// How a range relates to another one.
///
/// The variants read from the point of view of the *other* range: `Before` means the other
/// range lies entirely before `self`, `Containing` means the other range contains `self`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRelation {
    Before,
    BeforeOverlapping,
    Containing,
    Identical,
    Contained,
    AfterOverlapping,
    After,
}

impl RangeRelation {
    /// True when the two ranges share no point.
    pub fn is_distinct(self) -> bool {
        matches!(self, RangeRelation::Before | RangeRelation::After)
    }
}

/// An interval over an ordered type with independently open or closed bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range<T> {
    lower: T,
    upper: T,
    lower_inclusive: bool,
    upper_inclusive: bool,
}

/// On a tie, an inclusive bound reaches further inwards than an exclusive one.
fn align_on_inclusive(
    ordering: Ordering,
    for_lower_bound: bool,
    this_inclusive: bool,
    other_inclusive: bool,
) -> Ordering {
    if ordering != Ordering::Equal || this_inclusive == other_inclusive {
        return ordering;
    }
    match (this_inclusive, for_lower_bound) {
        (false, true) | (true, false) => Ordering::Greater,
        (false, false) | (true, true) => Ordering::Less,
    }
}

impl<T: Ord + Clone> Range<T> {
    pub fn new(
        lower: T,
        upper: T,
        lower_inclusive: bool,
        upper_inclusive: bool,
    ) -> Result<Self, CacheError> {
        if lower > upper {
            return Err(CacheError::InvalidArgument(
                "lower bound of a range must not exceed its upper bound".to_string(),
            ));
        }
        Ok(Self {
            lower,
            upper,
            lower_inclusive,
            upper_inclusive,
        })
    }

    /// `[lower, upper]`
    pub fn closed(lower: T, upper: T) -> Result<Self, CacheError> {
        Self::new(lower, upper, true, true)
    }

    /// `[lower, upper)`
    pub fn closed_open(lower: T, upper: T) -> Result<Self, CacheError> {
        Self::new(lower, upper, true, false)
    }

    pub fn lower(&self) -> &T {
        &self.lower
    }

    pub fn upper(&self) -> &T {
        &self.upper
    }

    pub fn is_lower_inclusive(&self) -> bool {
        self.lower_inclusive
    }

    pub fn is_upper_inclusive(&self) -> bool {
        self.upper_inclusive
    }

    /// Classifies `other` relative to `self`.
    pub fn relation_to(&self, other: &Range<T>) -> Result<RangeRelation, CacheError> {
        let lower_to_other_lower = align_on_inclusive(
            self.lower.cmp(&other.lower),
            true,
            self.lower_inclusive,
            other.lower_inclusive,
        );
        let upper_to_other_upper = align_on_inclusive(
            self.upper.cmp(&other.upper),
            false,
            self.upper_inclusive,
            other.upper_inclusive,
        );

        if lower_to_other_lower.is_eq() && upper_to_other_upper.is_eq() {
            return Ok(RangeRelation::Identical);
        }
        if lower_to_other_lower.is_ge() && upper_to_other_upper.is_le() {
            return Ok(RangeRelation::Containing);
        }
        if lower_to_other_lower.is_le() && upper_to_other_upper.is_ge() {
            return Ok(RangeRelation::Contained);
        }

        if lower_to_other_lower.is_gt() {
            let mut lower_to_other_upper = self.lower.cmp(&other.upper);
            if lower_to_other_upper.is_eq() && !(other.upper_inclusive && self.lower_inclusive) {
                lower_to_other_upper = Ordering::Greater;
            }
            return Ok(if lower_to_other_upper.is_gt() {
                RangeRelation::Before
            } else {
                RangeRelation::BeforeOverlapping
            });
        }

        if upper_to_other_upper.is_lt() {
            let mut upper_to_other_lower = self.upper.cmp(&other.lower);
            if upper_to_other_lower.is_eq() && !(other.lower_inclusive && self.upper_inclusive) {
                upper_to_other_lower = Ordering::Less;
            }
            return Ok(if upper_to_other_lower.is_lt() {
                RangeRelation::After
            } else {
                RangeRelation::AfterOverlapping
            });
        }

        Err(CacheError::InternalInvariantViolation(
            "failed to determine the relation of two ranges".to_string(),
        ))
    }

    /// Common part of the two ranges, `None` when they are distinct.
    pub fn intersect(&self, other: &Range<T>) -> Result<Option<Range<T>>, CacheError> {
        if self.relation_to(other)?.is_distinct() {
            return Ok(None);
        }
        let (lower, lower_inclusive) = match self.lower.cmp(&other.lower) {
            Ordering::Greater => (self.lower.clone(), self.lower_inclusive),
            Ordering::Less => (other.lower.clone(), other.lower_inclusive),
            Ordering::Equal => (
                self.lower.clone(),
                self.lower_inclusive || other.lower_inclusive,
            ),
        };
        let (upper, upper_inclusive) = match self.upper.cmp(&other.upper) {
            Ordering::Less => (self.upper.clone(), self.upper_inclusive),
            Ordering::Greater => (other.upper.clone(), other.upper_inclusive),
            Ordering::Equal => (
                self.upper.clone(),
                self.upper_inclusive || other.upper_inclusive,
            ),
        };
        Range::new(lower, upper, lower_inclusive, upper_inclusive).map(Some)
    }

    /// Smallest range covering both. Neither input is modified.
    pub fn union(&self, other: &Range<T>) -> Range<T> {
        let (lower, lower_inclusive) = match self.lower.cmp(&other.lower) {
            Ordering::Less => (self.lower.clone(), self.lower_inclusive),
            Ordering::Greater => (other.lower.clone(), other.lower_inclusive),
            Ordering::Equal => (
                self.lower.clone(),
                self.lower_inclusive || other.lower_inclusive,
            ),
        };
        let (upper, upper_inclusive) = match self.upper.cmp(&other.upper) {
            Ordering::Greater => (self.upper.clone(), self.upper_inclusive),
            Ordering::Less => (other.upper.clone(), other.upper_inclusive),
            Ordering::Equal => (
                self.upper.clone(),
                self.upper_inclusive || other.upper_inclusive,
            ),
        };
        Range {
            lower,
            upper,
            lower_inclusive,
            upper_inclusive,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Range<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.lower_inclusive { '[' } else { '(' };
        let close = if self.upper_inclusive { ']' } else { ')' };
        write!(f, "{}{},{}{}", open, self.lower, self.upper, close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn co(lower: u64, upper: u64) -> Range<u64> {
        Range::closed_open(lower, upper).unwrap()
    }

    fn closed(lower: u64, upper: u64) -> Range<u64> {
        Range::closed(lower, upper).unwrap()
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        assert!(matches!(
            Range::closed(10u64, 5),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(Range::closed(5u64, 5).is_ok());
    }

    #[test]
    fn test_identical() {
        assert_eq!(
            co(5, 10).relation_to(&co(5, 10)).unwrap(),
            RangeRelation::Identical
        );
        assert_eq!(
            closed(5, 10).relation_to(&closed(5, 10)).unwrap(),
            RangeRelation::Identical
        );
    }

    #[test]
    fn test_containment() {
        // other contains self
        assert_eq!(
            closed(10, 20).relation_to(&co(5, 30)).unwrap(),
            RangeRelation::Containing
        );
        // self contains other
        assert_eq!(
            closed(10, 90).relation_to(&co(25, 40)).unwrap(),
            RangeRelation::Contained
        );
        // same numbers, the closed upper bound reaches further
        assert_eq!(
            closed(10, 20).relation_to(&co(10, 20)).unwrap(),
            RangeRelation::Contained
        );
        assert_eq!(
            co(10, 20).relation_to(&closed(10, 20)).unwrap(),
            RangeRelation::Containing
        );
    }

    #[test]
    fn test_overlapping() {
        assert_eq!(
            closed(10, 90).relation_to(&co(5, 20)).unwrap(),
            RangeRelation::BeforeOverlapping
        );
        assert_eq!(
            closed(10, 90).relation_to(&co(80, 95)).unwrap(),
            RangeRelation::AfterOverlapping
        );
    }

    #[test]
    fn test_distinct() {
        assert_eq!(
            closed(10, 90).relation_to(&co(98, 102)).unwrap(),
            RangeRelation::After
        );
        assert_eq!(
            closed(10, 90).relation_to(&co(0, 5)).unwrap(),
            RangeRelation::Before
        );
        assert!(RangeRelation::Before.is_distinct());
        assert!(RangeRelation::After.is_distinct());
        assert!(!RangeRelation::AfterOverlapping.is_distinct());
    }

    #[test]
    fn test_touching_bounds_need_both_inclusive() {
        // [5,10) and [10,15] share 10 only if both include it
        assert_eq!(
            closed(10, 15).relation_to(&co(5, 10)).unwrap(),
            RangeRelation::Before
        );
        assert_eq!(
            closed(10, 15).relation_to(&closed(5, 10)).unwrap(),
            RangeRelation::BeforeOverlapping
        );
        assert_eq!(
            closed(5, 10).relation_to(&co(10, 15)).unwrap(),
            RangeRelation::AfterOverlapping
        );
        assert_eq!(
            co(5, 10).relation_to(&co(10, 15)).unwrap(),
            RangeRelation::After
        );
    }

    #[test]
    fn test_intersect() {
        let a = co(5, 20);
        let b = closed(10, 30);
        assert_eq!(a.intersect(&b).unwrap(), Some(co(10, 20)));
        assert_eq!(a.intersect(&co(25, 30)).unwrap(), None);

        let c = Range::new(5u64, 20, false, true).unwrap();
        assert_eq!(a.intersect(&c).unwrap(), Some(closed(5, 20)));
    }

    #[test]
    fn test_union() {
        let a = co(5, 20);
        let b = closed(10, 30);
        assert_eq!(a.union(&b), closed(5, 30));
        assert_eq!(b.union(&a), closed(5, 30));
        assert_eq!(co(5, 10).union(&closed(5, 10)), closed(5, 10));
    }

    #[test]
    fn test_display() {
        assert_eq!(co(5, 10).to_string(), "[5,10)");
        assert_eq!(Range::new(1u64, 2, false, true).unwrap().to_string(), "(1,2]");
    }
}
