//! Exactly-one lookups.

/// A lookup that must resolve to exactly one item resolved to zero or many.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected exactly one {what}, found {found}")]
pub struct AmbiguityError {
    /// Human-readable description of what was looked up.
    pub what: String,

    /// Number of matches actually found.
    pub found: usize,
}

/// Return the only item produced by `items`.
///
/// Fails with [`AmbiguityError`] when the iterator yields nothing or more than
/// one item. Stops consuming after the second match.
pub fn find_unique<I>(items: I, what: impl Into<String>) -> Result<I::Item, AmbiguityError>
where
    I: IntoIterator,
{
    let mut iter = items.into_iter();
    let first = iter.next();
    match (first, iter.next()) {
        (Some(item), None) => Ok(item),
        (None, _) => Err(AmbiguityError {
            what: what.into(),
            found: 0,
        }),
        (Some(_), Some(_)) => Err(AmbiguityError {
            what: what.into(),
            found: 2 + iter.count(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_match() {
        let found = find_unique([1, 2, 3].iter().filter(|v| **v == 2), "two").expect("unique");
        assert_eq!(*found, 2);
    }

    #[test]
    fn test_no_match() {
        let err = find_unique(Vec::<u8>::new(), "value").unwrap_err();
        assert_eq!(err.found, 0);
        assert_eq!(err.what, "value");
    }

    #[test]
    fn test_many_matches_counts_all() {
        let err = find_unique(vec![1, 1, 1, 1], "one").unwrap_err();
        assert_eq!(err.found, 4);
        assert!(err.to_string().contains("found 4"));
    }
}
