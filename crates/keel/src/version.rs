//! Version parsing and range classification.
//!
//! Postgres and extension catalogs report versions loosely (`14.10 (Debian
//! 14.10-1.pgdg120+1)`, `0.3`), so they are coerced into full semver
//! versions before any comparison.

use semver::{Comparator, Op, Version, VersionReq};

/// Where a version falls relative to a supported range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeCheck {
    /// `0.0.0`, which extension builds use for nightly releases.
    Nightly,
    Below,
    InRange,
    Above,
}

/// Coerce the first version-looking token of `text` into a [`Version`],
/// padding missing minor and patch components with zeros.
pub fn coerce_version(text: &str) -> Option<Version> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let token: &str = text[start..]
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .next()?;

    let mut parts = token
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().transpose().ok()?.unwrap_or(0);
    let patch = parts.next().transpose().ok()?.unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

pub fn is_nightly(version: &Version) -> bool {
    *version == Version::new(0, 0, 0)
}

/// Classify `version` against `range`.
///
/// A version outside the range is `Below` when it fails a lower bound of the
/// range, and `Above` otherwise.
pub fn check_range(version: &Version, range: &VersionReq) -> RangeCheck {
    if is_nightly(version) {
        return RangeCheck::Nightly;
    }
    if range.matches(version) {
        return RangeCheck::InRange;
    }

    let below = range
        .comparators
        .iter()
        .filter(|c| !c.matches(version))
        .any(|c| lower_bound(c).is_some_and(|bound| *version < bound));
    if below {
        RangeCheck::Below
    } else {
        RangeCheck::Above
    }
}

/// The smallest version a comparator accepts, if it has a lower bound.
fn lower_bound(comparator: &Comparator) -> Option<Version> {
    let major = comparator.major;
    let minor = comparator.minor.unwrap_or(0);
    let patch = comparator.patch.unwrap_or(0);

    match comparator.op {
        Op::Exact | Op::GreaterEq | Op::Tilde | Op::Caret | Op::Wildcard => {
            Some(Version::new(major, minor, patch))
        }
        Op::Greater => Some(match (comparator.minor, comparator.patch) {
            (None, _) => Version::new(major + 1, 0, 0),
            (Some(minor), None) => Version::new(major, minor + 1, 0),
            (Some(minor), Some(patch)) => Version::new(major, minor, patch + 1),
        }),
        _ => None,
    }
}

/// Whether moving from `from` to `to` changes the major or minor version.
pub fn crosses_minor(from: &Version, to: &Version) -> bool {
    from.major != to.major || from.minor != to.minor
}
