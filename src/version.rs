//! Lenient version tuple handling for runtime and script probes.
//!
//! Probed runtimes do not emit strict semver (`v20.5.1`, `2.1.4+abc`), so
//! versions are modelled as a plain tuple of integers: components that fail
//! to parse become 0, and comparison pads the shorter tuple with zeros.

use std::cmp::Ordering;
use std::fmt;

/// An ordered sequence of version components parsed from a dot-separated
/// string. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionTuple(Vec<u64>);

impl VersionTuple {
    /// Parse a dot-separated version string.
    ///
    /// Components that do not parse as integers (pre-release tags, build
    /// metadata, stray prefixes) silently become 0 rather than failing.
    pub fn parse(s: &str) -> Self {
        VersionTuple(
            s.trim()
                .split('.')
                .map(|component| component.parse::<u64>().unwrap_or(0))
                .collect(),
        )
    }

    /// The parsed components, in order.
    pub fn components(&self) -> &[u64] {
        &self.0
    }

    /// Whether this version is at or above the given minimum.
    pub fn meets_minimum(&self, min: &VersionTuple) -> bool {
        self.cmp(min) != Ordering::Less
    }
}

impl Ord for VersionTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        // Missing trailing components compare as zero.
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for VersionTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", component)?;
            first = false;
        }
        Ok(())
    }
}

impl<const N: usize> From<[u64; N]> for VersionTuple {
    fn from(components: [u64; N]) -> Self {
        VersionTuple(components.to_vec())
    }
}
