//! Release identifiers: discovery from branch refs, ordering, naming, tags.
//!
//! Standard releases are `major.minor` pairs parsed out of branch names with a
//! configurable regex. The rolling integration branch is represented by the
//! [`Release::Next`] pseudo-release.

use std::fmt;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::git::RemoteRef;

/// Prefix of the tags derived from releases.
pub const TAG_PREFIX: &str = "knative-";

/// A release line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Release {
    Standard { major: u64, minor: u64 },
    Next,
}

impl Release {
    pub fn new(major: u64, minor: u64) -> Self {
        Self::Standard { major, minor }
    }

    /// Parse a branch name with a regex holding two numeric capture groups.
    ///
    /// Returns `None` when the regex does not match. A capture that is not a
    /// valid number counts as `0`.
    pub fn parse(branch: &str, search: &Regex) -> Option<Self> {
        let caps = search.captures(branch)?;
        let number = |idx: usize| {
            caps.get(idx)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        };
        Some(Self::new(number(1), number(2)))
    }

    /// Strict "sorts before" relation.
    ///
    /// Only two standard releases are ever ordered against each other; any
    /// comparison involving [`Release::Next`] reports `false` in both
    /// directions.
    pub fn less(&self, other: &Release) -> bool {
        match (self, other) {
            (
                Self::Standard { major, minor },
                Self::Standard {
                    major: other_major,
                    minor: other_minor,
                },
            ) => (major, minor) < (other_major, other_minor),
            _ => false,
        }
    }

    /// Render a branch name from a template with `{major}` and `{minor}`
    /// placeholders. `Next` always renders as `release-next`.
    pub fn name(&self, template: &str) -> String {
        match self {
            Self::Standard { major, minor } => template
                .replace("{major}", &major.to_string())
                .replace("{minor}", &minor.to_string()),
            Self::Next => "release-next".to_string(),
        }
    }

    pub fn tag(&self) -> String {
        match self {
            Self::Standard { .. } => format!("{}v{}", TAG_PREFIX, self),
            Self::Next => format!("{}next", TAG_PREFIX),
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard { major, minor } => write!(f, "{}.{}", major, minor),
            Self::Next => write!(f, "next"),
        }
    }
}

/// Parse every branch ref matching `search` into a release, ascending.
pub fn discover(refs: &[RemoteRef], search: &Regex) -> Vec<Release> {
    let mut releases: Vec<Release> = refs
        .iter()
        .filter_map(RemoteRef::branch_name)
        .filter_map(|branch| Release::parse(branch, search))
        .collect();
    sort(&mut releases);
    releases
}

/// Stable ascending sort of standard releases by [`Release::less`].
///
/// [`Release::less`] leaves `Next` unordered, which is not a total order, so
/// any `Next` entries are kept after every standard release instead.
pub fn sort(releases: &mut [Release]) {
    releases.sort_by_key(|release| match *release {
        Release::Standard { major, minor } => (false, major, minor),
        Release::Next => (true, 0, 0),
    });
}

/// Upstream releases absent downstream, in upstream order.
pub fn missing(upstream: &[Release], downstream: &[Release]) -> Vec<Release> {
    exclude(upstream, downstream)
}

/// `releases` without any element of `excluded`, order preserved.
pub fn exclude(releases: &[Release], excluded: &[Release]) -> Vec<Release> {
    releases
        .iter()
        .filter(|r| !excluded.contains(r))
        .copied()
        .collect()
}

/// The last `n` releases, or all of them when there are no more than `n`.
pub fn window(releases: &[Release], n: usize) -> Vec<Release> {
    let start = releases.len().saturating_sub(n);
    releases[start..].to_vec()
}
