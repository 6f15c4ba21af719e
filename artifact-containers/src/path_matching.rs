// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Glob matching over container-relative paths.

The dialect is `**` (any number of path components), `*` (single
component wildcard), and literal segments. Matching is case-insensitive
on every supported filesystem. A leading `!` in a raw pattern list marks
an anti-pattern; [split_patterns] separates the two sets.
*/

use {
    crate::error::Result,
    glob::{MatchOptions, Pattern},
    std::path::Path,
};

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// A set of include glob patterns evaluated against relative paths.
#[derive(Clone, Debug)]
pub struct FileMatcher {
    patterns: Vec<Pattern>,
}

impl FileMatcher {
    /// Construct an instance from glob pattern strings.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Whether any pattern in this set matches the given relative path.
    pub fn matches(&self, relative_path: impl AsRef<Path>) -> bool {
        let relative_path = relative_path.as_ref();

        self.patterns
            .iter()
            .any(|p| p.matches_path_with(relative_path, match_options()))
    }

}

/// Split a raw pattern list into include and anti-pattern sets.
///
/// A pattern starting with `!` lands in the second set, with the `!`
/// stripped.
pub fn split_patterns<'a>(
    raw: impl IntoIterator<Item = &'a str>,
) -> (Vec<String>, Vec<String>) {
    let mut includes = vec![];
    let mut excludes = vec![];

    for pattern in raw {
        if let Some(anti) = pattern.strip_prefix('!') {
            excludes.push(anti.to_string());
        } else {
            includes.push(pattern.to_string());
        }
    }

    (includes, excludes)
}
