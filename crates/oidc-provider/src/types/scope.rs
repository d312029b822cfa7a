//! Ordered scope sets.

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// The scope that turns an OAuth 2.0 request into an OpenID Connect one.
pub const OPENID_SCOPE: &str = "openid";

/// An ordered set of scope values.
///
/// Keeps the order in which scopes were first requested and drops
/// duplicates. Serializes as a JSON list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scopes(IndexSet<String>);

impl Scopes {
    /// Creates an empty scope set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a space-delimited scope string (the `scope` request parameter).
    #[must_use]
    pub fn parse(value: &str) -> Self {
        value.split_whitespace().map(str::to_string).collect()
    }

    /// Returns `true` if the set contains the scope.
    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Returns `true` if every scope in `self` is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Scopes) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Returns the first scope not contained in `other`, if any.
    #[must_use]
    pub fn first_outside<'a>(&'a self, other: &Scopes) -> Option<&'a str> {
        self.0
            .iter()
            .find(|scope| !other.contains(scope))
            .map(String::as_str)
    }

    /// Returns `true` if the `openid` scope was requested.
    #[must_use]
    pub fn is_openid(&self) -> bool {
        self.contains(OPENID_SCOPE)
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates the scopes in request order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope)?;
            first = false;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for Scopes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
