//! Response body matchers.

use std::fmt;
use std::sync::Arc;

type MatchFn = dyn Fn(&[u8]) -> bool + Send + Sync;

/// Predicate over a response body, cheap to clone.
#[derive(Clone)]
pub struct Matcher {
    description: String,
    check: Arc<MatchFn>,
}

impl Matcher {
    /// Body contains `needle` anywhere.
    pub fn contains(needle: impl Into<Vec<u8>>) -> Self {
        let needle = needle.into();
        let description = format!("body contains {:?}", String::from_utf8_lossy(&needle));
        Self {
            description,
            check: Arc::new(move |body| contains_slice(body, &needle)),
        }
    }

    /// Body equals `expected` byte for byte.
    pub fn exact(expected: impl Into<Vec<u8>>) -> Self {
        let expected = expected.into();
        let description = format!("body equals {:?}", String::from_utf8_lossy(&expected));
        Self {
            description,
            check: Arc::new(move |body| body == expected.as_slice()),
        }
    }

    /// Every matcher in `matchers` holds. An empty list always matches.
    pub fn all_of(matchers: Vec<Matcher>) -> Self {
        let description = matchers
            .iter()
            .map(|m| m.description.as_str())
            .collect::<Vec<_>>()
            .join(" and ");
        Self {
            description,
            check: Arc::new(move |body| matchers.iter().all(|m| m.matches(body))),
        }
    }

    pub fn custom<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    pub fn matches(&self, body: &[u8]) -> bool {
        (self.check)(body)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Matcher").field(&self.description).finish()
    }
}

fn contains_slice(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
