//! Write tags: small labels attached to a write so observers can tell where
//! an update originated.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteTag {
    Str(String),
    Int(i64),
}

impl From<&str> for WriteTag {
    fn from(s: &str) -> Self {
        WriteTag::Str(s.to_owned())
    }
}

impl From<String> for WriteTag {
    fn from(s: String) -> Self {
        WriteTag::Str(s)
    }
}

impl From<i64> for WriteTag {
    fn from(n: i64) -> Self {
        WriteTag::Int(n)
    }
}

impl std::fmt::Display for WriteTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteTag::Str(s) => write!(f, "{s}"),
            WriteTag::Int(n) => write!(f, "{n}"),
        }
    }
}

/// Concatenates multiple tag sources in emission order.
pub fn concat_tags(sources: impl IntoIterator<Item = Vec<WriteTag>>) -> Vec<WriteTag> {
    sources.into_iter().flatten().collect()
}
