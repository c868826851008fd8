use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Externally assigned, monotonically increasing document number
pub type DocumentNumber = u64;

/// A tagged span of token positions; `end` is exclusive
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub begin: u32,
    pub end: u32,
}

impl Tag {
    pub fn new(name: impl Into<String>, begin: u32, end: u32) -> Self {
        Self {
            name: name.into(),
            begin,
            end,
        }
    }
}

/// A tokenized document ready to be indexed.
///
/// Term slots keep their position even when empty: a `None` slot advances
/// the position counter but produces no posting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub identifier: String,
    pub number: DocumentNumber,
    #[serde(default)]
    pub terms: Vec<Option<String>>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Raw text, only persisted when corpus storage is enabled
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(identifier: impl Into<String>, number: DocumentNumber) -> Self {
        Self {
            identifier: identifier.into(),
            number,
            ..Default::default()
        }
    }

    /// Set the term slots from already-tokenized words
    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terms = terms.into_iter().map(|t| Some(t.into())).collect();
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, begin: u32, end: u32) -> Self {
        self.tags.push(Tag::new(name, begin, end));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Number of token slots, including empty ones
    pub fn length(&self) -> u32 {
        self.terms.len() as u32
    }
}
