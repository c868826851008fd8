//! Typed query trees
//!
//! Queries arrive already parsed. Extent nodes match documents and report
//! spans; scoring nodes turn spans into scores. An extent node at the root is
//! scored with the index's default model.
//!
//! # Example
//!
//! ```json
//! {
//!   "combine": {
//!     "children": [
//!       { "score": { "child": { "term": { "key": "rust" } } } },
//!       { "score": { "child": { "ordered_window": { "width": 1, "children": [
//!         { "term": { "key": "memory" } },
//!         { "term": { "key": "safety" } }
//!       ] } } } }
//!     ],
//!     "weights": [1.0, 0.5]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{GeodexError, Result};
use crate::segment::{PartName, ScoringModel};
use crate::stemmer::CachedStemmer;

fn default_part() -> PartName {
    PartName::Postings
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryNode {
    /// Postings of one term
    Term {
        #[serde(default = "default_part")]
        part: PartName,
        key: String,
    },
    /// Spans of one tag
    Extent { tag: String },
    And { children: Vec<QueryNode> },
    Or { children: Vec<QueryNode> },
    /// Terms in order, each starting within `width` positions of the previous one
    OrderedWindow { width: u32, children: Vec<QueryNode> },
    /// All terms inside any span of at most `width` positions
    UnorderedWindow { width: u32, children: Vec<QueryNode> },
    /// Score an extent node
    Score {
        child: Box<QueryNode>,
        #[serde(default)]
        model: Option<ScoringModel>,
    },
    /// Weighted sum of scoring nodes
    Combine {
        children: Vec<QueryNode>,
        #[serde(default)]
        weights: Vec<f64>,
    },
}

impl QueryNode {
    pub fn term(key: impl Into<String>) -> Self {
        QueryNode::Term {
            part: PartName::Postings,
            key: key.into(),
        }
    }

    /// Term looked up in the stemmed postings
    pub fn stemmed_term(word: &str, stemmer: &mut CachedStemmer) -> Self {
        QueryNode::Term {
            part: PartName::StemmedPostings,
            key: stemmer.stem(word),
        }
    }

    pub fn extent(tag: impl Into<String>) -> Self {
        QueryNode::Extent { tag: tag.into() }
    }

    /// Exact phrase over plain terms
    pub fn phrase<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QueryNode::OrderedWindow {
            width: 1,
            children: words.into_iter().map(QueryNode::term).collect(),
        }
    }

    pub fn score(child: QueryNode) -> Self {
        QueryNode::Score {
            child: Box::new(child),
            model: None,
        }
    }

    /// Score every word and sum the scores
    pub fn bag_of_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QueryNode::Combine {
            children: words
                .into_iter()
                .map(|w| QueryNode::score(QueryNode::term(w)))
                .collect(),
            weights: Vec::new(),
        }
    }

    /// Whether the node produces scores rather than spans
    pub fn is_scoring(&self) -> bool {
        matches!(self, QueryNode::Score { .. } | QueryNode::Combine { .. })
    }

    /// Scoring form of the node
    pub fn into_scored(self) -> Self {
        if self.is_scoring() {
            self
        } else {
            QueryNode::score(self)
        }
    }

    pub fn children(&self) -> &[QueryNode] {
        match self {
            QueryNode::Term { .. } | QueryNode::Extent { .. } => &[],
            QueryNode::Score { child, .. } => std::slice::from_ref(child.as_ref()),
            QueryNode::And { children }
            | QueryNode::Or { children }
            | QueryNode::OrderedWindow { children, .. }
            | QueryNode::UnorderedWindow { children, .. }
            | QueryNode::Combine { children, .. } => children,
        }
    }

    /// Check the tree is well formed
    pub fn validate(&self) -> Result<()> {
        match self {
            QueryNode::Term { part, .. } if *part == PartName::Corpus => Err(
                GeodexError::InvalidRequest("the corpus part holds no postings".to_string()),
            ),
            QueryNode::OrderedWindow { width: 0, .. } | QueryNode::UnorderedWindow { width: 0, .. } => {
                Err(GeodexError::InvalidRequest("window width must be positive".to_string()))
            }
            QueryNode::Score { child, model } => {
                if child.is_scoring() {
                    return Err(GeodexError::InvalidRequest(
                        "score takes an extent node".to_string(),
                    ));
                }
                if let Some(model) = model {
                    model.validate().map_err(|e| GeodexError::InvalidRequest(e.to_string()))?;
                }
                child.validate()
            }
            QueryNode::Combine { children, weights } => {
                if weights.len() > children.len() {
                    return Err(GeodexError::InvalidRequest(format!(
                        "{} weights for {} children",
                        weights.len(),
                        children.len()
                    )));
                }
                for child in children {
                    if !child.is_scoring() {
                        return Err(GeodexError::InvalidRequest(
                            "combine takes scoring nodes".to_string(),
                        ));
                    }
                    child.validate()?;
                }
                Ok(())
            }
            node => {
                for child in node.children() {
                    if child.is_scoring() {
                        return Err(GeodexError::InvalidRequest(
                            "extent nodes cannot contain scoring nodes".to_string(),
                        ));
                    }
                    child.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Stable key used to share node statistics between shards
    pub fn statistics_key(&self) -> Vec<u8> {
        // serializing a tree of strings and numbers cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }
}
