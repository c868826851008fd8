//! Stored documents, keyed by identifier in the `corpus` part

use crate::error::Result;
use crate::models::Document;

pub fn encode_document(document: &Document) -> Result<Vec<u8>> {
    Ok(bincode::serialize(document)?)
}

pub fn decode_document(bytes: &[u8]) -> Result<Document> {
    Ok(bincode::deserialize(bytes)?)
}
