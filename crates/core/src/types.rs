//! Operation and queue entry types.
//!
//! A [`CommitOperation`] is the unit producers hand to the channel and the
//! unit committers receive: either an upsert of one document or a deletion
//! of one document reference. Operations are plain data and immutable once
//! constructed; everything the consumer does with them is exhaustive
//! pattern matching on the enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a queue entry by the storage layer.
///
/// Ids are monotonically increasing within one queue directory and are
/// never reused while the queue is open. A requeued entry receives a fresh
/// id at the tail, so id order is always delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl EntryId {
    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One durable queue entry: an id plus the encoded operation payload.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Storage-assigned identifier.
    pub id: EntryId,
    /// Encoded operation bytes (see [`crate::codec`]).
    pub payload: Vec<u8>,
    /// Milliseconds since the Unix epoch at enqueue time.
    pub enqueued_at_ms: u64,
}

/// Insertion-ordered, multi-valued string metadata attached to a document.
///
/// Keys keep the order in which they were first added, and a key may carry
/// several values. Both properties survive encoding, so a committer sees
/// fields in the same order the producer set them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    entries: Vec<(String, Vec<String>)>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Metadata::default()
    }

    /// Append a value to `key`, creating the key at the tail if absent.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Replace all values of `key` with a single value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => {
                values.clear();
                values.push(value);
            }
            None => self.entries.push((key, vec![value])),
        }
    }

    /// First value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// All values of `key`, if present.
    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Remove `key`, returning its values if it existed.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Iterate keys and their values in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Upsert of one document into the downstream target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOperation {
    /// Target document reference (unique per document, not across time).
    pub reference: String,
    /// Raw document content.
    pub content: Vec<u8>,
    /// Document metadata.
    pub metadata: Metadata,
}

impl AddOperation {
    /// Create an add operation.
    pub fn new(reference: impl Into<String>, content: Vec<u8>, metadata: Metadata) -> Self {
        AddOperation {
            reference: reference.into(),
            content,
            metadata,
        }
    }
}

/// Deletion of one document reference from the downstream target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOperation {
    /// Target document reference.
    pub reference: String,
    /// Metadata accompanying the deletion.
    pub metadata: Metadata,
}

impl DeleteOperation {
    /// Create a delete operation.
    pub fn new(reference: impl Into<String>, metadata: Metadata) -> Self {
        DeleteOperation {
            reference: reference.into(),
            metadata,
        }
    }
}

/// A single commit instruction for the downstream target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOperation {
    /// Upsert a document.
    Add(AddOperation),
    /// Delete a document.
    Delete(DeleteOperation),
}

impl CommitOperation {
    /// The document reference this operation targets.
    pub fn reference(&self) -> &str {
        match self {
            CommitOperation::Add(op) => &op.reference,
            CommitOperation::Delete(op) => &op.reference,
        }
    }

    /// The metadata carried by this operation.
    pub fn metadata(&self) -> &Metadata {
        match self {
            CommitOperation::Add(op) => &op.metadata,
            CommitOperation::Delete(op) => &op.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_preserves_insertion_order() {
        let mut meta = Metadata::new();
        meta.add("zulu", "1");
        meta.add("alpha", "2");
        meta.add("mike", "3");

        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zulu", "alpha", "mike"]);
    }

    #[test]
    fn metadata_multi_value() {
        let mut meta = Metadata::new();
        meta.add("tag", "a");
        meta.add("tag", "b");

        assert_eq!(meta.get("tag"), Some("a"));
        assert_eq!(
            meta.get_all("tag"),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(meta.len(), 1);
    }

    #[test]
    fn metadata_set_replaces_values() {
        let mut meta = Metadata::new();
        meta.add("lang", "en");
        meta.add("lang", "fr");
        meta.set("lang", "de");

        assert_eq!(meta.get_all("lang"), Some(&["de".to_string()][..]));
    }

    #[test]
    fn metadata_remove() {
        let mut meta = Metadata::new();
        meta.add("a", "1");
        meta.add("b", "2");

        assert_eq!(meta.remove("a"), Some(vec!["1".to_string()]));
        assert!(!meta.contains_key("a"));
        assert!(meta.contains_key("b"));
        assert_eq!(meta.remove("a"), None);
    }

    #[test]
    fn operation_reference_dispatch() {
        let add = CommitOperation::Add(AddOperation::new("doc-1", b"body".to_vec(), Metadata::new()));
        let del = CommitOperation::Delete(DeleteOperation::new("doc-2", Metadata::new()));

        assert_eq!(add.reference(), "doc-1");
        assert_eq!(del.reference(), "doc-2");
    }

    #[test]
    fn entry_id_ordering_and_display() {
        assert!(EntryId(1) < EntryId(2));
        assert_eq!(EntryId(42).to_string(), "42");
        assert_eq!(EntryId(42).as_u64(), 42);
    }
}
