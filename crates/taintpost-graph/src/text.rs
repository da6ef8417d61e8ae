//! Interned shared texts.
//!
//! Any string-ish value that is shared as a property of some other entity
//! (taint kinds, features, callables, filenames, messages) is stored once and
//! referenced by [`SharedTextId`]. Interning is keyed on `(kind, contents)`:
//! merging two texts with the same key is a no-op returning the first id.

use std::{fmt, str::FromStr};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{FxIndexMap, GraphError, id::LocalIdAllocator, id::SharedTextId};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedTextKind {
    Feature,
    Message,
    Source,
    Sink,
    Callable,
    Filename,
    SourceDetail,
    SinkDetail,
}

impl SharedTextKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SharedTextKind::Feature => "feature",
            SharedTextKind::Message => "message",
            SharedTextKind::Source => "source",
            SharedTextKind::Sink => "sink",
            SharedTextKind::Callable => "callable",
            SharedTextKind::Filename => "filename",
            SharedTextKind::SourceDetail => "source_detail",
            SharedTextKind::SinkDetail => "sink_detail",
        }
    }

    /// Whether this kind names a taint leaf (as opposed to descriptive text).
    pub fn is_taint_kind(self) -> bool {
        matches!(self, SharedTextKind::Source | SharedTextKind::Sink)
    }
}

impl fmt::Display for SharedTextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SharedTextKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "feature" => SharedTextKind::Feature,
            "message" => SharedTextKind::Message,
            "source" => SharedTextKind::Source,
            "sink" => SharedTextKind::Sink,
            "callable" => SharedTextKind::Callable,
            "filename" => SharedTextKind::Filename,
            "source_detail" => SharedTextKind::SourceDetail,
            "sink_detail" => SharedTextKind::SinkDetail,
            _ => return Err(()),
        })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SharedText {
    pub id: SharedTextId,
    pub kind: SharedTextKind,
    pub contents: String,
}

impl fmt::Debug for SharedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.kind, self.contents, self.id)
    }
}

/// The deduplicating store behind [`crate::TraceGraph`].
///
/// `perform_merging` mirrors the global merge switch of the persistence
/// layer, passed as configuration instead of process-wide state: with merging
/// disabled every `get_or_add` inserts a fresh row.
#[derive(Debug)]
pub struct TextStore {
    texts: FxIndexMap<SharedTextId, SharedText>,
    by_contents: FxHashMap<SharedTextKind, FxHashMap<String, SharedTextId>>,
    normalized: FxHashMap<SharedTextId, SharedTextId>,
    ids: LocalIdAllocator,
    perform_merging: bool,
}

impl Default for TextStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TextStore {
    pub fn new(perform_merging: bool) -> Self {
        Self {
            texts: FxIndexMap::default(),
            by_contents: FxHashMap::default(),
            normalized: FxHashMap::default(),
            ids: LocalIdAllocator::default(),
            perform_merging,
        }
    }

    /// Idempotent insert: the first call for a `(kind, contents)` key inserts,
    /// subsequent calls return the existing id.
    pub fn get_or_add(&mut self, kind: SharedTextKind, contents: &str) -> SharedTextId {
        if self.perform_merging {
            if let Some(id) = self.by_contents.get(&kind).and_then(|m| m.get(contents)) {
                return *id;
            }
        }
        let id = SharedTextId::from_u32(self.ids.mint());
        self.texts.insert(
            id,
            SharedText {
                id,
                kind,
                contents: contents.to_owned(),
            },
        );
        if self.perform_merging {
            self.by_contents
                .entry(kind)
                .or_default()
                .insert(contents.to_owned(), id);
        }
        id
    }

    /// Inserts a text under an explicit id (used when copying between
    /// graphs). Fails on a duplicate id; an already-interned key keeps its
    /// first id and the new row is still stored under its own id.
    pub fn insert(&mut self, text: SharedText) -> Result<(), GraphError> {
        if self.texts.contains_key(&text.id) {
            return Err(GraphError::DuplicateId {
                entity: "shared text",
                id: text.id.to_u32(),
            });
        }
        self.ids.observe(text.id.to_u32());
        if self.perform_merging {
            self.by_contents
                .entry(text.kind)
                .or_default()
                .entry(text.contents.clone())
                .or_insert(text.id);
        }
        self.texts.insert(text.id, text);
        Ok(())
    }

    pub fn get(&self, id: SharedTextId) -> Option<&SharedText> {
        self.texts.get(&id)
    }

    pub fn lookup(&self, kind: SharedTextKind, contents: &str) -> Option<SharedTextId> {
        self.by_contents.get(&kind).and_then(|m| m.get(contents)).copied()
    }

    pub fn contains(&self, id: SharedTextId) -> bool {
        self.texts.contains_key(&id)
    }

    /// Id of the interned text whose contents are the transform-normalized
    /// form of `id`'s contents.
    ///
    /// A transform kind reads `T1:T2@T3:T4:S`, `@` separating the local from
    /// the global transforms. Normalization replaces `@` with `:` so leaf
    /// kinds compare equal across the caller and callee view of a frame.
    pub fn transform_normalized_kind_id(&mut self, id: SharedTextId) -> SharedTextId {
        if let Some(normalized) = self.normalized.get(&id) {
            return *normalized;
        }
        let text = &self.texts[&id];
        let normalized = if text.contents.contains('@') {
            let kind = text.kind;
            let contents = text.contents.replace('@', ":");
            self.get_or_add(kind, &contents)
        } else {
            id
        };
        self.normalized.insert(id, normalized);
        normalized
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedText> {
        self.texts.values()
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut store = TextStore::default();
        let a = store.get_or_add(SharedTextKind::Source, "taint");
        let b = store.get_or_add(SharedTextKind::Source, "taint");
        assert_eq!(a, b);
        // Same contents under a different kind is a different text.
        let c = store.get_or_add(SharedTextKind::Sink, "taint");
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn merging_disabled_always_inserts() {
        let mut store = TextStore::new(false);
        let a = store.get_or_add(SharedTextKind::Feature, "via-cast");
        let b = store.get_or_add(SharedTextKind::Feature, "via-cast");
        assert_ne!(a, b);
    }

    #[test]
    fn insert_keeps_first_id_for_existing_key() {
        let mut store = TextStore::default();
        let first = store.get_or_add(SharedTextKind::Source, "UserControlled");
        store
            .insert(SharedText {
                id: SharedTextId::from_u32(77),
                kind: SharedTextKind::Source,
                contents: "UserControlled".to_owned(),
            })
            .unwrap();
        assert_eq!(store.lookup(SharedTextKind::Source, "UserControlled"), Some(first));
        // A fresh mint does not collide with the observed explicit id.
        let next = store.get_or_add(SharedTextKind::Source, "Other");
        assert!(next.to_u32() > 77);
    }

    #[test]
    fn transform_normalization_replaces_local_separator() {
        let mut store = TextStore::default();
        let id = store.get_or_add(SharedTextKind::Sink, "T1:T2@T3:T4:S");
        let normalized = store.transform_normalized_kind_id(id);
        assert_eq!(store.get(normalized).unwrap().contents, "T1:T2:T3:T4:S");
        // Plain kinds normalize to themselves.
        let plain = store.get_or_add(SharedTextKind::Sink, "S");
        assert_eq!(store.transform_normalized_kind_id(plain), plain);
        // Cached on repeat.
        assert_eq!(store.transform_normalized_kind_id(id), normalized);
    }
}
