//! Process-local identifiers.
//!
//! A local id is the primary key of an entity within the in-memory graph. It
//! is distinct from any persisted database id: local ids are dense, assigned
//! at insertion and stable for the lifetime of the graph. Each entity type
//! gets its own newtype so ids cannot be mixed up across arenas.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_local_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn from_u32(id: u32) -> Self {
                Self(id)
            }

            pub const fn to_u32(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_local_id!(
    /// Id of an interned [`crate::SharedText`].
    SharedTextId
);
define_local_id!(
    /// Id of an [`crate::Issue`] (the persistent bug identity).
    IssueId
);
define_local_id!(
    /// Id of an [`crate::IssueInstance`] (one appearance of an issue in a run).
    InstanceId
);
define_local_id!(
    /// Id of a [`crate::TraceFrame`].
    FrameId
);
define_local_id!(
    /// Id of a [`crate::TraceFrameAnnotation`].
    AnnotationId
);
define_local_id!(
    /// Id of a [`crate::FixInfo`] record.
    FixInfoId
);
define_local_id!(
    /// Id of a [`crate::Run`].
    RunId
);

/// Dense id allocator. Ids start at 1 so that 0 can never collide with a
/// database id default.
#[derive(Debug, Clone)]
pub struct LocalIdAllocator {
    next: u32,
}

impl Default for LocalIdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl LocalIdAllocator {
    pub fn mint(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Keeps the allocator ahead of ids inserted explicitly (e.g. entities
    /// copied over from another graph).
    pub fn observe(&mut self, id: u32) {
        self.next = self.next.max(id + 1);
    }
}
