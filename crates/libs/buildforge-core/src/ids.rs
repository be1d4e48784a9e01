//! Newtype entity identifiers.
//!
//! Every entity id is a distinct type so a `TaskId` can never be passed
//! where a `ProjectId` is expected.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }
    };
}

entity_id!(ProjectId);
entity_id!(TaskId);
entity_id!(SnapshotId);
entity_id!(GitOperationId);
