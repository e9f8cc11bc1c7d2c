//! Group and gif records and the key scheme they are stored under.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name given to groups created without one
pub const UNNAMED_GROUP: &str = "Unnamed Group";

/// A named collection of gifs with one representative image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub image_url: String,
}

impl Group {
    /// Build a group, substituting the placeholder name for an empty one
    pub fn new(id: u64, name: &str, image_url: String) -> Self {
        let name = if name.is_empty() { UNNAMED_GROUP } else { name };

        Self {
            id,
            name: name.to_string(),
            image_url,
        }
    }
}

/// An image asset belonging to exactly one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gif {
    pub id: u64,
    pub group_id: u64,
    pub image_url: String,
}

/// Entity kinds that draw ids from their own counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Group,
    Gif,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Group, EntityKind::Gif];

    /// Key of the persisted id counter
    pub fn counter_key(self) -> &'static str {
        match self {
            EntityKind::Group => "id:groups",
            EntityKind::Gif => "id:gifs",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Group => f.write_str("group"),
            EntityKind::Gif => f.write_str("gif"),
        }
    }
}

/// Key-value layout. Existing data depends on these exact formats.
pub mod keys {
    pub const GROUP_PREFIX: &str = "group:";
    pub const GIF_PREFIX: &str = "gif:";
    pub const GROUP_INDEX_PREFIX: &str = "gifsForGroup:";

    pub fn group(id: u64) -> String {
        format!("{}{}", GROUP_PREFIX, id)
    }

    pub fn gif(id: u64) -> String {
        format!("{}{}", GIF_PREFIX, id)
    }

    pub fn group_gifs(group_id: u64) -> String {
        format!("{}{}", GROUP_INDEX_PREFIX, group_id)
    }
}
