//! Bulletin-board posts.

use crate::collection::CollectionConfig;
use crate::error::ValidationError;
use crate::query::OrderBy;
use crate::types::{Record, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TABLE: &str = "mural_posts";

const MAX_TITLE_LEN: usize = 120;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MuralPost {
    pub id: RecordId,
    pub title: String,
    pub body: String,
    pub author_id: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MuralPost {
    /// Pinned posts first, then newest first.
    pub fn collection() -> CollectionConfig {
        CollectionConfig::new(TABLE)
            .order_by(OrderBy::desc("pinned"))
            .order_by(OrderBy::desc("created_at"))
    }
}

impl Record for MuralPost {
    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::new("title", "is required"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(ValidationError::new(
                "title",
                format!("must be at most {} characters", MAX_TITLE_LEN),
            ));
        }
        if self.author_id.is_empty() {
            return Err(ValidationError::new("author_id", "is required"));
        }
        Ok(())
    }
}
