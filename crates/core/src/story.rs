//! Story and PRD value types.
//!
//! A `Prd` is captured once when a thread starts and never edited afterwards.
//! Which stories pass is decided by replaying `story_passed` events; see
//! [`crate::projection::current_prd`].

use crate::error::PrdError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A single unit of required work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    /// Unique identifier (e.g. "US-001")
    pub id: String,

    /// Short title
    pub title: String,

    /// Full description
    #[serde(default)]
    pub description: String,

    /// Acceptance criteria the agent must satisfy
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    /// Lower value = more urgent
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Whether this story has passed
    #[serde(default)]
    pub passes: bool,

    /// Free-form notes carried along for the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn default_priority() -> u32 {
    1
}

/// The product-requirements document: a project and its stories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prd {
    pub project: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, alias = "userStories")]
    pub stories: Vec<Story>,
}

impl Prd {
    /// Load a PRD from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PrdError> {
        if !path.exists() {
            return Err(PrdError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| PrdError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let prd: Self = serde_json::from_str(&content).map_err(|e| PrdError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if prd.stories.is_empty() {
            return Err(PrdError::NoStories);
        }
        Ok(prd)
    }

    /// Look up a story by id.
    pub fn story(&self, id: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == id)
    }

    /// The next story to work on: lowest priority among unpassed stories,
    /// ties broken by position in the list.
    pub fn select_next_story(&self) -> Option<&Story> {
        // min_by_key returns the first of equal minimums
        self.stories
            .iter()
            .filter(|s| !s.passes)
            .min_by_key(|s| s.priority)
    }

    pub fn all_passed(&self) -> bool {
        self.stories.iter().all(|s| s.passes)
    }

    pub fn passed_count(&self) -> usize {
        self.stories.iter().filter(|s| s.passes).count()
    }

    /// A copy of this PRD with the given story ids marked as passing.
    pub fn with_passed<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Prd {
        let ids: HashSet<&str> = ids.into_iter().collect();
        let mut prd = self.clone();
        for story in &mut prd.stories {
            if ids.contains(story.id.as_str()) {
                story.passes = true;
            }
        }
        prd
    }
}
