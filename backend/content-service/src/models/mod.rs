/// Data models for the content core
///
/// These are the typed shapes rows are decoded into at the repository
/// boundary:
/// - Profile: public identity (username, bio)
/// - Tag: dietary label attached to posts
/// - Post: a published recipe with its media link
/// - Comment: append-only remark on a post
/// - FeedPost: a post joined with its author and tags for display
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub bio: Option<String>,
}

impl Profile {
    /// Bio to display; blank bios read as absent
    pub fn display_bio(&self) -> Option<&str> {
        self.bio.as_deref().map(str::trim).filter(|b| !b.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub title: String,
    pub image_link: String,
    pub description: String,
    pub ingredients: String,
    pub recipe: String,
}

impl Post {
    /// Ingredients, one per non-empty line
    pub fn ingredient_lines(&self) -> Vec<&str> {
        split_lines(&self.ingredients)
    }

    /// Recipe steps, one per non-empty line
    pub fn recipe_steps(&self) -> Vec<&str> {
        split_lines(&self.recipe)
    }
}

fn split_lines(blob: &str) -> Vec<&str> {
    blob.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Fields for a new post; id and created_at are generated by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub user_id: Uuid,
    pub title: String,
    pub image_link: String,
    pub description: String,
    pub ingredients: String,
    pub recipe: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostTag {
    pub post_id: i64,
    pub tag_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub post_id: i64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub user_id: Uuid,
    pub post_id: i64,
    pub content: String,
}

/// A post with its author's username and its tags (sorted by name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPost {
    pub post: Post,
    pub author: Option<String>,
    pub tags: Vec<Tag>,
}

impl FeedPost {
    pub fn tag_names(&self) -> BTreeSet<&str> {
        self.tags.iter().map(|t| t.name.as_str()).collect()
    }

    /// Conjunctive filter: every selected tag must be on the post
    pub fn has_all_tags<'a, I>(&self, selected: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let names = self.tag_names();
        selected.into_iter().all(|t| names.contains(t.as_str()))
    }
}
