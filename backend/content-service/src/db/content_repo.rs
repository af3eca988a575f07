/// Typed content operations over the relational store
///
/// Rows are decoded into the per-entity models here. Reads of absent rows
/// yield `None` or an empty list; only collaborator failures are errors.
use super::store::{Filter, Order, RelationalStore, Row, Select, StoreError, StoreResult, Table};
use crate::error::{ContentError, Result};
use crate::models::{Comment, FeedPost, NewComment, NewPost, Post, PostTag, Profile, Tag};
use crate::validators::MAX_BIO_CHARS;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

fn decode<T: DeserializeOwned>(table: Table, row: Row) -> StoreResult<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| StoreError::Decode {
        table: table.name(),
        message: e.to_string(),
    })
}

fn decode_all<T: DeserializeOwned>(table: Table, rows: Vec<Row>) -> StoreResult<Vec<T>> {
    rows.into_iter().map(|row| decode(table, row)).collect()
}

fn encode<T: Serialize>(table: Table, value: &T) -> StoreResult<Row> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(StoreError::InvalidQuery(format!(
            "{} row must be an object, got {other}",
            table.name()
        ))),
        Err(e) => Err(StoreError::InvalidQuery(e.to_string())),
    }
}

/// The single row an insert is expected to hand back
fn inserted<T: DeserializeOwned>(table: Table, rows: Vec<Row>) -> StoreResult<T> {
    let row = rows.into_iter().next().ok_or_else(|| StoreError::Decode {
        table: table.name(),
        message: "insert returned no row".to_string(),
    })?;
    decode(table, row)
}

#[derive(Clone)]
pub struct ContentRepository {
    store: Arc<dyn RelationalStore>,
}

impl ContentRepository {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    // ----- profiles -----

    pub async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>> {
        let rows = self
            .store
            .select(Select::from(Table::Profiles).filter(Filter::Eq("id", json!(user_id))))
            .await?;

        Ok(rows
            .into_iter()
            .next()
            .map(|row| decode(Table::Profiles, row))
            .transpose()?)
    }

    pub async fn username_exists(&self, username: &str) -> Result<bool> {
        let rows = self
            .store
            .select(
                Select::from(Table::Profiles)
                    .columns(&["id"])
                    .filter(Filter::Eq("username", json!(username))),
            )
            .await?;

        Ok(!rows.is_empty())
    }

    /// Replace the owner's bio. Blank text clears it.
    ///
    /// Returns `None` when the profile does not exist.
    pub async fn update_bio(&self, user_id: Uuid, text: &str) -> Result<Option<Profile>> {
        let text = text.trim();
        if text.chars().count() > MAX_BIO_CHARS {
            return Err(ContentError::Validation(format!(
                "bio: must be at most {MAX_BIO_CHARS} characters"
            )));
        }
        let bio = if text.is_empty() {
            Value::Null
        } else {
            json!(text)
        };

        let mut patch = Row::new();
        patch.insert("bio".to_string(), bio);

        let rows = self
            .store
            .update(
                Table::Profiles,
                patch,
                vec![Filter::Eq("id", json!(user_id))],
            )
            .await
            .map_err(|e| ContentError::from_write(e, None))?;

        tracing::debug!(%user_id, updated = rows.len(), "bio updated");
        Ok(rows
            .into_iter()
            .next()
            .map(|row| decode(Table::Profiles, row))
            .transpose()?)
    }

    /// Usernames for the given profile ids; unknown ids are left out
    pub async fn fetch_usernames(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let unique: BTreeSet<Uuid> = user_ids.iter().copied().collect();
        let rows = self
            .store
            .select(
                Select::from(Table::Profiles)
                    .columns(&["id", "username"])
                    .filter(Filter::In("id", unique.iter().map(|id| json!(id)).collect())),
            )
            .await?;

        #[derive(serde::Deserialize)]
        struct Username {
            id: Uuid,
            username: String,
        }

        let names: Vec<Username> = decode_all(Table::Profiles, rows)?;
        Ok(names.into_iter().map(|n| (n.id, n.username)).collect())
    }

    // ----- tags -----

    /// All tags in seed order
    pub async fn fetch_tags(&self) -> Result<Vec<Tag>> {
        let rows = self
            .store
            .select(Select::from(Table::Tags).order(Order::asc("id")))
            .await?;
        Ok(decode_all(Table::Tags, rows)?)
    }

    // ----- posts -----

    /// Every post, newest first, keeping only posts that carry all of
    /// `filter_tags`. An empty filter keeps everything.
    pub async fn fetch_posts_feed(&self, filter_tags: &HashSet<String>) -> Result<Vec<FeedPost>> {
        let rows = self
            .store
            .select(Select::from(Table::Posts).newest_first())
            .await?;
        let posts: Vec<Post> = decode_all(Table::Posts, rows)?;
        let feed = self.attach_details(posts, None).await?;

        let total = feed.len();
        let visible: Vec<FeedPost> = feed
            .into_iter()
            .filter(|post| post.has_all_tags(filter_tags))
            .collect();

        tracing::debug!(total, visible = visible.len(), filter = ?filter_tags, "feed fetched");
        Ok(visible)
    }

    /// The unfiltered feed together with every tag, reading the tags table
    /// once for both
    pub async fn fetch_feed_snapshot(&self) -> Result<(Vec<FeedPost>, Vec<Tag>)> {
        let tags = self.fetch_tags().await?;
        let rows = self
            .store
            .select(Select::from(Table::Posts).newest_first())
            .await?;
        let posts: Vec<Post> = decode_all(Table::Posts, rows)?;
        let feed = self.attach_details(posts, Some(&tags)).await?;
        Ok((feed, tags))
    }

    pub async fn fetch_post(&self, id: i64) -> Result<Option<FeedPost>> {
        let rows = self
            .store
            .select(Select::from(Table::Posts).filter(Filter::Eq("id", json!(id))))
            .await?;
        let posts: Vec<Post> = decode_all(Table::Posts, rows)?;
        Ok(self.attach_details(posts, None).await?.into_iter().next())
    }

    /// Posts owned by `user_id`, newest first (profile grid)
    pub async fn fetch_user_posts(&self, user_id: Uuid) -> Result<Vec<Post>> {
        let rows = self
            .store
            .select(
                Select::from(Table::Posts)
                    .filter(Filter::Eq("user_id", json!(user_id)))
                    .newest_first(),
            )
            .await?;
        Ok(decode_all(Table::Posts, rows)?)
    }

    pub async fn insert_post(&self, fields: NewPost) -> Result<Post> {
        if fields.image_link.trim().is_empty() {
            return Err(ContentError::Validation(
                "image_link: a post needs uploaded media".to_string(),
            ));
        }
        let row = encode(Table::Posts, &fields)?;
        let rows = self
            .store
            .insert(Table::Posts, vec![row])
            .await
            .map_err(|e| ContentError::from_write(e, None))?;

        let post: Post = inserted(Table::Posts, rows)?;
        tracing::info!(post_id = post.id, user_id = %post.user_id, "post inserted");
        Ok(post)
    }

    /// Link `tag_ids` to a post in one insert call. No call is made for an
    /// empty list.
    pub async fn insert_post_tags(&self, post_id: i64, tag_ids: &[i64]) -> Result<()> {
        let unique: BTreeSet<i64> = tag_ids.iter().copied().collect();
        if unique.is_empty() {
            return Ok(());
        }
        let rows = unique
            .iter()
            .map(|&tag_id| encode(Table::PostTags, &PostTag { post_id, tag_id }))
            .collect::<StoreResult<Vec<Row>>>()?;

        self.store
            .insert(Table::PostTags, rows)
            .await
            .map_err(|e| ContentError::from_write(e, None))?;

        tracing::debug!(post_id, tags = unique.len(), "post tags inserted");
        Ok(())
    }

    /// Load authors and tags for a batch of posts, preserving their order.
    /// `known_tags` saves the tags lookup when the caller already has them.
    async fn attach_details(
        &self,
        posts: Vec<Post>,
        known_tags: Option<&[Tag]>,
    ) -> Result<Vec<FeedPost>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        let post_ids: Vec<Value> = posts.iter().map(|p| json!(p.id)).collect();
        let link_rows = self
            .store
            .select(Select::from(Table::PostTags).filter(Filter::In("post_id", post_ids)))
            .await?;
        let links: Vec<PostTag> = decode_all(Table::PostTags, link_rows)?;

        let tags_by_id: HashMap<i64, Tag> = match known_tags {
            _ if links.is_empty() => HashMap::new(),
            Some(tags) => tags.iter().map(|t| (t.id, t.clone())).collect(),
            None => self
                .fetch_tags()
                .await?
                .into_iter()
                .map(|t| (t.id, t))
                .collect(),
        };

        let mut tags_by_post: HashMap<i64, Vec<Tag>> = HashMap::new();
        for link in links {
            // links to tags that no longer resolve are skipped
            if let Some(tag) = tags_by_id.get(&link.tag_id) {
                tags_by_post.entry(link.post_id).or_default().push(tag.clone());
            }
        }

        let authors: Vec<Uuid> = posts.iter().map(|p| p.user_id).collect();
        let usernames = self.fetch_usernames(&authors).await?;

        Ok(posts
            .into_iter()
            .map(|post| {
                let mut tags = tags_by_post.remove(&post.id).unwrap_or_default();
                tags.sort_by(|a, b| a.name.cmp(&b.name));
                tags.dedup_by_key(|t| t.id);
                FeedPost {
                    author: usernames.get(&post.user_id).cloned(),
                    tags,
                    post,
                }
            })
            .collect())
    }

    async fn post_exists(&self, post_id: i64) -> Result<bool> {
        let rows = self
            .store
            .select(
                Select::from(Table::Posts)
                    .columns(&["id"])
                    .filter(Filter::Eq("id", json!(post_id))),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    // ----- comments -----

    /// Comments on a post, newest first
    pub async fn fetch_comments(&self, post_id: i64) -> Result<Vec<Comment>> {
        let rows = self
            .store
            .select(
                Select::from(Table::Comments)
                    .filter(Filter::Eq("post_id", json!(post_id)))
                    .newest_first(),
            )
            .await?;
        Ok(decode_all(Table::Comments, rows)?)
    }

    pub async fn insert_comment(&self, fields: NewComment) -> Result<Comment> {
        let post_id = fields.post_id;
        let row = encode(Table::Comments, &fields)?;
        match self.store.insert(Table::Comments, vec![row]).await {
            Ok(rows) => {
                let comment: Comment = inserted(Table::Comments, rows)?;
                tracing::info!(comment_id = comment.id, post_id, "comment inserted");
                Ok(comment)
            }
            Err(err @ StoreError::Rejected { .. }) => {
                if self.post_exists(post_id).await? {
                    Err(ContentError::from_write(err, None))
                } else {
                    Err(ContentError::not_found("post", post_id))
                }
            }
            Err(err) => Err(ContentError::from_write(err, None)),
        }
    }
}
