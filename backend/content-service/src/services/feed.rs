/// Feed aggregator - the home feed and its tag filter
///
/// The full feed is fetched once per `refresh()`; changing the tag selection
/// only recomputes the visible subset from that snapshot.
use crate::db::ContentRepository;
use crate::error::Result;
use crate::models::{FeedPost, Tag};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

pub struct FeedAggregator {
    repo: ContentRepository,
    posts: Vec<FeedPost>,
    /// Indexes into `posts`, newest first
    visible: Vec<usize>,
    selected: HashSet<String>,
    tags: Vec<Tag>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl FeedAggregator {
    pub fn new(repo: ContentRepository) -> Self {
        Self {
            repo,
            posts: Vec::new(),
            visible: Vec::new(),
            selected: HashSet::new(),
            tags: Vec::new(),
            refreshed_at: None,
        }
    }

    /// Reload posts and the tag list.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&mut self) -> Result<()> {
        let (posts, tags) = match self.repo.fetch_feed_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, kept = self.posts.len(), "feed refresh failed");
                return Err(err);
            }
        };

        self.posts = posts;
        self.tags = tags;
        self.refreshed_at = Some(Utc::now());
        self.recompute();
        debug!(
            posts = self.posts.len(),
            visible = self.visible.len(),
            "feed refreshed"
        );
        Ok(())
    }

    /// Flip `name` in the selection; returns whether it is now selected
    pub fn toggle_tag(&mut self, name: &str) -> bool {
        let selected = if self.selected.remove(name) {
            false
        } else {
            self.selected.insert(name.to_string());
            true
        };
        self.recompute();
        selected
    }

    pub fn select_tags<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected = names.into_iter().map(Into::into).collect();
        self.recompute();
    }

    pub fn clear_filter(&mut self) {
        self.selected.clear();
        self.recompute();
    }

    fn recompute(&mut self) {
        let selected = &self.selected;
        self.visible = self
            .posts
            .iter()
            .enumerate()
            .filter(|(_, post)| post.has_all_tags(selected))
            .map(|(i, _)| i)
            .collect();
    }

    /// Posts carrying every selected tag, newest first
    pub fn visible(&self) -> Vec<&FeedPost> {
        self.visible.iter().map(|&i| &self.posts[i]).collect()
    }

    pub fn all_posts(&self) -> &[FeedPost] {
        &self.posts
    }

    pub fn selected_tags(&self) -> &HashSet<String> {
        &self.selected
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selected.contains(name)
    }

    /// Tags for the filter picker, as of the last refresh
    pub fn available_tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}
