/// Business logic layer for the content core
///
/// This module provides the screen-facing components:
/// - Post composer: validate, upload, insert, tag (saga with partial success)
/// - Feed aggregator: newest-first feed with an in-memory tag filter
/// - Comment threads: per-post comments, re-read after every post
pub mod comments;
pub mod composer;
pub mod feed;

// Re-export commonly used services
pub use comments::{CommentPolicy, CommentThread, CommentView};
pub use composer::{ComposeOutcome, ComposeState, PostComposer, PostDraft};
pub use feed::FeedAggregator;
