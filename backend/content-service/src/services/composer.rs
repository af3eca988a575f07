/// Post composer - publishes a recipe post with its media and tags
///
/// A submission runs as a saga of strictly sequential steps:
/// validate, upload media, insert the post, attach tags. Nothing is rolled
/// back; a failed tag association still completes the post and is reported
/// in the outcome instead.
use crate::auth::SessionContext;
use crate::db::{ContentRepository, StoreError};
use crate::error::{ContentError, ErrorKind, Result};
use crate::media::MediaUploader;
use crate::models::{NewPost, Post, Tag};
use crate::validators::{describe, non_blank};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Everything the compose screen collects
#[derive(Debug, Clone, Default, Validate)]
pub struct PostDraft {
    #[validate(custom(function = "non_blank"), length(max = 500))]
    pub title: String,
    #[validate(custom(function = "non_blank"), length(max = 2000))]
    pub description: String,
    #[validate(custom(function = "non_blank"), length(max = 2000))]
    pub ingredients: String,
    /// Preparation steps
    #[validate(custom(function = "non_blank"), length(max = 2000))]
    pub recipe: String,
    /// Local image or video to upload
    pub media: Option<PathBuf>,
    pub tags: Vec<Tag>,
}

impl PostDraft {
    fn check(&self) -> Result<PathBuf> {
        let mut problems = Vec::new();
        if let Err(errors) = self.validate() {
            problems.push(describe(&errors));
        }
        let media = self
            .media
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
            .cloned();
        if media.is_none() {
            problems.push("media: must not be empty".to_string());
        }

        match media {
            Some(path) if problems.is_empty() => Ok(path),
            _ => Err(ContentError::Validation(problems.join("; "))),
        }
    }

    /// Selected tags with duplicates removed, in selection order
    fn unique_tags(&self) -> Vec<Tag> {
        let mut seen = HashSet::new();
        self.tags
            .iter()
            .filter(|tag| seen.insert(tag.id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposeState {
    #[default]
    Idle,
    Validating,
    Uploading,
    Inserting,
    AssociatingTags,
    Done,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOutcome {
    pub post: Post,
    /// Tags actually attached to the post
    pub tags: Vec<Tag>,
    pub tag_association_ok: bool,
    pub association_error: Option<String>,
}

pub struct PostComposer {
    repo: ContentRepository,
    uploader: MediaUploader,
    state: watch::Sender<ComposeState>,
}

impl PostComposer {
    pub fn new(repo: ContentRepository, uploader: MediaUploader) -> Self {
        let (state, _rx) = watch::channel(ComposeState::Idle);
        Self {
            repo,
            uploader,
            state,
        }
    }

    pub fn state(&self) -> ComposeState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ComposeState> {
        self.state.subscribe()
    }

    fn enter(&self, next: ComposeState) {
        debug!(state = ?next, "compose state");
        self.state.send_replace(next);
    }

    /// Publish `draft` as the signed-in user.
    ///
    /// Resubmitting after a failure creates a new post; there is no
    /// idempotency key.
    pub async fn submit(
        &mut self,
        session: &SessionContext,
        draft: PostDraft,
    ) -> Result<ComposeOutcome> {
        match self.run(session, draft).await {
            Ok(outcome) => {
                self.enter(ComposeState::Done);
                Ok(outcome)
            }
            Err(err) => {
                self.enter(ComposeState::Failed(err.kind()));
                Err(err)
            }
        }
    }

    async fn run(&self, session: &SessionContext, draft: PostDraft) -> Result<ComposeOutcome> {
        self.enter(ComposeState::Validating);
        let media = draft.check()?;
        let user_id = session.require_user_id()?;

        self.enter(ComposeState::Uploading);
        let image_link = self.uploader.upload_image(user_id, &media).await?;

        self.enter(ComposeState::Inserting);
        let post = self.insert(user_id, &draft, image_link).await?;

        let tags = draft.unique_tags();
        if tags.is_empty() {
            return Ok(ComposeOutcome {
                post,
                tags,
                tag_association_ok: true,
                association_error: None,
            });
        }

        self.enter(ComposeState::AssociatingTags);
        let tag_ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
        match self.repo.insert_post_tags(post.id, &tag_ids).await {
            Ok(()) => {
                info!(post_id = post.id, tags = tags.len(), "post published");
                Ok(ComposeOutcome {
                    post,
                    tags,
                    tag_association_ok: true,
                    association_error: None,
                })
            }
            Err(e) => {
                let err = ContentError::Association(e.to_string());
                warn!(post_id = post.id, error = %err, "post published without tags");
                Ok(ComposeOutcome {
                    post,
                    tags: Vec::new(),
                    tag_association_ok: false,
                    association_error: Some(err.to_string()),
                })
            }
        }
    }

    async fn insert(&self, user_id: Uuid, draft: &PostDraft, image_link: String) -> Result<Post> {
        let fields = NewPost {
            user_id,
            title: draft.title.trim().to_string(),
            image_link: image_link.clone(),
            description: draft.description.trim().to_string(),
            ingredients: draft.ingredients.trim().to_string(),
            recipe: draft.recipe.trim().to_string(),
        };

        self.repo.insert_post(fields).await.map_err(|err| match err {
            // the row was written; only reading it back failed
            ContentError::Store(StoreError::Decode { .. }) => {
                warn!(%user_id, media = %image_link, error = %err, "post stored but returned row is unreadable");
                err
            }
            ContentError::Insert { message, .. } => {
                warn!(%user_id, media = %image_link, %message, "post insert failed, media left in storage");
                ContentError::Insert {
                    message,
                    orphaned_media: Some(image_link),
                }
            }
            other => {
                warn!(%user_id, media = %image_link, error = %other, "post insert failed, media left in storage");
                ContentError::Insert {
                    message: other.to_string(),
                    orphaned_media: Some(image_link),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::db::store::{MockRelationalStore, Row, StoreError, Table};
    use crate::media::{MockObjectStore, ObjectStoreError};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use serde_json::{json, Value};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn signed_in(user_id: Uuid) -> SessionContext {
        SessionContext::detached(Some(Session {
            user_id,
            email: None,
            access_token: "token".into(),
            refresh_token: None,
            expires_at: None,
        }))
    }

    fn asset() -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        file.write_all(b"jpeg bytes").unwrap();
        file
    }

    fn draft(media: &NamedTempFile, tags: Vec<Tag>) -> PostDraft {
        PostDraft {
            title: "Miso Ramen".into(),
            description: "Rich and quick".into(),
            ingredients: "noodles\nmiso\nstock".into(),
            recipe: "boil\nstir\nserve".into(),
            media: Some(media.path().to_path_buf()),
            tags,
        }
    }

    fn post_row(fields: &Row) -> Row {
        let mut row = fields.clone();
        row.insert("id".into(), json!(42));
        row.insert("created_at".into(), json!("2024-05-01T12:00:00Z"));
        row
    }

    fn tag(id: i64, name: &str) -> Tag {
        Tag {
            id,
            name: name.into(),
        }
    }

    fn uploading_store() -> MockObjectStore {
        let mut objects = MockObjectStore::new();
        objects.expect_upload().returning(|_, _, _, _| Ok(()));
        objects
            .expect_public_url()
            .returning(|bucket, path| format!("https://cdn.test/{bucket}/{path}"));
        objects
    }

    fn composer(store: MockRelationalStore, objects: MockObjectStore) -> PostComposer {
        PostComposer::new(
            ContentRepository::new(Arc::new(store)),
            MediaUploader::new(Arc::new(objects), "videos"),
        )
    }

    #[tokio::test]
    async fn test_insert_waits_for_upload() {
        let file = asset();
        let user = Uuid::new_v4();
        let mut seq = Sequence::new();

        let mut objects = MockObjectStore::new();
        objects
            .expect_upload()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        objects
            .expect_public_url()
            .returning(|_, path| format!("https://cdn.test/{path}"));

        let mut store = MockRelationalStore::new();
        store
            .expect_insert()
            .with(eq(Table::Posts), mockall::predicate::always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, rows| Ok(vec![post_row(&rows[0])]));

        let mut composer = composer(store, objects);
        let outcome = composer
            .submit(&signed_in(user), draft(&file, Vec::new()))
            .await
            .unwrap();

        assert_eq!(outcome.post.id, 42);
        assert_eq!(outcome.post.user_id, user);
        assert!(outcome.post.image_link.starts_with(&format!("https://cdn.test/{user}/")));
        assert!(outcome.tag_association_ok);
        assert_eq!(composer.state(), ComposeState::Done);
    }

    #[tokio::test]
    async fn test_failed_upload_creates_no_post() {
        let file = asset();
        let mut objects = MockObjectStore::new();
        objects
            .expect_upload()
            .returning(|_, _, _, _| Err(ObjectStoreError::Rejected("quota exceeded".into())));
        objects.expect_public_url().never();

        let mut store = MockRelationalStore::new();
        store.expect_insert().never();

        let mut composer = composer(store, objects);
        let err = composer
            .submit(&signed_in(Uuid::new_v4()), draft(&file, Vec::new()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Upload);
        assert_eq!(composer.state(), ComposeState::Failed(ErrorKind::Upload));
    }

    #[tokio::test]
    async fn test_blank_fields_fail_before_any_call() {
        let file = asset();
        let mut objects = MockObjectStore::new();
        objects.expect_upload().never();
        let mut store = MockRelationalStore::new();
        store.expect_insert().never();

        let mut composer = composer(store, objects);
        let mut bad = draft(&file, Vec::new());
        bad.title = "   ".into();
        bad.media = None;

        let err = composer
            .submit(&signed_in(Uuid::new_v4()), bad)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("title"), "{message}");
        assert!(message.contains("media"), "{message}");
        assert_eq!(composer.state(), ComposeState::Failed(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_overlong_title_is_rejected() {
        let file = asset();
        let mut composer = composer(MockRelationalStore::new(), MockObjectStore::new());
        let mut bad = draft(&file, Vec::new());
        bad.title = "a".repeat(501);

        let err = composer
            .submit(&signed_in(Uuid::new_v4()), bad)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("title"));
    }

    #[tokio::test]
    async fn test_signed_out_user_cannot_post() {
        let file = asset();
        let mut objects = MockObjectStore::new();
        objects.expect_upload().never();

        let mut composer = composer(MockRelationalStore::new(), objects);
        let err = composer
            .submit(&SessionContext::detached(None), draft(&file, Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(composer.state(), ComposeState::Failed(ErrorKind::Auth));
    }

    #[tokio::test]
    async fn test_unreadable_stored_post_is_not_an_orphan() {
        let file = asset();
        let mut store = MockRelationalStore::new();
        store
            .expect_insert()
            .times(1)
            .returning(|_, _| Ok(Vec::new()));

        let mut composer = composer(store, uploading_store());
        let err = composer
            .submit(&signed_in(Uuid::new_v4()), draft(&file, Vec::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, ContentError::Store(StoreError::Decode { .. })), "{err:?}");
        assert_eq!(composer.state(), ComposeState::Failed(ErrorKind::Store));
    }

    #[tokio::test]
    async fn test_insert_failure_reports_orphaned_media() {
        let file = asset();
        let mut store = MockRelationalStore::new();
        store.expect_insert().returning(|_, _| {
            Err(StoreError::Rejected {
                table: "posts",
                message: "new row violates row-level security policy".into(),
            })
        });

        let mut composer = composer(store, uploading_store());
        let err = composer
            .submit(&signed_in(Uuid::new_v4()), draft(&file, Vec::new()))
            .await
            .unwrap_err();

        match err {
            ContentError::Insert { orphaned_media, .. } => {
                assert!(orphaned_media.unwrap().starts_with("https://cdn.test/videos/"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(composer.state(), ComposeState::Failed(ErrorKind::Insert));
    }

    #[tokio::test]
    async fn test_tag_failure_still_completes() {
        let file = asset();
        let mut store = MockRelationalStore::new();
        store
            .expect_insert()
            .with(eq(Table::Posts), mockall::predicate::always())
            .returning(|_, rows| Ok(vec![post_row(&rows[0])]));
        store
            .expect_insert()
            .with(eq(Table::PostTags), mockall::predicate::always())
            .times(1)
            .returning(|_, _| {
                Err(StoreError::Rejected {
                    table: "post_tags",
                    message: "permission denied".into(),
                })
            });

        let mut composer = composer(store, uploading_store());
        let outcome = composer
            .submit(
                &signed_in(Uuid::new_v4()),
                draft(&file, vec![tag(1, "Vegan"), tag(5, "Nut Free")]),
            )
            .await
            .unwrap();

        assert_eq!(outcome.post.id, 42);
        assert!(!outcome.tag_association_ok);
        assert!(outcome.tags.is_empty());
        assert!(outcome.association_error.unwrap().contains("permission denied"));
        assert_eq!(composer.state(), ComposeState::Done);
    }

    #[tokio::test]
    async fn test_duplicate_tags_are_linked_once() {
        let file = asset();
        let mut store = MockRelationalStore::new();
        store
            .expect_insert()
            .with(eq(Table::Posts), mockall::predicate::always())
            .returning(|_, rows| Ok(vec![post_row(&rows[0])]));
        store
            .expect_insert()
            .withf(|table, rows| {
                *table == Table::PostTags
                    && rows.len() == 2
                    && rows.iter().all(|r| r.get("post_id") == Some(&Value::from(42)))
            })
            .times(1)
            .returning(|_, rows| Ok(rows));

        let mut composer = composer(store, uploading_store());
        let outcome = composer
            .submit(
                &signed_in(Uuid::new_v4()),
                draft(&file, vec![tag(1, "Vegan"), tag(3, "Keto"), tag(1, "Vegan")]),
            )
            .await
            .unwrap();

        assert!(outcome.tag_association_ok);
        assert_eq!(outcome.tags, vec![tag(1, "Vegan"), tag(3, "Keto")]);
    }

    #[tokio::test]
    async fn test_state_transitions_are_published() {
        let file = asset();
        let mut store = MockRelationalStore::new();
        store
            .expect_insert()
            .returning(|_, rows| Ok(vec![post_row(&rows[0])]));

        let mut composer = composer(store, uploading_store());
        let mut states = composer.subscribe();
        assert_eq!(*states.borrow_and_update(), ComposeState::Idle);

        composer
            .submit(&signed_in(Uuid::new_v4()), draft(&file, Vec::new()))
            .await
            .unwrap();

        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ComposeState::Done);
    }
}
