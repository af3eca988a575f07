/// Error types for the content core
///
/// Every failure a screen can see is a `ContentError`. Collaborator errors
/// (`StoreError`, `ObjectStoreError`, `IdentityError`) are converted at the
/// boundary so callers only match on one taxonomy.
use crate::auth::IdentityError;
use crate::db::StoreError;
use crate::media::ObjectStoreError;
use thiserror::Error;

/// Result type for content core operations
pub type Result<T> = std::result::Result<T, ContentError>;

#[derive(Debug, Error)]
pub enum ContentError {
    /// Local pre-flight check failed, nothing was persisted
    #[error("{0}")]
    Validation(String),

    /// Media store rejected the asset or the asset could not be read
    #[error("media upload failed: {0}")]
    Upload(String),

    /// Relational write rejected (constraint or permission)
    ///
    /// `orphaned_media` is set when media was already uploaded for the row
    /// that failed to insert; that object is left in storage.
    #[error("could not save: {message}")]
    Insert {
        message: String,
        orphaned_media: Option<String>,
    },

    /// Secondary write failed after the primary write succeeded
    #[error("tags could not be attached: {0}")]
    Association(String),

    /// Credential or session failure
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("username '{0}' is already taken")]
    UsernameTaken(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Collaborator unreachable; not retried by the core
    #[error("service unavailable: {0}")]
    Transient(String),

    #[error(transparent)]
    Store(StoreError),
}

/// Coarse classification of a `ContentError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Upload,
    Insert,
    Association,
    Auth,
    UsernameTaken,
    NotFound,
    Transient,
    Store,
}

impl ContentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContentError::Validation(_) => ErrorKind::Validation,
            ContentError::Upload(_) => ErrorKind::Upload,
            ContentError::Insert { .. } => ErrorKind::Insert,
            ContentError::Association(_) => ErrorKind::Association,
            ContentError::Auth(_) => ErrorKind::Auth,
            ContentError::UsernameTaken(_) => ErrorKind::UsernameTaken,
            ContentError::NotFound { .. } => ErrorKind::NotFound,
            ContentError::Transient(_) => ErrorKind::Transient,
            ContentError::Store(_) => ErrorKind::Store,
        }
    }

    /// Short title for an alert shown next to the readable message
    pub fn headline(&self) -> &'static str {
        match self {
            ContentError::Validation(_) => "Missing Fields",
            ContentError::Upload(_) => "Upload Error",
            ContentError::Insert { .. } | ContentError::Store(_) => "Database Error",
            ContentError::Association(_) => "Tags Not Saved",
            ContentError::Auth(_) => "Sign In Failed",
            ContentError::UsernameTaken(_) => "Username Taken",
            ContentError::NotFound { .. } => "Not Found",
            ContentError::Transient(_) => "Connection Problem",
        }
    }

    /// True when nothing was written because of this error
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            ContentError::Validation(_) | ContentError::UsernameTaken(_)
        )
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ContentError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classify a failed relational write
    pub(crate) fn from_write(err: StoreError, orphaned_media: Option<String>) -> Self {
        match err {
            StoreError::Unavailable(msg) => ContentError::Transient(msg),
            other => ContentError::Insert {
                message: other.to_string(),
                orphaned_media,
            },
        }
    }
}

impl From<StoreError> for ContentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => ContentError::Transient(msg),
            other => ContentError::Store(other),
        }
    }
}

impl From<ObjectStoreError> for ContentError {
    fn from(err: ObjectStoreError) -> Self {
        ContentError::Upload(err.to_string())
    }
}

impl From<IdentityError> for ContentError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Unavailable(msg) => ContentError::Transient(msg),
            other => ContentError::Auth(other.to_string()),
        }
    }
}
