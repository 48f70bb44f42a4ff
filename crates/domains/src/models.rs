//! # Domain Models
//!
//! These structs represent the entities of the comment board.
//! Identifiers are assigned by the store, so drafts and insert requests
//! carry everything except `id` and `created_at`.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned comment identifier.
pub type CommentId = i64;

/// Store-assigned reply identifier.
pub type ReplyId = i64;

/// A single visitor comment. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub author_name: String,
    pub content: String,
    /// Used both for display and for feed ordering
    pub created_at: DateTime<Utc>,
    /// Public URL of the uploaded avatar; `None` renders a placeholder
    pub profile_image_url: Option<String>,
    /// At most one comment in the store is pinned
    pub is_pinned: bool,
}

/// A reply scoped to exactly one parent comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: ReplyId,
    pub comment_id: CommentId,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Validated insert request for a comment. New comments are never pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub author_name: String,
    pub content: String,
    pub profile_image_url: Option<String>,
}

/// Validated insert request for a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReply {
    pub comment_id: CommentId,
    pub author_name: String,
    pub content: String,
}

/// Raw image payload handed to the store for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub data: Bytes,
    /// The file name as the visitor picked it; only its extension is kept
    pub original_name: String,
}

impl ImageUpload {
    pub fn new(data: impl Into<Bytes>, original_name: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            original_name: original_name.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Unvalidated user input for the comment form.
///
/// The controller borrows the draft, so a failed submit leaves it intact
/// for the caller to retry without retyping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentDraft {
    pub author_name: String,
    pub content: String,
    pub image: Option<ImageUpload>,
}

impl CommentDraft {
    pub fn new(author_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author_name: author_name.into(),
            content: content.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageUpload) -> Self {
        self.image = Some(image);
        self
    }
}

/// Unvalidated user input for the reply form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyDraft {
    pub author_name: String,
    pub content: String,
}

impl ReplyDraft {
    pub fn new(author_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author_name: author_name.into(),
            content: content.into(),
        }
    }
}

/// What happened to the comment collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The channel may have dropped events; observers should refetch.
    Resync,
}

/// A push notification that the comment collection was mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub comment_id: Option<CommentId>,
}

impl ChangeEvent {
    pub fn inserted(id: CommentId) -> Self {
        Self { kind: ChangeKind::Insert, comment_id: Some(id) }
    }

    pub fn updated(id: CommentId) -> Self {
        Self { kind: ChangeKind::Update, comment_id: Some(id) }
    }

    pub fn deleted(id: CommentId) -> Self {
        Self { kind: ChangeKind::Delete, comment_id: Some(id) }
    }

    pub fn resync() -> Self {
        Self { kind: ChangeKind::Resync, comment_id: None }
    }
}
