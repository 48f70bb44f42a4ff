//! # Ports
//!
//! Any store backend must implement these traits to be mounted by the
//! controllers. The controllers never issue store calls any other way.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::{StoreError, UploadError};
use crate::models::{ChangeEvent, Comment, CommentId, ImageUpload, NewComment, NewReply, Reply};

/// Callback invoked for every change to the comment collection.
///
/// Handlers run on the notifying task and must not block.
pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Data persistence contract for comments and replies.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// The single pinned comment, or `None` when nothing is pinned.
    async fn fetch_pinned(&self) -> Result<Option<Comment>, StoreError>;

    /// Every non-pinned comment, newest first.
    async fn fetch_feed(&self) -> Result<Vec<Comment>, StoreError>;

    /// Persists an unpinned comment and returns it with its assigned id and timestamp.
    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError>;

    /// Stores the image under a fresh unique key and returns its public URL.
    async fn upload_profile_image(&self, upload: ImageUpload) -> Result<String, UploadError>;

    /// Replies belonging to `comment_id`, oldest first.
    async fn fetch_replies(&self, comment_id: CommentId) -> Result<Vec<Reply>, StoreError>;

    async fn insert_reply(&self, reply: NewReply) -> Result<Reply, StoreError>;

    /// Registers `on_change` until the returned subscription is disposed.
    async fn subscribe(&self, on_change: ChangeHandler) -> Result<Subscription, StoreError>;
}

/// Binary object storage for uploaded profile images.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Writes `data` under `key`. Keys are never reused.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError>;

    /// Publicly resolvable URL for an object written under `key`.
    fn public_url(&self, key: &str) -> String;
}

/// Disposer for a change subscription.
///
/// Disposal runs at most once, whether through `dispose` or on drop.
pub struct Subscription {
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(disposer: impl FnOnce() + Send + 'static) -> Self {
        Self { disposer: Some(Box::new(disposer)) }
    }

    /// A subscription with nothing to release.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn is_active(&self) -> bool {
        self.disposer.is_some()
    }

    pub fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
