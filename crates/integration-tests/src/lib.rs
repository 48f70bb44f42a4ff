//! Shared fixtures for the end-to-end controller tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domains::{
    ChangeHandler, Comment, CommentId, CommentStore, ImageUpload, NewComment, NewReply, Reply,
    StoreError, Subscription, UploadError,
};
use services::{BoardSnapshot, ThreadSnapshot};
use storage_adapters::{InMemoryCommentStore, InMemoryMediaStorage};
use tokio::sync::watch;

/// Smallest byte string the image sniffer accepts as a PNG.
pub const PNG_HEADER: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R',
];

pub const MEDIA_PREFIX: &str = "memory://profile-images";

pub fn png_upload(name: &str) -> ImageUpload {
    ImageUpload::new(PNG_HEADER.to_vec(), name)
}

/// In-memory store plus a handle on its media backend.
pub fn memory_store() -> (Arc<InMemoryCommentStore>, Arc<InMemoryMediaStorage>) {
    let media = Arc::new(InMemoryMediaStorage::new(MEDIA_PREFIX));
    let store = Arc::new(InMemoryCommentStore::new(media.clone()));
    (store, media)
}

pub fn new_comment(author_name: &str, content: &str) -> NewComment {
    NewComment {
        author_name: author_name.to_string(),
        content: content.to_string(),
        profile_image_url: None,
    }
}

pub fn new_reply(comment_id: CommentId, author_name: &str, content: &str) -> NewReply {
    NewReply {
        comment_id,
        author_name: author_name.to_string(),
        content: content.to_string(),
    }
}

/// Waits (up to two seconds) for a board state matching `ready`.
pub async fn board_state(
    rx: &mut watch::Receiver<BoardSnapshot>,
    ready: impl FnMut(&BoardSnapshot) -> bool,
) -> BoardSnapshot {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(ready))
        .await
        .expect("board did not reach the expected state")
        .expect("board dropped")
        .clone()
}

pub async fn thread_state(
    rx: &mut watch::Receiver<ThreadSnapshot>,
    ready: impl FnMut(&ThreadSnapshot) -> bool,
) -> ThreadSnapshot {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(ready))
        .await
        .expect("thread did not reach the expected state")
        .expect("thread dropped")
        .clone()
}

/// Delays every data call by a fixed amount before delegating.
///
/// `subscribe` is not delayed.
pub struct SlowStore {
    inner: Arc<dyn CommentStore>,
    delay: Duration,
}

impl SlowStore {
    pub fn new(inner: Arc<dyn CommentStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl CommentStore for SlowStore {
    async fn fetch_pinned(&self) -> Result<Option<Comment>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_pinned().await
    }

    async fn fetch_feed(&self) -> Result<Vec<Comment>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_feed().await
    }

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert_comment(comment).await
    }

    async fn upload_profile_image(&self, upload: ImageUpload) -> Result<String, UploadError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upload_profile_image(upload).await
    }

    async fn fetch_replies(&self, comment_id: CommentId) -> Result<Vec<Reply>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_replies(comment_id).await
    }

    async fn insert_reply(&self, reply: NewReply) -> Result<Reply, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert_reply(reply).await
    }

    async fn subscribe(&self, on_change: ChangeHandler) -> Result<Subscription, StoreError> {
        self.inner.subscribe(on_change).await
    }
}
