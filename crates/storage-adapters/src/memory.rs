//! # In-memory comment store
//!
//! Process-local implementation of `CommentStore`. Change listeners are
//! invoked synchronously after each comment mutation, so observers see the
//! notification before the insert call returns.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use domains::validation::MAX_PROFILE_IMAGE_BYTES;
use domains::{
    ChangeEvent, ChangeHandler, Comment, CommentId, CommentStore, ImageUpload, MediaStorage,
    NewComment, NewReply, Reply, StoreError, Subscription, UploadError,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::media::{store_profile_image, InMemoryMediaStorage};

pub struct InMemoryCommentStore {
    comments: RwLock<Vec<Comment>>,
    replies: DashMap<CommentId, Vec<Reply>>,
    listeners: Arc<DashMap<u64, ChangeHandler>>,
    next_comment_id: AtomicI64,
    next_reply_id: AtomicI64,
    next_listener_id: AtomicU64,
    media: Arc<dyn MediaStorage>,
    max_image_bytes: usize,
}

impl Default for InMemoryCommentStore {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryMediaStorage::new("memory://profile-images")))
    }
}

impl InMemoryCommentStore {
    pub fn new(media: Arc<dyn MediaStorage>) -> Self {
        Self {
            comments: RwLock::new(Vec::new()),
            replies: DashMap::new(),
            listeners: Arc::new(DashMap::new()),
            next_comment_id: AtomicI64::new(1),
            next_reply_id: AtomicI64::new(1),
            next_listener_id: AtomicU64::new(1),
            media,
            max_image_bytes: MAX_PROFILE_IMAGE_BYTES,
        }
    }

    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    /// Pins a new comment, unpinning whichever comment held the pin before.
    pub async fn seed_pinned(&self, author_name: &str, content: &str) -> Comment {
        let comment = Comment {
            id: self.next_comment_id.fetch_add(1, Ordering::SeqCst),
            author_name: author_name.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            profile_image_url: None,
            is_pinned: true,
        };

        let mut events = Vec::new();
        {
            let mut comments = self.comments.write().await;
            for previous in comments.iter_mut().filter(|c| c.is_pinned) {
                previous.is_pinned = false;
                events.push(ChangeEvent::updated(previous.id));
            }
            comments.push(comment.clone());
        }
        events.push(ChangeEvent::inserted(comment.id));
        for event in events {
            self.notify(event);
        }
        comment
    }

    /// Number of live change subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify(&self, event: ChangeEvent) {
        // Collect first so handlers never run while a map shard is locked.
        let handlers: Vec<ChangeHandler> = self
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        debug!(?event, listeners = handlers.len(), "notifying comment listeners");
        for handler in handlers {
            handler(event);
        }
    }
}

#[async_trait]
impl CommentStore for InMemoryCommentStore {
    async fn fetch_pinned(&self) -> Result<Option<Comment>, StoreError> {
        let comments = self.comments.read().await;
        Ok(comments.iter().find(|c| c.is_pinned).cloned())
    }

    async fn fetch_feed(&self) -> Result<Vec<Comment>, StoreError> {
        let mut feed: Vec<Comment> = self
            .comments
            .read()
            .await
            .iter()
            .filter(|c| !c.is_pinned)
            .cloned()
            .collect();
        feed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(feed)
    }

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let comment = Comment {
            id: self.next_comment_id.fetch_add(1, Ordering::SeqCst),
            author_name: comment.author_name,
            content: comment.content,
            created_at: Utc::now(),
            profile_image_url: comment.profile_image_url,
            is_pinned: false,
        };
        self.comments.write().await.push(comment.clone());
        self.notify(ChangeEvent::inserted(comment.id));
        Ok(comment)
    }

    async fn upload_profile_image(&self, upload: ImageUpload) -> Result<String, UploadError> {
        store_profile_image(self.media.as_ref(), upload, self.max_image_bytes).await
    }

    async fn fetch_replies(&self, comment_id: CommentId) -> Result<Vec<Reply>, StoreError> {
        let mut replies = self
            .replies
            .get(&comment_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(replies)
    }

    async fn insert_reply(&self, reply: NewReply) -> Result<Reply, StoreError> {
        let parent_exists = self
            .comments
            .read()
            .await
            .iter()
            .any(|c| c.id == reply.comment_id);
        if !parent_exists {
            return Err(StoreError::Rejected(format!(
                "comment {} does not exist",
                reply.comment_id
            )));
        }

        let reply = Reply {
            id: self.next_reply_id.fetch_add(1, Ordering::SeqCst),
            comment_id: reply.comment_id,
            author_name: reply.author_name,
            content: reply.content,
            created_at: Utc::now(),
        };
        self.replies
            .entry(reply.comment_id)
            .or_default()
            .push(reply.clone());
        Ok(reply)
    }

    async fn subscribe(&self, on_change: ChangeHandler) -> Result<Subscription, StoreError> {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.insert(id, on_change);

        let listeners = Arc::downgrade(&self.listeners);
        Ok(Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.remove(&id);
            }
        }))
    }
}
