//! # Reply Thread
//!
//! Per-modal state for the replies of one comment. Replies have no change
//! channel, so a confirmed insert is appended locally; replies posted by
//! other visitors show up on the next `open`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use domains::{BoardError, Comment, CommentStore, Reply, ReplyDraft};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::board::{BoardOptions, SubmitOutcome};
use crate::guard::bounded;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadSnapshot {
    /// The parent comment; `None` while the modal is closed
    pub comment: Option<Comment>,
    /// Oldest first
    pub replies: Vec<Reply>,
    pub is_loading: bool,
    pub is_submitting: bool,
    pub last_error: Option<String>,
}

impl ThreadSnapshot {
    pub fn is_open(&self) -> bool {
        self.comment.is_some()
    }
}

pub struct ReplyThread {
    store: Arc<dyn CommentStore>,
    options: BoardOptions,
    state: watch::Sender<ThreadSnapshot>,
    /// Bumped on every open/close so late answers for a previous thread are dropped
    generation: AtomicU64,
}

impl ReplyThread {
    pub fn new(store: Arc<dyn CommentStore>, options: BoardOptions) -> Self {
        let (state, _) = watch::channel(ThreadSnapshot::default());
        Self {
            store,
            options,
            state,
            generation: AtomicU64::new(0),
        }
    }

    pub fn watch(&self) -> watch::Receiver<ThreadSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        self.state.borrow().clone()
    }

    /// Opens the thread for `comment` and loads its replies.
    ///
    /// On failure the thread stays open with an empty list and `last_error` set.
    pub async fn open(&self, comment: &Comment) -> Result<(), BoardError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ThreadSnapshot {
            comment: Some(comment.clone()),
            is_loading: true,
            ..ThreadSnapshot::default()
        });

        let result = bounded(self.options.request_timeout, self.store.fetch_replies(comment.id)).await;

        let mut outcome = Ok(());
        self.state.send_if_modified(|s| {
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(comment_id = comment.id, "dropping replies for a thread that was closed");
                return false;
            }
            s.is_loading = false;
            match result {
                Ok(replies) => {
                    debug!(comment_id = comment.id, count = replies.len(), "replies loaded");
                    s.replies = replies;
                }
                Err(e) => {
                    warn!(comment_id = comment.id, error = %e, "failed to load replies");
                    s.replies.clear();
                    s.last_error = Some(e.to_string());
                    outcome = Err(e.into());
                }
            }
            true
        });
        outcome
    }

    /// Validates and inserts a reply to the open comment, then appends it locally.
    pub async fn submit_reply(&self, draft: &ReplyDraft) -> Result<SubmitOutcome<Reply>, BoardError> {
        let (comment_id, busy) = {
            let s = self.state.borrow();
            (s.comment.as_ref().map(|c| c.id), s.is_submitting)
        };
        let Some(comment_id) = comment_id else {
            return Err(BoardError::NoThreadOpen);
        };
        if busy {
            debug!(comment_id, "reply ignored, another reply is in flight");
            return Ok(SubmitOutcome::Ignored);
        }

        let new_reply = match draft.validate_for(comment_id) {
            Ok(reply) => reply,
            Err(e) => {
                self.state.send_modify(|s| s.last_error = Some(e.to_string()));
                return Err(e.into());
            }
        };

        let generation = self.generation.load(Ordering::SeqCst);
        let claimed = self.state.send_if_modified(|s| {
            if s.is_submitting {
                return false;
            }
            s.is_submitting = true;
            s.last_error = None;
            true
        });
        if !claimed {
            return Ok(SubmitOutcome::Ignored);
        }

        let result = bounded(self.options.request_timeout, self.store.insert_reply(new_reply)).await;
        let current = |s: &ThreadSnapshot| {
            self.generation.load(Ordering::SeqCst) == generation
                && s.comment.as_ref().map(|c| c.id) == Some(comment_id)
        };

        match result {
            Ok(reply) => {
                info!(comment_id, reply_id = reply.id, "reply posted");
                self.state.send_if_modified(|s| {
                    if !current(&*s) {
                        return false;
                    }
                    s.is_submitting = false;
                    s.replies.push(reply.clone());
                    s.replies
                        .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
                    true
                });
                Ok(SubmitOutcome::Posted(reply))
            }
            Err(e) => {
                warn!(comment_id, error = %e, "reply submit failed");
                self.state.send_if_modified(|s| {
                    if !current(&*s) {
                        return false;
                    }
                    s.is_submitting = false;
                    s.last_error = Some(e.to_string());
                    true
                });
                Err(e.into())
            }
        }
    }

    /// Discards the in-memory thread. Persisted replies are untouched.
    pub fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ThreadSnapshot::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domains::{CommentId, MockCommentStore, StoreError};
    use tokio_test::{assert_err, assert_ok};

    fn parent(id: CommentId) -> Comment {
        Comment {
            id,
            author_name: "Sam".to_string(),
            content: "Nice site!".to_string(),
            created_at: Utc::now(),
            profile_image_url: None,
            is_pinned: false,
        }
    }

    fn reply(id: i64, comment_id: CommentId, age_secs: i64) -> Reply {
        Reply {
            id,
            comment_id,
            author_name: "Bo".to_string(),
            content: "thanks".to_string(),
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    fn thread(store: MockCommentStore) -> ReplyThread {
        ReplyThread::new(Arc::new(store), BoardOptions::default())
    }

    #[tokio::test]
    async fn open_loads_replies_for_the_comment() {
        let mut store = MockCommentStore::new();
        store
            .expect_fetch_replies()
            .withf(|id| *id == 5)
            .times(1)
            .returning(|id| Ok(vec![reply(1, id, 60), reply(2, id, 10)]));

        let thread = thread(store);
        assert_ok!(thread.open(&parent(5)).await);

        let snapshot = thread.snapshot();
        assert!(snapshot.is_open());
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.replies.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn failed_open_keeps_thread_open_and_empty() {
        let mut store = MockCommentStore::new();
        store
            .expect_fetch_replies()
            .returning(|_| Err(StoreError::Unavailable("offline".into())));

        let thread = thread(store);
        assert_err!(thread.open(&parent(5)).await);

        let snapshot = thread.snapshot();
        assert!(snapshot.is_open());
        assert!(snapshot.replies.is_empty());
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn confirmed_reply_is_appended() {
        let mut store = MockCommentStore::new();
        store.expect_fetch_replies().returning(|id| Ok(vec![reply(1, id, 60)]));
        store.expect_insert_reply().times(1).returning(|new| {
            Ok(Reply {
                id: 2,
                comment_id: new.comment_id,
                author_name: new.author_name,
                content: new.content,
                created_at: Utc::now(),
            })
        });

        let thread = thread(store);
        assert_ok!(thread.open(&parent(5)).await);
        let outcome = assert_ok!(thread.submit_reply(&ReplyDraft::new(" Bo ", "Agreed")).await);
        assert!(matches!(outcome, SubmitOutcome::Posted(ref r) if r.author_name == "Bo"));

        let snapshot = thread.snapshot();
        assert_eq!(snapshot.replies.len(), 2);
        assert_eq!(snapshot.replies[1].id, 2);
        assert!(!snapshot.is_submitting);
    }

    #[tokio::test]
    async fn reply_requires_open_thread_and_valid_input() {
        let mut store = MockCommentStore::new();
        store.expect_fetch_replies().returning(|_| Ok(Vec::new()));
        store.expect_insert_reply().never();

        let thread = thread(store);
        assert_eq!(
            thread.submit_reply(&ReplyDraft::new("Bo", "hi")).await,
            Err(BoardError::NoThreadOpen)
        );

        assert_ok!(thread.open(&parent(5)).await);
        let err = assert_err!(thread.submit_reply(&ReplyDraft::new("Bo", "  ")).await);
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn close_discards_state() {
        let mut store = MockCommentStore::new();
        store.expect_fetch_replies().returning(|id| Ok(vec![reply(1, id, 5)]));

        let thread = thread(store);
        assert_ok!(thread.open(&parent(5)).await);
        thread.close();
        assert_eq!(thread.snapshot(), ThreadSnapshot::default());
    }
}
