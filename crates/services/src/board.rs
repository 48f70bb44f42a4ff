//! # Comment Board
//!
//! Owns the pinned comment, the feed and the submit flags for one mounted
//! board. State is published through a `watch` channel; the presentation
//! layer renders from a receiver obtained with [`CommentBoard::watch`].
//!
//! Reconciliation is a full refetch of the feed on every change
//! notification. A successful submit does not touch the feed locally: the
//! new comment appears once the notification round trip completes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use domains::validation::ValidEntry;
use domains::{
    BoardError, ChangeEvent, ChangeHandler, Comment, CommentDraft, CommentId, CommentStore,
    ImageUpload, NewComment, Subscription,
};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::guard::bounded;

/// Tunables shared by the board and reply controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardOptions {
    /// Upper bound for every individual store call
    pub request_timeout: Duration,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(10) }
    }
}

/// Everything the presentation layer needs to render the board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub pinned: Option<Comment>,
    /// Non-pinned comments, newest first
    pub feed: Vec<Comment>,
    pub is_loading: bool,
    pub is_submitting: bool,
    /// User-displayable message of the most recent failure
    pub last_error: Option<String>,
}

impl BoardSnapshot {
    /// Comment count shown in the board header, pinned comment included.
    pub fn total(&self) -> usize {
        self.feed.len() + usize::from(self.pinned.is_some())
    }

    pub fn find(&self, id: CommentId) -> Option<&Comment> {
        self.pinned
            .iter()
            .chain(self.feed.iter())
            .find(|comment| comment.id == id)
    }
}

/// Result of a submit call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome<T> {
    /// Persisted by the store
    Posted(T),
    /// Another submit was already in flight
    Ignored,
    /// The controller was torn down before the store answered
    Abandoned,
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    subscription: Option<Subscription>,
    refresher: Option<JoinHandle<()>>,
}

pub struct CommentBoard {
    store: Arc<dyn CommentStore>,
    options: BoardOptions,
    state: Arc<watch::Sender<BoardSnapshot>>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
    /// Message of the last failed feed load, cleared by the next good one
    feed_error: Arc<Mutex<Option<String>>>,
}

impl CommentBoard {
    pub fn new(store: Arc<dyn CommentStore>, options: BoardOptions) -> Self {
        let (state, _) = watch::channel(BoardSnapshot::default());
        Self {
            store,
            options,
            state: Arc::new(state),
            lifecycle: Mutex::new(Lifecycle::default()),
            shutdown: CancellationToken::new(),
            feed_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<BoardSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.state.borrow().clone()
    }

    /// Loads the pinned comment and the feed, then opens the change subscription.
    ///
    /// Failures are recorded in `last_error` and also returned; the first one
    /// wins. A feed failure is cleared from `last_error` by the next
    /// successful refresh. Calling this again after a first call is a no-op.
    pub async fn initialize(&self) -> Result<(), BoardError> {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.initialized || self.shutdown.is_cancelled() {
                return Ok(());
            }
            lifecycle.initialized = true;
        }

        let limit = self.options.request_timeout;
        self.state.send_modify(|s| s.is_loading = true);

        let (pinned, feed) = tokio::join!(
            bounded(limit, self.store.fetch_pinned()),
            bounded(limit, self.store.fetch_feed()),
        );

        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        let mut failure: Option<BoardError> = None;
        self.state.send_modify(|s| {
            s.is_loading = false;
            match pinned {
                Ok(pinned) => s.pinned = pinned,
                Err(e) => {
                    warn!(error = %e, "failed to load pinned comment");
                    s.last_error = Some(e.to_string());
                    failure.get_or_insert(e.into());
                }
            }
            match feed {
                Ok(feed) => s.feed = feed,
                Err(e) => {
                    warn!(error = %e, "failed to load comment feed");
                    let message = e.to_string();
                    *lock(&self.feed_error) = Some(message.clone());
                    s.last_error = Some(message);
                    failure.get_or_insert(e.into());
                }
            }
        });

        let wake = Arc::new(Notify::new());
        let handler: ChangeHandler = {
            let wake = wake.clone();
            Arc::new(move |event: ChangeEvent| {
                debug!(?event, "comment change notification");
                wake.notify_one();
            })
        };

        match bounded(limit, self.store.subscribe(handler)).await {
            Ok(subscription) => {
                let refresher = tokio::spawn(refresh_loop(
                    self.store.clone(),
                    self.state.clone(),
                    self.feed_error.clone(),
                    wake,
                    self.shutdown.clone(),
                    limit,
                ));

                let mut lifecycle = lock(&self.lifecycle);
                if self.shutdown.is_cancelled() {
                    // teardown already ran; release what we just acquired
                    drop(lifecycle);
                    refresher.abort();
                    drop(subscription);
                    return Ok(());
                }
                lifecycle.subscription = Some(subscription);
                lifecycle.refresher = Some(refresher);
                info!(feed_len = self.state.borrow().feed.len(), "comment board mounted");
            }
            Err(e) => {
                warn!(error = %e, "failed to subscribe to comment changes");
                self.state.send_modify(|s| s.last_error = Some(e.to_string()));
                failure.get_or_insert(e.into());
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Refetches the feed outside of the notification path.
    pub async fn refresh(&self) -> Result<(), BoardError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        refresh_feed(
            self.store.as_ref(),
            &self.state,
            &self.feed_error,
            self.options.request_timeout,
        )
        .await
        .map_err(BoardError::from)
    }

    /// Validates the draft, uploads its image if any, then inserts the comment.
    ///
    /// The draft is borrowed so it survives a failure for retry. While a
    /// submit is in flight further calls return [`SubmitOutcome::Ignored`].
    pub async fn submit(&self, draft: &CommentDraft) -> Result<SubmitOutcome<Comment>, BoardError> {
        if self.shutdown.is_cancelled() {
            return Ok(SubmitOutcome::Abandoned);
        }
        if self.state.borrow().is_submitting {
            debug!("submit ignored, another submit is in flight");
            return Ok(SubmitOutcome::Ignored);
        }

        let entry = match draft.validate() {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "comment draft rejected");
                lock(&self.feed_error).take();
                self.state.send_modify(|s| s.last_error = Some(e.to_string()));
                return Err(e.into());
            }
        };

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
        lock(&self.feed_error).take();

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => {
                info!("submit abandoned, board was torn down");
                return Ok(SubmitOutcome::Abandoned);
            }
            result = self.post(entry, draft.image.clone()) => result,
        };

        if self.shutdown.is_cancelled() {
            return result.map(SubmitOutcome::Posted);
        }

        match result {
            Ok(comment) => {
                info!(comment_id = comment.id, "comment posted");
                self.state.send_modify(|s| {
                    s.is_submitting = false;
                    s.last_error = None;
                });
                Ok(SubmitOutcome::Posted(comment))
            }
            Err(e) => {
                warn!(error = %e, "comment submit failed");
                self.state.send_modify(|s| {
                    s.is_submitting = false;
                    s.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    async fn post(&self, entry: ValidEntry, image: Option<ImageUpload>) -> Result<Comment, BoardError> {
        let limit = self.options.request_timeout;

        let profile_image_url = match image {
            Some(upload) => {
                debug!(bytes = upload.len(), name = %upload.original_name, "uploading profile image");
                Some(bounded(limit, self.store.upload_profile_image(upload)).await?)
            }
            None => None,
        };

        let comment = bounded(
            limit,
            self.store.insert_comment(NewComment {
                author_name: entry.author_name,
                content: entry.content,
                profile_image_url,
            }),
        )
        .await?;
        Ok(comment)
    }

    /// Disposes the change subscription and stops background refreshes.
    ///
    /// Safe to call more than once and before `initialize` has finished.
    pub fn teardown(&self) {
        self.shutdown.cancel();
        let (subscription, refresher) = {
            let mut lifecycle = lock(&self.lifecycle);
            (lifecycle.subscription.take(), lifecycle.refresher.take())
        };
        if let Some(mut subscription) = subscription {
            subscription.dispose();
            debug!("comment change subscription disposed");
        }
        if let Some(refresher) = refresher {
            refresher.abort();
        }
    }
}

impl Drop for CommentBoard {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Replaces the feed. A success also clears `last_error` when it still shows
/// an earlier feed failure; errors from submits are left alone.
async fn refresh_feed(
    store: &dyn CommentStore,
    state: &watch::Sender<BoardSnapshot>,
    feed_error: &Mutex<Option<String>>,
    limit: Duration,
) -> Result<(), domains::StoreError> {
    match bounded(limit, store.fetch_feed()).await {
        Ok(feed) => {
            debug!(feed_len = feed.len(), "comment feed refreshed");
            let stale = lock(feed_error).take();
            state.send_modify(|s| {
                s.feed = feed;
                if stale.is_some() && s.last_error == stale {
                    s.last_error = None;
                }
            });
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "comment feed refresh failed");
            let message = e.to_string();
            *lock(feed_error) = Some(message.clone());
            state.send_modify(|s| s.last_error = Some(message));
            Err(e)
        }
    }
}

/// Coalesces notifications: any number of wakeups while a fetch is running
/// collapse into one follow-up fetch.
async fn refresh_loop(
    store: Arc<dyn CommentStore>,
    state: Arc<watch::Sender<BoardSnapshot>>,
    feed_error: Arc<Mutex<Option<String>>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    limit: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = wake.notified() => {}
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = refresh_feed(store.as_ref(), &state, &feed_error, limit) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domains::{MockCommentStore, StoreError, UploadError, ValidationError};
    use mockall::Sequence;
    use tokio_test::{assert_err, assert_ok};

    fn comment(id: CommentId, pinned: bool) -> Comment {
        Comment {
            id,
            author_name: format!("user{id}"),
            content: "hello".to_string(),
            created_at: Utc::now(),
            profile_image_url: None,
            is_pinned: pinned,
        }
    }

    fn board(store: MockCommentStore) -> CommentBoard {
        CommentBoard::new(Arc::new(store), BoardOptions::default())
    }

    #[tokio::test]
    async fn validation_failure_never_contacts_store() {
        // No expectations: any store call would panic.
        let board = board(MockCommentStore::new());

        let err = board.submit(&CommentDraft::new("", "hello")).await.unwrap_err();
        assert!(err.is_validation());
        let err = board.submit(&CommentDraft::new("Alice", "   ")).await.unwrap_err();
        assert!(matches!(err, BoardError::Validation(ValidationError::Empty { .. })));

        let snapshot = board.snapshot();
        assert!(!snapshot.is_submitting);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn upload_precedes_insert() {
        let mut store = MockCommentStore::new();
        let mut seq = Sequence::new();
        store
            .expect_upload_profile_image()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("https://cdn.test/a.png".to_string()));
        store
            .expect_insert_comment()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|new| new.profile_image_url.as_deref() == Some("https://cdn.test/a.png"))
            .returning(|new| {
                Ok(Comment {
                    profile_image_url: new.profile_image_url,
                    ..comment(9, false)
                })
            });

        let board = board(store);
        let draft = CommentDraft::new("Sam", "Nice site!")
            .with_image(ImageUpload::new(vec![1u8, 2, 3], "me.png"));
        let outcome = assert_ok!(board.submit(&draft).await);
        assert!(matches!(outcome, SubmitOutcome::Posted(c) if c.id == 9));
        assert!(!board.snapshot().is_submitting);
    }

    #[tokio::test]
    async fn failed_upload_skips_insert() {
        let mut store = MockCommentStore::new();
        store
            .expect_upload_profile_image()
            .times(1)
            .returning(|_| Err(UploadError::NotAnImage));
        store.expect_insert_comment().never();

        let board = board(store);
        let draft = CommentDraft::new("Sam", "hi").with_image(ImageUpload::new(vec![0u8], "x.txt"));
        let err = assert_err!(board.submit(&draft).await);
        assert_eq!(err, BoardError::Upload(UploadError::NotAnImage));

        let snapshot = board.snapshot();
        assert!(!snapshot.is_submitting);
        assert_eq!(snapshot.last_error.as_deref(), Some("file is not a supported image"));
    }

    #[tokio::test]
    async fn insert_failure_is_recorded_and_cleared_on_success() {
        let mut store = MockCommentStore::new();
        let mut seq = Sequence::new();
        store
            .expect_insert_comment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(StoreError::Unavailable("connection refused".into())));
        store
            .expect_insert_comment()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(comment(2, false)));

        let board = board(store);
        let draft = CommentDraft::new("Sam", "retry me");

        assert_err!(board.submit(&draft).await);
        assert!(board.snapshot().last_error.is_some());

        assert_ok!(board.submit(&draft).await);
        assert_eq!(board.snapshot().last_error, None);
    }

    #[tokio::test]
    async fn initialize_loads_both_partitions_and_subscribes() {
        let mut store = MockCommentStore::new();
        store.expect_fetch_pinned().times(1).returning(|| Ok(Some(comment(1, true))));
        store
            .expect_fetch_feed()
            .times(1)
            .returning(|| Ok(vec![comment(3, false), comment(2, false)]));
        store.expect_subscribe().times(1).returning(|_| Ok(Subscription::noop()));

        let board = board(store);
        assert_ok!(board.initialize().await);
        // second call is a no-op
        assert_ok!(board.initialize().await);

        let snapshot = board.snapshot();
        assert_eq!(snapshot.pinned.as_ref().map(|c| c.id), Some(1));
        assert_eq!(snapshot.feed.len(), 2);
        assert_eq!(snapshot.total(), 3);
        assert!(!snapshot.is_loading);
        board.teardown();
    }

    #[tokio::test]
    async fn missing_pin_is_not_an_error() {
        let mut store = MockCommentStore::new();
        store.expect_fetch_pinned().returning(|| Ok(None));
        store.expect_fetch_feed().returning(|| Ok(Vec::new()));
        store.expect_subscribe().returning(|_| Ok(Subscription::noop()));

        let board = board(store);
        assert_ok!(board.initialize().await);
        let snapshot = board.snapshot();
        assert_eq!(snapshot.pinned, None);
        assert_eq!(snapshot.last_error, None);
        assert_eq!(snapshot.total(), 0);
    }

    #[tokio::test]
    async fn refresh_clears_a_feed_failure_but_not_a_submit_failure() {
        let mut store = MockCommentStore::new();
        let mut seq = Sequence::new();
        store.expect_fetch_pinned().returning(|| Ok(None));
        store
            .expect_fetch_feed()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(StoreError::Unavailable("blip".into())));
        store
            .expect_fetch_feed()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![comment(2, false)]));
        store.expect_subscribe().returning(|_| Ok(Subscription::noop()));
        store
            .expect_insert_comment()
            .returning(|_| Err(StoreError::Rejected("too many comments".into())));

        let board = board(store);
        assert_err!(board.initialize().await);
        assert!(board.snapshot().last_error.is_some());

        assert_ok!(board.refresh().await);
        let snapshot = board.snapshot();
        assert_eq!(snapshot.feed.len(), 1);
        assert_eq!(snapshot.last_error, None);

        assert_err!(board.submit(&CommentDraft::new("Sam", "hi")).await);
        assert_ok!(board.refresh().await);
        assert!(board
            .snapshot()
            .last_error
            .is_some_and(|m| m.contains("too many comments")));
        board.teardown();
    }

    #[tokio::test]
    async fn teardown_before_initialize_is_harmless() {
        let board = board(MockCommentStore::new());
        board.teardown();
        board.teardown();
        // a torn-down board never mounts
        assert_ok!(board.initialize().await);
        assert_eq!(
            assert_ok!(board.submit(&CommentDraft::new("a", "b")).await),
            SubmitOutcome::Abandoned
        );
    }
}
