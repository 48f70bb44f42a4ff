//! # Postgres comment store
//!
//! Maps the `portfolio_comments` and `comment_replies` tables onto the
//! domain models. Change notifications come from a row trigger that
//! publishes `{"op": ..., "id": ...}` on the `comment_changes` channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domains::validation::MAX_PROFILE_IMAGE_BYTES;
use domains::{
    ChangeEvent, ChangeHandler, ChangeKind, Comment, CommentId, CommentStore, ImageUpload,
    MediaStorage, NewComment, NewReply, Reply, StoreError, Subscription, UploadError,
};
use serde::Deserialize;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::media::store_profile_image;

/// Channel the comment trigger notifies on.
pub const CHANGE_CHANNEL: &str = "comment_changes";

const COMMENT_COLUMNS: &str = "id, user_name, content, profile_image, is_pinned, created_at";
const REPLY_COLUMNS: &str = "id, comment_id, user_name, content, created_at";
const LISTENER_RETRY: Duration = Duration::from_secs(1);

pub struct PgCommentStore {
    pool: PgPool,
    media: Arc<dyn MediaStorage>,
    max_image_bytes: usize,
}

impl PgCommentStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        media: Arc<dyn MediaStorage>,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(store_error)?;
        Ok(Self::from_pool(pool, media))
    }

    pub fn from_pool(pool: PgPool, media: Arc<dyn MediaStorage>) -> Self {
        Self {
            pool,
            media,
            max_image_bytes: MAX_PROFILE_IMAGE_BYTES,
        }
    }

    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
        info!("comment schema is up to date");
        Ok(())
    }

    /// Pins a new comment. Runs out-of-band; no visitor-facing path pins.
    ///
    /// # Developer Note
    /// The unpin and the insert share a transaction so the partial unique
    /// index on `is_pinned` never sees two pinned rows.
    pub async fn insert_pinned(&self, author_name: &str, content: &str) -> Result<Comment, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        sqlx::query("UPDATE portfolio_comments SET is_pinned = FALSE WHERE is_pinned")
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        let row = sqlx::query(&format!(
            "INSERT INTO portfolio_comments (user_name, content, is_pinned) VALUES ($1, $2, TRUE) \
             RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(author_name)
        .bind(content)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        comment_from_row(&row)
    }
}

fn comment_from_row(row: &PgRow) -> Result<Comment, StoreError> {
    Ok(Comment {
        id: row.try_get("id").map_err(store_error)?,
        author_name: row.try_get("user_name").map_err(store_error)?,
        content: row.try_get("content").map_err(store_error)?,
        created_at: row.try_get("created_at").map_err(store_error)?,
        profile_image_url: row.try_get("profile_image").map_err(store_error)?,
        is_pinned: row.try_get("is_pinned").map_err(store_error)?,
    })
}

fn reply_from_row(row: &PgRow) -> Result<Reply, StoreError> {
    Ok(Reply {
        id: row.try_get("id").map_err(store_error)?,
        comment_id: row.try_get("comment_id").map_err(store_error)?,
        author_name: row.try_get("user_name").map_err(store_error)?,
        content: row.try_get("content").map_err(store_error)?,
        created_at: row.try_get("created_at").map_err(store_error)?,
    })
}

fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => StoreError::Rejected(db.message().to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::RowNotFound => StoreError::Malformed(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}

#[derive(Deserialize)]
struct TriggerPayload {
    op: ChangeKind,
    id: CommentId,
}

/// Decodes a trigger payload; anything unreadable asks observers to resync.
fn parse_change(payload: &str) -> ChangeEvent {
    match serde_json::from_str::<TriggerPayload>(payload) {
        Ok(TriggerPayload { op, id }) => ChangeEvent { kind: op, comment_id: Some(id) },
        Err(e) => {
            warn!(error = %e, payload, "unreadable comment change payload");
            ChangeEvent::resync()
        }
    }
}

#[async_trait]
impl CommentStore for PgCommentStore {
    async fn fetch_pinned(&self) -> Result<Option<Comment>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS} FROM portfolio_comments WHERE is_pinned \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(comment_from_row).transpose()
    }

    async fn fetch_feed(&self) -> Result<Vec<Comment>, StoreError> {
        sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS} FROM portfolio_comments WHERE NOT is_pinned \
             ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?
        .iter()
        .map(comment_from_row)
        .collect()
    }

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO portfolio_comments (user_name, content, profile_image, is_pinned) \
             VALUES ($1, $2, $3, FALSE) RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(comment.author_name)
        .bind(comment.content)
        .bind(comment.profile_image_url)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        let comment = comment_from_row(&row)?;
        debug!(comment_id = comment.id, "comment row inserted");
        Ok(comment)
    }

    async fn upload_profile_image(&self, upload: ImageUpload) -> Result<String, UploadError> {
        store_profile_image(self.media.as_ref(), upload, self.max_image_bytes).await
    }

    async fn fetch_replies(&self, comment_id: CommentId) -> Result<Vec<Reply>, StoreError> {
        sqlx::query(&format!(
            "SELECT {REPLY_COLUMNS} FROM comment_replies WHERE comment_id = $1 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(comment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?
        .iter()
        .map(reply_from_row)
        .collect()
    }

    async fn insert_reply(&self, reply: NewReply) -> Result<Reply, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO comment_replies (comment_id, user_name, content) VALUES ($1, $2, $3) \
             RETURNING {REPLY_COLUMNS}"
        ))
        .bind(reply.comment_id)
        .bind(reply.author_name)
        .bind(reply.content)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        reply_from_row(&row)
    }

    async fn subscribe(&self, on_change: ChangeHandler) -> Result<Subscription, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(store_error)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(store_error)?;

        let task = tokio::spawn(async move {
            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) => on_change(parse_change(notification.payload())),
                    Ok(None) => {
                        // Connection dropped; the next call reconnects and
                        // anything sent in between is lost.
                        warn!("comment change listener reconnecting");
                        on_change(ChangeEvent::resync());
                    }
                    Err(e) => {
                        warn!(error = %e, "comment change listener failed");
                        tokio::time::sleep(LISTENER_RETRY).await;
                    }
                }
            }
        });

        debug!(channel = CHANGE_CHANNEL, "listening for comment changes");
        Ok(Subscription::new(move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_payloads_decode() {
        assert_eq!(parse_change(r#"{"op":"INSERT","id":12}"#), ChangeEvent::inserted(12));
        assert_eq!(parse_change(r#"{"op":"DELETE","id":3}"#), ChangeEvent::deleted(3));
        assert_eq!(parse_change(r#"{"op":"UPDATE","id":1}"#), ChangeEvent::updated(1));
    }

    #[test]
    fn unreadable_payload_requests_resync() {
        assert_eq!(parse_change("not json"), ChangeEvent::resync());
        assert_eq!(parse_change(r#"{"op":"TRUNCATE","id":1}"#), ChangeEvent::resync());
    }
}
