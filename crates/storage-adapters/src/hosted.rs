//! # Hosted REST comment store
//!
//! Talks to a PostgREST-style hosted backend: table rows under `/rest/v1`,
//! binary objects under `/storage/v1/object`. `subscribe` joins the
//! backend's realtime socket and forwards the `postgres_changes` frames it
//! pushes for the comments table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::validation::MAX_PROFILE_IMAGE_BYTES;
use domains::{
    ChangeHandler, Comment, CommentId, CommentStore, ImageUpload, NewComment, NewReply, Reply,
    StoreError, Subscription, UploadError,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::media::prepare_upload;
use crate::realtime::RealtimeChannel;

#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project URL without a trailing slash (e.g., "https://abc.supabase.co")
    pub base_url: String,
    pub api_key: SecretString,
    pub comments_table: String,
    pub replies_table: String,
    /// Public bucket for profile images
    pub bucket: String,
    /// Phoenix channel heartbeat period on the realtime socket
    pub heartbeat_interval: Duration,
    /// Pause before rejoining a dropped realtime socket
    pub reconnect_delay: Duration,
    pub max_image_bytes: usize,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            comments_table: "portfolio_comments".to_string(),
            replies_table: "comment_replies".to_string(),
            bucket: "profile-images".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            max_image_bytes: MAX_PROFILE_IMAGE_BYTES,
        }
    }
}

#[derive(Clone)]
pub struct RestCommentStore {
    http: reqwest::Client,
    config: Arc<RestConfig>,
}

#[derive(Debug, Deserialize)]
struct CommentRow {
    id: CommentId,
    user_name: String,
    content: String,
    created_at: DateTime<Utc>,
    profile_image: Option<String>,
    #[serde(default)]
    is_pinned: bool,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: row.id,
            author_name: row.user_name,
            content: row.content,
            created_at: row.created_at,
            profile_image_url: row.profile_image,
            is_pinned: row.is_pinned,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReplyRow {
    id: i64,
    comment_id: CommentId,
    user_name: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<ReplyRow> for Reply {
    fn from(row: ReplyRow) -> Self {
        Reply {
            id: row.id,
            comment_id: row.comment_id,
            author_name: row.user_name,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

#[derive(Serialize)]
struct CommentInsert<'a> {
    user_name: &'a str,
    content: &'a str,
    profile_image: Option<&'a str>,
    is_pinned: bool,
}

#[derive(Serialize)]
struct ReplyInsert<'a> {
    comment_id: CommentId,
    user_name: &'a str,
    content: &'a str,
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_decode() {
        StoreError::Malformed(err.to_string())
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

/// Passes successful responses through and classifies the rest.
async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(StoreError::Unavailable(message))
    } else {
        Err(StoreError::Rejected(message))
    }
}

impl RestCommentStore {
    pub fn new(config: RestConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let key = self.config.api_key.expose_secret();
        request.header("apikey", key).bearer_auth(key)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let response = self
            .authorized(self.http.get(self.rest_url(table)).query(query))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }

    async fn insert<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let response = self
            .authorized(self.http.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(&[body])
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Malformed("insert returned no row".to_string()))
    }

}

#[async_trait]
impl CommentStore for RestCommentStore {
    async fn fetch_pinned(&self) -> Result<Option<Comment>, StoreError> {
        let rows: Vec<CommentRow> = self
            .select(
                &self.config.comments_table,
                &[
                    ("select", "*".to_string()),
                    ("is_pinned", "eq.true".to_string()),
                    ("order", "created_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().map(Comment::from))
    }

    async fn fetch_feed(&self) -> Result<Vec<Comment>, StoreError> {
        let rows: Vec<CommentRow> = self
            .select(
                &self.config.comments_table,
                &[
                    ("select", "*".to_string()),
                    ("is_pinned", "eq.false".to_string()),
                    ("order", "created_at.desc,id.desc".to_string()),
                ],
            )
            .await?;

        if rows.iter().any(|row| row.is_pinned) {
            return Err(StoreError::Malformed("feed contains a pinned comment".to_string()));
        }
        let mut feed: Vec<Comment> = rows.into_iter().map(Comment::from).collect();
        feed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(feed)
    }

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let row: CommentRow = self
            .insert(
                &self.config.comments_table,
                &CommentInsert {
                    user_name: &comment.author_name,
                    content: &comment.content,
                    profile_image: comment.profile_image_url.as_deref(),
                    is_pinned: false,
                },
            )
            .await?;
        debug!(comment_id = row.id, "comment row inserted");
        Ok(row.into())
    }

    async fn upload_profile_image(&self, upload: ImageUpload) -> Result<String, UploadError> {
        let prepared = prepare_upload(upload, self.config.max_image_bytes)?;
        let object = format!("{}/{}", self.config.bucket, prepared.key);

        let response = self
            .authorized(
                self.http
                    .post(format!("{}/storage/v1/object/{}", self.config.base_url, object)),
            )
            .header(CONTENT_TYPE, prepared.content_type.as_str())
            .header("x-upsert", "false")
            .body(prepared.data)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;

        debug!(key = %prepared.key, "profile image uploaded");
        Ok(format!(
            "{}/storage/v1/object/public/{}",
            self.config.base_url, object
        ))
    }

    async fn fetch_replies(&self, comment_id: CommentId) -> Result<Vec<Reply>, StoreError> {
        let rows: Vec<ReplyRow> = self
            .select(
                &self.config.replies_table,
                &[
                    ("select", "*".to_string()),
                    ("comment_id", format!("eq.{comment_id}")),
                    ("order", "created_at.asc,id.asc".to_string()),
                ],
            )
            .await?;

        if let Some(stray) = rows.iter().find(|row| row.comment_id != comment_id) {
            return Err(StoreError::Malformed(format!(
                "reply {} belongs to comment {}, not {comment_id}",
                stray.id, stray.comment_id
            )));
        }
        let mut replies: Vec<Reply> = rows.into_iter().map(Reply::from).collect();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(replies)
    }

    async fn insert_reply(&self, reply: NewReply) -> Result<Reply, StoreError> {
        let row: ReplyRow = self
            .insert(
                &self.config.replies_table,
                &ReplyInsert {
                    comment_id: reply.comment_id,
                    user_name: &reply.author_name,
                    content: &reply.content,
                },
            )
            .await?;
        Ok(row.into())
    }

    async fn subscribe(&self, on_change: ChangeHandler) -> Result<Subscription, StoreError> {
        let config = &self.config;
        let channel = RealtimeChannel::new(
            &config.base_url,
            config.api_key.expose_secret(),
            &config.comments_table,
            config.heartbeat_interval,
            config.reconnect_delay,
        );
        let socket = channel.join().await?;
        let task = tokio::spawn(channel.run(socket, on_change));

        debug!(table = %config.comments_table, "listening for comment changes");
        Ok(Subscription::new(move || task.abort()))
    }
}
