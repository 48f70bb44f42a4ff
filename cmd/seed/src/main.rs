//! Creates the comment schema and the welcome board in Postgres.
//!
//! Reads `[database]` from the usual settings sources. Refuses to seed a
//! board that already has comments.

use std::sync::Arc;

use anyhow::Context;
use configs::Settings;
use domains::{CommentStore, MediaStorage, NewComment};
use secrecy::ExposeSecret;
use storage_adapters::{LocalMediaStorage, PgCommentStore, DEMO_COMMENTS, DEMO_PINNED};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.filter)),
        )
        .init();

    let db = settings
        .database
        .as_ref()
        .context("seeding needs a [database] section (BOARD__DATABASE__URL)")?;
    let media: Arc<dyn MediaStorage> = Arc::new(LocalMediaStorage::new(
        settings.media.root.clone(),
        settings.media.public_url_prefix.clone(),
    ));
    let store = PgCommentStore::connect(db.url.expose_secret(), db.max_connections, media)
        .await
        .context("connecting to postgres")?;
    store.migrate().await?;

    if store.fetch_pinned().await?.is_some() || !store.fetch_feed().await?.is_empty() {
        info!("board already has comments, nothing to seed");
        return Ok(());
    }

    let pinned = store.insert_pinned(DEMO_PINNED.0, DEMO_PINNED.1).await?;
    info!(comment_id = pinned.id, "pinned welcome comment");

    for (author_name, content) in DEMO_COMMENTS {
        let comment = store
            .insert_comment(NewComment {
                author_name: author_name.to_string(),
                content: content.to_string(),
                profile_image_url: None,
            })
            .await?;
        info!(comment_id = comment.id, author = author_name, "sample comment");
    }

    Ok(())
}
