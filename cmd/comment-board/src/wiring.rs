//! Builds the configured `CommentStore`.

use std::sync::Arc;

use anyhow::Context;
use configs::{Settings, StoreBackend};
use domains::{CommentStore, MediaStorage};
use storage_adapters::{seed_demo, InMemoryCommentStore, LocalMediaStorage};
use tracing::info;

pub async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn CommentStore>> {
    let media: Arc<dyn MediaStorage> = Arc::new(LocalMediaStorage::new(
        settings.media.root.clone(),
        settings.media.public_url_prefix.clone(),
    ));
    let max_image_bytes = settings.board.max_image_bytes;

    let store: Arc<dyn CommentStore> = match settings.store.backend {
        StoreBackend::Memory => {
            // Nothing persists between runs, so start from the demo board.
            let store = InMemoryCommentStore::new(media).with_max_image_bytes(max_image_bytes);
            seed_demo(&store).await?;
            Arc::new(store)
        }

        #[cfg(feature = "db-postgres")]
        StoreBackend::Postgres => {
            use secrecy::ExposeSecret;
            use storage_adapters::PgCommentStore;

            let db = settings
                .database
                .as_ref()
                .context("store.backend = postgres needs a [database] section")?;
            let store = PgCommentStore::connect(db.url.expose_secret(), db.max_connections, media)
                .await
                .context("connecting to postgres")?
                .with_max_image_bytes(max_image_bytes);
            store.migrate().await?;
            Arc::new(store)
        }

        #[cfg(feature = "hosted-rest")]
        StoreBackend::Hosted => {
            use storage_adapters::{RestCommentStore, RestConfig};

            let hosted = settings
                .hosted
                .as_ref()
                .context("store.backend = hosted needs a [hosted] section")?;
            let mut config = RestConfig::new(hosted.base_url.clone(), hosted.api_key.clone());
            config.comments_table = hosted.comments_table.clone();
            config.replies_table = hosted.replies_table.clone();
            config.bucket = hosted.bucket.clone();
            config.heartbeat_interval = hosted.heartbeat_interval();
            config.max_image_bytes = max_image_bytes;
            Arc::new(RestCommentStore::new(config)?)
        }

        #[allow(unreachable_patterns)]
        other => anyhow::bail!("store backend {other:?} is not compiled into this binary"),
    };

    info!(backend = ?settings.store.backend, "comment store ready");
    Ok(store)
}
