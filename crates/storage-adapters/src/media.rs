//! # Profile image media
//!
//! Upload preparation shared by every store backend, plus two `MediaStorage`
//! implementations: the local filesystem and process memory.
//!
//! Keys are `{unix_millis}-{random}.{ext}` so a new upload never overwrites
//! the object an earlier comment points at.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{ImageUpload, MediaStorage, StoreError, UploadError};
use image::ImageFormat;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

/// An upload that passed the size and format checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub key: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Checks size and image signature, then assigns a fresh object key.
pub fn prepare_upload(upload: ImageUpload, max_bytes: usize) -> Result<PreparedImage, UploadError> {
    if upload.len() > max_bytes {
        return Err(UploadError::TooLarge { size: upload.len(), max: max_bytes });
    }
    let format = image::guess_format(&upload.data).map_err(|_| UploadError::NotAnImage)?;

    let ext = extension_for(&upload.original_name, format);
    let content_type = content_type_for(&ext, format);
    Ok(PreparedImage {
        key: object_key(&ext, Utc::now()),
        content_type,
        data: upload.data,
    })
}

/// The original file's extension when it is usable, else the sniffed format's.
fn extension_for(original_name: &str, format: ImageFormat) -> String {
    Path::new(original_name)
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| {
            format
                .extensions_str()
                .first()
                .copied()
                .unwrap_or("img")
                .to_string()
        })
}

fn content_type_for(ext: &str, format: ImageFormat) -> String {
    match mime_guess::from_ext(ext).first() {
        Some(guess) if guess.type_() == mime::IMAGE => guess.essence_str().to_string(),
        _ => format.to_mime_type().to_string(),
    }
}

pub fn object_key(ext: &str, now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}.{}", now.timestamp_millis(), &random[..12], ext)
}

/// Prepares, writes and resolves the public URL of a profile image.
pub async fn store_profile_image(
    media: &dyn MediaStorage,
    upload: ImageUpload,
    max_bytes: usize,
) -> Result<String, UploadError> {
    let prepared = prepare_upload(upload, max_bytes)?;
    media
        .put(&prepared.key, prepared.data, &prepared.content_type)
        .await?;
    debug!(key = %prepared.key, content_type = %prepared.content_type, "profile image stored");
    Ok(media.public_url(&prepared.key))
}

/// Writes objects as flat files under `root`, served from `url_prefix`.
pub struct LocalMediaStorage {
    /// Root directory for all uploads (e.g., "./data/profile-images")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/static/profile-images")
    url_prefix: String,
}

impl LocalMediaStorage {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root_path: root.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root_path.join(key)
    }
}

#[async_trait]
impl MediaStorage for LocalMediaStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<(), StoreError> {
        let target = self.path_for(key);
        fs::create_dir_all(&self.root_path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("media root: {e}")))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    StoreError::Rejected(format!("object {key} already exists"))
                }
                _ => StoreError::Unavailable(format!("creating {key}: {e}")),
            })?;

        let write_failed = |e: io::Error| StoreError::Unavailable(format!("writing {key}: {e}"));
        file.write_all(&data).await.map_err(write_failed)?;
        file.flush().await.map_err(write_failed)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix.trim_end_matches('/'), key)
    }
}

/// Keeps objects in process memory. Used by the in-memory store and tests.
#[derive(Default)]
pub struct InMemoryMediaStorage {
    objects: DashMap<String, (Bytes, String)>,
    url_prefix: String,
}

impl InMemoryMediaStorage {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            objects: DashMap::new(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Stored bytes and content type for `key`.
    pub fn get(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl MediaStorage for InMemoryMediaStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        match self.objects.entry(key.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Rejected(format!("object {key} already exists"))),
            Entry::Vacant(slot) => {
                slot.insert((data, content_type.to_string()));
                Ok(())
            }
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix.trim_end_matches('/'), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smallest valid PNG signature plus IHDR prefix.
    const PNG: &[u8] = &[
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R',
    ];

    #[test]
    fn rejects_oversized_uploads_before_sniffing() {
        let upload = ImageUpload::new(vec![0u8; 11], "big.png");
        assert_eq!(
            prepare_upload(upload, 10),
            Err(UploadError::TooLarge { size: 11, max: 10 })
        );
    }

    #[test]
    fn rejects_non_images() {
        let upload = ImageUpload::new(b"hello world, not an image".to_vec(), "notes.png");
        assert_eq!(prepare_upload(upload, 1024), Err(UploadError::NotAnImage));
    }

    #[test]
    fn keeps_original_extension_lowercased() {
        let prepared = prepare_upload(ImageUpload::new(PNG.to_vec(), "Me.PNG"), 1024).unwrap();
        assert!(prepared.key.ends_with(".png"));
        assert_eq!(prepared.content_type, "image/png");
    }

    #[test]
    fn falls_back_to_sniffed_extension() {
        let prepared = prepare_upload(ImageUpload::new(PNG.to_vec(), "avatar"), 1024).unwrap();
        assert!(prepared.key.ends_with(".png"));
    }

    #[test]
    fn keys_do_not_collide() {
        let now = Utc::now();
        let a = object_key("png", now);
        let b = object_key("png", now);
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("{}-", now.timestamp_millis())));
    }

    #[tokio::test]
    async fn local_storage_writes_and_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalMediaStorage::new(dir.path().join("avatars"), "/static/avatars/");

        let url = store_profile_image(&storage, ImageUpload::new(PNG.to_vec(), "me.png"), 1024)
            .await
            .unwrap();

        let key = url.strip_prefix("/static/avatars/").unwrap();
        let written = std::fs::read(storage.path_for(key)).unwrap();
        assert_eq!(written, PNG);
    }

    #[tokio::test]
    async fn local_storage_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalMediaStorage::new(dir.path(), "/static/avatars");

        storage.put("k.png", Bytes::from_static(PNG), "image/png").await.unwrap();
        let again = storage.put("k.png", Bytes::from_static(b"x"), "image/png").await;
        assert!(matches!(again, Err(StoreError::Rejected(_))), "{again:?}");
        assert_eq!(std::fs::read(storage.path_for("k.png")).unwrap(), PNG);
    }

    #[tokio::test]
    async fn storage_refuses_to_overwrite() {
        let storage = InMemoryMediaStorage::new("mem://");
        storage.put("k.png", Bytes::from_static(PNG), "image/png").await.unwrap();
        let again = storage.put("k.png", Bytes::from_static(b"x"), "image/png").await;
        assert!(matches!(again, Err(StoreError::Rejected(_))));
        assert_eq!(storage.get("k.png").unwrap().0, Bytes::from_static(PNG));
    }
}
