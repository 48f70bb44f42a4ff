//! The welcome board every fresh installation starts from.

use domains::{CommentStore, NewComment, StoreError};

use crate::memory::InMemoryCommentStore;

/// Author and text of the pinned welcome comment.
pub const DEMO_PINNED: (&str, &str) = ("Jan Nino", "Welcome! Feel free to leave a comment 😊");

/// Sample visitor comments, oldest first.
pub const DEMO_COMMENTS: [(&str, &str); 2] = [
    ("John Doe", "This portfolio looks awesome!"),
    ("Sarah", "Really cool animation work!"),
];

pub async fn seed_demo(store: &InMemoryCommentStore) -> Result<(), StoreError> {
    store.seed_pinned(DEMO_PINNED.0, DEMO_PINNED.1).await;
    for (author_name, content) in DEMO_COMMENTS {
        store
            .insert_comment(NewComment {
                author_name: author_name.to_string(),
                content: content.to_string(),
                profile_image_url: None,
            })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_board_has_a_pin_and_two_comments() {
        let store = InMemoryCommentStore::default();
        seed_demo(&store).await.unwrap();

        let pinned = store.fetch_pinned().await.unwrap().unwrap();
        assert_eq!(pinned.author_name, "Jan Nino");
        let feed = store.fetch_feed().await.unwrap();
        assert_eq!(feed.len(), 2);
        assert!(feed.iter().all(|c| !c.is_pinned));
    }
}
