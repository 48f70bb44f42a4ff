//! Input rules shared by comments and replies.

use crate::errors::{Field, ValidationError};
use crate::models::{CommentDraft, CommentId, NewReply, ReplyDraft};

/// Display names are short labels.
pub const MAX_AUTHOR_NAME_CHARS: usize = 15;

/// Message bodies; replies use the same bound as comments.
pub const MAX_CONTENT_CHARS: usize = 200;

/// Largest accepted profile image.
pub const MAX_PROFILE_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Trimmed, bounded author name and content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidEntry {
    pub author_name: String,
    pub content: String,
}

fn check(field: Field, raw: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(trimmed.to_string())
}

/// Validates the name then the content, returning the trimmed values.
pub fn validate_entry(author_name: &str, content: &str) -> Result<ValidEntry, ValidationError> {
    Ok(ValidEntry {
        author_name: check(Field::AuthorName, author_name, MAX_AUTHOR_NAME_CHARS)?,
        content: check(Field::Content, content, MAX_CONTENT_CHARS)?,
    })
}

impl CommentDraft {
    pub fn validate(&self) -> Result<ValidEntry, ValidationError> {
        validate_entry(&self.author_name, &self.content)
    }
}

impl ReplyDraft {
    pub fn validate_for(&self, comment_id: CommentId) -> Result<NewReply, ValidationError> {
        let entry = validate_entry(&self.author_name, &self.content)?;
        Ok(NewReply {
            comment_id,
            author_name: entry.author_name,
            content: entry.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        let entry = validate_entry("  Sam ", "\tNice site!\n").unwrap();
        assert_eq!(entry.author_name, "Sam");
        assert_eq!(entry.content, "Nice site!");
    }

    #[test]
    fn rejects_blank_fields() {
        assert_eq!(
            validate_entry("", "hello"),
            Err(ValidationError::Empty { field: Field::AuthorName })
        );
        assert_eq!(
            validate_entry("Alice", "   "),
            Err(ValidationError::Empty { field: Field::Content })
        );
    }

    #[test]
    fn bounds_count_characters_not_bytes() {
        // 15 multi-byte characters is still a valid name
        let name = "é".repeat(MAX_AUTHOR_NAME_CHARS);
        assert!(validate_entry(&name, "hi").is_ok());

        let long = "x".repeat(MAX_AUTHOR_NAME_CHARS + 1);
        assert_eq!(
            validate_entry(&long, "hi"),
            Err(ValidationError::TooLong { field: Field::AuthorName, max: MAX_AUTHOR_NAME_CHARS })
        );
    }

    #[test]
    fn reply_content_shares_the_comment_bound() {
        let body = "y".repeat(MAX_CONTENT_CHARS + 1);
        let err = ReplyDraft::new("Bo", body).validate_for(7).unwrap_err();
        assert_eq!(err, ValidationError::TooLong { field: Field::Content, max: MAX_CONTENT_CHARS });

        let ok = ReplyDraft::new("Bo", " thanks ").validate_for(7).unwrap();
        assert_eq!(ok.comment_id, 7);
        assert_eq!(ok.content, "thanks");
    }
}
