//! # services
//!
//! Controllers that sit between the presentation layer and a `CommentStore`:
//! the comment board (pinned comment, feed, submit) and the reply thread.

pub mod board;
pub mod datefmt;
mod guard;
pub mod replies;

pub use board::{BoardOptions, BoardSnapshot, CommentBoard, SubmitOutcome};
pub use datefmt::{format_date, format_relative};
pub use replies::{ReplyThread, ThreadSnapshot};
