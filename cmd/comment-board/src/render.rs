//! Plain-text rendering of board and thread snapshots.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use domains::{Comment, Reply};
use services::{format_relative, BoardSnapshot, ThreadSnapshot};

pub const EMPTY_FEED: &str = "No comments yet. Start the conversation!";

pub fn board(snapshot: &BoardSnapshot, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Comments ({})", snapshot.total());

    if let Some(error) = &snapshot.last_error {
        let _ = writeln!(out, "! {error}");
    }
    if snapshot.is_loading {
        let _ = writeln!(out, "Loading comments...");
    }
    if snapshot.is_submitting {
        let _ = writeln!(out, "Posting...");
    }

    if let Some(pinned) = &snapshot.pinned {
        comment(&mut out, pinned, now);
    }
    if snapshot.feed.is_empty() && !snapshot.is_loading {
        let _ = writeln!(out, "{EMPTY_FEED}");
    }
    for entry in &snapshot.feed {
        comment(&mut out, entry, now);
    }
    out
}

pub fn thread(snapshot: &ThreadSnapshot, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let Some(parent) = &snapshot.comment else {
        return out;
    };

    comment(&mut out, parent, now);
    let _ = writeln!(out, "Replies ({})", snapshot.replies.len());
    if let Some(error) = &snapshot.last_error {
        let _ = writeln!(out, "! {error}");
    }
    if snapshot.is_loading {
        let _ = writeln!(out, "Loading replies...");
    }
    for entry in &snapshot.replies {
        reply(&mut out, entry, now);
    }
    out
}

fn comment(out: &mut String, comment: &Comment, now: DateTime<Utc>) {
    let label = if comment.is_pinned { " [pinned]" } else { "" };
    let _ = writeln!(
        out,
        "#{} {}{} · {}",
        comment.id,
        comment.author_name,
        label,
        format_relative(comment.created_at, now)
    );
    if let Some(url) = &comment.profile_image_url {
        let _ = writeln!(out, "    avatar: {url}");
    }
    let _ = writeln!(out, "    {}", comment.content);
}

fn reply(out: &mut String, reply: &Reply, now: DateTime<Utc>) {
    let _ = writeln!(
        out,
        "  ↳ {} · {}",
        reply.author_name,
        format_relative(reply.created_at, now)
    );
    let _ = writeln!(out, "      {}", reply.content);
}
