//! # comment-board
//!
//! Terminal front end for the portfolio comment board. Each subcommand
//! mounts a `CommentBoard` (and a `ReplyThread` where needed), renders its
//! state and tears it down on exit.

mod render;
mod wiring;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use configs::{LogSettings, Settings};
use domains::{CommentDraft, CommentId, CommentStore, ImageUpload, ReplyDraft};
use services::{BoardOptions, CommentBoard, ReplyThread, SubmitOutcome};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// How long `post` waits for the change notification to bring the new comment in.
const ECHO_WAIT: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "comment-board", version, about = "Portfolio comment board")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the pinned comment and the feed
    Show,
    /// Print the board and re-print it on every change until Ctrl-C
    Watch,
    /// Post a comment
    Post {
        #[arg(long)]
        name: String,
        #[arg(long)]
        message: String,
        /// Profile image to upload with the comment
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Print the replies of a comment
    Replies { comment_id: CommentId },
    /// Reply to a comment
    Reply {
        comment_id: CommentId,
        #[arg(long)]
        name: String,
        #[arg(long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    init_tracing(&settings.log);

    let store = wiring::build_store(&settings).await?;
    let options = BoardOptions {
        request_timeout: settings.board.request_timeout(),
    };

    let board = CommentBoard::new(Arc::clone(&store), options);
    if let Err(e) = board.initialize().await {
        warn!(error = %e, "board loaded with errors");
    }

    let result = match cli.command {
        Command::Show => {
            print!("{}", render::board(&board.snapshot(), Utc::now()));
            Ok(())
        }
        Command::Watch => watch(&board).await,
        Command::Post { name, message, image } => post(&board, name, message, image.as_deref()).await,
        Command::Replies { comment_id } => replies(&board, store, options, comment_id, None).await,
        Command::Reply { comment_id, name, message } => {
            let draft = ReplyDraft::new(name, message);
            replies(&board, store, options, comment_id, Some(draft)).await
        }
    };

    board.teardown();
    result
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn watch(board: &CommentBoard) -> anyhow::Result<()> {
    let mut updates = board.watch();
    print!("{}", render::board(&updates.borrow_and_update(), Utc::now()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                println!();
                print!("{}", render::board(&updates.borrow_and_update(), Utc::now()));
            }
        }
    }
}

async fn post(
    board: &CommentBoard,
    name: String,
    message: String,
    image: Option<&Path>,
) -> anyhow::Result<()> {
    let mut draft = CommentDraft::new(name, message);
    if let Some(path) = image {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        draft = draft.with_image(ImageUpload::new(data, file_name));
    }

    match board.submit(&draft).await? {
        SubmitOutcome::Posted(comment) => {
            println!("Posted comment #{}", comment.id);
            let mut updates = board.watch();
            let echoed = tokio::time::timeout(
                ECHO_WAIT,
                updates.wait_for(|s| s.find(comment.id).is_some()),
            )
            .await
            .is_ok_and(|seen| seen.is_ok());
            if !echoed {
                // The store may still deliver it; refetch once instead of waiting longer.
                board.refresh().await?;
            }
            print!("{}", render::board(&board.snapshot(), Utc::now()));
        }
        SubmitOutcome::Ignored => println!("Another comment is still being posted"),
        SubmitOutcome::Abandoned => println!("Board closed before the comment was confirmed"),
    }
    Ok(())
}

async fn replies(
    board: &CommentBoard,
    store: Arc<dyn CommentStore>,
    options: BoardOptions,
    comment_id: CommentId,
    draft: Option<ReplyDraft>,
) -> anyhow::Result<()> {
    let comment = board
        .snapshot()
        .find(comment_id)
        .cloned()
        .with_context(|| format!("no comment with id {comment_id}"))?;

    let thread = ReplyThread::new(store, options);
    if let Err(e) = thread.open(&comment).await {
        warn!(error = %e, comment_id, "replies could not be loaded");
    }

    let outcome = match &draft {
        Some(draft) => Some(thread.submit_reply(draft).await),
        None => None,
    };
    print!("{}", render::thread(&thread.snapshot(), Utc::now()));
    thread.close();

    match outcome {
        Some(Err(e)) => Err(e.into()),
        Some(Ok(SubmitOutcome::Ignored)) => {
            println!("Another reply is still being posted");
            Ok(())
        }
        _ => Ok(()),
    }
}
