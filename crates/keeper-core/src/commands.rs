use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument};

use crate::advisory::AdvisoryLog;
use crate::board::TodoBoard;
use crate::cli::{Command, IndexAction, ListArgs};
use crate::config::Config;
use crate::datetime::parse_date_expr;
use crate::reconcile::ViewParams;
use crate::render::Renderer;
use crate::repository::TodoRepository;
use crate::store::DocumentStore;
use crate::todo::{NewTodo, TodoId};

/// Runs one command against `store`, writing results to stdout and
/// advisories to stderr.
pub async fn dispatch<S: DocumentStore>(
    store: S,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let mut out = Vec::new();
    let mut notices = Vec::new();
    let result = dispatch_to(store, cfg, renderer, command, Utc::now(), &mut out, &mut notices).await;

    io::stdout().lock().write_all(&out)?;
    io::stderr().lock().write_all(&notices)?;
    result
}

#[instrument(skip(store, cfg, renderer, now, out, notices))]
pub async fn dispatch_to<S, W, E>(
    store: S,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
    now: DateTime<Utc>,
    out: &mut W,
    notices: &mut E,
) -> anyhow::Result<()>
where
    S: DocumentStore,
    W: Write,
    E: Write,
{
    let tz = cfg.timezone()?;
    let advisories = AdvisoryLog::new();
    let repo = TodoRepository::new(store)
        .with_collection(cfg.collection())
        .with_advisories(Arc::new(advisories.clone()));
    let mut board = TodoBoard::new(repo, cfg.owner()?).with_params(cfg.view_params()?);
    debug!(owner = %board.owner(), params = ?board.params(), "dispatching command");

    let result = run_command(&mut board, renderer, command, now, tz, out).await;

    let mut raised = advisories.drain();
    raised.dedup();
    for advisory in &raised {
        renderer.write_advisory(&mut *notices, advisory)?;
    }

    result
}

async fn run_command<S: DocumentStore, W: Write>(
    board: &mut TodoBoard<S>,
    renderer: &Renderer,
    command: Command,
    now: DateTime<Utc>,
    tz: Tz,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        Command::Add {
            text,
            priority,
            due,
        } => {
            let due = due
                .map(|expr| parse_date_expr(&expr, now, tz))
                .transpose()?;
            let new = NewTodo::new(text.join(" "))
                .with_priority(priority)
                .with_due_date(due);
            match board.add_todo(new).await? {
                Some(todo) => {
                    info!(id = %todo.id, "todo added");
                    writeln!(out, "Created todo {}.", short(&todo.id))?;
                }
                None => writeln!(out, "Nothing added: text is empty.")?,
            }
        }
        Command::List(args) => {
            board.refresh().await?;
            let params = merge_view(board.params(), &args);
            board.set_view(params);
            renderer.write_view(&mut *out, board.view(), now)?;
        }
        Command::Done { id } => {
            let id = resolve(board, &id).await?;
            board.set_completed(&id, true).await?;
            writeln!(out, "Completed todo {}.", short(&id))?;
        }
        Command::Reopen { id } => {
            let id = resolve(board, &id).await?;
            board.set_completed(&id, false).await?;
            writeln!(out, "Reopened todo {}.", short(&id))?;
        }
        Command::Edit { id, text } => {
            let id = resolve(board, &id).await?;
            if board.set_text(&id, &text.join(" ")).await? {
                writeln!(out, "Updated todo {}.", short(&id))?;
            } else {
                writeln!(out, "Nothing changed: text is empty.")?;
            }
        }
        Command::Priority { id, priority } => {
            let id = resolve(board, &id).await?;
            board.set_priority(&id, priority).await?;
            writeln!(out, "Set priority of {} to {priority}.", short(&id))?;
        }
        Command::Due { id, when } => {
            let id = resolve(board, &id).await?;
            let due = parse_due_arg(&when, now, tz)?;
            board.set_due_date(&id, due).await?;
            match due {
                Some(_) => writeln!(out, "Set due date of {}.", short(&id))?,
                None => writeln!(out, "Cleared due date of {}.", short(&id))?,
            }
        }
        Command::Delete { id } => {
            let id = resolve(board, &id).await?;
            board.remove_todo(&id).await?;
            writeln!(out, "Deleted todo {}.", short(&id))?;
        }
        Command::Info { id } => {
            let id = resolve(board, &id).await?;
            let todo = board
                .find(&id)
                .ok_or_else(|| anyhow!("todo {id} disappeared"))?;
            renderer.write_todo(&mut *out, todo)?;
        }
        Command::Stats => {
            let view = board.refresh().await?;
            renderer.write_stats(&mut *out, &view.stats)?;
        }
        Command::Index { action } => run_index(board, action, out).await?,
    }

    Ok(())
}

async fn run_index<S: DocumentStore, W: Write>(
    board: &TodoBoard<S>,
    action: IndexAction,
    out: &mut W,
) -> anyhow::Result<()> {
    let repo = board.repository();
    let required = repo.required_index();

    match action {
        IndexAction::Create => {
            if repo.provision_index().await? {
                writeln!(out, "Provisioned index {required}.")?;
            } else {
                writeln!(out, "Index {required} already exists.")?;
            }
        }
        IndexAction::List => {
            let indexes = repo
                .store()
                .indexes(repo.collection())
                .await
                .context("failed to list indexes")?;
            if indexes.is_empty() {
                writeln!(out, "No indexes provisioned for {}.", repo.collection())?;
            }
            for index in &indexes {
                let marker = if *index == required { " (used by list)" } else { "" };
                writeln!(out, "{index}{marker}")?;
            }
            if !indexes.contains(&required) {
                writeln!(out, "Missing: {required}")?;
            }
        }
    }

    Ok(())
}

async fn resolve<S: DocumentStore>(board: &mut TodoBoard<S>, raw: &str) -> anyhow::Result<TodoId> {
    board.refresh().await?;
    board.resolve_id(raw)
}

fn merge_view(base: ViewParams, args: &ListArgs) -> ViewParams {
    ViewParams {
        status: args.status.unwrap_or(base.status),
        priority: args.priority.unwrap_or(base.priority),
        sort: args.sort.unwrap_or(base.sort),
    }
}

fn parse_due_arg(raw: &str, now: DateTime<Utc>, tz: Tz) -> anyhow::Result<Option<DateTime<Utc>>> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "none" | "clear" | "-" => Ok(None),
        _ => parse_date_expr(raw, now, tz).map(Some),
    }
}

fn short(id: &TodoId) -> &str {
    let id = id.as_str();
    id.get(..8).unwrap_or(id)
}
