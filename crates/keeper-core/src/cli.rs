use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::reconcile::{PriorityFilter, SortOrder, StatusFilter};
use crate::todo::Priority;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "keeper",
    version,
    about = "Keeper: personal todo list over a document store"
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "keeperrc", global = true)]
    pub keeperrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Owner whose todos are read and written; defaults to the `owner` setting.
    #[arg(long = "owner", global = true)]
    pub owner: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a todo.
    Add {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        #[arg(short = 'p', long = "priority", default_value = "medium")]
        priority: Priority,
        /// Due date expression: today, tomorrow, +3d, 2024-01-05, ...
        #[arg(short = 'd', long = "due")]
        due: Option<String>,
    },
    /// List todos through the current filters and sort order.
    List(ListArgs),
    /// Mark a todo completed.
    Done { id: String },
    /// Mark a todo active again.
    Reopen { id: String },
    /// Replace a todo's text.
    Edit {
        id: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Change a todo's priority.
    Priority { id: String, priority: Priority },
    /// Set or clear (`none`) a todo's due date.
    Due { id: String, when: String },
    /// Delete a todo.
    Delete { id: String },
    /// Show one todo in detail.
    Info { id: String },
    /// Completion and priority statistics.
    Stats,
    /// Inspect or provision the composite index used by `list`.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(short = 's', long = "status")]
    pub status: Option<StatusFilter>,
    #[arg(short = 'p', long = "priority")]
    pub priority: Option<PriorityFilter>,
    #[arg(short = 'o', long = "sort")]
    pub sort: Option<SortOrder>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum IndexAction {
    /// Provision the index; a no-op when it already exists.
    Create,
    /// Show provisioned indexes for the todo collection.
    List,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Subcommands whose trailing arguments are todo text, never overrides.
const FREE_TEXT_COMMANDS: &[&str] = &["add", "edit"];

/// Splits positional `rc.KEY=VALUE` / `rc.KEY:VALUE` overrides out of argv.
///
/// Scanning stops at `--` and at the start of a free-text subcommand.
#[tracing::instrument(skip_all)]
pub fn split_rc_overrides(raw: &[OsString]) -> (Vec<OsString>, Vec<(String, String)>) {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides = Vec::new();
    let mut scanning = true;

    for (idx, arg) in raw.iter().enumerate() {
        let text = arg.to_string_lossy();
        if idx == 0 || !scanning {
            cleaned.push(arg.clone());
            continue;
        }
        if text == "--" || FREE_TEXT_COMMANDS.iter().any(|cmd| *cmd == text) {
            scanning = false;
            cleaned.push(arg.clone());
            continue;
        }

        let parsed = text
            .strip_prefix("rc.")
            .and_then(|rest| rest.split_once('=').or_else(|| rest.split_once(':')));

        match parsed {
            Some((k, v)) => {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k.to_string(), v.to_string()));
            }
            None => cleaned.push(arg.clone()),
        }
    }

    (cleaned, overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> GlobalCli {
        GlobalCli::try_parse_from(args).expect("parse")
    }

    #[test]
    fn parses_add_with_priority_and_due() {
        let cli = parse(&["keeper", "add", "file", "taxes", "-p", "high", "--due", "tomorrow"]);
        match cli.command {
            Some(Command::Add { text, priority, due }) => {
                assert_eq!(text, vec!["file", "taxes"]);
                assert_eq!(priority, Priority::High);
                assert_eq!(due.as_deref(), Some("tomorrow"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_list_view_flags() {
        let cli = parse(&["keeper", "-vv", "list", "--status", "active", "--sort", "dueDate"]);
        assert_eq!(cli.verbose, 2);
        let Some(Command::List(args)) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.status, Some(StatusFilter::Active));
        assert_eq!(args.sort, Some(SortOrder::DueDate));
        assert_eq!(args.priority, None);
    }

    #[test]
    fn rejects_unknown_sort_order() {
        assert!(GlobalCli::try_parse_from(["keeper", "list", "--sort", "random"]).is_err());
    }

    fn os_args(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn todo_text_is_never_taken_as_an_override() {
        let raw = os_args(&["keeper", "rc.owner=bob", "add", "fix", "rc.d:scripts"]);
        let (cleaned, overrides) = split_rc_overrides(&raw);
        assert_eq!(cleaned, os_args(&["keeper", "add", "fix", "rc.d:scripts"]));
        assert_eq!(overrides, vec![("owner".to_string(), "bob".to_string())]);

        let raw = os_args(&["keeper", "edit", "abc", "rc.x=y"]);
        assert_eq!(split_rc_overrides(&raw), (raw.clone(), vec![]));

        let raw = os_args(&["keeper", "list", "--", "rc.color=off"]);
        assert_eq!(split_rc_overrides(&raw), (raw.clone(), vec![]));

        let (cleaned, _) = split_rc_overrides(&os_args(&["keeper", "add", "fix", "rc.d:scripts"]));
        let cli = GlobalCli::try_parse_from(cleaned).expect("parse");
        let Some(Command::Add { text, .. }) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(text, vec!["fix", "rc.d:scripts"]);
    }

    #[test]
    fn splits_positional_rc_overrides() {
        let raw: Vec<OsString> = ["keeper", "rc.owner=bob", "list", "rc.color:off"]
            .into_iter()
            .map(OsString::from)
            .collect();
        let (cleaned, overrides) = split_rc_overrides(&raw);
        assert_eq!(cleaned, vec![OsString::from("keeper"), OsString::from("list")]);
        assert_eq!(
            overrides,
            vec![
                ("owner".to_string(), "bob".to_string()),
                ("color".to_string(), "off".to_string())
            ]
        );
    }
}
