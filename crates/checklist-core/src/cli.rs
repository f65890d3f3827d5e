use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

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
    name = "checklist",
    version,
    about = "Daily checklist tracker",
    disable_help_subcommand = true
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

    #[arg(long = "checklistrc", global = true)]
    pub checklistrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub action: Option<Action>,
}

/// Commands available both on the command line and inside `shell`.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print the checklist for a date, creating it from the task list if new.
    Show {
        /// YYYY-MM-DD, today, yesterday, tomorrow, +Nd or -Nd.
        #[arg(allow_hyphen_values = true)]
        date: Option<String>,
    },
    /// Print the checklist title, or set it.
    Title { text: Vec<String> },
    /// Add a task and seed it into every day of the creation range.
    Add {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
        /// First day to seed; defaults to the start of the creation range.
        #[arg(long, allow_hyphen_values = true)]
        from: Option<String>,
        /// Last day to seed; defaults to the end of the creation range.
        #[arg(long, allow_hyphen_values = true)]
        to: Option<String>,
    },
    /// Toggle a task's done flag for a date.
    Done {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
        #[arg(long, allow_hyphen_values = true)]
        date: Option<String>,
    },
    /// Delete tasks from the task list and from every day.
    Delete { names: Vec<String> },
    /// List the task catalog.
    Tasks,
    /// Completion totals per task over a date range.
    Stats {
        #[arg(long, allow_hyphen_values = true)]
        from: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        to: Option<String>,
    },
    /// Wipe the title, the task list and every day's checklist.
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Print the effective configuration.
    Config,
    /// Keep running and re-print the checklist when the day rolls over.
    Watch,
    /// Interactive session; the deletion selection lives here.
    Shell,
}

/// One line typed into `shell`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shell",
    no_binary_name = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
pub struct ShellLine {
    #[command(subcommand)]
    pub action: ShellAction,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ShellAction {
    #[command(flatten)]
    Common(Action),
    /// Mark or unmark a task for deletion.
    Select {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    /// Show or pin the creation or stats range for this session.
    Range {
        #[arg(value_enum)]
        target: RangeTarget,
        #[arg(long, allow_hyphen_values = true)]
        from: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        to: Option<String>,
    },
    /// Switch the viewed date.
    View {
        #[arg(allow_hyphen_values = true)]
        date: String,
    },
    /// Leave the shell.
    #[command(alias = "quit")]
    Exit,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeTarget {
    Creation,
    Stats,
    /// Release both ranges back to their trailing windows.
    Follow,
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

/// Pulls positional `rc.key=value` / `rc.key:value` tokens out of the argument
/// list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

/// Splits a shell line on whitespace, honouring single and double quotes.
pub fn split_line(line: &str) -> anyhow::Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_word = true;
            }
            None if ch.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(ch);
                in_word = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(anyhow!("unterminated {q} quote"));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
