use std::collections::BTreeSet;
use std::io::{self, BufRead, IsTerminal, Write};
use std::time::Duration;

use anyhow::anyhow;
use chrono::NaiveDate;
use clap::Parser;
use tracing::{debug, info, instrument, warn};

use crate::cli::{Action, RangeTarget, ShellAction, ShellLine, split_line};
use crate::config::Config;
use crate::controller::{Command, Controller};
use crate::datetime::{Clock, format_day, parse_date_expr};
use crate::model::DateRange;
use crate::render::Renderer;
use crate::storage::KeyValueStore;

/// Maps `default.command` to the action run when none is given.
pub fn default_action(cfg: &Config) -> anyhow::Result<Action> {
    let name = cfg
        .get("default.command")
        .unwrap_or_else(|| "show".to_string());
    match name.trim() {
        "show" => Ok(Action::Show { date: None }),
        "stats" => Ok(Action::Stats {
            from: None,
            to: None,
        }),
        "tasks" => Ok(Action::Tasks),
        other => Err(anyhow!("unsupported default.command: {other}")),
    }
}

#[instrument(skip(ctl, cfg, renderer, clock))]
pub fn dispatch<S, C>(
    ctl: &mut Controller<S>,
    cfg: &Config,
    renderer: &mut Renderer,
    clock: &C,
    action: Action,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
    C: Clock + ?Sized,
{
    debug!(?action, "dispatching command");

    match action {
        Action::Show { date } => cmd_show(ctl, renderer, date.as_deref()),
        Action::Title { text } => cmd_title(ctl, &text),
        Action::Add { name, from, to } => {
            cmd_add(ctl, &name.join(" "), from.as_deref(), to.as_deref())
        }
        Action::Done { name, date } => {
            cmd_done(ctl, renderer, &name.join(" "), date.as_deref())
        }
        Action::Delete { names } => cmd_delete(ctl, names),
        Action::Tasks => renderer.print_catalog(&ctl.state().catalog),
        Action::Stats { from, to } => cmd_stats(ctl, renderer, from.as_deref(), to.as_deref()),
        Action::Reset { yes } => cmd_reset(ctl, yes),
        Action::Config => renderer.print_config(cfg),
        Action::Watch => {
            let interval = cfg.poll_interval()?;
            run_watch(ctl, renderer, clock, interval, None)
        }
        Action::Shell => {
            let stdin = io::stdin();
            let interactive = stdin.is_terminal();
            run_shell(ctl, cfg, renderer, clock, stdin.lock(), interactive)
        }
    }
}

fn resolve_range(
    base: DateRange,
    today: NaiveDate,
    from: Option<&str>,
    to: Option<&str>,
) -> anyhow::Result<DateRange> {
    let start = match from {
        Some(raw) => parse_date_expr(raw, today)?,
        None => base.start,
    };
    let end = match to {
        Some(raw) => parse_date_expr(raw, today)?,
        None => base.end,
    };
    Ok(DateRange::new(start, end))
}

#[instrument(skip(ctl, renderer))]
fn cmd_show<S: KeyValueStore>(
    ctl: &mut Controller<S>,
    renderer: &mut Renderer,
    date: Option<&str>,
) -> anyhow::Result<()> {
    if let Some(raw) = date {
        let day = parse_date_expr(raw, ctl.today())?;
        ctl.apply(Command::ViewDate(day))?;
    }
    print_current(ctl, renderer)
}

fn print_current<S: KeyValueStore>(
    ctl: &mut Controller<S>,
    renderer: &mut Renderer,
) -> anyhow::Result<()> {
    let day = ctl.view_date();
    print_date(ctl, renderer, day)
}

fn print_date<S: KeyValueStore>(
    ctl: &mut Controller<S>,
    renderer: &mut Renderer,
    day: NaiveDate,
) -> anyhow::Result<()> {
    let instances = ctl.instances_on(day)?;
    renderer.print_day(
        &ctl.state().title,
        day,
        ctl.today(),
        &instances,
        ctl.selection(),
    )
}

#[instrument(skip(ctl, text))]
fn cmd_title<S: KeyValueStore>(ctl: &mut Controller<S>, text: &[String]) -> anyhow::Result<()> {
    if text.is_empty() {
        println!("{}", ctl.state().title);
        return Ok(());
    }
    ctl.apply(Command::SetTitle(text.join(" ")))?;
    info!("title updated");
    Ok(())
}

#[instrument(skip(ctl))]
fn cmd_add<S: KeyValueStore>(
    ctl: &mut Controller<S>,
    name: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> anyhow::Result<()> {
    let range = resolve_range(ctl.creation_range(), ctl.today(), from, to)?;

    if name.trim().is_empty() {
        println!("Task name is empty; nothing added.");
        return Ok(());
    }
    if ctl.state().has_task(name) {
        println!("Task '{name}' already exists.");
        return Ok(());
    }

    if from.is_some() || to.is_some() {
        ctl.apply(Command::AddTaskOver {
            name: name.to_string(),
            range,
        })?;
    } else {
        ctl.apply(Command::AddTask(name.to_string()))?;
    }
    let days = range.days().len();
    println!("Added task '{name}' to {days} day(s) ({range}).");
    Ok(())
}

#[instrument(skip(ctl, renderer))]
fn cmd_done<S: KeyValueStore>(
    ctl: &mut Controller<S>,
    renderer: &mut Renderer,
    name: &str,
    date: Option<&str>,
) -> anyhow::Result<()> {
    let day = match date {
        Some(raw) => parse_date_expr(raw, ctl.today())?,
        None => ctl.view_date(),
    };
    ctl.instances_on(day)?;

    let dirty = ctl.apply(Command::ToggleDone {
        date: day,
        name: name.to_string(),
    })?;
    if dirty.is_clean() {
        println!("No task named '{name}' on {}.", format_day(day));
        return Ok(());
    }
    print_date(ctl, renderer, day)
}

#[instrument(skip(ctl))]
fn cmd_delete<S: KeyValueStore>(
    ctl: &mut Controller<S>,
    names: Vec<String>,
) -> anyhow::Result<()> {
    let targets: BTreeSet<String> = if names.is_empty() {
        ctl.selection().clone()
    } else {
        names.into_iter().collect()
    };
    if targets.is_empty() {
        println!("Nothing selected.");
        return Ok(());
    }

    let known = targets
        .iter()
        .filter(|name| ctl.state().has_task(name))
        .count();
    ctl.apply(Command::DeleteTasks(targets))?;
    println!("Deleted {known} task(s).");
    Ok(())
}

#[instrument(skip(ctl, renderer))]
fn cmd_stats<S: KeyValueStore>(
    ctl: &mut Controller<S>,
    renderer: &mut Renderer,
    from: Option<&str>,
    to: Option<&str>,
) -> anyhow::Result<()> {
    let range = resolve_range(ctl.stats_range(), ctl.today(), from, to)?;
    renderer.print_stats(range, &ctl.stats_over(range))
}

#[instrument(skip(ctl))]
fn cmd_reset<S: KeyValueStore>(ctl: &mut Controller<S>, yes: bool) -> anyhow::Result<()> {
    if !yes {
        return Err(anyhow!(
            "reset wipes the title, every task and all history; rerun with --yes"
        ));
    }
    ctl.apply(Command::Reset)?;
    println!("Checklist reset.");
    Ok(())
}

/// Polls `clock` every `interval` and re-prints the checklist after a day
/// rollover. `max_polls` bounds the loop; `None` runs until interrupted.
#[instrument(skip(ctl, renderer, clock))]
pub fn run_watch<S, C>(
    ctl: &mut Controller<S>,
    renderer: &mut Renderer,
    clock: &C,
    interval: Duration,
    max_polls: Option<u64>,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
    C: Clock + ?Sized,
{
    ctl.tick(clock);
    print_current(ctl, renderer)?;

    let mut polls = 0_u64;
    while max_polls.is_none_or(|max| polls < max) {
        std::thread::sleep(interval);
        polls += 1;
        if ctl.tick(clock) {
            println!();
            print_current(ctl, renderer)?;
        }
    }
    Ok(())
}

/// Line-oriented session over `input`. The deletion selection persists for
/// the life of the session only.
#[instrument(skip(ctl, cfg, renderer, clock, input))]
pub fn run_shell<S, C, R>(
    ctl: &mut Controller<S>,
    cfg: &Config,
    renderer: &mut Renderer,
    clock: &C,
    input: R,
    interactive: bool,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
    C: Clock + ?Sized,
    R: BufRead,
{
    info!("shell started");
    ctl.tick(clock);
    print_current(ctl, renderer)?;

    let mut lines = input.lines();
    loop {
        if interactive {
            print!("> ");
            io::stdout().flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;

        if ctl.tick(clock) {
            println!("Day rolled over to {}.", format_day(ctl.today()));
        }

        let words = match split_line(&line) {
            Ok(words) if words.is_empty() => continue,
            Ok(words) => words,
            Err(err) => {
                println!("error: {err:#}");
                continue;
            }
        };

        let parsed = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed,
            Err(err) => {
                err.print()?;
                continue;
            }
        };

        match run_shell_action(ctl, cfg, renderer, clock, parsed.action) {
            Ok(true) => continue,
            Ok(false) => break,
            Err(err) => {
                warn!(error = %err, "shell command failed");
                println!("error: {err:#}");
            }
        }
    }

    info!("shell finished");
    Ok(())
}

/// Returns `Ok(false)` when the session should end.
fn run_shell_action<S, C>(
    ctl: &mut Controller<S>,
    cfg: &Config,
    renderer: &mut Renderer,
    clock: &C,
    action: ShellAction,
) -> anyhow::Result<bool>
where
    S: KeyValueStore,
    C: Clock + ?Sized,
{
    match action {
        ShellAction::Exit => Ok(false),
        ShellAction::Select { name } => {
            let name = name.join(" ");
            if !ctl.state().has_task(&name) {
                println!("No task named '{name}'.");
                return Ok(true);
            }
            ctl.apply(Command::ToggleSelection(name))?;
            print_current(ctl, renderer)?;
            Ok(true)
        }
        ShellAction::View { date } => {
            let day = parse_date_expr(&date, ctl.today())?;
            ctl.apply(Command::ViewDate(day))?;
            print_current(ctl, renderer)?;
            Ok(true)
        }
        ShellAction::Range { target, from, to } => {
            cmd_range(ctl, target, from.as_deref(), to.as_deref())?;
            Ok(true)
        }
        ShellAction::Common(Action::Shell | Action::Watch) => {
            Err(anyhow!("not available inside the shell"))
        }
        ShellAction::Common(action) => {
            dispatch(ctl, cfg, renderer, clock, action)?;
            Ok(true)
        }
    }
}

/// Sets a range for the rest of the session, or prints it when no bound is
/// given. `follow` returns both ranges to their trailing windows.
fn cmd_range<S: KeyValueStore>(
    ctl: &mut Controller<S>,
    target: RangeTarget,
    from: Option<&str>,
    to: Option<&str>,
) -> anyhow::Result<()> {
    let current = match target {
        RangeTarget::Creation => ctl.creation_range(),
        RangeTarget::Stats => ctl.stats_range(),
        RangeTarget::Follow => {
            ctl.apply(Command::FollowToday)?;
            println!(
                "Creation range {}, stats range {}; both follow today.",
                ctl.creation_range(),
                ctl.stats_range()
            );
            return Ok(());
        }
    };
    if from.is_none() && to.is_none() {
        println!("{current}");
        return Ok(());
    }

    let range = resolve_range(current, ctl.today(), from, to)?;
    let command = match target {
        RangeTarget::Creation => Command::SetCreationRange(range),
        _ => Command::SetStatsRange(range),
    };
    ctl.apply(command)?;
    println!("Range set to {range} until `range follow`.");
    Ok(())
}
