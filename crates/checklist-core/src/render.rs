use std::collections::BTreeSet;
use std::io::{self, IsTerminal, Write};

use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_day;
use crate::model::{CatalogTask, DateRange, TaskInstance, TaskStats};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, title, instances, selection))]
    pub fn print_day(
        &mut self,
        title: &str,
        date: NaiveDate,
        today: NaiveDate,
        instances: &[TaskInstance],
        selection: &BTreeSet<String>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if !title.is_empty() {
            writeln!(out, "{}", self.paint(title, "1"))?;
        }
        let marker = if date == today { " (today)" } else { "" };
        writeln!(out, "{}{marker}", format_day(date))?;

        if instances.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![" ".to_string(), "Task".to_string(), "Del".to_string()];
        let rows = instances
            .iter()
            .map(|instance| {
                let check = if instance.done {
                    self.paint("x", "32")
                } else {
                    " ".to_string()
                };
                let selected = if selection.contains(&instance.name) {
                    self.paint("*", "31")
                } else {
                    String::new()
                };
                vec![check, instance.name.clone(), selected]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, catalog))]
    pub fn print_catalog(&mut self, catalog: &[CatalogTask]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if catalog.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec!["#".to_string(), "Task".to_string()];
        let rows = catalog
            .iter()
            .enumerate()
            .map(|(idx, task)| vec![self.paint(&(idx + 1).to_string(), "33"), task.name.clone()])
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, stats))]
    pub fn print_stats(
        &mut self,
        range: DateRange,
        stats: &TaskStats,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{range}")?;
        if stats.is_empty() {
            writeln!(out, "No recorded tasks in range.")?;
            return Ok(());
        }

        write_table(&mut out, stats_headers(), stats_rows(stats))?;
        Ok(())
    }

    pub fn print_config(&mut self, cfg: &Config) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let mut entries: Vec<(&String, &String)> = cfg.iter().collect();
        entries.sort();
        for (key, value) in entries {
            writeln!(out, "{key}={value}")?;
        }
        for file in &cfg.loaded_files {
            writeln!(out, "# loaded {}", file.display())?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn stats_headers() -> Vec<String> {
    ["Task", "Done", "Total", "Rate"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn stats_rows(stats: &TaskStats) -> Vec<Vec<String>> {
    stats
        .iter()
        .map(|(name, entry)| {
            vec![
                name.clone(),
                entry.completed.to_string(),
                entry.total.to_string(),
                format!("{}%", entry.percent()),
            ]
        })
        .collect()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
