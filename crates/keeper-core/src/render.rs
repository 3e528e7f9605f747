use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::advisory::Advisory;
use crate::config::Config;
use crate::datetime::format_date;
use crate::reconcile::{ReconciledView, TodoStats};
use crate::todo::{Priority, Todo};

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color", true)?;

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            tz: cfg.timezone()?,
        })
    }

    pub fn plain(tz: Tz) -> Self {
        Self { color: false, tz }
    }

    #[tracing::instrument(skip(self, out, view, now))]
    pub fn write_view<W: Write>(
        &self,
        mut out: W,
        view: &ReconciledView,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if view.visible.is_empty() {
            if view.filtered_out_everything() {
                writeln!(out, "No tasks match your current filters.")?;
            } else {
                writeln!(out, "You don't have any tasks yet.")?;
            }
            return Ok(());
        }

        let headers = ["ID", "Done", "Pri", "Due", "Created", "Text"]
            .map(str::to_string)
            .to_vec();

        let mut rows = Vec::with_capacity(view.visible.len());
        for todo in &view.visible {
            let id = self.paint(short_id(todo), "33");
            let done = if todo.completed { "[x]" } else { "[ ]" }.to_string();
            let priority = self.paint_priority(todo.priority);

            let due = match todo.due_date {
                Some(due) if due < now && !todo.completed => {
                    self.paint(&format_date(due, self.tz), "31")
                }
                Some(due) => format_date(due, self.tz),
                None => String::new(),
            };
            let created = todo
                .created_at
                .map(|ts| format_date(ts, self.tz))
                .unwrap_or_else(|| "-".to_string());
            let text = if todo.completed {
                self.paint(&todo.text, "2")
            } else {
                todo.text.clone()
            };

            rows.push(vec![id, done, priority, due, created, text]);
        }

        write_table(&mut out, headers, rows)?;
        writeln!(out)?;
        writeln!(out, "{}", view.summary_label())?;
        Ok(())
    }

    pub fn write_stats<W: Write>(&self, mut out: W, stats: &TodoStats) -> anyhow::Result<()> {
        writeln!(out, "progress   {}%", stats.completion_pct)?;
        writeln!(out, "total      {}", stats.total)?;
        writeln!(out, "active     {}", stats.active)?;
        writeln!(out, "completed  {}", stats.completed)?;
        for priority in Priority::ALL {
            writeln!(
                out,
                "{:<10} {}",
                priority.as_str(),
                stats.by_priority.get(priority)
            )?;
        }
        Ok(())
    }

    pub fn write_todo<W: Write>(&self, mut out: W, todo: &Todo) -> anyhow::Result<()> {
        writeln!(out, "id        {}", todo.id)?;
        writeln!(out, "text      {}", todo.text)?;
        writeln!(out, "done      {}", if todo.completed { "yes" } else { "no" })?;
        writeln!(out, "priority  {}", todo.priority)?;
        if let Some(created) = todo.created_at {
            writeln!(out, "created   {}", created.with_timezone(&self.tz).to_rfc3339())?;
        }
        if let Some(due) = todo.due_date {
            writeln!(out, "due       {}", format_date(due, self.tz))?;
        }
        Ok(())
    }

    pub fn write_advisory<W: Write>(&self, mut out: W, advisory: &Advisory) -> anyhow::Result<()> {
        let hint = match advisory {
            Advisory::MissingIndex { .. } => "run `keeper index create` to provision it",
        };
        writeln!(out, "{} {advisory} ({hint})", self.paint("notice:", "36"))?;
        Ok(())
    }

    fn paint_priority(&self, priority: Priority) -> String {
        match priority {
            Priority::High => self.paint("H", "31"),
            Priority::Medium => self.paint("M", "33"),
            Priority::Low => self.paint("L", "32"),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn short_id(todo: &Todo) -> &str {
    let id = todo.id.as_str();
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| visible_width(h)).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_width(cell));
        }
    }

    for (header, width) in headers.iter().zip(widths.iter().copied()) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for width in widths.iter().copied() {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(widths.iter().copied()) {
            let padding = width.saturating_sub(visible_width(cell));
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn visible_width(cell: &str) -> usize {
    UnicodeWidthStr::width(strip_ansi(cell).as_str())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            escaped = ch != 'm';
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
