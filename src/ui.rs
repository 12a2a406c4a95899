use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::time::Duration;

use crate::core::engine::ConfirmGate;
use crate::core::model::ResolvedItem;

const MAX_TITLE_WIDTH: usize = 100;
const HEADERS: [&str; 4] = ["id", "Season", "Episode", "Title"];

/// Fixed-width text table of the resolved worklist.
pub fn render_worklist(items: &[ResolvedItem]) -> String {
    let rows: Vec<[String; 4]> = items
        .iter()
        .map(|item| {
            [
                item.entry.id.clone(),
                number_or_dash(item.entry.season),
                number_or_dash(item.entry.episode),
                truncate(&item.entry.title, MAX_TITLE_WIDTH),
            ]
        })
        .collect();

    let mut widths: [usize; 4] = [0; 4];
    for (i, header) in HEADERS.iter().enumerate() {
        widths[i] = header.chars().count();
    }
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let separator = {
        let mut line = String::from("+");
        for width in widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line
    };
    let format_row = |cells: &[String; 4]| {
        let mut line = String::from("|");
        for (i, cell) in cells.iter().enumerate() {
            let pad = widths[i] - cell.chars().count();
            line.push(' ');
            line.push_str(cell);
            line.push_str(&" ".repeat(pad + 1));
            line.push('|');
        }
        line
    };

    let mut out = String::new();
    out.push_str(&separator);
    out.push('\n');
    out.push_str(&format_row(&HEADERS.map(String::from)));
    out.push('\n');
    out.push_str(&separator);
    for row in &rows {
        out.push('\n');
        out.push_str(&format_row(row));
    }
    out.push('\n');
    out.push_str(&separator);
    out
}

fn number_or_dash(value: Option<u32>) -> String {
    value.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Anything but a lone case-insensitive "y" declines.
pub fn is_affirmative(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("y")
}

/// Table + blocking y/n prompt on the terminal.
pub struct StdinConfirm;

impl ConfirmGate for StdinConfirm {
    fn confirm(&self, worklist: &[ResolvedItem]) -> anyhow::Result<bool> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", render_worklist(worklist))?;
        write!(stdout, "Do you want to proceed with your download (y/n) ")?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(is_affirmative(&answer))
    }
}

pub fn download_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {wide_msg}")
            .unwrap()
            .tick_chars("⢿⣻⣽⣾⣷⣯⣟⡿ "),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Downloading...");
    spinner
}
