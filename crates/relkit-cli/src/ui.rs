//! Console output: colored status lines, silenced by `--quiet`.

use crossterm::QueueableCommand;
use crossterm::style::{Color, SetForegroundColor};
use std::io::{Write, stderr, stdout};

/// A cheap handle commands print through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    quiet: bool,
}

impl Output {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Informational line, hidden with `--quiet`.
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            write_line(&mut stdout(), msg, Color::Reset);
        }
    }

    /// Success line, hidden with `--quiet`.
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            write_line(&mut stdout(), &format!("✓ {msg}"), Color::Green);
        }
    }

    pub fn warning(&self, msg: &str) {
        write_line(&mut stderr(), &format!("! {msg}"), Color::Yellow);
    }

    /// Primary command output; always printed, never colored.
    pub fn data(&self, msg: &str) {
        let mut out = stdout();
        let _ = writeln!(out, "{msg}");
        let _ = out.flush();
    }
}

fn write_line<W: Write>(out: &mut W, text: &str, color: Color) {
    let _ = out.queue(SetForegroundColor(color));
    let _ = write!(out, "{text}");
    let _ = out.queue(SetForegroundColor(Color::Reset));
    let _ = writeln!(out);
    let _ = out.flush();
}
