//! Operator-facing terminal output.
//!
//! Everything goes to stderr so `status --json` and `detect --json` keep
//! stdout machine-readable. Colour is used only on a terminal and never when
//! `NO_COLOR` is set.

use owo_colors::OwoColorize;
use std::io::{self, IsTerminal, Write};

/// Coloured, verbosity-aware stderr writer.
#[derive(Debug, Clone)]
pub struct OutputManager {
    verbose: bool,
    quiet: bool,
    color: bool,
}

impl OutputManager {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let color = io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self {
            verbose,
            quiet,
            color,
        }
    }

    /// Shown only with `--verbose`.
    pub fn verbose(&self, message: &str) -> io::Result<()> {
        if !self.verbose || self.quiet {
            return Ok(());
        }
        let line = if self.color {
            message.dimmed().to_string()
        } else {
            message.to_string()
        };
        self.emit(&line)
    }

    pub fn progress(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let marker = if self.color {
            "▶".cyan().to_string()
        } else {
            "▶".to_string()
        };
        self.emit(&format!("{marker} {message}"))
    }

    pub fn success(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let marker = if self.color {
            "✓".green().bold().to_string()
        } else {
            "✓".to_string()
        };
        self.emit(&format!("{marker} {message}"))
    }

    /// Warnings survive `--quiet`.
    pub fn warn(&self, message: &str) -> io::Result<()> {
        let marker = if self.color {
            "⚠".yellow().bold().to_string()
        } else {
            "⚠".to_string()
        };
        self.emit(&format!("{marker} {message}"))
    }

    pub fn error(&self, message: &str) -> io::Result<()> {
        let marker = if self.color {
            "✗".red().bold().to_string()
        } else {
            "✗".to_string()
        };
        self.emit(&format!("{marker} {message}"))
    }

    pub fn section(&self, title: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let title = if self.color {
            title.bold().to_string()
        } else {
            title.to_string()
        };
        self.emit(&format!("\n{title}"))
    }

    pub fn indent(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.emit(&format!("  {message}"))
    }

    fn emit(&self, line: &str) -> io::Result<()> {
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "{line}")
    }
}
