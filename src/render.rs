//! Output rendering for the chat loop.
//!
//! This module provides the renderer trait and a plain-text implementation that writes
//! streamed responses, status lines and diagnostics to the terminal.

use std::io::{self, Stdout, Write};
use std::time::Duration;

use crate::types::Usage;

/// ANSI escape code for dim text (used for diagnostics and usage).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the assistant label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for warnings and diagnostics).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for green text (used for recording progress).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
///
/// This abstraction allows for different rendering strategies:
/// - Plain text with ANSI styling
/// - Plain text without styling (for piping/redirecting)
/// - Capturing renderers for tests
pub trait Renderer: Send {
    /// Called before the first delta of a response.
    fn start_response(&mut self) {}

    /// Print a chunk of response text.
    ///
    /// This is called incrementally as deltas are streamed from the API.
    fn print_text(&mut self, text: &str);

    /// Print a non-fatal anomaly in the response stream.
    fn print_diagnostic(&mut self, message: &str);

    /// Print the token usage of a response.
    fn print_usage(&mut self, usage: &Usage) {
        _ = usage;
    }

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print recording progress.
    fn print_progress(&mut self, elapsed: Duration, limit: Duration) {
        _ = elapsed;
        _ = limit;
    }

    /// Called when a response is complete.
    ///
    /// Used to ensure proper newlines and cleanup after streaming.
    fn finish_response(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    in_response: bool,
    line_start: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            in_response: false,
            line_start: true,
        }
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn styled(&self, color: &str, text: &str) -> String {
        if self.use_color {
            format!("{color}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn break_line(&mut self) {
        if !self.line_start {
            println!();
            self.line_start = true;
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn start_response(&mut self) {
        if self.in_response {
            return;
        }
        self.break_line();
        print!("{}", self.styled(ANSI_CYAN, "Assistant: "));
        self.in_response = true;
        self.line_start = false;
        self.flush();
    }

    fn print_text(&mut self, text: &str) {
        self.start_response();
        print!("{text}");
        if !text.is_empty() {
            self.line_start = text.ends_with('\n');
        }
        self.flush();
    }

    fn print_diagnostic(&mut self, message: &str) {
        self.break_line();
        let line = if self.use_color {
            format!("{ANSI_DIM}{ANSI_YELLOW}[{message}]{ANSI_RESET}")
        } else {
            format!("[{message}]")
        };
        eprintln!("{line}");
    }

    fn print_usage(&mut self, usage: &Usage) {
        self.break_line();
        let line = format!(
            "[tokens: {} prompt, {} completion, {} total]",
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total()
        );
        println!("{}", self.styled(ANSI_DIM, &line));
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.break_line();
        eprintln!("{}", self.styled(ANSI_RED, &format!("Error: {error}")));
    }

    fn print_info(&mut self, info: &str) {
        self.break_line();
        println!("{info}");
        self.flush();
    }

    fn print_progress(&mut self, elapsed: Duration, limit: Duration) {
        let line = format!(
            "Recording... {}s / {}s (Ctrl+C to stop)",
            elapsed.as_secs(),
            limit.as_secs()
        );
        print!("\r{}", self.styled(ANSI_GREEN, &line));
        self.line_start = false;
        self.flush();
    }

    fn finish_response(&mut self) {
        self.break_line();
        self.in_response = false;
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert!(!renderer.use_color);
        assert_eq!(renderer.styled(ANSI_RED, "x"), "x");
    }
}
