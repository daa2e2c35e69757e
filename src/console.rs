//! Administrator console output
//!
//! What the operator sees on stdout. Diagnostics go through `tracing`.
//! A disabled console swallows everything, which keeps test output clean.

use std::io::Write;

#[derive(Debug, Clone, Copy)]
pub struct Console {
    enabled: bool,
}

impl Console {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Announce that the server is accepting connections
    pub fn listening(&self, handle: &str, addr: &str) {
        self.emit(&format!("{} listening on {}...\n", handle, addr));
    }

    /// Print the admin prompt without a newline
    pub fn prompt(&self, handle: &str) {
        self.emit(&format!("{}> ", handle));
    }

    /// Show a line received from a client or a lifecycle event
    pub fn display(&self, line: &str) {
        self.emit(&format!("\r{}\n", line));
    }

    fn emit(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        self.write_to(&mut out, text);
    }

    fn write_to<W: Write>(&self, out: &mut W, text: &str) {
        if !self.enabled {
            return;
        }
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_console_writes() {
        let mut out = Vec::new();
        Console::new(true).write_to(&mut out, "Server> ");
        assert_eq!(out, b"Server> ");
    }

    #[test]
    fn test_disabled_console_is_silent() {
        let mut out = Vec::new();
        Console::new(false).write_to(&mut out, "Server> ");
        assert!(out.is_empty());
    }
}
