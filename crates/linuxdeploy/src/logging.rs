use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, mpsc};

use crate::error::{Error, Result};

const MAX_LOG_CHARS: usize = 4096;

/// Destination for pipeline log lines. Stages share one sink behind an Arc.
pub trait LogSink: Send + Sync {
    fn line(&self, msg: &str);
}

/// Appends timestamped lines to the log file, optionally teeing to stdout.
pub struct FileSink {
    file: Mutex<File>,
    tee_stdout: bool,
}

impl FileSink {
    pub fn open(path: &Path, tee_stdout: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::msg(format!("failed to open log file {}: {e}", path.display())))?;
        let sink = Self {
            file: Mutex::new(file),
            tee_stdout,
        };
        sink.line("------------------------------");
        sink.line("linuxdeploy log started");
        Ok(sink)
    }
}

impl LogSink for FileSink {
    fn line(&self, msg: &str) {
        let msg = sanitize_log_line(msg);
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "{stamp} {msg}");
        }
        if self.tee_stdout {
            println!("{msg}");
        }
    }
}

/// Forwards lines over a channel. Used by tests to observe pipeline output.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

impl LogSink for ChannelSink {
    fn line(&self, msg: &str) {
        let _ = self.tx.send(sanitize_log_line(msg));
    }
}

/// Discards everything.
pub struct NullSink;

impl LogSink for NullSink {
    fn line(&self, _msg: &str) {}
}

enum EscapeMode {
    Esc,
    Csi,
    Osc,
}

// File paths come straight from untrusted binaries and tool output; strip
// escape sequences and control chars so a crafted name cannot corrupt the
// log or the terminal when teeing.
pub fn sanitize_log_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LOG_CHARS));
    let mut esc_mode: Option<EscapeMode> = None;
    let mut truncated = false;
    let mut char_count = 0usize;

    for c in input.chars() {
        if let Some(mode) = esc_mode.as_ref() {
            match mode {
                EscapeMode::Esc => match c {
                    '[' => esc_mode = Some(EscapeMode::Csi),
                    ']' => esc_mode = Some(EscapeMode::Osc),
                    _ => esc_mode = None,
                },
                EscapeMode::Csi => {
                    if ('@'..='~').contains(&c) {
                        esc_mode = None;
                    }
                }
                EscapeMode::Osc => {
                    if c == '\x07' {
                        esc_mode = None;
                    }
                }
            }
            continue;
        }

        if c == '\x1b' {
            esc_mode = Some(EscapeMode::Esc);
            continue;
        }
        if c == '\r' || c == '\n' {
            continue;
        }
        if c == '\t' {
            out.push(' ');
            char_count += 1;
        } else if c.is_control() {
            continue;
        } else {
            out.push(c);
            char_count += 1;
        }

        if char_count >= MAX_LOG_CHARS {
            truncated = true;
            break;
        }
    }

    if truncated {
        out.push_str(" ...[truncated]");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_escape_sequences() {
        let input = "copied \u{1b}[31mred\u{1b}[0m \u{1b}]0;title\u{7} file";
        assert_eq!(sanitize_log_line(input), "copied red  file");
    }

    #[test]
    fn sanitize_strips_newlines_and_tabs() {
        assert_eq!(sanitize_log_line("a\tb\nc\r"), "a bc");
    }

    #[test]
    fn channel_sink_forwards_lines() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.line("hello");
        assert_eq!(rx.recv().expect("line"), "hello");
    }
}
