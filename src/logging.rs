//! Leveled, dependency-free output control.
//!
//! Ported near-verbatim from the teacher's `src/logging/mod.rs`: no
//! `tracing`/`log` crate involved there, so none is introduced here either.

use std::io::{self, Write};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Option<Instant>,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Some(Instant::now()),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Some(Instant::now()),
        }
    }

    pub fn section(&self, title: &str) {
        if !self.quiet {
            println!("\n=== {title} ===");
        }
    }

    pub fn subsection(&self, title: &str) {
        if !self.quiet {
            println!("\n--- {title} ---");
        }
    }

    pub fn trace(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("trace: {message}");
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("debug: {message}");
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{message}");
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("ok: {message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("warning: {message}");
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    pub fn step(&self, message: &str) {
        if !self.quiet {
            println!("-> {message}");
        }
    }

    pub fn progress(&self, message: &str) {
        if !self.quiet {
            print!("{message}...");
            let _ = io::stdout().flush();
        }
    }

    pub fn progress_done(&self) {
        if !self.quiet {
            println!(" done");
        }
    }

    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("    {message}");
        }
    }

    pub fn summary_kv(&self, title: &str, items: &[(&str, String)]) {
        if !self.quiet {
            self.subsection(title);
            for (key, value) in items {
                println!("  {key}: {value}");
            }
        }
    }

    pub fn list(&self, title: &str, items: &[String]) {
        if !self.quiet {
            self.subsection(title);
            if items.is_empty() {
                println!("  (none)");
            }
            for (i, item) in items.iter().enumerate() {
                println!("  {}. {item}", i + 1);
            }
        }
    }

    pub fn format_size(&self, bytes: u64) -> String {
        if bytes < 1024 {
            format!("{bytes} B")
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }

    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{secs}s")
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    pub fn format_speed(&self, bytes_per_sec: u64) -> String {
        format!("{}/s", self.format_size(bytes_per_sec))
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(false)
    }
}
