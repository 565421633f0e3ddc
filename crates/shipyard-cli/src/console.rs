//! Console output sink

use std::io::{self, Write};

use shipyard_exec::{OutputSink, Verbosity};

/// Writes streamed output and informational lines to stdout
///
/// Each write takes the stdout lock, so chunks from concurrent commands
/// never tear.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    verbosity: Verbosity,
}

impl ConsoleSink {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }
}

impl OutputSink for ConsoleSink {
    fn write(&self, chunk: &[u8]) {
        if self.verbosity == Verbosity::Quiet {
            return;
        }
        let mut out = io::stdout().lock();
        // a closed stdout must not abort the command
        let _ = out.write_all(chunk).and_then(|()| out.flush());
    }

    fn write_line(&self, line: &str) {
        if self.verbosity == Verbosity::Quiet {
            return;
        }
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }

    fn verbosity(&self) -> Verbosity {
        self.verbosity
    }
}
