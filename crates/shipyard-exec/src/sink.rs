//! Output sink abstraction for streamed command output

use std::sync::{Mutex, PoisonError};

/// Ordered verbosity tiers
///
/// Higher tiers unlock extra diagnostic lines without changing execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    VeryVerbose,
    Debug,
}

impl Verbosity {
    /// Map a `-q` flag and a `-v` count to a tier
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Verbosity::Quiet;
        }
        match verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            2 => Verbosity::VeryVerbose,
            _ => Verbosity::Debug,
        }
    }
}

/// Consumer of streamed output and informational lines
///
/// Implementations shared between concurrent invocations must serialize
/// their own writes.
pub trait OutputSink: Send + Sync {
    /// Write a raw chunk exactly as received
    fn write(&self, chunk: &[u8]);

    /// Write one informational line
    fn write_line(&self, line: &str);

    /// Current verbosity tier
    fn verbosity(&self) -> Verbosity;

    fn is_verbose(&self) -> bool {
        self.verbosity() >= Verbosity::Verbose
    }

    fn is_very_verbose(&self) -> bool {
        self.verbosity() >= Verbosity::VeryVerbose
    }
}

/// Sink that records everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    verbosity: Verbosity,
    contents: Mutex<Vec<u8>>,
}

impl MemorySink {
    #[must_use]
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            contents: Mutex::new(Vec::new()),
        }
    }

    /// Everything written so far, lossily decoded
    #[must_use]
    pub fn contents(&self) -> String {
        let contents = self.contents.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&contents).into_owned()
    }
}

impl OutputSink for MemorySink {
    fn write(&self, chunk: &[u8]) {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
    }

    fn write_line(&self, line: &str) {
        let mut contents = self.contents.lock().unwrap_or_else(PoisonError::into_inner);
        contents.extend_from_slice(line.as_bytes());
        contents.push(b'\n');
    }

    fn verbosity(&self) -> Verbosity {
        self.verbosity
    }
}

/// Tees streamed chunks into a sink and an accumulation buffer
pub(crate) struct OutputCapture<'a> {
    sink: &'a dyn OutputSink,
    buffer: Vec<u8>,
}

impl<'a> OutputCapture<'a> {
    pub(crate) fn new(sink: &'a dyn OutputSink) -> Self {
        Self {
            sink,
            buffer: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.sink.write(chunk);
        self.buffer.extend_from_slice(chunk);
    }

    pub(crate) fn into_output(self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}
