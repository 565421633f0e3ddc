//! Command construction and shell compilation

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::node::Node;

/// Logical command line: one string or a chain of steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Single shell line
    Single(String),
    /// Steps joined with `&&`, so a failing step skips the rest
    Chain(Vec<String>),
}

impl CommandLine {
    /// The line as the operator wrote it, steps joined with `&&`
    #[must_use]
    pub fn joined(&self) -> String {
        match self {
            CommandLine::Single(line) => line.clone(),
            CommandLine::Chain(steps) => steps.join(" && "),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        CommandLine::Single(line.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(line: String) -> Self {
        CommandLine::Single(line)
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(steps: Vec<String>) -> Self {
        CommandLine::Chain(steps)
    }
}

impl From<Vec<&str>> for CommandLine {
    fn from(steps: Vec<&str>) -> Self {
        CommandLine::Chain(steps.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(steps: [&str; N]) -> Self {
        CommandLine::Chain(steps.iter().map(|s| (*s).to_string()).collect())
    }
}

/// Execution options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Working directory
    pub cwd: Option<String>,
    /// Run as this user through sudo
    pub user: Option<String>,
    /// Abort after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

/// A shell invocation plus options and an optional target node
///
/// Without a target the command can only be run locally.
#[derive(Debug, Clone)]
pub struct Command {
    commandline: CommandLine,
    target: Option<Arc<Node>>,
    options: CommandOptions,
}

impl Command {
    /// Create a command with no target and default options
    pub fn new(commandline: impl Into<CommandLine>) -> Self {
        Self {
            commandline: commandline.into(),
            target: None,
            options: CommandOptions::default(),
        }
    }

    /// Target a node
    #[must_use]
    pub fn on(mut self, node: Arc<Node>) -> Self {
        self.target = Some(node);
        self
    }

    /// Change into this directory before running
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<String>) -> Self {
        self.options.cwd = Some(dir.into());
        self
    }

    /// Run as this user via sudo
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.options.user = Some(user.into());
        self
    }

    /// Abort the command after `timeout`
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Wait for the command however long it takes
    #[must_use]
    pub fn no_timeout(mut self) -> Self {
        self.options.timeout = None;
        self
    }

    pub fn commandline(&self) -> &CommandLine {
        &self.commandline
    }

    pub fn target(&self) -> Option<&Arc<Node>> {
        self.target.as_ref()
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    /// The exact shell string that will be executed
    #[must_use]
    pub fn compile(&self) -> String {
        compile(&self.commandline, &self.options)
    }
}

/// Turn a command line and options into one shell-executable string
///
/// The payload is wrapped in a login bash so the user's profile is loaded.
/// Characters the outer shell would expand inside double quotes are escaped,
/// so bash receives the payload unchanged.
#[must_use]
pub fn compile(commandline: &CommandLine, options: &CommandOptions) -> String {
    let mut compiled = String::new();

    if let Some(user) = &options.user {
        compiled.push_str("sudo -u ");
        compiled.push_str(&quote_word(user));
        compiled.push_str(" TERM=dumb ");
    }

    let mut payload = String::new();
    if let Some(cwd) = &options.cwd {
        payload.push_str("cd ");
        payload.push_str(&quote_path(cwd));
        payload.push_str(" && ");
    }
    payload.push_str(&commandline.joined());

    compiled.push_str("/bin/bash -l -c \"");
    compiled.push_str(&escape_double_quoted(&payload));
    compiled.push('"');

    compiled
}

fn escape_double_quoted(payload: &str) -> String {
    let mut escaped = String::with_capacity(payload.len());
    for c in payload.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Like [`quote_word`], but a leading `~/` stays unquoted so it still expands
fn quote_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("~/{}", quote_word(rest)),
        None => quote_word(path),
    }
}

/// Single-quote a word unless it only holds characters the shell leaves alone
fn quote_word(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '~' | ':' | '@' | '+' | ','));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
