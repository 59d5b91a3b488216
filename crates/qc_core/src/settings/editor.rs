//! Editor profiles: closed-key command templates with typed placeholders.
//!
//! # Responsibility
//! - Tokenize `code_command` / `memo_command` strings once, at load time.
//! - Reject unknown or misplaced placeholders before any editor runs.
//! - Build a `std::process::Command` without going through a shell.
//!
//! # Invariants
//! - The program name never contains a placeholder.
//! - A code command always references `{codes_file_path}`; a memo command
//!   always references `{memo_file_path}`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::process::Command;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

pub type EditorResult<T> = Result<T, EditorError>;

/// Editor template and launch errors.
#[derive(Debug)]
pub enum EditorError {
    EmptyCommand {
        kind: CommandKind,
    },
    UnterminatedQuote {
        kind: CommandKind,
    },
    UnknownPlaceholder {
        kind: CommandKind,
        name: String,
    },
    PlaceholderNotAllowed {
        kind: CommandKind,
        placeholder: Placeholder,
    },
    MissingPlaceholder {
        kind: CommandKind,
        placeholder: Placeholder,
    },
    PlaceholderInProgram {
        kind: CommandKind,
    },
    UnknownEditor(String),
    MissingValue(Placeholder),
    Spawn {
        program: String,
        source: std::io::Error,
    },
    Failed {
        program: String,
        status: Option<i32>,
    },
}

impl Display for EditorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCommand { kind } => write!(f, "{kind} is empty"),
            Self::UnterminatedQuote { kind } => write!(f, "{kind} has an unterminated quote"),
            Self::UnknownPlaceholder { kind, name } => {
                write!(f, "{kind} uses unknown placeholder `{{{name}}}`")
            }
            Self::PlaceholderNotAllowed { kind, placeholder } => {
                write!(f, "{kind} may not use `{placeholder}`")
            }
            Self::MissingPlaceholder { kind, placeholder } => {
                write!(f, "{kind} must reference `{placeholder}`")
            }
            Self::PlaceholderInProgram { kind } => {
                write!(f, "{kind} program name may not contain a placeholder")
            }
            Self::UnknownEditor(name) => write!(f, "unknown editor `{name}`"),
            Self::MissingValue(placeholder) => {
                write!(f, "no value supplied for `{placeholder}`")
            }
            Self::Spawn { program, source } => write!(f, "failed to launch `{program}`: {source}"),
            Self::Failed { program, status } => match status {
                Some(code) => write!(f, "`{program}` exited with status {code}"),
                None => write!(f, "`{program}` was terminated by a signal"),
            },
        }
    }
}

impl Error for EditorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The two command slots an editor profile must fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Code,
    Memo,
}

impl CommandKind {
    pub fn key(self) -> &'static str {
        match self {
            Self::Code => "code_command",
            Self::Memo => "memo_command",
        }
    }

    fn allowed(self) -> &'static [Placeholder] {
        match self {
            Self::Code => &[Placeholder::CorpusFilePath, Placeholder::CodesFilePath],
            Self::Memo => &[Placeholder::CorpusFilePath, Placeholder::MemoFilePath],
        }
    }

    fn required(self) -> Placeholder {
        match self {
            Self::Code => Placeholder::CodesFilePath,
            Self::Memo => Placeholder::MemoFilePath,
        }
    }
}

impl Display for CommandKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Closed placeholder set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    CorpusFilePath,
    CodesFilePath,
    MemoFilePath,
}

impl Placeholder {
    pub fn name(self) -> &'static str {
        match self {
            Self::CorpusFilePath => "corpus_file_path",
            Self::CodesFilePath => "codes_file_path",
            Self::MemoFilePath => "memo_file_path",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "corpus_file_path" => Some(Self::CorpusFilePath),
            "codes_file_path" => Some(Self::CodesFilePath),
            "memo_file_path" => Some(Self::MemoFilePath),
            _ => None,
        }
    }
}

impl Display for Placeholder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A tokenized command: fixed program plus argument templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    kind: CommandKind,
    program: String,
    args: Vec<Vec<Segment>>,
}

/// Paths substituted into a template.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderValues<'a> {
    pub corpus_file_path: Option<&'a Path>,
    pub codes_file_path: Option<&'a Path>,
    pub memo_file_path: Option<&'a Path>,
}

impl<'a> PlaceholderValues<'a> {
    fn get(&self, placeholder: Placeholder) -> Option<&'a Path> {
        match placeholder {
            Placeholder::CorpusFilePath => self.corpus_file_path,
            Placeholder::CodesFilePath => self.codes_file_path,
            Placeholder::MemoFilePath => self.memo_file_path,
        }
    }
}

impl CommandTemplate {
    /// Tokenizes and validates one command string.
    ///
    /// Words split on whitespace; single quotes keep text verbatim, double
    /// quotes honor `\"` and `\\`. Placeholders may appear anywhere in an
    /// argument, including inside quotes.
    pub fn parse(kind: CommandKind, text: &str) -> EditorResult<Self> {
        let mut words = split_words(text).ok_or(EditorError::UnterminatedQuote { kind })?;
        if words.is_empty() {
            return Err(EditorError::EmptyCommand { kind });
        }
        let program = words.remove(0);
        if PLACEHOLDER_RE.is_match(&program) {
            return Err(EditorError::PlaceholderInProgram { kind });
        }

        let mut args = Vec::with_capacity(words.len());
        let mut seen_required = false;
        for word in words {
            let segments = parse_segments(kind, &word)?;
            seen_required |= segments
                .iter()
                .any(|segment| *segment == Segment::Placeholder(kind.required()));
            args.push(segments);
        }
        if !seen_required {
            return Err(EditorError::MissingPlaceholder {
                kind,
                placeholder: kind.required(),
            });
        }
        Ok(Self {
            kind,
            program,
            args,
        })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with placeholders replaced by `values`.
    pub fn render_args(&self, values: &PlaceholderValues<'_>) -> EditorResult<Vec<String>> {
        let mut rendered = Vec::with_capacity(self.args.len());
        for segments in &self.args {
            let mut arg = String::new();
            for segment in segments {
                match segment {
                    Segment::Literal(text) => arg.push_str(text),
                    Segment::Placeholder(placeholder) => {
                        let path = values
                            .get(*placeholder)
                            .ok_or(EditorError::MissingValue(*placeholder))?;
                        arg.push_str(&path.to_string_lossy());
                    }
                }
            }
            rendered.push(arg);
        }
        Ok(rendered)
    }

    /// Builds the process to launch; nothing is spawned yet.
    pub fn to_command(&self, values: &PlaceholderValues<'_>) -> EditorResult<Command> {
        let mut command = Command::new(&self.program);
        command.args(self.render_args(values)?);
        Ok(command)
    }
}

/// Raw profile as written in settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditorProfileConfig {
    pub code_command: String,
    pub memo_command: String,
}

/// Validated editor profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorProfile {
    pub name: String,
    pub code_command: CommandTemplate,
    pub memo_command: CommandTemplate,
}

impl EditorProfile {
    pub fn from_config(name: &str, config: &EditorProfileConfig) -> EditorResult<Self> {
        Ok(Self {
            name: name.to_string(),
            code_command: CommandTemplate::parse(CommandKind::Code, &config.code_command)?,
            memo_command: CommandTemplate::parse(CommandKind::Memo, &config.memo_command)?,
        })
    }
}

/// Built-in profiles keyed by editor name.
pub fn builtin_profiles() -> BTreeMap<String, EditorProfileConfig> {
    let profile = |code: &str, memo: &str| EditorProfileConfig {
        code_command: code.to_string(),
        memo_command: memo.to_string(),
    };
    BTreeMap::from([
        (
            "code".to_string(),
            profile(
                r#"code --wait "{corpus_file_path}" "{codes_file_path}""#,
                r#"code --wait "{memo_file_path}""#,
            ),
        ),
        (
            "vim".to_string(),
            profile(
                r#"vim -O "{corpus_file_path}" "{codes_file_path}" -c 'windo set scb!'"#,
                r#"vim "{memo_file_path}""#,
            ),
        ),
        (
            "nvim".to_string(),
            profile(
                r#"nvim -O "{corpus_file_path}" "{codes_file_path}" -c 'windo set scb!'"#,
                r#"nvim "{memo_file_path}""#,
            ),
        ),
        (
            "emacs".to_string(),
            profile(
                r#"emacs -Q --eval '(progn (find-file "{corpus_file_path}") (split-window-right) (other-window 1) (find-file "{codes_file_path}") (scroll-all-mode))'"#,
                r#"emacs "{memo_file_path}""#,
            ),
        ),
    ])
}

/// Resolves `name` against user profiles first, then built-ins.
pub fn resolve_profile(
    name: &str,
    user_profiles: &BTreeMap<String, EditorProfileConfig>,
) -> EditorResult<EditorProfile> {
    if let Some(config) = user_profiles.get(name) {
        return EditorProfile::from_config(name, config);
    }
    let builtins = builtin_profiles();
    let config = builtins
        .get(name)
        .ok_or_else(|| EditorError::UnknownEditor(name.to_string()))?;
    EditorProfile::from_config(name, config)
}

fn parse_segments(kind: CommandKind, word: &str) -> EditorResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for captures in PLACEHOLDER_RE.captures_iter(word) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() > cursor {
            segments.push(Segment::Literal(word[cursor..whole.start()].to_string()));
        }
        let name = captures.get(1).map_or("", |m| m.as_str());
        let placeholder =
            Placeholder::from_name(name).ok_or_else(|| EditorError::UnknownPlaceholder {
                kind,
                name: name.to_string(),
            })?;
        if !kind.allowed().contains(&placeholder) {
            return Err(EditorError::PlaceholderNotAllowed { kind, placeholder });
        }
        segments.push(Segment::Placeholder(placeholder));
        cursor = whole.end();
    }
    if cursor < word.len() || segments.is_empty() {
        segments.push(Segment::Literal(word[cursor..].to_string()));
    }
    Ok(segments)
}

/// Splits `text` into words; `None` on an unterminated quote.
fn split_words(text: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        other => current.push(other),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => match chars.next()? {
                            escaped @ ('"' | '\\') => current.push(escaped),
                            other => {
                                current.push('\\');
                                current.push(other);
                            }
                        },
                        other => current.push(other),
                    }
                }
            }
            ch if ch.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}
