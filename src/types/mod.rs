use regex::Regex;
use serde::{Deserialize, Serialize};

// ===================================================================
// Shared Enums
// ===================================================================

/// Why a session boundary fired (used by SessionStart).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStartSource {
    #[default]
    Startup,
    Resume,
    Clear,
    Compact,
}

impl SessionStartSource {
    /// Parse a boundary reason, falling back to `Startup` for anything unknown.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "resume" => Self::Resume,
            "clear" => Self::Clear,
            "compact" => Self::Compact,
            _ => Self::Startup,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Resume => "resume",
            Self::Clear => "clear",
            Self::Compact => "compact",
        }
    }

    /// Boundaries after which pending ledger entries may have fallen out of
    /// the agent's context.
    pub fn is_recovery(self) -> bool {
        !matches!(self, Self::Startup)
    }
}

// ===================================================================
// Hook Input Types (received via stdin, snake_case JSON)
// ===================================================================

/// Fields shared by all hook event inputs. Only the project directory
/// matters here; session ids, transcripts and the rest are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonInput {
    pub cwd: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionStartInput {
    #[serde(flatten)]
    pub common: CommonInput,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreToolUseInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct PostToolUseInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StopInput {
    #[serde(flatten)]
    pub common: CommonInput,
    #[serde(default)]
    pub stop_hook_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct PreCompactInput {
    #[serde(flatten)]
    pub common: CommonInput,
}

/// Top-level hook input, deserialized from stdin JSON.
///
/// Tagged by the `hook_event_name` field to determine which event fired.
#[derive(Debug, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookInput {
    SessionStart(SessionStartInput),
    PreToolUse(PreToolUseInput),
    PostToolUse(PostToolUseInput),
    Stop(StopInput),
    PreCompact(PreCompactInput),
}

impl HookInput {
    /// Access the common fields shared by all hook events.
    pub fn common(&self) -> &CommonInput {
        match self {
            Self::SessionStart(e) => &e.common,
            Self::PreToolUse(e) => &e.common,
            Self::PostToolUse(e) => &e.common,
            Self::Stop(e) => &e.common,
            Self::PreCompact(e) => &e.common,
        }
    }
}

// ===================================================================
// Tool-Specific Input Types
// ===================================================================

/// Parsed tool call, matching `tool_name` to a typed `tool_input`.
#[derive(Debug)]
pub enum ToolCall {
    Bash(BashToolInput),
    Write(FileToolInput),
    Edit(FileToolInput),
    MultiEdit(FileToolInput),
    /// Any tool the ledger does not track.
    Other,
}

impl ToolCall {
    pub fn parse(
        tool_name: &str,
        tool_input: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        match tool_name {
            "Bash" => Ok(Self::Bash(serde_json::from_value(tool_input.clone())?)),
            "Write" => Ok(Self::Write(serde_json::from_value(tool_input.clone())?)),
            "Edit" => Ok(Self::Edit(serde_json::from_value(tool_input.clone())?)),
            "MultiEdit" => Ok(Self::MultiEdit(serde_json::from_value(tool_input.clone())?)),
            _ => Ok(Self::Other),
        }
    }
}

impl PreToolUseInput {
    pub fn tool_call(&self) -> Result<ToolCall, serde_json::Error> {
        ToolCall::parse(&self.tool_name, &self.tool_input)
    }
}

impl PostToolUseInput {
    pub fn tool_call(&self) -> Result<ToolCall, serde_json::Error> {
        ToolCall::parse(&self.tool_name, &self.tool_input)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BashToolInput {
    pub command: String,
}

/// Input shared by the file-writing tools; only the path matters here.
#[derive(Debug, Clone, Deserialize)]
pub struct FileToolInput {
    pub file_path: String,
}

// ===================================================================
// Normalized events
// ===================================================================

/// What a single hook invocation asks of us, independent of how the input
/// arrived (typed JSON or the degraded text scan).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A shell command is about to run.
    BeforeCommand,
    /// A shell command just ran.
    AfterCommand { command: Option<String> },
    /// A file-writing tool just ran.
    AfterEdit { file_path: String },
    SessionStart { source: SessionStartSource },
    Stop { stop_hook_active: bool },
    PreCompact,
    Ignored,
}

/// A decoded invocation: the project it concerns (if the input named one)
/// and the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub cwd: Option<String>,
    pub event: Event,
}

impl Invocation {
    /// Decode stdin. Valid JSON goes through the typed path; anything else
    /// falls back to [`Invocation::scan`].
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<HookInput>(raw) {
            Ok(input) => match Event::from_input(&input) {
                Some(event) => Self {
                    cwd: Some(input.common().cwd.clone()),
                    event,
                },
                None => Self::scan(raw),
            },
            Err(err) => {
                tracing::debug!("hook input is not a known event ({err}), scanning raw text");
                Self::scan(raw)
            }
        }
    }

    /// Best-effort extraction from input that failed to deserialize.
    pub fn scan(raw: &str) -> Self {
        let cwd = scan_field(raw, "cwd");
        let event = match scan_field(raw, "hook_event_name").as_deref() {
            Some("PreToolUse") if scan_field(raw, "tool_name").as_deref() == Some("Bash") => {
                Event::BeforeCommand
            }
            Some("PostToolUse") => match scan_field(raw, "tool_name").as_deref() {
                Some("Bash") => Event::AfterCommand {
                    command: scan_field(raw, "command"),
                },
                Some("Write" | "Edit" | "MultiEdit") => match scan_field(raw, "file_path") {
                    Some(file_path) => Event::AfterEdit { file_path },
                    None => Event::Ignored,
                },
                _ => Event::Ignored,
            },
            Some("SessionStart") => Event::SessionStart {
                source: scan_field(raw, "source")
                    .map(|s| SessionStartSource::parse_lenient(&s))
                    .unwrap_or_default(),
            },
            Some("Stop") => Event::Stop {
                stop_hook_active: scan_flag(raw, "stop_hook_active"),
            },
            Some("PreCompact") => Event::PreCompact,
            _ => Event::Ignored,
        };
        Self { cwd, event }
    }
}

impl Event {
    /// Reduce a typed input to an event. `None` means a tool input did not
    /// match its expected shape and the caller should scan instead.
    pub fn from_input(input: &HookInput) -> Option<Self> {
        let event = match input {
            HookInput::SessionStart(e) => Event::SessionStart {
                source: e
                    .source
                    .as_deref()
                    .map(SessionStartSource::parse_lenient)
                    .unwrap_or_default(),
            },
            HookInput::PreToolUse(e) => match e.tool_call().ok()? {
                ToolCall::Bash(_) => Event::BeforeCommand,
                _ => Event::Ignored,
            },
            HookInput::PostToolUse(e) => match e.tool_call().ok()? {
                ToolCall::Bash(b) => Event::AfterCommand {
                    command: Some(b.command),
                },
                ToolCall::Write(f) | ToolCall::Edit(f) | ToolCall::MultiEdit(f) => {
                    Event::AfterEdit {
                        file_path: f.file_path,
                    }
                }
                ToolCall::Other => Event::Ignored,
            },
            HookInput::Stop(e) => Event::Stop {
                stop_hook_active: e.stop_hook_active,
            },
            HookInput::PreCompact(_) => Event::PreCompact,
        };
        Some(event)
    }
}

/// Find `"name": "value"` in raw text and undo the JSON escapes for
/// backslashes and quotes.
fn scan_field(raw: &str, name: &str) -> Option<String> {
    let pattern = format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(raw)?.get(1)?.as_str();
    let value = value.replace(r"\\", "\u{0}").replace(r#"\""#, "\"").replace('\u{0}', r"\");
    (!value.is_empty()).then_some(value)
}

fn scan_flag(raw: &str, name: &str) -> bool {
    let pattern = format!(r#""{}"\s*:\s*true"#, regex::escape(name));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(raw))
}

// ===================================================================
// Hook Output Types (written to stdout as JSON, camelCase)
// ===================================================================

/// Top-level hook output written to stdout on exit code 0.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    /// If `true`, hides stdout from verbose mode output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,

    /// Message shown to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    /// Event-specific output fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

/// Event-specific output, tagged by `hookEventName`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "hookEventName")]
pub enum HookSpecificOutput {
    SessionStart(AdditionalContext),
    PostToolUse(AdditionalContext),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

/// What a handler wants the process to surface.
#[derive(Debug)]
pub enum Response {
    /// Nothing to say; exit 0 with no output.
    Silent,
    /// Informational JSON on stdout; exit 0.
    Inform(HookOutput),
    /// Advisory text on stderr; exit 2 so the host shows it.
    Advise(String),
}

impl Response {
    pub fn hint(message: impl Into<String>) -> Self {
        Self::Inform(HookOutput {
            system_message: Some(message.into()),
            ..Default::default()
        })
    }

    #[cfg(test)]
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Silent)
    }
}
