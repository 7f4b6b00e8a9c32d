//! The closed tool catalog.
//!
//! Every operation the model may request is a [`ToolName`] variant, so the
//! executor's dispatch is an exhaustive match and adding a tool is a
//! compile-time-checked change rather than a string comparison.  The catalog
//! renders two ways: a strict JSON schema for native tool calling and a
//! compact text summary for the prompt-fallback flavor.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

// ── Tool identifiers ─────────────────────────────────────────────────────────

/// Every tool the agent can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ListVaults,
    CreateVault,
    RenameVault,
    ListNotes,
    GetNote,
    SearchNotes,
    CreateNote,
    UpdateNoteTitle,
    UpdateNoteContent,
    MoveNote,
    DeleteNote,
    FetchWebpage,
    FetchTranscript,
    SummarizeNote,
}

impl ToolName {
    pub const ALL: [ToolName; 14] = [
        ToolName::ListVaults,
        ToolName::CreateVault,
        ToolName::RenameVault,
        ToolName::ListNotes,
        ToolName::GetNote,
        ToolName::SearchNotes,
        ToolName::CreateNote,
        ToolName::UpdateNoteTitle,
        ToolName::UpdateNoteContent,
        ToolName::MoveNote,
        ToolName::DeleteNote,
        ToolName::FetchWebpage,
        ToolName::FetchTranscript,
        ToolName::SummarizeNote,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::ListVaults => "list_vaults",
            ToolName::CreateVault => "create_vault",
            ToolName::RenameVault => "rename_vault",
            ToolName::ListNotes => "list_notes",
            ToolName::GetNote => "get_note",
            ToolName::SearchNotes => "search_notes",
            ToolName::CreateNote => "create_note",
            ToolName::UpdateNoteTitle => "update_note_title",
            ToolName::UpdateNoteContent => "update_note_content",
            ToolName::MoveNote => "move_note",
            ToolName::DeleteNote => "delete_note",
            ToolName::FetchWebpage => "fetch_webpage",
            ToolName::FetchTranscript => "fetch_transcript",
            ToolName::SummarizeNote => "summarize_note",
        }
    }

    /// Resolve a wire name to a catalog entry.  `None` means "unknown tool"
    /// and must surface as a failed tool result, never a panic.
    pub fn parse(name: &str) -> Option<ToolName> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Hard-to-reverse operations gated behind user confirmation.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            ToolName::DeleteNote | ToolName::UpdateNoteContent | ToolName::MoveNote
        )
    }

    /// Operations that mutate vaults or notes; observers are notified after
    /// any of these succeeds.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ToolName::CreateVault
                | ToolName::RenameVault
                | ToolName::CreateNote
                | ToolName::UpdateNoteTitle
                | ToolName::UpdateNoteContent
                | ToolName::MoveNote
                | ToolName::DeleteNote
        )
    }

    pub fn spec(self) -> ToolSpec {
        match self {
            ToolName::ListVaults => ToolSpec::new(self, "List all vaults with their id, name, and protection flag.", vec![]),
            ToolName::CreateVault => ToolSpec::new(
                self,
                "Create a new vault.",
                vec![ToolParam::required("name", "Name for the new vault")],
            ),
            ToolName::RenameVault => ToolSpec::new(
                self,
                "Rename an existing vault.",
                vec![
                    ToolParam::integer("vault_id", "Id of the vault to rename"),
                    ToolParam::required("name", "New vault name"),
                ],
            ),
            ToolName::ListNotes => ToolSpec::new(
                self,
                "List the notes in one vault.",
                vec![ToolParam::integer("vault_id", "Id of the vault to list")],
            ),
            ToolName::GetNote => ToolSpec::new(
                self,
                "Fetch a note by id. The containing vault is located automatically.",
                vec![ToolParam::integer("note_id", "Id of the note")],
            ),
            ToolName::SearchNotes => ToolSpec::new(
                self,
                "Search notes across all vaults by title, content, or summary.",
                vec![ToolParam::required("query", "Search query string")],
            ),
            ToolName::CreateNote => ToolSpec::new(
                self,
                "Create a note in a vault.",
                vec![
                    ToolParam::integer("vault_id", "Vault to create the note in"),
                    ToolParam::required("title", "Note title"),
                    ToolParam::required("content", "Note body"),
                ],
            ),
            ToolName::UpdateNoteTitle => ToolSpec::new(
                self,
                "Change a note's title.",
                vec![
                    ToolParam::integer("note_id", "Id of the note"),
                    ToolParam::required("title", "New title"),
                ],
            ),
            ToolName::UpdateNoteContent => ToolSpec::new(
                self,
                "Replace a note's content. This overwrites the existing body.",
                vec![
                    ToolParam::integer("note_id", "Id of the note"),
                    ToolParam::required("content", "New note body"),
                ],
            ),
            ToolName::MoveNote => ToolSpec::new(
                self,
                "Move a note into another vault.",
                vec![
                    ToolParam::integer("note_id", "Id of the note to move"),
                    ToolParam::integer("target_vault_id", "Destination vault id"),
                ],
            ),
            ToolName::DeleteNote => ToolSpec::new(
                self,
                "Permanently delete a note.",
                vec![ToolParam::integer("note_id", "Id of the note to delete")],
            ),
            ToolName::FetchWebpage => ToolSpec::new(
                self,
                "Fetch a web page and return its plain text (truncated at 10000 characters).",
                vec![ToolParam::required("url", "http(s) URL to fetch")],
            ),
            ToolName::FetchTranscript => ToolSpec::new(
                self,
                "Fetch a video transcript when one is available (truncated at 15000 characters).",
                vec![ToolParam::required("url", "Video URL")],
            ),
            ToolName::SummarizeNote => ToolSpec::new(
                self,
                "Request a summary of a note. Summarization runs in a separate flow; this only acknowledges the request.",
                vec![ToolParam::integer("note_id", "Id of the note to summarize")],
            ),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Specs ────────────────────────────────────────────────────────────────────

/// JSON-friendly type hint for a tool parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
}

impl ParamType {
    fn json_name(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
        }
    }
}

/// Describes a single parameter that a tool accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub param_type: ParamType,
}

impl ToolParam {
    pub fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: true,
            param_type: ParamType::String,
        }
    }

    pub fn integer(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: true,
            param_type: ParamType::Integer,
        }
    }
}

/// Static metadata about a tool, used by the model to decide what to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: &'static str,
    pub params: Vec<ToolParam>,
}

impl ToolSpec {
    fn new(name: ToolName, description: &'static str, params: Vec<ToolParam>) -> Self {
        Self {
            name,
            description,
            params,
        }
    }

    /// Messages-API tool schema element:
    ///
    /// ```json
    /// {
    ///   "name": "search_notes",
    ///   "description": "...",
    ///   "input_schema": {
    ///     "type": "object",
    ///     "properties": { ... },
    ///     "required": [...]
    ///   }
    /// }
    /// ```
    pub fn to_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<&str> = Vec::new();
        for p in &self.params {
            properties.insert(
                p.name.to_string(),
                json!({
                    "type": p.param_type.json_name(),
                    "description": p.description,
                }),
            );
            if p.required {
                required.push(p.name);
            }
        }
        json!({
            "name": self.name.as_str(),
            "description": self.description,
            "input_schema": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }

    /// One-tool entry for the prompt-fallback text summary.
    pub fn prompt_line(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                format!(
                    "{}: {} ({})",
                    p.name,
                    p.description,
                    if p.required { "required" } else { "optional" }
                )
            })
            .collect();
        if params.is_empty() {
            format!("- {}: {}", self.name, self.description)
        } else {
            format!(
                "- {}: {}\n  params: {}",
                self.name,
                self.description,
                params.join(", ")
            )
        }
    }
}

/// The full catalog as a JSON schema array for native tool calling.
pub fn catalog_schema() -> Value {
    Value::Array(ToolName::ALL.iter().map(|t| t.spec().to_schema()).collect())
}

/// The full catalog as a compact text block for the fallback system prompt.
pub fn catalog_summary() -> String {
    ToolName::ALL
        .iter()
        .map(|t| t.spec().prompt_line())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────
