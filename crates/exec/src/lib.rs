//! Tool execution against the vault store.
//!
//! The executor turns a [`ToolCall`] into a concrete keyed operation,
//! applying the safety and resilience policies the agent loop never sees:
//! confirmation gating for destructive tools, vault resolution by trial for
//! globally-addressed notes, change notification after writes, and the
//! indexed-to-manual search fallback.  It never lets an error escape its
//! boundary; every failure lands in the returned [`ToolOutcome`].

pub mod store;
pub mod web;

pub use store::{NoteRecord, SearchHit, VaultInfo, VaultKey, VaultStore};
pub use web::{
    HttpWebClient, TRANSCRIPT_CHAR_CAP, WEBPAGE_CHAR_CAP, WebClient, WebPage,
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use vaultmind_llm::ToolCall;
use vaultmind_tools::ToolName;

/// Exact error text for a confirmation the user declined.
pub const CANCELLED_BY_USER: &str = "Action cancelled by user";

/// Cap on search results from either search path.
pub const SEARCH_RESULT_CAP: usize = 20;

// ── Injected collaborators ───────────────────────────────────────────────────

/// Supplies the access key for one vault.  May prompt a human, may cache
/// derived keys per vault across calls, and may fail (the failure becomes
/// the tool's error for vault-scoped operations).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn vault_key(&self, vault: &VaultInfo) -> Result<VaultKey>;
}

/// Asks the user to approve a destructive operation.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

/// Fire-and-forget notification that vault data changed.
pub trait ChangeNotifier: Send + Sync {
    fn data_changed(&self);
}

/// The executor's injected callback bundle.
///
/// `confirm` is optional by design: when no gate is wired (headless or
/// scripted contexts), destructive tools run without asking.  Denying by
/// default would deadlock non-interactive callers, so absence means allow.
pub struct ExecutorHooks {
    pub keys: Arc<dyn KeyProvider>,
    pub confirm: Option<Arc<dyn ConfirmationGate>>,
    pub on_change: Option<Arc<dyn ChangeNotifier>>,
}

impl ExecutorHooks {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self {
            keys,
            confirm: None,
            on_change: None,
        }
    }

    pub fn with_confirmation(mut self, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.confirm = Some(gate);
        self
    }

    pub fn with_change_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.on_change = Some(notifier);
        self
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

/// Result of executing one tool call.  Exactly one of `output`/`error` is
/// populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_use_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(tool_use_id: &str, output: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.to_string(),
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(tool_use_id: &str, error: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.to_string(),
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

// ── Executor ─────────────────────────────────────────────────────────────────

/// Stateless dispatcher from tool calls to store/web operations.
pub struct ToolExecutor {
    store: Arc<dyn VaultStore>,
    hooks: ExecutorHooks,
    web: Arc<dyn WebClient>,
}

impl ToolExecutor {
    pub fn new(store: Arc<dyn VaultStore>, hooks: ExecutorHooks) -> Self {
        Self {
            store,
            hooks,
            web: Arc::new(HttpWebClient::new()),
        }
    }

    /// Replace the default HTTP client (used by tests and embedders with
    /// their own transport).
    pub fn with_web_client(mut self, web: Arc<dyn WebClient>) -> Self {
        self.web = web;
        self
    }

    /// Execute one tool call.  Never returns an error: unknown tools,
    /// declined confirmations, and operation failures all come back as a
    /// failed [`ToolOutcome`] the model can react to.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let Some(name) = ToolName::parse(&call.name) else {
            warn!(tool = %call.name, "unknown tool requested");
            return ToolOutcome::failure(&call.id, format!("unknown tool: {}", call.name));
        };

        if name.is_destructive() {
            if let Some(gate) = &self.hooks.confirm {
                let message = confirmation_message(name, &call.arguments);
                if !gate.confirm(&message).await {
                    info!(tool = %name, "destructive tool declined by user");
                    return ToolOutcome::failure(&call.id, CANCELLED_BY_USER);
                }
            }
        }

        info!(tool = %name, "executing tool");
        match self.dispatch(name, &call.arguments).await {
            Ok(output) => {
                if name.is_write() {
                    if let Some(notifier) = &self.hooks.on_change {
                        notifier.data_changed();
                    }
                }
                ToolOutcome::success(&call.id, output)
            }
            Err(err) => {
                warn!(tool = %name, err = %format!("{err:#}"), "tool execution failed");
                ToolOutcome::failure(&call.id, format!("{err:#}"))
            }
        }
    }

    async fn dispatch(&self, name: ToolName, args: &Value) -> Result<Value> {
        match name {
            ToolName::ListVaults => Ok(json!(self.store.list_vaults())),
            ToolName::CreateVault => {
                let vault = self.store.create_vault(str_arg(args, "name")?).await?;
                Ok(json!(vault))
            }
            ToolName::RenameVault => {
                let vault_id = i64_arg(args, "vault_id")?;
                let new_name = str_arg(args, "name")?;
                self.store.rename_vault(vault_id, new_name).await?;
                Ok(json!({ "id": vault_id, "name": new_name }))
            }
            ToolName::ListNotes => {
                let vault_id = i64_arg(args, "vault_id")?;
                let (vault, key) = self.keyed_vault(vault_id).await?;
                let notes = self.store.list_notes(vault.id, &key).await?;
                Ok(json!(notes))
            }
            ToolName::GetNote => {
                let note_id = i64_arg(args, "note_id")?;
                let (_, _, note) = self.resolve_note(note_id).await?;
                Ok(json!(note))
            }
            ToolName::SearchNotes => {
                let query = str_arg(args, "query")?;
                self.search_notes(query).await
            }
            ToolName::CreateNote => {
                let vault_id = i64_arg(args, "vault_id")?;
                let title = str_arg(args, "title")?;
                let content = str_arg(args, "content")?;
                let (vault, key) = self.keyed_vault(vault_id).await?;
                let note = self.store.create_note(vault.id, &key, title, content).await?;
                Ok(json!(note))
            }
            ToolName::UpdateNoteTitle => {
                let note_id = i64_arg(args, "note_id")?;
                let title = str_arg(args, "title")?;
                let (vault, key, _) = self.resolve_note(note_id).await?;
                self.store
                    .update_note_title(vault.id, &key, note_id, title)
                    .await?;
                Ok(json!({ "id": note_id, "title": title }))
            }
            ToolName::UpdateNoteContent => {
                let note_id = i64_arg(args, "note_id")?;
                let content = str_arg(args, "content")?;
                let (vault, key, _) = self.resolve_note(note_id).await?;
                self.store
                    .update_note_content(vault.id, &key, note_id, content)
                    .await?;
                Ok(json!({ "id": note_id, "updated": true }))
            }
            ToolName::MoveNote => {
                let note_id = i64_arg(args, "note_id")?;
                let target_vault_id = i64_arg(args, "target_vault_id")?;
                let (source, source_key, _) = self.resolve_note(note_id).await?;
                let (target, target_key) = self.keyed_vault(target_vault_id).await?;
                self.store
                    .move_note(source.id, &source_key, note_id, target.id, &target_key)
                    .await?;
                Ok(json!({ "id": note_id, "vault_id": target.id }))
            }
            ToolName::DeleteNote => {
                let note_id = i64_arg(args, "note_id")?;
                let (vault, key, _) = self.resolve_note(note_id).await?;
                self.store.delete_note(vault.id, &key, note_id).await?;
                Ok(json!({ "id": note_id, "deleted": true }))
            }
            ToolName::FetchWebpage => {
                let url = str_arg(args, "url")?;
                let page = self.web.fetch_page(url).await?;
                Ok(json!(page))
            }
            ToolName::FetchTranscript => {
                let url = str_arg(args, "url")?;
                let transcript = self.web.fetch_transcript(url).await?;
                Ok(json!({ "transcript": transcript }))
            }
            ToolName::SummarizeNote => {
                let note_id = i64_arg(args, "note_id")?;
                // Summarization runs in a separate application flow; this
                // only verifies the note exists and acknowledges.
                let (_, _, note) = self.resolve_note(note_id).await?;
                Ok(json!({ "id": note.id, "status": "summary requested" }))
            }
        }
    }

    /// Look up one vault in the snapshot and obtain its key.  Key-provider
    /// failures propagate: the caller named this vault explicitly.
    async fn keyed_vault(&self, vault_id: i64) -> Result<(VaultInfo, VaultKey)> {
        let vault = self
            .store
            .list_vaults()
            .into_iter()
            .find(|v| v.id == vault_id)
            .ok_or_else(|| anyhow!("unknown vault: {vault_id}"))?;
        let key = self
            .hooks
            .keys
            .vault_key(&vault)
            .await
            .with_context(|| format!("no key for vault '{}'", vault.name))?;
        Ok((vault, key))
    }

    /// Find which vault holds `note_id` by trying each one.  Per-vault
    /// failures (locked vault, wrong key, note elsewhere) are swallowed;
    /// only exhaustion reports an error.
    async fn resolve_note(&self, note_id: i64) -> Result<(VaultInfo, VaultKey, NoteRecord)> {
        for vault in self.store.list_vaults() {
            let key = match self.hooks.keys.vault_key(&vault).await {
                Ok(key) => key,
                Err(err) => {
                    debug!(vault = vault.id, err = %err, "skipping vault, no key");
                    continue;
                }
            };
            match self.store.get_note(vault.id, &key, note_id).await {
                Ok(note) => return Ok((vault, key, note)),
                Err(err) => {
                    debug!(vault = vault.id, err = %err, "note not in vault");
                }
            }
        }
        bail!("note {note_id} not found in any vault")
    }

    /// Indexed search with a manual fallback scan across all vaults.
    async fn search_notes(&self, query: &str) -> Result<Value> {
        match self.store.search_index(query, SEARCH_RESULT_CAP).await {
            Ok(hits) => Ok(json!(hits)),
            Err(err) => {
                warn!(err = %err, "indexed search unavailable, scanning vaults");
                Ok(json!(self.scan_vaults(query).await))
            }
        }
    }

    /// Linear scan over every readable note, matching case-insensitively on
    /// title, content, and summary.  Per-vault failures are skipped; this
    /// path never errors.
    async fn scan_vaults(&self, query: &str) -> Vec<SearchHit> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        'vaults: for vault in self.store.list_vaults() {
            let key = match self.hooks.keys.vault_key(&vault).await {
                Ok(key) => key,
                Err(_) => continue,
            };
            let notes = match self.store.list_notes(vault.id, &key).await {
                Ok(notes) => notes,
                Err(_) => continue,
            };
            for note in notes {
                let matched = note.title.to_lowercase().contains(&needle)
                    || note.content.to_lowercase().contains(&needle)
                    || note
                        .summary
                        .as_ref()
                        .is_some_and(|s| s.to_lowercase().contains(&needle));
                if matched {
                    let (snippet, _) = web::clip_chars(&note.content, 160);
                    hits.push(SearchHit {
                        note_id: note.id,
                        vault_id: note.vault_id,
                        title: note.title,
                        snippet,
                    });
                    if hits.len() >= SEARCH_RESULT_CAP {
                        break 'vaults;
                    }
                }
            }
        }
        hits
    }
}

// ── Argument helpers ─────────────────────────────────────────────────────────

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing required argument: {key}"))
}

/// Integer argument; tolerates models that emit numbers as strings.
fn i64_arg(args: &Value, key: &str) -> Result<i64> {
    match args.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| anyhow!("argument {key} is not an integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| anyhow!("argument {key} is not an integer: {s:?}")),
        _ => bail!("missing required argument: {key}"),
    }
}

fn confirmation_message(name: ToolName, args: &Value) -> String {
    let detail = args
        .as_object()
        .map(|obj| {
            obj.iter()
                .take(3)
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => {
                            let (clipped, cut) = web::clip_chars(s, 60);
                            if cut { format!("{clipped}…") } else { clipped }
                        }
                        other => other.to_string(),
                    };
                    format!("{k}={rendered}")
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    if detail.is_empty() {
        format!("Allow {name}?")
    } else {
        format!("Allow {name} ({detail})?")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
