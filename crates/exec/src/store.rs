//! Storage boundary: the encrypted vault store the application implements.
//!
//! The executor never touches ciphertext or a database directly; every note
//! operation goes through this trait with a key obtained from the caller's
//! [`KeyProvider`](crate::KeyProvider).

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One vault as seen in the caller's snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultInfo {
    pub id: i64,
    pub name: String,
    /// Password-protected vaults need a real derived key; unprotected ones
    /// still go through the key provider, which may answer cheaply.
    pub protected: bool,
}

/// A decrypted note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: i64,
    pub vault_id: i64,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// One match from indexed or manual search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub note_id: i64,
    pub vault_id: i64,
    pub title: String,
    pub snippet: String,
}

/// Opaque access credential for one vault.  The executor never inspects it;
/// it only ferries it from the key provider to the store.
#[derive(Clone, PartialEq, Eq)]
pub struct VaultKey(pub Vec<u8>);

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        write!(f, "VaultKey(..)")
    }
}

/// The application's vault/note storage.
///
/// All fallible operations are scoped to one vault and fail when the note
/// does not live there; the executor relies on that to resolve a global
/// note id by trying each vault in turn.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Synchronous snapshot of known vaults.
    fn list_vaults(&self) -> Vec<VaultInfo>;

    async fn create_vault(&self, name: &str) -> Result<VaultInfo>;

    async fn rename_vault(&self, vault_id: i64, name: &str) -> Result<()>;

    async fn list_notes(&self, vault_id: i64, key: &VaultKey) -> Result<Vec<NoteRecord>>;

    /// Errors when `note_id` is not in `vault_id` (or the key is wrong).
    async fn get_note(&self, vault_id: i64, key: &VaultKey, note_id: i64) -> Result<NoteRecord>;

    async fn create_note(
        &self,
        vault_id: i64,
        key: &VaultKey,
        title: &str,
        content: &str,
    ) -> Result<NoteRecord>;

    async fn update_note_title(
        &self,
        vault_id: i64,
        key: &VaultKey,
        note_id: i64,
        title: &str,
    ) -> Result<()>;

    async fn update_note_content(
        &self,
        vault_id: i64,
        key: &VaultKey,
        note_id: i64,
        content: &str,
    ) -> Result<()>;

    /// Re-encrypts the note under the target vault's key and removes it from
    /// the source vault.  Implementations should keep this atomic.
    async fn move_note(
        &self,
        vault_id: i64,
        key: &VaultKey,
        note_id: i64,
        target_vault_id: i64,
        target_key: &VaultKey,
    ) -> Result<()>;

    async fn delete_note(&self, vault_id: i64, key: &VaultKey, note_id: i64) -> Result<()>;

    /// Fast indexed search.  Allowed to fail (index missing, not yet built);
    /// the executor then falls back to a manual scan.
    async fn search_index(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}
