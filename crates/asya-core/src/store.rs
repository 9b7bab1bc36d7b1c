//! Call store: the single persistence sink written once per call at hang-up.
//!
//! `SledCallStore` keeps two trees: `calls` (record id → [`StoredCall`]) and `clients`
//! (normalised phone → [`ClientRecord`]). Both are updated in one sled transaction so a call
//! and its client index never disagree.

use crate::conversation::{ChatMessage, TranscriptSegment};
use crate::error::{CoreError, CoreResult};
use crate::phone::normalize_phone;
use crate::profile::CallProfile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use tracing::info;

const CALLS_TREE: &str = "calls";
const CLIENTS_TREE: &str = "clients";

/// Per-call counters kept alongside the transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    pub turns: u32,
    pub fallbacks: u32,
    pub interruptions: u32,
    pub failed_turns: u32,
}

/// Everything a finished call leaves behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Telephony call identifier (channel id).
    pub call_id: String,
    pub caller_number: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub profile: CallProfile,
    pub transcript: Vec<TranscriptSegment>,
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub stats: CallStats,
}

/// A committed call as stored in the `calls` tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCall {
    pub record_id: String,
    pub client_id: String,
    pub record: CallRecord,
}

/// Known caller, keyed by normalised phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    pub call_count: u32,
    pub last_call_id: String,
    pub last_call_at: DateTime<Utc>,
}

impl ClientRecord {
    fn first_call(phone: &str, record_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            phone: phone.to_string(),
            name: None,
            city: None,
            organization: None,
            call_count: 0,
            last_call_id: record_id.to_string(),
            last_call_at: at,
        }
    }

    /// Fold a finished call into the client entry; newer non-empty facts win.
    fn absorb(&mut self, profile: &CallProfile, record_id: &str, at: DateTime<Utc>) {
        if profile.name.is_some() {
            self.name = profile.name.clone();
        }
        if profile.city.is_some() {
            self.city = profile.city.clone();
        }
        if profile.organization.is_some() {
            self.organization = profile.organization.clone();
        }
        self.call_count += 1;
        self.last_call_id = record_id.to_string();
        self.last_call_at = at;
    }
}

/// Persistence sink for finished calls.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Atomically persist one call. Returns the stored record id. Committing the same record
    /// again is a no-op that returns the same id.
    async fn commit_call(&self, record: &CallRecord) -> CoreResult<String>;

    /// Look up a caller by phone (any format accepted by `normalize_phone`).
    async fn find_client(&self, phone: &str) -> CoreResult<Option<ClientRecord>>;
}

/// Sled-backed [`CallStore`].
pub struct SledCallStore {
    db: Db,
    calls: Tree,
    clients: Tree,
}

impl SledCallStore {
    /// Opens or creates the store under `<path>`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let db = sled::open(path)?;
        let calls = db.open_tree(CALLS_TREE)?;
        let clients = db.open_tree(CLIENTS_TREE)?;
        Ok(Self { db, calls, clients })
    }

    pub fn get_call(&self, record_id: &str) -> CoreResult<Option<StoredCall>> {
        match self.calls.get(record_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// Stable per call, so a repeated commit of the same record lands on the same key.
    fn record_key(record: &CallRecord) -> String {
        format!("{}@{}", record.call_id, record.started_at.timestamp_micros())
    }

    fn client_key(record: &CallRecord) -> Option<String> {
        record
            .profile
            .phone
            .as_deref()
            .and_then(normalize_phone)
            .or_else(|| normalize_phone(&record.caller_number))
    }
}

#[async_trait]
impl CallStore for SledCallStore {
    async fn commit_call(&self, record: &CallRecord) -> CoreResult<String> {
        let record_id = Self::record_key(record);
        let phone_key = Self::client_key(record);

        let outcome = (&self.calls, &self.clients).transaction(|(calls, clients)| {
            // A retry after a failed flush finds its own earlier write.
            if let Some(bytes) = calls.get(record_id.as_bytes())? {
                let stored: StoredCall = serde_json::from_slice(&bytes)
                    .map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;
                return Ok((stored.client_id, false));
            }

            let existing = match &phone_key {
                Some(key) => clients.get(key.as_bytes())?,
                None => None,
            };
            let mut client = match existing {
                Some(bytes) => serde_json::from_slice::<ClientRecord>(&bytes)
                    .map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?,
                None => ClientRecord::first_call(
                    phone_key.as_deref().unwrap_or(&record.caller_number),
                    &record_id,
                    record.ended_at,
                ),
            };
            client.absorb(&record.profile, &record_id, record.ended_at);

            let mut profile = record.profile.clone();
            profile.client_id = Some(client.client_id.clone());
            let stored = StoredCall {
                record_id: record_id.clone(),
                client_id: client.client_id.clone(),
                record: CallRecord {
                    profile,
                    ..record.clone()
                },
            };
            let call_bytes = serde_json::to_vec(&stored)
                .map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;
            calls.insert(record_id.as_bytes(), call_bytes)?;

            if let Some(key) = &phone_key {
                let client_bytes = serde_json::to_vec(&client)
                    .map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;
                clients.insert(key.as_bytes(), client_bytes)?;
            }
            Ok((client.client_id, true))
        });

        let (client_id, fresh) = match outcome {
            Ok(done) => done,
            Err(TransactionError::Abort(msg)) => return Err(CoreError::Store(msg)),
            Err(TransactionError::Storage(e)) => return Err(e.into()),
        };
        self.db.flush_async().await?;

        if fresh {
            info!(
                call_id = %record.call_id,
                record_id = %record_id,
                client_id = %client_id,
                segments = record.transcript.len(),
                "call committed"
            );
        } else {
            info!(call_id = %record.call_id, record_id = %record_id, "call already committed");
        }
        Ok(record_id)
    }

    async fn find_client(&self, phone: &str) -> CoreResult<Option<ClientRecord>> {
        let Some(key) = normalize_phone(phone) else {
            return Ok(None);
        };
        match self.clients.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
