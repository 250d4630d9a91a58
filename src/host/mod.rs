//! Host API: the single write path to the vault.
//!
//! Every mutation — from tools, plugins, or the HTTP surface — funnels
//! through [`HostApi`]. The write pipeline validates metadata against
//! per-kind schemas, assigns stable IDs, enforces the task state machine,
//! takes the per-entity lock, journals the mutation for link-graph crash
//! recovery, writes the file atomically, updates forward and backlinks, and
//! emits `entity.*` lifecycle events on the bus.
//!
//! Direct filesystem writes to the vault from other components are denied
//! by policy; the vault store is only reachable through this module.

pub mod aliases;
pub mod audit;
pub mod fsm;
pub mod id;
pub mod journal;
pub mod links;
pub mod schema;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, EventEnvelope};
use crate::config::FeatureFlags;
use crate::timeutil;
use crate::vault::{VaultError, VaultStore};

use self::aliases::AliasMap;
use self::audit::{AuditEventType, AuditLogger};
use self::fsm::{FsmViolation, TaskState, TransitionEffect};
use self::journal::{JournalError, JournalOp, LinkJournal};
use self::links::LinkGraph;
use self::schema::SchemaCache;

/// Default per-entity lock acquisition timeout.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Timebox span when `features.timeboxing` creates a companion event.
const TIMEBOX_SPAN_SECS: i64 = 3600;

// ---------------------------------------------------------------------------
// Entity model
// ---------------------------------------------------------------------------

/// The kind of a vault entity. Determines its directory and schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A task with lifecycle state.
    Task,
    /// A freeform note.
    Note,
    /// A calendar event.
    Event,
    /// A meeting record.
    Meeting,
    /// A project.
    Project,
    /// A contact.
    Contact,
    /// Any other kind; the vault layout is extensible.
    Other(String),
}

impl EntityKind {
    /// Canonical lowercase name (`task`, `note`, …).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Task => "task",
            Self::Note => "note",
            Self::Event => "event",
            Self::Meeting => "meeting",
            Self::Project => "project",
            Self::Contact => "contact",
            Self::Other(name) => name,
        }
    }

    /// Parse a kind name; unknown names land in [`EntityKind::Other`].
    pub fn parse(s: &str) -> Self {
        match s {
            "task" => Self::Task,
            "note" => Self::Note,
            "event" => Self::Event,
            "meeting" => Self::Meeting,
            "project" => Self::Project,
            "contact" => Self::Contact,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Vault directory for this kind: `{kind}s`.
    pub fn dir_name(&self) -> String {
        format!("{}s", self.as_str())
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for EntityKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for EntityKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// A vault entity: frontmatter metadata plus Markdown body.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Entity {
    /// Stable identifier, `<kind>-<YYYYMMDD>-<HHmm>-<slug>`.
    pub id: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Frontmatter metadata, canonically ordered.
    pub metadata: BTreeMap<String, Value>,
    /// Markdown body.
    pub content: String,
    /// Filesystem location under the vault root.
    pub path: PathBuf,
}

impl Entity {
    /// The `title` metadata field.
    pub fn title(&self) -> &str {
        self.metadata
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Task state, when this entity is a task with a valid `status`.
    pub fn task_state(&self) -> Option<TaskState> {
        self.metadata
            .get("status")
            .and_then(Value::as_str)
            .and_then(TaskState::parse)
    }
}

/// A partial update: metadata keys to set (JSON `null` removes a key) and an
/// optional replacement body.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    /// Metadata keys to merge.
    pub metadata: BTreeMap<String, Value>,
    /// Replacement Markdown body, when present.
    pub content: Option<String>,
}

/// Filter for [`HostApi::list_entities`].
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    /// Keep only tasks in this state.
    pub state: Option<TaskState>,
    /// Keep only entities carrying this tag.
    pub tag: Option<String>,
    /// Keep only entities whose title contains this substring
    /// (case-insensitive).
    pub title_contains: Option<String>,
}

impl EntityFilter {
    /// Whether an entity passes the filter.
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(state) = self.state {
            if entity.task_state() != Some(state) {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            let has_tag = matches!(
                entity.metadata.get("tags"),
                Some(Value::Array(tags)) if tags.iter().any(|t| t.as_str() == Some(tag))
            );
            if !has_tag {
                return false;
            }
        }
        if let Some(ref needle) = self.title_contains {
            if !entity
                .title()
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from Host API operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Metadata failed schema or built-in validation.
    #[error("validation failed: {}", reasons.join("; "))]
    Validation {
        /// Human-readable violation messages.
        reasons: Vec<String>,
    },
    /// No entity with the given ID (after alias resolution).
    #[error("entity not found: {id}")]
    NotFound {
        /// Requested ID.
        id: String,
    },
    /// An explicit ID collides with an existing entity.
    #[error("duplicate entity id: {id}")]
    DuplicateId {
        /// Colliding ID.
        id: String,
    },
    /// A task transition violated the state machine.
    #[error(transparent)]
    FsmGuard(#[from] FsmViolation),
    /// An on-disk entity could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),
    /// A per-entity lock could not be acquired in time.
    #[error("lock timeout for entity {id}")]
    LockTimeout {
        /// Contended entity.
        id: String,
    },
    /// The idempotency ledger failed.
    #[error("ledger error: {0}")]
    Store(#[from] sqlx::Error),
}

impl HostError {
    fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reasons: vec![reason.into()],
        }
    }
}

impl From<VaultError> for HostError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Io(io) => Self::Io(io.to_string()),
            VaultError::Parse { path, source } => {
                Self::Parse(format!("{}: {source}", path.display()))
            }
            VaultError::IdMismatch { path, found } => {
                Self::Parse(format!("{}: id mismatch ({found})", path.display()))
            }
            VaultError::LockTimeout { entity_id } => Self::LockTimeout { id: entity_id },
        }
    }
}

impl From<JournalError> for HostError {
    fn from(e: JournalError) -> Self {
        Self::Io(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Host API
// ---------------------------------------------------------------------------

/// Shared dependencies of the Host API.
///
/// Bundled into a single struct to avoid long constructor parameter lists.
pub struct HostDeps {
    /// Vault file store.
    pub vault: Arc<VaultStore>,
    /// Per-kind metadata schemas.
    pub schemas: Arc<SchemaCache>,
    /// Audit trail.
    pub audit: Arc<AuditLogger>,
    /// Event bus for lifecycle events.
    pub bus: Arc<EventBus>,
    /// SQLite pool holding the `sync_ledger` table.
    pub db: SqlitePool,
    /// Timezone for ID stamps.
    pub tz: Tz,
    /// Feature flags (timeboxing, graph validation).
    pub features: FeatureFlags,
}

/// The single gateway for vault mutations.
pub struct HostApi {
    vault: Arc<VaultStore>,
    schemas: Arc<SchemaCache>,
    links: Arc<LinkGraph>,
    journal: LinkJournal,
    aliases: AliasMap,
    audit: Arc<AuditLogger>,
    bus: Arc<EventBus>,
    db: SqlitePool,
    tz: Tz,
    features: FeatureFlags,
    lock_timeout: Duration,
}

impl std::fmt::Debug for HostApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostApi")
            .field("vault", &self.vault.root())
            .finish_non_exhaustive()
    }
}

impl HostApi {
    /// Build the Host API, preparing the ledger table and recovering the
    /// link graph from the journal and filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the ledger table or journal cannot be
    /// prepared.
    pub async fn new(deps: HostDeps) -> Result<Self, HostError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_ledger (
                idem_key TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                created_ts TEXT NOT NULL
            )",
        )
        .execute(&deps.db)
        .await?;

        let kira_dir = deps.vault.root().join(".kira");
        let journal = LinkJournal::open(kira_dir.join("link_journal.jsonl"))?;
        let aliases = AliasMap::load(kira_dir.join("aliases.json"));

        let host = Self {
            vault: deps.vault,
            schemas: deps.schemas,
            links: Arc::new(LinkGraph::new()),
            journal,
            aliases,
            audit: deps.audit,
            bus: deps.bus,
            db: deps.db,
            tz: deps.tz,
            features: deps.features,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };

        host.recover_link_graph()?;
        Ok(host)
    }

    /// The link graph (read access for tools and verification).
    pub fn links(&self) -> &Arc<LinkGraph> {
        &self.links
    }

    /// The vault store root path.
    pub fn vault_root(&self) -> &std::path::Path {
        self.vault.root()
    }

    // -- Read path ---------------------------------------------------------

    /// Read one entity by ID, following aliases after a direct miss.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotFound`] when neither the ID nor an alias
    /// target exists, [`HostError::Parse`] for malformed files.
    pub fn read_entity(&self, entity_id: &str) -> Result<Entity, HostError> {
        let (canonical, kind, path) = self.resolve(entity_id)?;
        let (metadata, content) = self.vault.read_checked(&path)?;
        Ok(Entity {
            id: canonical,
            kind,
            metadata,
            content,
            path,
        })
    }

    /// Lazily list entities of a kind, skipping unparseable files with a
    /// warning and applying the filter.
    pub fn list_entities<'a>(
        &'a self,
        kind: &EntityKind,
        filter: &'a EntityFilter,
    ) -> impl Iterator<Item = Entity> + 'a {
        let kind = kind.clone();
        self.vault
            .list(&kind.dir_name())
            .filter_map(move |path| match self.vault.read_checked(&path) {
                Ok((metadata, content)) => {
                    let id = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_owned();
                    Some(Entity {
                        id,
                        kind: kind.clone(),
                        metadata,
                        content,
                        path,
                    })
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable entity");
                    None
                }
            })
            .filter(|entity| filter.matches(entity))
    }

    // -- Write path --------------------------------------------------------

    /// Create a new entity.
    ///
    /// Runs the full write pipeline: validate → assign ID → lock → journal →
    /// atomic write → link graph → `entity.created` event.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Validation`] for schema violations and
    /// [`HostError::DuplicateId`] when an explicit ID already exists.
    pub async fn create_entity(
        &self,
        kind: &EntityKind,
        data: BTreeMap<String, Value>,
        content: &str,
        trace_id: Option<&str>,
    ) -> Result<Entity, HostError> {
        let mut metadata = data;
        let now = Utc::now();
        let now_str = timeutil::format_utc(now);

        // System-managed defaults.
        if *kind == EntityKind::Task && !metadata.contains_key("status") {
            metadata.insert("status".to_owned(), json!("todo"));
        }
        if *kind == EntityKind::Task {
            let status = metadata
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if TaskState::parse(status).is_none() {
                return Err(HostError::validation(format!(
                    "status: unknown task state {status:?}"
                )));
            }
        }
        metadata
            .entry("tags".to_owned())
            .or_insert_with(|| json!([]));
        metadata
            .entry("links".to_owned())
            .or_insert_with(|| json!([]));
        metadata.insert("created_ts".to_owned(), json!(now_str));
        metadata.insert("updated_ts".to_owned(), json!(now_str));

        // 1. Validate.
        self.validate_metadata(kind, &metadata)?;

        // 2. Assign ID.
        let entity_id = match metadata.get("id").and_then(Value::as_str) {
            Some(explicit) => {
                if !id::valid_id(explicit) {
                    return Err(HostError::validation(format!(
                        "id: malformed entity id {explicit:?}"
                    )));
                }
                if id::kind_of(explicit) != Some(kind.as_str()) {
                    return Err(HostError::validation(format!(
                        "id: kind prefix does not match {kind}"
                    )));
                }
                let path = self.vault.entity_path(&kind.dir_name(), explicit);
                if self.vault.exists(&path) {
                    return Err(HostError::DuplicateId {
                        id: explicit.to_owned(),
                    });
                }
                explicit.to_owned()
            }
            None => {
                let title = metadata
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                id::generate(kind.as_str(), title, self.tz, now, |candidate| {
                    self.vault
                        .exists(&self.vault.entity_path(&kind.dir_name(), candidate))
                })
            }
        };
        metadata.insert("id".to_owned(), json!(entity_id));

        let path = self.vault.entity_path(&kind.dir_name(), &entity_id);

        // 4. Lock; 5. journal; 6. atomic write; 7. links; 8. event; 9. commit.
        let _guard = self
            .vault
            .lock(&entity_id, self.lock_timeout)
            .await
            .map_err(|_| HostError::LockTimeout {
                id: entity_id.clone(),
            })?;

        let seq = self.journal.begin(JournalOp::Create, &entity_id)?;
        self.vault.write_atomic(&path, &metadata, content)?;
        self.links
            .set_links(&entity_id, links::extract_links(&metadata, content));

        let after = metadata_value(&metadata);
        self.emit(
            "entity.created",
            json!({
                "id": entity_id,
                "kind": kind.as_str(),
                "before": Value::Null,
                "after": after,
            }),
            trace_id,
        )
        .await;

        self.audit.record(
            AuditEventType::EntityCreated,
            trace_id.unwrap_or(""),
            json!({"id": entity_id, "kind": kind.as_str()}),
        );
        self.journal.commit(&seq, JournalOp::Create, &entity_id)?;

        info!(id = %entity_id, kind = %kind, "entity created");
        Ok(Entity {
            id: entity_id,
            kind: kind.clone(),
            metadata,
            content: content.to_owned(),
            path,
        })
    }

    /// Update an existing entity with a partial patch.
    ///
    /// Task `status` changes run through the state machine; transition
    /// effects (`done_ts`, estimate freeze) are applied before the write.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotFound`], [`HostError::Validation`], or
    /// [`HostError::FsmGuard`].
    pub async fn update_entity(
        &self,
        entity_id: &str,
        patch: EntityPatch,
        trace_id: Option<&str>,
    ) -> Result<Entity, HostError> {
        let (canonical, kind, path) = self.resolve(entity_id)?;
        let (before_meta, before_content) = self.vault.read_checked(&path)?;

        if let Some(patched_id) = patch.metadata.get("id").and_then(Value::as_str) {
            if patched_id != canonical {
                return Err(HostError::validation("id: entity ids are immutable"));
            }
        }

        // Merge the patch; JSON null removes a key.
        let mut merged = before_meta.clone();
        for (key, value) in &patch.metadata {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        let content = patch.content.clone().unwrap_or(before_content);

        // Frozen estimate guard.
        let estimate_frozen = before_meta
            .get("estimate_frozen")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if estimate_frozen
            && patch.metadata.contains_key("estimate")
            && merged.get("estimate") != before_meta.get("estimate")
        {
            return Err(HostError::validation(
                "estimate: frozen after task completion",
            ));
        }

        // 3. FSM check for tasks.
        let mut transition: Option<(TaskState, TaskState)> = None;
        if kind == EntityKind::Task {
            let old_state = state_of(&before_meta)?;
            let new_state = state_of(&merged)?;
            if old_state != new_state {
                let effects = fsm::check_transition(old_state, new_state, &merged)?;
                let now_str = timeutil::format_utc(Utc::now());
                for effect in effects {
                    match effect {
                        TransitionEffect::SetDoneTs => {
                            merged.insert("done_ts".to_owned(), json!(now_str));
                        }
                        TransitionEffect::FreezeEstimate => {
                            merged.insert("estimate_frozen".to_owned(), json!(true));
                        }
                    }
                }
                transition = Some((old_state, new_state));
            }
        }

        // Preserve immutable fields and bump the update stamp.
        if let Some(created) = before_meta.get("created_ts") {
            merged.insert("created_ts".to_owned(), created.clone());
        }
        merged.insert(
            "updated_ts".to_owned(),
            json!(timeutil::format_utc(Utc::now())),
        );
        merged.insert("id".to_owned(), json!(canonical));

        // 1. Validate the merged result.
        self.validate_metadata(&kind, &merged)?;

        // 4-9. Lock, journal, write, links, events, commit.
        let _guard = self
            .vault
            .lock(&canonical, self.lock_timeout)
            .await
            .map_err(|_| HostError::LockTimeout {
                id: canonical.clone(),
            })?;

        let seq = self.journal.begin(JournalOp::Update, &canonical)?;
        self.vault.write_atomic(&path, &merged, &content)?;
        self.links
            .set_links(&canonical, links::extract_links(&merged, &content));

        let before = metadata_value(&before_meta);
        let after = metadata_value(&merged);
        self.emit(
            "entity.updated",
            json!({
                "id": canonical,
                "kind": kind.as_str(),
                "before": before,
                "after": after,
            }),
            trace_id,
        )
        .await;

        if let Some((from, to)) = transition {
            self.emit(
                &format!("task.enter_{to}"),
                json!({"id": canonical, "from": from.as_str(), "to": to.as_str()}),
                trace_id,
            )
            .await;
        }

        self.audit.record(
            AuditEventType::EntityUpdated,
            trace_id.unwrap_or(""),
            json!({"id": canonical, "kind": kind.as_str()}),
        );
        self.journal.commit(&seq, JournalOp::Update, &canonical)?;
        drop(_guard);

        let entity = Entity {
            id: canonical.clone(),
            kind,
            metadata: merged,
            content,
            path,
        };

        // Timeboxing: entering `doing` creates a companion calendar event.
        if self.features.timeboxing && matches!(transition, Some((_, TaskState::Doing))) {
            if let Err(e) = self.create_timebox(&entity, trace_id).await {
                warn!(id = %entity.id, error = %e, "failed to create timebox event");
            }
        }

        debug!(id = %entity.id, "entity updated");
        Ok(entity)
    }

    /// Create or update an entity, optionally deduplicated by an
    /// idempotency key. Returns the entity and whether it was created.
    ///
    /// # Errors
    ///
    /// As [`create_entity`](Self::create_entity) and
    /// [`update_entity`](Self::update_entity).
    pub async fn upsert_entity(
        &self,
        entity_id: Option<&str>,
        kind: &EntityKind,
        data: BTreeMap<String, Value>,
        content: &str,
        idempotency_key: Option<&str>,
        trace_id: Option<&str>,
    ) -> Result<(Entity, bool), HostError> {
        if let Some(key) = idempotency_key {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT entity_id FROM sync_ledger WHERE idem_key = ?1")
                    .bind(key)
                    .fetch_optional(&self.db)
                    .await?;
            if let Some((existing_id,)) = row {
                debug!(key, id = %existing_id, "idempotent upsert: returning existing entity");
                return Ok((self.read_entity(&existing_id)?, false));
            }
        }

        let (entity, created) = match entity_id {
            Some(eid) if self.resolve(eid).is_ok() => {
                let patch = EntityPatch {
                    metadata: data,
                    content: Some(content.to_owned()),
                };
                (self.update_entity(eid, patch, trace_id).await?, false)
            }
            other => {
                let mut data = data;
                if let Some(eid) = other {
                    data.insert("id".to_owned(), json!(eid));
                }
                (
                    self.create_entity(kind, data, content, trace_id).await?,
                    true,
                )
            }
        };

        if let Some(key) = idempotency_key {
            sqlx::query(
                "INSERT OR IGNORE INTO sync_ledger (idem_key, entity_id, created_ts) \
                 VALUES (?1, ?2, ?3)",
            )
            .bind(key)
            .bind(&entity.id)
            .bind(timeutil::format_utc(Utc::now()))
            .execute(&self.db)
            .await?;
        }

        Ok((entity, created))
    }

    /// Delete an entity, removing its file and link edges atomically with
    /// respect to each other.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotFound`] for unknown IDs.
    pub async fn delete_entity(
        &self,
        entity_id: &str,
        trace_id: Option<&str>,
    ) -> Result<(), HostError> {
        let (canonical, kind, path) = self.resolve(entity_id)?;
        let (before_meta, _) = self.vault.read_checked(&path)?;

        let _guard = self
            .vault
            .lock(&canonical, self.lock_timeout)
            .await
            .map_err(|_| HostError::LockTimeout {
                id: canonical.clone(),
            })?;

        let seq = self.journal.begin(JournalOp::Delete, &canonical)?;
        self.vault.remove(&path)?;
        self.links.remove_entity(&canonical);

        self.emit(
            "entity.deleted",
            json!({
                "id": canonical,
                "kind": kind.as_str(),
                "before": metadata_value(&before_meta),
                "after": Value::Null,
            }),
            trace_id,
        )
        .await;

        self.audit.record(
            AuditEventType::EntityDeleted,
            trace_id.unwrap_or(""),
            json!({"id": canonical, "kind": kind.as_str()}),
        );
        self.journal.commit(&seq, JournalOp::Delete, &canonical)?;

        info!(id = %canonical, "entity deleted");
        Ok(())
    }

    // -- Internals ---------------------------------------------------------

    /// Resolve an ID to `(canonical_id, kind, path)`, consulting aliases
    /// after a direct miss. A live entity always shadows a stale alias.
    fn resolve(&self, entity_id: &str) -> Result<(String, EntityKind, PathBuf), HostError> {
        let direct = self.locate(entity_id);
        if let Some(found) = direct {
            if self.aliases.resolve(entity_id).is_some() {
                warn!(id = entity_id, "stale alias shadowed by live entity");
            }
            return Ok(found);
        }
        if let Some(target) = self.aliases.resolve(entity_id) {
            if let Some(found) = self.locate(&target) {
                debug!(from = entity_id, to = %target, "alias resolved");
                return Ok(found);
            }
        }
        Err(HostError::NotFound {
            id: entity_id.to_owned(),
        })
    }

    fn locate(&self, entity_id: &str) -> Option<(String, EntityKind, PathBuf)> {
        let kind_str = id::kind_of(entity_id)?;
        let kind = EntityKind::parse(kind_str);
        let path = self.vault.entity_path(&kind.dir_name(), entity_id);
        self.vault
            .exists(&path)
            .then(|| (entity_id.to_owned(), kind, path))
    }

    fn validate_metadata(
        &self,
        kind: &EntityKind,
        metadata: &BTreeMap<String, Value>,
    ) -> Result<(), HostError> {
        let value = metadata_value(metadata);
        let violations = self.schemas.validate(kind.as_str(), &value);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(HostError::Validation {
                reasons: violations,
            })
        }
    }

    async fn emit(&self, event_type: &str, payload: Value, trace_id: Option<&str>) {
        let mut envelope = EventEnvelope::internal(event_type, payload);
        if let Some(trace) = trace_id {
            envelope = envelope.with_trace(trace);
        }
        if let Err(e) = self.bus.publish(envelope).await {
            warn!(event_type, error = %e, "failed to publish lifecycle event");
        }
    }

    /// Create the companion timebox event for a task entering `doing`.
    async fn create_timebox(
        &self,
        task: &Entity,
        trace_id: Option<&str>,
    ) -> Result<Entity, HostError> {
        let now = Utc::now();
        let end = now
            .checked_add_signed(chrono::Duration::seconds(TIMEBOX_SPAN_SECS))
            .unwrap_or(now);
        let mut data = BTreeMap::new();
        data.insert("title".to_owned(), json!(format!("Timebox: {}", task.title())));
        data.insert("start_ts".to_owned(), json!(timeutil::format_utc(now)));
        data.insert("end_ts".to_owned(), json!(timeutil::format_utc(end)));
        data.insert("links".to_owned(), json!([task.id]));
        data.insert("source_task".to_owned(), json!(task.id));
        self.create_entity(&EntityKind::Event, data, "", trace_id)
            .await
    }

    /// Rebuild the link graph from the filesystem and replay the journal.
    ///
    /// Unprocessed `begin` records mark entities whose edges may be stale;
    /// since the rebuild reads the current filesystem, replay just recomputes
    /// those entities (or drops them when their file is gone) and truncates.
    fn recover_link_graph(&self) -> Result<(), HostError> {
        self.links.clear();
        for dir in self.vault.kind_dirs() {
            for path in self.vault.list(&dir) {
                match self.vault.read_checked(&path) {
                    Ok((metadata, content)) => {
                        let Some(eid) = metadata.get("id").and_then(Value::as_str) else {
                            continue;
                        };
                        self.links
                            .set_links(eid, links::extract_links(&metadata, &content));
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping entity during link rebuild");
                    }
                }
            }
        }

        let pending = self.journal.unprocessed()?;
        for record in &pending {
            match self.locate(&record.entity_id) {
                Some((eid, _, path)) => {
                    if let Ok((metadata, content)) = self.vault.read_checked(&path) {
                        self.links
                            .set_links(&eid, links::extract_links(&metadata, &content));
                    }
                }
                None => self.links.remove_entity(&record.entity_id),
            }
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "replayed unprocessed journal entries");
        }
        self.journal.truncate()?;

        if self.features.graph_validation {
            let violations = self.links.validate();
            if !violations.is_empty() {
                warn!(count = violations.len(), "link graph inconsistencies after recovery");
            }
        }
        Ok(())
    }
}

/// Current task state of a metadata map.
fn state_of(metadata: &BTreeMap<String, Value>) -> Result<TaskState, HostError> {
    let status = metadata
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    TaskState::parse(status)
        .ok_or_else(|| HostError::validation(format!("status: unknown task state {status:?}")))
}

/// Convert metadata to a JSON object value for schema validation and events.
fn metadata_value(metadata: &BTreeMap<String, Value>) -> Value {
    Value::Object(
        metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}
