//! Shared test fixtures: scripted LLM provider, vault-backed Host API, and
//! an agent executor wired over in-memory SQLite.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

use kira::agent::{AgentExecutor, SessionStore};
use kira::bus::EventBus;
use kira::config::{FeatureFlags, KiraConfig};
use kira::host::audit::AuditLogger;
use kira::host::schema::SchemaCache;
use kira::host::{HostApi, HostDeps};
use kira::providers::router::LlmRouter;
use kira::providers::{
    ChatMessage, ChatOptions, ChatResponse, FinishReason, LlmProvider, ProviderError,
    ToolInvocation, ToolSpec,
};
use kira::tools::notes::NoteCreateTool;
use kira::tools::rollup::{InboxNormalizeTool, RollupDailyTool};
use kira::tools::tasks::{
    TaskCreateTool, TaskDeleteTool, TaskGetTool, TaskListTool, TaskUpdateTool,
};
use kira::tools::ToolRegistry;
use kira::vault::VaultStore;

/// A pre-canned provider turn.
pub enum Scripted {
    /// Return tool calls (planning turns).
    ToolCalls(Vec<(&'static str, Value)>),
    /// Return plain text (chat/synthesis turns).
    Text(&'static str),
    /// Fail with the given error.
    Fail(ProviderError),
}

/// LLM stub that replays a script of responses in order.
///
/// Calls beyond the script return an empty stop response, which terminates
/// planning loops naturally.
pub struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockProvider {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn next(&self) -> Result<ChatResponse, ProviderError> {
        let scripted = self
            .script
            .lock()
            .expect("script lock poisoned")
            .pop_front();
        match scripted {
            Some(Scripted::ToolCalls(calls)) => Ok(ChatResponse {
                content: String::new(),
                finish_reason: FinishReason::ToolCalls,
                tool_calls: calls
                    .into_iter()
                    .map(|(name, arguments)| ToolInvocation {
                        id: None,
                        name: name.to_owned(),
                        arguments,
                    })
                    .collect(),
                usage: None,
                model: "mock".to_owned(),
            }),
            Some(Scripted::Text(text)) => Ok(ChatResponse {
                content: text.to_owned(),
                finish_reason: FinishReason::Stop,
                tool_calls: Vec::new(),
                usage: None,
                model: "mock".to_owned(),
            }),
            Some(Scripted::Fail(error)) => Err(error),
            None => Ok(ChatResponse {
                content: "done".to_owned(),
                finish_reason: FinishReason::Stop,
                tool_calls: Vec::new(),
                usage: None,
                model: "mock".to_owned(),
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(messages.to_vec());
        self.next()
    }

    async fn tool_call(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
        _opts: &ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(messages.to_vec());
        self.next()
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        "mock-1"
    }
}

/// In-memory SQLite pool (single connection so tables persist).
pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory sqlite")
}

/// A vault-backed Host API over a temp directory plus its bus and pool.
pub struct HostFixture {
    pub host: Arc<HostApi>,
    pub bus: Arc<EventBus>,
    pub db: SqlitePool,
    pub dir: TempDir,
}

/// Build a Host API rooted in a fresh temp vault.
pub async fn host_fixture() -> HostFixture {
    host_fixture_with_features(FeatureFlags::default()).await
}

/// Build a Host API with custom feature flags.
pub async fn host_fixture_with_features(features: FeatureFlags) -> HostFixture {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db = memory_pool().await;
    let bus = Arc::new(EventBus::new());
    let vault = Arc::new(VaultStore::new(dir.path().join("vault")).expect("vault"));
    let schemas =
        SchemaCache::new_without_watcher(dir.path().join("vault").join(".kira").join("schemas"));
    let audit = Arc::new(AuditLogger::from_writer(Box::new(std::io::sink())));

    let host = HostApi::new(HostDeps {
        vault,
        schemas,
        audit,
        bus: Arc::clone(&bus),
        db: db.clone(),
        tz: chrono_tz::UTC,
        features,
    })
    .await
    .expect("host api");

    HostFixture {
        host: Arc::new(host),
        bus,
        db,
        dir,
    }
}

/// A Host API rebuilt over an existing vault root (recovery tests).
pub struct RebuiltHost {
    pub host: Arc<HostApi>,
    pub bus: Arc<EventBus>,
    pub db: SqlitePool,
}

/// Rebuild a Host API over an existing vault directory, as a restart would.
pub async fn host_fixture_at(vault_root: &std::path::Path) -> RebuiltHost {
    let db = memory_pool().await;
    let bus = Arc::new(EventBus::new());
    let vault = Arc::new(VaultStore::new(vault_root).expect("vault"));
    let schemas = SchemaCache::new_without_watcher(vault_root.join(".kira").join("schemas"));
    let audit = Arc::new(AuditLogger::from_writer(Box::new(std::io::sink())));

    let host = HostApi::new(HostDeps {
        vault,
        schemas,
        audit,
        bus: Arc::clone(&bus),
        db: db.clone(),
        tz: chrono_tz::UTC,
        features: FeatureFlags::default(),
    })
    .await
    .expect("host api");

    RebuiltHost {
        host: Arc::new(host),
        bus,
        db,
    }
}

/// Register the canonical tool set over a Host API.
pub fn registry_for(host: &Arc<HostApi>, bus: &Arc<EventBus>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(TaskListTool::new(Arc::clone(host))))
        .expect("task_list");
    registry
        .register(Arc::new(TaskGetTool::new(Arc::clone(host))))
        .expect("task_get");
    registry
        .register(Arc::new(TaskCreateTool::new(Arc::clone(host))))
        .expect("task_create");
    registry
        .register(Arc::new(TaskUpdateTool::new(Arc::clone(host))))
        .expect("task_update");
    registry
        .register(Arc::new(TaskDeleteTool::new(Arc::clone(host))))
        .expect("task_delete");
    registry
        .register(Arc::new(NoteCreateTool::new(Arc::clone(host))))
        .expect("note_create");
    registry
        .register(Arc::new(RollupDailyTool::new(
            Arc::clone(host),
            chrono_tz::UTC,
        )))
        .expect("rollup_daily");
    registry
        .register(Arc::new(InboxNormalizeTool::new(
            Arc::clone(host),
            Arc::clone(bus),
        )))
        .expect("inbox_normalize");
    Arc::new(registry)
}

/// A full agent stack: scripted LLM, real Host API, executor.
pub struct AgentFixture {
    pub executor: Arc<AgentExecutor>,
    pub host: Arc<HostApi>,
    pub bus: Arc<EventBus>,
    pub provider: Arc<MockProvider>,
    pub dir: TempDir,
}

/// Build an executor whose LLM is the scripted mock.
pub async fn agent_fixture(script: Vec<Scripted>) -> AgentFixture {
    let fixture = host_fixture().await;
    let provider = MockProvider::new(script);
    let router = Arc::new(LlmRouter::for_testing(
        Arc::clone(&provider) as Arc<dyn LlmProvider>
    ));
    let registry = registry_for(&fixture.host, &fixture.bus);
    let sessions = SessionStore::new(fixture.db.clone())
        .await
        .expect("session store");
    let executor = Arc::new(AgentExecutor::new(
        router,
        registry,
        sessions,
        Arc::new(KiraConfig::default()),
    ));
    AgentFixture {
        executor,
        host: fixture.host,
        bus: fixture.bus,
        provider,
        dir: fixture.dir,
    }
}
