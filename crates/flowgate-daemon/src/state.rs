//! Application state wiring all services together.
//!
//! The engine, executor, and gate are generic over their ports; AppState pins
//! them to the concrete infra implementations (SQLite usage store, filesystem
//! trigger watcher).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flowgate_core::event::EventBus;
use flowgate_core::quota::AccessGate;
use flowgate_core::workflow::definition::discover_workflows;
use flowgate_core::workflow::{ActionRegistry, BuiltinActions, PipelineExecutor, WorkflowEngine};
use flowgate_infra::filesystem::ensure_layout;
use flowgate_infra::notifier::build_notifier;
use flowgate_infra::sqlite::{DatabasePool, SqliteUsageStore, database_url};
use flowgate_infra::tool::register_tools;
use flowgate_infra::workflow::FsTriggerWatcher;
use flowgate_types::config::GlobalConfig;

/// Concrete type aliases for the generics pinned to infra implementations.
pub type ConcreteGate = AccessGate<SqliteUsageStore>;

pub type ConcreteEngine = WorkflowEngine<FsTriggerWatcher, SqliteUsageStore>;

/// Shared application state used by every subcommand.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub gate: Arc<ConcreteGate>,
    pub registry: Arc<ActionRegistry>,
    pub config: GlobalConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: lay out directories, connect to the
    /// DB, wire gate/executor/engine, and register workflow files.
    pub async fn init(data_dir: PathBuf, config: GlobalConfig) -> anyhow::Result<Self> {
        ensure_layout(&config, &data_dir).await?;

        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let store = Arc::new(SqliteUsageStore::new(db_pool.clone()));
        let gate = Arc::new(AccessGate::new(store, config.tiers.clone()));

        let registry = Arc::new(ActionRegistry::new());
        register_tools(&registry, &config.tools);

        let notifier = build_notifier(&config.notifier)?;
        let builtins = BuiltinActions::new(
            Arc::clone(&registry),
            notifier,
            config.output_dir(&data_dir),
        )
        .with_default_delay(Duration::from_millis(config.default_delay_ms));

        let event_bus = EventBus::new(config.event_capacity);
        let executor = PipelineExecutor::new(Arc::clone(&registry), builtins, event_bus)
            .with_gate(Arc::clone(&gate));

        let watcher = FsTriggerWatcher::from_config(&config, &data_dir);
        let engine = Arc::new(WorkflowEngine::new(Arc::new(executor), watcher));

        let state = Self {
            engine,
            gate,
            registry,
            config,
            data_dir,
            db_pool,
        };
        state.load_workflows().await?;
        Ok(state)
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.config.workflows_dir(&self.data_dir)
    }

    pub fn watch_root(&self) -> PathBuf {
        self.config.watch_root(&self.data_dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Register every workflow file found in the workflows directory.
    ///
    /// A file that fails registration (duplicate name) is logged and skipped.
    async fn load_workflows(&self) -> anyhow::Result<usize> {
        let dir = self.workflows_dir();
        let mut loaded = 0;
        for (path, file) in discover_workflows(&dir)? {
            match self
                .engine
                .register_workflow(
                    file.name.clone(),
                    file.owner.clone(),
                    file.trigger.clone(),
                    file.actions.clone(),
                )
                .await
            {
                Ok(_) => loaded += 1,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "skipping workflow file"
                    );
                }
            }
        }
        tracing::info!(dir = %dir.display(), loaded, "workflow files loaded");
        Ok(loaded)
    }
}
