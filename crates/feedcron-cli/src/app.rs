use std::sync::Arc;

use anyhow::Context;
use feedcron_core::{FeedcronConfig, TenantKey};
use feedcron_scheduler::clock::SystemClock;
use feedcron_scheduler::files::FeedFiles;
use feedcron_scheduler::notify::TracingNotifier;
use feedcron_scheduler::schedule::Zones;
use feedcron_scheduler::tenants::ConfiguredTenants;
use feedcron_scheduler::{ProcessLifecycle, SqliteProcessStore, TenantReconciler};
use tracing::info;

/// Everything a command needs, wired from config.
pub struct App {
    pub config: FeedcronConfig,
    pub store: Arc<SqliteProcessStore>,
    pub lifecycle: Arc<ProcessLifecycle>,
    pub reconciler: Arc<TenantReconciler>,
}

impl App {
    /// Open the database and build the scheduler components.
    ///
    /// `pinned` restricts reconciliation to a single tenant, overriding
    /// `scheduler.pinned_tenant`.
    pub fn build(config: FeedcronConfig, pinned: Option<TenantKey>) -> anyhow::Result<Self> {
        let db_path = &config.database.path;
        ensure_parent_dir(db_path);
        info!(path = %db_path, "opening SQLite database");

        let db = rusqlite::Connection::open(db_path)
            .with_context(|| format!("cannot open database {db_path}"))?;
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Arc::new(SqliteProcessStore::new(db)?);

        let zones = Zones::from_config(&config.scheduler)?;
        let notifier = Arc::new(TracingNotifier);
        let lifecycle = Arc::new(ProcessLifecycle::new(
            store.clone(),
            Arc::new(SystemClock),
            zones,
            notifier.clone(),
        ));

        let tenants = ConfiguredTenants::from_config(&config).pinned(pinned);
        let files = Arc::new(FeedFiles::from_config(&config.files));
        let reconciler = Arc::new(
            TenantReconciler::new(
                lifecycle.clone(),
                Arc::new(tenants),
                files.clone(),
                files,
                notifier,
            )
            .with_guard(config.scheduler.toggle_guard),
        );

        Ok(Self {
            config,
            store,
            lifecycle,
            reconciler,
        })
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(path = %parent.display(), error = %e, "could not create database directory");
        }
    }
}
