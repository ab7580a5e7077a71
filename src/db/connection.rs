use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::error;
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;
use crate::config::StoreConfig;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

const IN_MEMORY_PATH: &str = ":memory:";

/// What the worker thread opens.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionTarget {
    File { path: PathBuf, enable_wal: bool },
    InMemory,
}

impl ConnectionTarget {
    fn connect(&self) -> Result<Connection> {
        let conn = match self {
            ConnectionTarget::File { path, .. } => Connection::open(path),
            ConnectionTarget::InMemory => Connection::open_in_memory(),
        }
        .context("failed to open SQLite database")?;

        if let ConnectionTarget::File {
            enable_wal: true, ..
        } = self
        {
            if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                error!("Failed to enable WAL mode: {err}");
            }
        }
        if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
            error!("Failed to enable foreign keys: {err}");
        }

        Ok(conn)
    }

    fn path(&self) -> &Path {
        match self {
            ConnectionTarget::File { path, .. } => path.as_path(),
            ConnectionTarget::InMemory => Path::new(IN_MEMORY_PATH),
        }
    }
}

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn create_parent_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create database directory {}", parent.display())
        })?;
    }
    Ok(())
}

/// Opens the target, migrates it, reports readiness, then serves commands
/// until shutdown or until every sender is gone.
fn run_worker(
    target: &ConnectionTarget,
    commands: mpsc::Receiver<DbCommand>,
    ready: mpsc::Sender<Result<()>>,
) {
    let mut conn = match target.connect() {
        Ok(conn) => conn,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let migrated = run_migrations(&mut conn).context("failed to run database migrations");
    let failed = migrated.is_err();
    if ready.send(migrated).is_err() {
        error!("DB initialization receiver dropped before ready signal");
        return;
    }
    if failed {
        return;
    }

    for command in commands.iter() {
        match command {
            DbCommand::Execute(task) => task(&mut conn),
            DbCommand::Shutdown => break,
        }
    }

    log_info!("Exposure store worker for {} stopped", target.path().display());
}

/// Handle to the exposure store. Cloning is cheap; every clone talks to the
/// same worker thread, which owns the only SQLite connection.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    target: Arc<ConnectionTarget>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        create_parent_dir(&db_path)?;
        Self::spawn(ConnectionTarget::File {
            path: db_path,
            enable_wal: true,
        })
    }

    /// Private database that disappears with the last handle.
    pub fn open_in_memory() -> Result<Self> {
        Self::spawn(ConnectionTarget::InMemory)
    }

    /// With `enable_wal` off the file keeps whatever journal mode it already
    /// has.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if config.in_memory {
            return Self::open_in_memory();
        }

        create_parent_dir(&config.database_path)?;
        if !config.enable_wal {
            log_warn!(
                "WAL disabled by configuration for {}",
                config.database_path.display()
            );
        }
        Self::spawn(ConnectionTarget::File {
            path: config.database_path.clone(),
            enable_wal: config.enable_wal,
        })
    }

    fn spawn(target: ConnectionTarget) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let target = Arc::new(target);
        let worker_target = Arc::clone(&target);

        let worker = thread::Builder::new()
            .name("exposure-db".into())
            .spawn(move || run_worker(&worker_target, command_rx, ready_tx))
            .context("failed to spawn database worker thread")?;

        let ready = ready_rx
            .recv()
            .context("database worker exited before signaling readiness")
            .and_then(|result| result);
        if let Err(err) = ready {
            if worker.join().is_err() {
                error!("Exposure store worker panicked during startup");
            }
            return Err(err);
        }

        log_info!("Exposure store opened at {}", target.path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            target,
        })
    }

    pub fn path(&self) -> &Path {
        self.target.path()
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(*self.target, ConnectionTarget::InMemory)
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::{schema_version, CURRENT_SCHEMA_VERSION};

    #[tokio::test]
    async fn in_memory_database_is_migrated() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_in_memory());

        let version = db.execute(|conn| schema_version(conn)).await.unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn file_database_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("exposures.sqlite3");

        let db = Database::new(path.clone()).unwrap();

        assert_eq!(db.path(), path.as_path());
        assert!(path.exists());
        let mode: String = db
            .execute(|conn| {
                conn.pragma_query_value(None, "journal_mode", |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn config_can_disable_wal() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            database_path: dir.path().join("exposures.sqlite3"),
            in_memory: false,
            enable_wal: false,
        };

        let db = Database::open(&config).unwrap();
        let mode: String = db
            .execute(|conn| {
                conn.pragma_query_value(None, "journal_mode", |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "delete");
    }

    #[test]
    fn in_memory_target_reports_sqlite_memory_path() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_in_memory());
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[test]
    fn file_named_like_memory_path_is_still_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join(":memory:")).unwrap();
        assert!(!db.is_in_memory());
        assert!(dir.path().join(":memory:").exists());
    }

    #[test]
    fn newer_schema_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exposures.sqlite3");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }

        let err = Database::new(path).err().unwrap();

        assert!(err.to_string().contains("failed to run database migrations"));
    }

    #[tokio::test]
    async fn task_errors_reach_the_caller() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .execute(|conn| {
                conn.execute("INSERT INTO missing_table VALUES (1)", [])?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing_table"));
    }
}
