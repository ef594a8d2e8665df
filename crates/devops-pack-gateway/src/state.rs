//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use devops_pack_core::config::Config;

use crate::runner::ScriptRunner;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub runner: Arc<dyn ScriptRunner>,
    pub connections: RwLock<HashMap<String, ConnectionState>>,
}

/// Per-connection state.
#[derive(Default)]
pub struct ConnectionState {
    /// Number of `run_script` requests accepted on this connection.
    pub runs: u64,
    /// Spawned runs still owned by this connection.
    pub tasks: Vec<JoinHandle<()>>,
}

impl ConnectionState {
    /// Abort every run still in flight. Dropping a run's future kills its
    /// child process.
    pub fn abort_runs(&mut self) -> usize {
        let mut aborted = 0;
        for task in self.tasks.drain(..) {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

impl GatewayState {
    pub fn new(config: Arc<Config>, runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            config,
            runner,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Record an accepted run on a connection, returning its ordinal.
    pub async fn record_run(&self, conn_id: &str) -> u64 {
        let mut connections = self.connections.write().await;
        match connections.get_mut(conn_id) {
            Some(conn) => {
                conn.runs += 1;
                conn.runs
            }
            None => 0,
        }
    }

    /// Attach a spawned run to its connection so it ends with the socket.
    /// A run for a connection that is already gone is aborted at once.
    pub async fn track_run(&self, conn_id: &str, task: JoinHandle<()>) {
        let mut connections = self.connections.write().await;
        match connections.get_mut(conn_id) {
            Some(conn) => {
                conn.tasks.retain(|t| !t.is_finished());
                conn.tasks.push(task);
            }
            None => task.abort(),
        }
    }
}
