//! Registry of connected agents.
//!
//! Each accepted tunnel socket becomes an [`AgentHandle`] holding the write
//! half of the connection behind a send lock, so concurrently dispatched
//! requests never interleave frames on the wire. Reads stay with the
//! connection task in [`crate::socket`]; the registry only ever writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Boxed write half of an agent's tunnel socket (plain TCP or TLS).
pub type AgentWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected agent: its process-unique id and the locked write half.
pub struct AgentHandle {
    id: String,
    writer: Mutex<AgentWriter>,
}

impl AgentHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write one frame to the agent, holding the send lock for the whole
    /// write so frames from concurrent requests never interleave.
    pub async fn send(&self, frame: Bytes) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await
    }
}

/// Connected-agent map with round-robin selection.
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<String, Arc<AgentHandle>>>,
    next: AtomicUsize,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(BTreeMap::new()),
            next: AtomicUsize::new(0),
        }
    }

    /// Mint a fresh agent id and insert the connection's write half.
    pub async fn register(&self, writer: AgentWriter) -> Arc<AgentHandle> {
        let handle = Arc::new(AgentHandle {
            id: Uuid::new_v4().to_string(),
            writer: Mutex::new(writer),
        });
        self.agents
            .write()
            .await
            .insert(handle.id.clone(), Arc::clone(&handle));
        handle
    }

    /// Remove an agent. Returns false if it was already gone, so the
    /// disconnect and write-failure paths can race without double cleanup.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        self.agents.write().await.remove(agent_id).is_some()
    }

    /// Round-robin over the currently connected agents.
    pub async fn pick(&self) -> Option<Arc<AgentHandle>> {
        let agents = self.agents.read().await;
        if agents.is_empty() {
            return None;
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed) % agents.len();
        agents.values().nth(n).cloned()
    }

    pub async fn connected(&self) -> usize {
        self.agents.read().await.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
