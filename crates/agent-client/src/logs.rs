//! Log stream multiplexer.
//!
//! Many subscriber sessions (operators tailing an instance, the UI, a
//! debugging CLI) share a single upstream log stream per instance. The
//! upstream is opened lazily when the first subscriber arrives and closed
//! again when the last subscriber unsubscribes or drops. This is a
//! reference-counted shared resource, not a pool: at most one upstream
//! connection exists per instance at any time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AgentError;

/// Capacity of the per-instance fan-out buffer. Slow subscribers that fall
/// further behind than this lose lines (and are told how many).
const FANOUT_BUFFER: usize = 1024;

/// Opens the upstream log stream for one instance.
#[async_trait]
pub trait LogSource: Send + Sync + 'static {
    async fn open(&self, instance_id: Uuid) -> Result<BoxStream<'static, String>, AgentError>;
}

struct Upstream {
    tx: broadcast::Sender<String>,
    subscribers: usize,
    task: JoinHandle<()>,
}

/// Multiplexes subscriber sessions onto one upstream log stream per instance.
pub struct LogStreamMux {
    source: Arc<dyn LogSource>,
    upstreams: Mutex<HashMap<Uuid, Upstream>>,
}

impl LogStreamMux {
    #[must_use]
    pub fn new(source: Arc<dyn LogSource>) -> Arc<Self> {
        Arc::new(Self {
            source,
            upstreams: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribe to an instance's log stream, opening the upstream if this
    /// is the first subscriber. Must be called from within a tokio runtime.
    pub fn subscribe(self: &Arc<Self>, instance_id: Uuid) -> LogSubscriber {
        let mut upstreams = self.upstreams.lock().expect("log mux lock poisoned");

        let rx = if let Some(up) = upstreams.get_mut(&instance_id) {
            up.subscribers += 1;
            up.tx.subscribe()
        } else {
            let (tx, rx) = broadcast::channel(FANOUT_BUFFER);
            let task = tokio::spawn(forward(Arc::downgrade(self), instance_id, tx.clone()));
            debug!(%instance_id, "opening upstream log stream");
            upstreams.insert(
                instance_id,
                Upstream {
                    tx,
                    subscribers: 1,
                    task,
                },
            );
            rx
        };

        LogSubscriber {
            instance_id,
            rx,
            mux: Arc::clone(self),
        }
    }

    /// Number of upstream connections currently open.
    #[must_use]
    pub fn active_upstreams(&self) -> usize {
        self.upstreams.lock().expect("log mux lock poisoned").len()
    }

    fn unsubscribe(&self, instance_id: Uuid) {
        let mut upstreams = self.upstreams.lock().expect("log mux lock poisoned");
        if let Some(up) = upstreams.get_mut(&instance_id) {
            up.subscribers = up.subscribers.saturating_sub(1);
            if up.subscribers == 0 {
                let up = upstreams.remove(&instance_id).expect("entry just seen");
                up.task.abort();
                debug!(%instance_id, "closed upstream log stream (last subscriber left)");
            }
        }
    }
}

async fn forward(mux: Weak<LogStreamMux>, instance_id: Uuid, tx: broadcast::Sender<String>) {
    let source = match mux.upgrade() {
        Some(m) => Arc::clone(&m.source),
        None => return,
    };

    match source.open(instance_id).await {
        Ok(mut stream) => {
            while let Some(line) = stream.next().await {
                // A send error means every subscriber is gone; the Drop
                // path will abort this task shortly anyway.
                let _ = tx.send(line);
            }
        }
        Err(e) => {
            warn!(%instance_id, error = %e, "failed to open upstream log stream");
        }
    }

    // Upstream ended on its own. Drop the map entry so subscribers observe
    // a closed stream instead of waiting forever; the entry holds the last
    // live sender.
    drop(tx);
    if let Some(m) = mux.upgrade() {
        m.upstreams
            .lock()
            .expect("log mux lock poisoned")
            .remove(&instance_id);
    }
}

/// One subscriber session. Dropping it releases its upstream reference.
pub struct LogSubscriber {
    instance_id: Uuid,
    rx: broadcast::Receiver<String>,
    mux: Arc<LogStreamMux>,
}

impl LogSubscriber {
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Receive the next log line, or `None` once the upstream has ended.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(line) => return Some(line),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(instance_id = %self.instance_id, skipped, "log subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for LogSubscriber {
    fn drop(&mut self) {
        self.mux.unsubscribe(self.instance_id);
    }
}
