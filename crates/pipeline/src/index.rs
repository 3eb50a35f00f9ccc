//! Background turn indexing.
//!
//! Every completed turn produces an `IndexJob` describing what was said
//! and whether the reply was routed. What happens with it — persistence,
//! search indexing, analytics — is behind the `TurnIndexer` trait so it
//! can never block the reply path: jobs are enqueued after delivery and
//! drained by their own worker.

use crate::queues::IndexJob;
use async_trait::async_trait;
use hearthclaw_core::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[async_trait]
pub trait TurnIndexer: Send + Sync {
    async fn index(&self, job: IndexJob) -> Result<(), Error>;
}

/// The default indexer: structured log lines, nothing persisted.
#[derive(Default)]
pub struct LoggingIndexer;

#[async_trait]
impl TurnIndexer for LoggingIndexer {
    async fn index(&self, job: IndexJob) -> Result<(), Error> {
        info!(
            session_key = %job.session_key,
            user = %job.canonical_user_id,
            routed = job.routed,
            user_chars = job.user_text.chars().count(),
            reply_chars = job.reply_text.as_deref().map(|t| t.chars().count()).unwrap_or(0),
            "Turn indexed"
        );
        Ok(())
    }
}

pub struct IndexWorker {
    indexer: Arc<dyn TurnIndexer>,
}

impl IndexWorker {
    pub fn new(indexer: Arc<dyn TurnIndexer>) -> Self {
        Self { indexer }
    }

    /// Drain the index queue until it closes. Indexer failures are
    /// logged and the worker moves on.
    pub async fn run(self, mut rx: mpsc::Receiver<IndexJob>) {
        info!("Index worker started");
        while let Some(job) = rx.recv().await {
            let session_key = job.session_key.clone();
            if let Err(e) = self.indexer.index(job).await {
                warn!(session_key = %session_key, error = %e, "Turn indexing failed");
            }
        }
        info!("Index worker stopped, index queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::Mutex;

    struct RecordingIndexer {
        seen: Mutex<Vec<IndexJob>>,
        fail_first: Mutex<bool>,
    }

    #[async_trait]
    impl TurnIndexer for RecordingIndexer {
        async fn index(&self, job: IndexJob) -> Result<(), Error> {
            let mut fail = self.fail_first.lock().await;
            if *fail {
                *fail = false;
                return Err(Error::Internal("index backend unavailable".into()));
            }
            self.seen.lock().await.push(job);
            Ok(())
        }
    }

    fn job(session: &str) -> IndexJob {
        IndexJob {
            session_key: session.into(),
            canonical_user_id: "alice".into(),
            user_text: "hello".into(),
            reply_text: Some("hi".into()),
            routed: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn worker_survives_indexer_failures() {
        let indexer = Arc::new(RecordingIndexer {
            seen: Mutex::new(Vec::new()),
            fail_first: Mutex::new(true),
        });
        let worker = IndexWorker::new(indexer.clone());

        let (tx, rx) = mpsc::channel(4);
        tx.send(job("s1")).await.unwrap();
        tx.send(job("s2")).await.unwrap();
        drop(tx);
        worker.run(rx).await;

        let seen = indexer.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].session_key, "s2");
    }

    #[tokio::test]
    async fn logging_indexer_accepts_routed_turns() {
        let mut routed = job("s1");
        routed.reply_text = None;
        routed.routed = true;
        LoggingIndexer.index(routed).await.unwrap();
    }
}
