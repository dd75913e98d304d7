//! In-memory store for tests and dry runs.

use async_trait::async_trait;
use ralph_core::error::StoreError;
use ralph_core::port::ThreadStore;
use ralph_core::story::Prd;
use ralph_core::thread::Thread;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    thread: Option<Thread>,
    prd: Option<Prd>,
    saves: Vec<usize>,
}

/// Keeps the last saved thread and the event count of every save.
#[derive(Clone, Default)]
pub struct InMemoryThreadStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `thread`, as if a previous run saved it.
    pub fn with_thread(thread: Thread) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                thread: Some(thread),
                ..Inner::default()
            })),
        }
    }

    pub async fn thread(&self) -> Option<Thread> {
        self.inner.read().await.thread.clone()
    }

    pub async fn prd(&self) -> Option<Prd> {
        self.inner.read().await.prd.clone()
    }

    /// Event count at each save, in order.
    pub async fn save_history(&self) -> Vec<usize> {
        self.inner.read().await.saves.clone()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self) -> Result<Option<Thread>, StoreError> {
        Ok(self.inner.read().await.thread.clone())
    }

    async fn save(&self, thread: &Thread) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.saves.push(thread.len());
        inner.thread = Some(thread.clone());
        Ok(())
    }

    async fn write_prd(&self, prd: &Prd) -> Result<(), StoreError> {
        self.inner.write().await.prd = Some(prd.clone());
        Ok(())
    }
}
