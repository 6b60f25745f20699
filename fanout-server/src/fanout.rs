//! Parallel fan-out of one prompt to many providers.
//!
//! Every provider gets its own task. Tasks wait on a shared semaphore so
//! that no more than `workers` tgpt processes run at once. Results are
//! gathered in request order, whatever order they complete in, and there is
//! exactly one reply per requested provider.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::InvokeError;
use crate::invoker::{Backend, render_reply};

/// Reply from one provider, stamped when it was gathered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReply {
    pub provider: String,
    pub reply: String,
    pub timestamp: String,
}

/// Local wall-clock time in the format stored with every reply.
pub fn now_str() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct Fanout {
    backend: Arc<dyn Backend>,
    pool: Arc<Semaphore>,
    workers: usize,
}

impl Fanout {
    pub fn new(backend: Arc<dyn Backend>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            backend,
            pool: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Ask every provider the same prompt.
    pub async fn ask_all(&self, providers: &[String], prompt: &str) -> Vec<ProviderReply> {
        let prompt: Arc<str> = Arc::from(prompt);
        let mut tasks = Vec::with_capacity(providers.len());

        for provider in providers {
            let backend = Arc::clone(&self.backend);
            let pool = Arc::clone(&self.pool);
            let prompt = Arc::clone(&prompt);
            let provider = provider.clone();
            tasks.push(tokio::spawn(async move {
                let result = match pool.acquire_owned().await {
                    Ok(_permit) => backend.invoke(&provider, &prompt).await,
                    Err(_) => Err(InvokeError::PoolClosed),
                };
                ProviderReply {
                    reply: render_reply(&provider, &result),
                    provider,
                    timestamp: now_str(),
                }
            }));
        }

        let results = futures::future::join_all(tasks).await;
        providers
            .iter()
            .zip(results)
            .map(|(provider, joined)| match joined {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(provider = %provider, error = %e, "Provider task failed");
                    ProviderReply {
                        provider: provider.clone(),
                        reply: render_reply(provider, &Err(InvokeError::Join(e.to_string()))),
                        timestamp: now_str(),
                    }
                }
            })
            .collect()
    }

    /// Stop handing out worker slots. Pending and future invocations
    /// resolve to a shutdown error instead of running.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
