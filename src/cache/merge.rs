//! The router's sequential merge context.
//!
//! Cross-shard results are combined here, off the caller's task, so ordering
//! and paging of large merged sets never runs on a shard context.

use std::future::Future;
use std::sync::Arc;

use time::Date;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::domain::task::Task;

use super::lookup::{Page, ResultSpec, paginate, sort_tasks};
use super::error::CacheError;

enum MergeJob {
    Merge {
        parts: Vec<Vec<Arc<Task>>>,
        spec: ResultSpec,
        today: Date,
        respond_to: oneshot::Sender<Page>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub(crate) struct MergeContext {
    jobs: mpsc::UnboundedSender<MergeJob>,
}

impl std::fmt::Debug for MergeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeJob::Merge { parts, .. } => write!(f, "Merge({} parts)", parts.len()),
            MergeJob::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl MergeContext {
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn() -> Self {
        let (jobs, mut receiver) = mpsc::unbounded_channel::<MergeJob>();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                match job {
                    MergeJob::Merge {
                        parts,
                        spec,
                        today,
                        respond_to,
                    } => {
                        let mut merged: Vec<Arc<Task>> = parts.into_iter().flatten().collect();
                        sort_tasks(&mut merged, &spec.order, today);
                        let _ = respond_to.send(paginate(merged, &spec));
                    }
                    MergeJob::Shutdown => break,
                }
            }
            receiver.close();
            debug!("Merge context stopped");
        });
        Self { jobs }
    }

    /// Concatenate per-shard matches, then order and page them once.
    pub(crate) fn merge(
        &self,
        parts: Vec<Vec<Arc<Task>>>,
        spec: ResultSpec,
        today: Date,
    ) -> impl Future<Output = Result<Page, CacheError>> + Send + 'static {
        let (respond_to, reply) = oneshot::channel();
        let sent = self
            .jobs
            .send(MergeJob::Merge {
                parts,
                spec,
                today,
                respond_to,
            })
            .is_ok();
        async move {
            if !sent {
                return Err(CacheError::RouterClosed);
            }
            reply.await.map_err(|_| CacheError::RouterClosed)
        }
    }

    pub(crate) fn close(&self) {
        let _ = self.jobs.send(MergeJob::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::domain::predicate::{Property, SortKey};
    use crate::domain::task::{ShardKey, TaskId};

    const TODAY: Date = date!(2024 - 03 - 01);

    fn task(shard: &str, id: TaskId, emphasis: u32) -> Arc<Task> {
        let mut task = Task::new(ShardKey::new(shard).expect("valid shard key"), id, TODAY);
        task.emphasis = emphasis;
        Arc::new(task)
    }

    #[tokio::test]
    async fn merges_orders_and_pages_once() {
        let context = MergeContext::spawn();
        let parts = vec![
            vec![task("core", 1, 1), task("core", 2, 5)],
            vec![task("web", 1, 3)],
        ];
        let spec = ResultSpec {
            offset: 1,
            length: 1,
            order: vec![SortKey::desc(Property::Temperature)],
        };

        let page = context.merge(parts, spec, TODAY).await.expect("merge");
        assert_eq!(page.total, 3);
        assert_eq!(page.tasks.len(), 1);
        assert_eq!(page.tasks[0].shard.as_str(), "web");
    }

    #[tokio::test]
    async fn closed_context_reports_router_closed() {
        let context = MergeContext::spawn();
        context.close();
        tokio::task::yield_now().await;
        let result = context
            .merge(Vec::new(), ResultSpec { offset: 0, length: 10, order: Vec::new() }, TODAY)
            .await;
        assert!(matches!(result, Err(CacheError::RouterClosed)));
    }
}
