//! One shard's single-writer execution context.
//!
//! A [`ShardCache`] is a cheap handle around an unbounded command channel.
//! The spawned task owns the [`ShardIndex`]; every lookup and every change
//! batch is a message, so reads and writes on one shard run in submission
//! order without locks.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use time::Date;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::application::repos::TaskSource;
use crate::domain::change::ChangeBatch;
use crate::domain::predicate::Predicate;
use crate::domain::task::{ShardKey, Task};

use super::config::CacheConfig;
use super::delta::ApplySummary;
use super::error::CacheError;
use super::index::{ShardIndex, ShardStats};
use super::lookup::{self, Page, ResultSpec};

const METRIC_SHARD_LOAD_MS: &str = "tracker_cache_shard_load_ms";

type Reply<T> = oneshot::Sender<Result<T, CacheError>>;

enum ShardCommand {
    Lookup {
        predicates: Vec<Predicate>,
        respond_to: Reply<Page>,
    },
    Filter {
        predicates: Vec<Predicate>,
        respond_to: Reply<Vec<Arc<Task>>>,
    },
    Apply {
        batch: ChangeBatch,
        respond_to: Reply<ApplySummary>,
    },
    Stats {
        respond_to: Reply<ShardStats>,
    },
    Shutdown,
}

impl ShardCommand {
    fn reject(self, err: CacheError) {
        match self {
            ShardCommand::Lookup { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            ShardCommand::Filter { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            ShardCommand::Apply { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            ShardCommand::Stats { respond_to } => {
                let _ = respond_to.send(Err(err));
            }
            ShardCommand::Shutdown => {}
        }
    }
}

impl std::fmt::Debug for ShardCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ShardCommand::Lookup { .. } => "Lookup",
            ShardCommand::Filter { .. } => "Filter",
            ShardCommand::Apply { .. } => "Apply",
            ShardCommand::Stats { .. } => "Stats",
            ShardCommand::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Handle to a running shard context.
#[derive(Debug, Clone)]
pub struct ShardCache {
    key: ShardKey,
    commands: mpsc::UnboundedSender<ShardCommand>,
}

impl ShardCache {
    /// Spawn the shard context. The initial scan runs on the blocking pool;
    /// commands sent meanwhile queue up and are served once it finishes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        key: ShardKey,
        today: Date,
        source: Arc<dyn TaskSource>,
        config: CacheConfig,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(key.clone(), today, source, config, receiver));
        Self { key, commands }
    }

    /// Filter, order and page inside the shard.
    ///
    /// Like every request method, the command is enqueued before this returns;
    /// the future only waits for the reply.
    pub fn lookup(
        &self,
        predicates: Vec<Predicate>,
    ) -> impl Future<Output = Result<Page, CacheError>> + Send + 'static {
        self.submit(|respond_to| ShardCommand::Lookup {
            predicates,
            respond_to,
        })
    }

    /// Every match, unordered and unpaged. Used for cross-shard merges.
    pub fn filter(
        &self,
        predicates: Vec<Predicate>,
    ) -> impl Future<Output = Result<Vec<Arc<Task>>, CacheError>> + Send + 'static {
        self.submit(|respond_to| ShardCommand::Filter {
            predicates,
            respond_to,
        })
    }

    pub fn apply(
        &self,
        batch: ChangeBatch,
    ) -> impl Future<Output = Result<ApplySummary, CacheError>> + Send + 'static {
        self.submit(|respond_to| ShardCommand::Apply { batch, respond_to })
    }

    pub fn stats(&self) -> impl Future<Output = Result<ShardStats, CacheError>> + Send + 'static {
        self.submit(|respond_to| ShardCommand::Stats { respond_to })
    }

    /// Ask the context to stop after the work already queued. Idempotent.
    pub fn close(&self) {
        let _ = self.commands.send(ShardCommand::Shutdown);
    }

    fn submit<T: Send + 'static>(
        &self,
        build: impl FnOnce(Reply<T>) -> ShardCommand,
    ) -> impl Future<Output = Result<T, CacheError>> + Send + 'static {
        let (respond_to, reply) = oneshot::channel();
        let sent = self.commands.send(build(respond_to)).is_ok();
        let key = self.key.clone();
        async move {
            if !sent {
                return Err(CacheError::ShardClosed(key));
            }
            reply.await.map_err(|_| CacheError::ReplyDropped(key))?
        }
    }
}

async fn run(
    key: ShardKey,
    today: Date,
    source: Arc<dyn TaskSource>,
    config: CacheConfig,
    mut commands: mpsc::UnboundedReceiver<ShardCommand>,
) {
    let mut state = load(&key, today, source).await;

    while let Some(command) = commands.recv().await {
        if matches!(command, ShardCommand::Shutdown) {
            break;
        }
        match state.as_mut() {
            Ok(index) => handle(index, &config, command),
            Err(err) => command.reject(err.clone()),
        }
    }

    // Anything queued behind the shutdown is refused, as is every later send.
    commands.close();
    while let Some(command) = commands.recv().await {
        command.reject(CacheError::ShardClosed(key.clone()));
    }
    debug!(shard = %key, "Shard context stopped");
}

fn handle(index: &mut ShardIndex, config: &CacheConfig, command: ShardCommand) {
    match command {
        ShardCommand::Lookup {
            predicates,
            respond_to,
        } => {
            let spec = ResultSpec::from_predicates(&predicates, config);
            let _ = respond_to.send(Ok(lookup::lookup(index, &predicates, &spec)));
        }
        ShardCommand::Filter {
            predicates,
            respond_to,
        } => {
            let _ = respond_to.send(Ok(lookup::filter(index, &predicates)));
        }
        ShardCommand::Apply { batch, respond_to } => {
            let summary = index.apply_batch(&batch);
            debug!(
                shard = %index.shard(),
                batch_id = %batch.id,
                applied = summary.applied,
                stale = summary.stale,
                rejected = summary.rejected,
                "Applied change batch"
            );
            let _ = respond_to.send(Ok(summary));
        }
        ShardCommand::Stats { respond_to } => {
            let _ = respond_to.send(Ok(index.stats()));
        }
        ShardCommand::Shutdown => {}
    }
}

async fn load(
    key: &ShardKey,
    today: Date,
    source: Arc<dyn TaskSource>,
) -> Result<ShardIndex, CacheError> {
    let started_at = Instant::now();
    let scan_key = key.clone();
    let loaded =
        tokio::task::spawn_blocking(move || ShardIndex::load(scan_key, today, source.as_ref()))
            .await;
    let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_SHARD_LOAD_MS).record(elapsed_ms);

    match loaded {
        Ok(Ok(index)) => {
            info!(
                shard = %key,
                tasks = index.len(),
                elapsed_ms,
                "Shard loaded"
            );
            Ok(index)
        }
        Ok(Err(err)) => {
            error!(shard = %key, error = %err, "Shard load failed");
            Err(CacheError::load_failed(key, err.to_string()))
        }
        Err(err) => {
            error!(shard = %key, error = %err, "Shard load task aborted");
            Err(CacheError::load_failed(key, err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::application::repos::RepoError;
    use crate::domain::change::{ChangeEntry, Operation};
    use crate::domain::predicate::{Property, Value};
    use crate::domain::task::TaskId;
    use crate::domain::types::Status;
    use crate::infra::memory::MemoryTaskSource;

    const TODAY: Date = date!(2024 - 03 - 01);

    fn shard() -> ShardKey {
        ShardKey::new("core").expect("valid shard key")
    }

    fn task(id: TaskId) -> Task {
        Task::new(shard(), id, TODAY)
    }

    fn spawn(source: MemoryTaskSource) -> ShardCache {
        ShardCache::spawn(shard(), TODAY, Arc::new(source), CacheConfig::default())
    }

    fn ids(page: &Page) -> Vec<TaskId> {
        page.tasks.iter().map(|task| task.id).collect()
    }

    struct BrokenSource;

    impl TaskSource for BrokenSource {
        fn scan(&self, _: &ShardKey, _: &mut dyn FnMut(Task)) -> Result<usize, RepoError> {
            Err(RepoError::from_persistence("disk on fire"))
        }
    }

    #[tokio::test]
    async fn load_skips_archived_tasks() {
        let source = MemoryTaskSource::new();
        source.insert(task(1));
        let mut archived = task(2);
        archived.archived = true;
        source.insert(archived);

        let cache = spawn(source);
        let page = cache.lookup(Vec::new()).await.expect("lookup");
        assert_eq!(ids(&page), vec![1]);
        assert_eq!(cache.stats().await.expect("stats").tasks, 1);
    }

    #[tokio::test]
    async fn change_is_visible_to_later_lookup() {
        let source = MemoryTaskSource::new();
        source.insert(task(1));
        let mut resolved = task(2);
        resolved.status = Status::Resolved;
        source.insert(resolved);
        let cache = spawn(source);

        let unsolved = vec![Predicate::eq(
            Property::Status,
            Value::Status(Status::Unsolved),
        )];
        let before = cache.lookup(unsolved.clone()).await.expect("lookup");
        assert_eq!(ids(&before), vec![1]);

        let mut after = task(1);
        after.status = Status::Resolved;
        after.revision = 2;
        let batch = ChangeBatch::new(vec![ChangeEntry::new(
            Some(task(1)),
            after,
            vec![Operation::Resolved],
        )])
        .expect("batch");

        // Sent without awaiting the apply first; FIFO order still holds.
        let apply = cache.apply(batch);
        let lookup = cache.lookup(unsolved);
        let (summary, page) = tokio::join!(apply, lookup);
        assert_eq!(summary.expect("apply").applied, 1);
        assert!(page.expect("lookup").tasks.is_empty());

        let resolved = cache
            .lookup(vec![Predicate::eq(
                Property::Status,
                Value::Status(Status::Resolved),
            )])
            .await
            .expect("lookup");
        assert_eq!(ids(&resolved), vec![1, 2]);
    }

    #[tokio::test]
    async fn close_refuses_later_requests() {
        let cache = spawn(MemoryTaskSource::new());
        let queued = cache.stats();
        cache.close();
        cache.close();

        assert!(queued.await.is_ok());
        let err = cache.lookup(Vec::new()).await.expect_err("closed");
        assert_eq!(err, CacheError::ShardClosed(shard()));
    }

    #[tokio::test]
    async fn failed_load_fails_every_request() {
        let cache = ShardCache::spawn(
            shard(),
            TODAY,
            Arc::new(BrokenSource),
            CacheConfig::default(),
        );
        let err = cache.lookup(Vec::new()).await.expect_err("load failed");
        assert!(matches!(err, CacheError::LoadFailed { .. }));
        assert!(err.to_string().contains("disk on fire"));
    }
}
