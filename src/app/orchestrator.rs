//! Bootstrap, dispatch and teardown of the pipeline.
//!
//! Bootstrap and teardown each run inside a [`DeferredSignals`] scope, so
//! an interrupt arriving halfway through either sequence takes effect only
//! once the sequence has completed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use super::logging::log_progress;
use super::shutdown::{shutdown_requested, ShutdownReason};
use super::statistics::{print_pipeline_statistics, print_simple_summary};
use crate::config::{
    Config, ABORT_POLL_INTERVAL, DISPATCH_TICK, LOGGING_INTERVAL, STORAGE_RUNTIME_THREADS,
    WAIT_TIME_BETWEEN_POLLS,
};
use crate::error_handling::{ExecutorError, PipelineEvent, PipelineStats};
use crate::executor::BoundedExecutor;
use crate::initialization::init_storage_runtime;
use crate::models::Record;
use crate::signals::{install_termination_handler, DeferredSignals, Signal};
use crate::storage::{load_schema, BoundedPool, MetricsStore, SqliteConnectionPool};
use crate::stream::{ConsumerProvider, ReaderOptions, StreamConsumerFactory, StreamReader};

/// Timings of the pipeline loops. The defaults are the production values.
#[derive(Debug, Clone)]
pub struct PipelineTimings {
    /// How often the dispatch loop wakes up to check for shutdown.
    pub dispatch_tick: Duration,
    /// Stream reader's wait for the stop flag after each poll.
    pub wait_between_polls: Duration,
    /// Connection waiter's wait for abort after each timed-out slice.
    pub abort_poll: Duration,
    pub progress_interval: Duration,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        PipelineTimings {
            dispatch_tick: DISPATCH_TICK,
            wait_between_polls: WAIT_TIME_BETWEEN_POLLS,
            abort_poll: ABORT_POLL_INTERVAL,
            progress_interval: Duration::from_secs(LOGGING_INTERVAL),
        }
    }
}

/// Outcome of [`Orchestrator::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub received: usize,
    pub persisted: usize,
    pub dropped: usize,
    pub failed: usize,
    pub aborted: usize,
    pub decode_failed: usize,
    /// Records left in the hand-off queue and discarded at shutdown.
    pub discarded: usize,
    pub reason: ShutdownReason,
    /// Signal that arrived while teardown was running.
    pub deferred_signal: Option<Signal>,
    pub elapsed_seconds: f64,
}

/// Everything bootstrap starts and teardown stops.
struct Pipeline {
    reader: StreamReader,
    queue: Receiver<Record>,
    store: MetricsStore,
    executor: BoundedExecutor,
}

/// Wires the stream reader, worker pool and connection pool together.
pub struct Orchestrator {
    config: Config,
    timings: PipelineTimings,
    consumers: StreamConsumerFactory,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
    handle_signals: bool,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Orchestrator {
            config,
            timings: PipelineTimings::default(),
            consumers: StreamConsumerFactory::default(),
            stats: Arc::new(PipelineStats::new()),
            shutdown: CancellationToken::new(),
            handle_signals: true,
        }
    }

    pub fn with_timings(mut self, timings: PipelineTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Replaces the consumer registry, e.g. to add custom adapters.
    pub fn with_consumer_factory(mut self, consumers: StreamConsumerFactory) -> Self {
        self.consumers = consumers;
        self
    }

    /// Whether interrupt/terminate trigger teardown and are deferred around
    /// bootstrap and teardown. On by default.
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Token that stops the dispatch loop when cancelled.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the pipeline until a shutdown trigger fires, then tears it down.
    ///
    /// # Errors
    ///
    /// Bootstrap failures (invalid config, stream consumer that can't be
    /// created or connected, database or schema problems) and a worker pool
    /// that rejects tasks. Errors during teardown are logged only.
    pub fn run(&self) -> Result<RunReport> {
        let start = Instant::now();
        self.config.validate().context("Invalid configuration")?;
        if self.handle_signals {
            install_termination_handler().context("Failed to install signal handlers")?;
        }
        let runtime =
            init_storage_runtime(STORAGE_RUNTIME_THREADS).context("Failed to start storage runtime")?;

        let pipeline = {
            let _scope = self.defer_signals()?;
            self.bootstrap(&runtime)?
        };
        info!("Pipeline started");

        let reason = self.dispatch(&pipeline, start);
        info!("Shutting down: {reason}");

        let (discarded, deferred_signal) = self.guarded_teardown(pipeline, self.defer_signals());
        if let Some(signal) = deferred_signal {
            warn!("Received {signal} during teardown; shutdown was already in progress");
        }

        let elapsed_seconds = start.elapsed().as_secs_f64();
        print_pipeline_statistics(&self.stats);
        print_simple_summary(&self.stats, elapsed_seconds);

        if reason == ShutdownReason::ExecutorRejected {
            anyhow::bail!("Worker pool rejected a task; pipeline stopped");
        }
        Ok(RunReport {
            received: self.stats.get(PipelineEvent::Received),
            persisted: self.stats.get(PipelineEvent::Persisted),
            dropped: self.stats.get(PipelineEvent::Dropped),
            failed: self.stats.get(PipelineEvent::PersistFailed),
            aborted: self.stats.get(PipelineEvent::Aborted),
            decode_failed: self.stats.get(PipelineEvent::DecodeFailed),
            discarded,
            reason,
            deferred_signal,
            elapsed_seconds,
        })
    }

    fn defer_signals(&self) -> Result<Option<DeferredSignals>> {
        if !self.handle_signals {
            return Ok(None);
        }
        let scope = DeferredSignals::enter().context("Failed to defer signals")?;
        Ok(Some(scope))
    }

    /// Tears the pipeline down inside `scope`. Without a scope, teardown
    /// still runs, just without signals deferred.
    fn guarded_teardown(
        &self,
        pipeline: Pipeline,
        scope: Result<Option<DeferredSignals>>,
    ) -> (usize, Option<Signal>) {
        let scope = scope.unwrap_or_else(|e| {
            error!("Tearing down without deferring signals: {e:#}");
            None
        });
        let discarded = self.teardown(pipeline);
        (discarded, scope.and_then(DeferredSignals::finish))
    }

    /// Starts the reader, then the connection pool, then the worker pool.
    /// Whatever was started before a failure is stopped again.
    fn bootstrap(&self, runtime: &Runtime) -> Result<Pipeline> {
        let (sender, queue) = crossbeam_channel::unbounded();
        let consumers = self.consumers.clone();
        let consumer_type = self.config.stream_consumer_type.clone();
        let settings = self.config.stream_settings();
        let provider: ConsumerProvider =
            Box::new(move || consumers.create(&consumer_type, &settings));
        let options = ReaderOptions {
            poll_timeout: self.config.poll_timeout(),
            wait_between_polls: self.timings.wait_between_polls,
            drop_on_abort: self.config.drop_messages_if_abort,
        };
        let mut reader = StreamReader::start(provider, sender, options, self.stats())
            .context("Failed to start stream reader")?;

        let store = match self.open_store(runtime) {
            Ok(store) => store,
            Err(e) => {
                stop_reader(&mut reader);
                return Err(e);
            }
        };

        let executor = match BoundedExecutor::new(
            self.config.thread_pool_queue_max_size,
            self.config.thread_pool_max_workers,
            self.config.thread_pool_block_timeout(),
        ) {
            Ok(executor) => executor,
            Err(e) => {
                stop_reader(&mut reader);
                close_store(&store);
                return Err(e).context("Failed to start worker pool");
            }
        };

        Ok(Pipeline {
            reader,
            queue,
            store,
            executor,
        })
    }

    fn open_store(&self, runtime: &Runtime) -> Result<MetricsStore> {
        let schema = load_schema(self.config.sql_schema_path.as_deref())
            .context("Failed to load database schema")?;
        let inner = SqliteConnectionPool::connect(
            &self.config.database_url,
            self.config.db_pool_min_conn,
            self.config.db_pool_max_conn,
            runtime.handle().clone(),
        )
        .context("Failed to open database")?;
        let pool = BoundedPool::new(inner, self.config.db_pool_block_timeout())
            .with_abort_poll(self.timings.abort_poll);
        let store = MetricsStore::new(Arc::new(pool));
        if let Err(e) = store.initialize_db(&schema) {
            close_store(&store);
            return Err(e).context("Failed to initialize database schema");
        }
        Ok(store)
    }

    fn dispatch(&self, pipeline: &Pipeline, start: Instant) -> ShutdownReason {
        let mut last_progress = Instant::now();
        loop {
            if let Some(reason) = shutdown_requested(&self.shutdown, self.handle_signals) {
                return reason;
            }
            match pipeline.queue.recv_timeout(self.timings.dispatch_tick) {
                Ok(record) => {
                    if let Err(e) = self.submit(&pipeline.executor, &pipeline.store, record) {
                        error!("Worker pool rejected a task: {e}");
                        return ShutdownReason::ExecutorRejected;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Stream reader has stopped; no more records will arrive");
                    return ShutdownReason::StreamEnded;
                }
            }
            if last_progress.elapsed() >= self.timings.progress_interval {
                log_progress(start, &self.stats);
                last_progress = Instant::now();
            }
        }
    }

    fn submit(
        &self,
        executor: &BoundedExecutor,
        store: &MetricsStore,
        record: Record,
    ) -> Result<(), ExecutorError> {
        let store = store.clone();
        let stats = self.stats();
        match executor.submit(move || persist_record(&store, &stats, record))? {
            Some(_) => self.stats.increment(PipelineEvent::Dispatched),
            None => self.stats.increment(PipelineEvent::Dropped),
        }
        Ok(())
    }

    /// Stops every stage. Returns how many queued records were discarded.
    fn teardown(&self, pipeline: Pipeline) -> usize {
        let Pipeline {
            mut reader,
            queue,
            store,
            executor,
        } = pipeline;

        stop_reader(&mut reader);

        let mut discarded = 0;
        if self.config.drop_messages_if_abort {
            store.pool().abort();
            discarded = queue.try_iter().count();
            if discarded > 0 {
                warn!("Discarding {discarded} queued records");
            }
        } else {
            let mut drained = 0;
            for record in queue.try_iter() {
                drained += 1;
                if let Err(e) = self.submit(&executor, &store, record) {
                    error!("Failed to submit queued record during shutdown: {e}");
                }
            }
            if drained > 0 {
                info!("Submitted {drained} queued records during shutdown");
            }
        }

        executor.shutdown(true);
        close_store(&store);
        debug!("Teardown complete");
        discarded
    }
}

fn stop_reader(reader: &mut StreamReader) {
    reader.stop();
    if let Err(e) = reader.join() {
        error!("Stream reader failed: {e}");
    }
}

fn close_store(store: &MetricsStore) {
    if let Err(e) = store.pool().close_all() {
        error!("Failed to close connection pool: {e}");
    }
}

/// The task each worker runs for one record.
fn persist_record(store: &MetricsStore, stats: &PipelineStats, record: Record) {
    match store.store_metrics(&record) {
        Ok(website_id) => {
            debug!("Stored metrics for {} (website {website_id})", record.url);
            stats.increment(PipelineEvent::Persisted);
        }
        Err(e) if e.is_aborted() => {
            warn!("Discarding metrics for {}: {e}", record.url);
            stats.increment(PipelineEvent::Aborted);
        }
        Err(e) => {
            error!("Failed to persist metrics for {}: {e}", record.url);
            stats.increment(PipelineEvent::PersistFailed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryTopic, MEMORY_CONSUMER};
    use std::path::PathBuf;
    use std::thread;
    use tempfile::NamedTempFile;

    fn test_config(topic: &str, db: &NamedTempFile) -> Config {
        Config {
            stream_consumer_type: MEMORY_CONSUMER.to_string(),
            topic_name: topic.to_string(),
            database_url: format!("sqlite:{}", db.path().display()),
            db_pool_min_conn: 1,
            db_pool_max_conn: 2,
            db_pool_block_timeout_secs: 1,
            thread_pool_queue_max_size: 50,
            thread_pool_max_workers: 2,
            thread_pool_block_timeout_secs: 1,
            poll_timeout_ms: 20,
            ..Default::default()
        }
    }

    fn fast_timings() -> PipelineTimings {
        PipelineTimings {
            dispatch_tick: Duration::from_millis(10),
            wait_between_polls: Duration::from_millis(5),
            abort_poll: Duration::from_millis(10),
            progress_interval: Duration::from_secs(60),
        }
    }

    fn orchestrator(config: Config) -> Orchestrator {
        Orchestrator::new(config)
            .with_timings(fast_timings())
            .with_signal_handling(false)
    }

    fn publish(topic: &str, count: usize) {
        let topic = MemoryTopic::named(topic);
        for n in 0..count {
            topic
                .publish(0, &Record::new(format!("https://s{n}.test"), "", 200, 0.1, ""))
                .unwrap();
        }
    }

    fn wait_for_queue(pipeline: &Pipeline, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.queue.len() < len && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pipeline.queue.len(), len);
    }

    #[test]
    fn test_teardown_drains_queue_when_not_dropping() {
        let db = NamedTempFile::new().unwrap();
        let orchestrator = orchestrator(test_config("orch-drain", &db));
        let runtime = init_storage_runtime(1).unwrap();

        let pipeline = orchestrator.bootstrap(&runtime).unwrap();
        publish("orch-drain", 5);
        wait_for_queue(&pipeline, 5);

        let discarded = orchestrator.teardown(pipeline);
        assert_eq!(discarded, 0);
        assert_eq!(orchestrator.stats.get(PipelineEvent::Dispatched), 5);
        assert_eq!(orchestrator.stats.get(PipelineEvent::Persisted), 5);
    }

    #[test]
    fn test_teardown_discards_queue_when_dropping() {
        let db = NamedTempFile::new().unwrap();
        let config = Config {
            drop_messages_if_abort: true,
            ..test_config("orch-drop", &db)
        };
        let orchestrator = orchestrator(config);
        let runtime = init_storage_runtime(1).unwrap();

        let pipeline = orchestrator.bootstrap(&runtime).unwrap();
        publish("orch-drop", 4);
        wait_for_queue(&pipeline, 4);

        let discarded = orchestrator.teardown(pipeline);
        assert_eq!(discarded, 4);
        assert_eq!(orchestrator.stats.get(PipelineEvent::Dispatched), 0);
        assert_eq!(orchestrator.stats.get(PipelineEvent::Persisted), 0);
    }

    #[test]
    fn test_teardown_runs_when_signals_cannot_be_deferred() {
        let db = NamedTempFile::new().unwrap();
        let orchestrator = orchestrator(test_config("orch-no-scope", &db));
        let runtime = init_storage_runtime(1).unwrap();

        let pipeline = orchestrator.bootstrap(&runtime).unwrap();
        publish("orch-no-scope", 3);
        wait_for_queue(&pipeline, 3);

        let (discarded, signal) = orchestrator
            .guarded_teardown(pipeline, Err(anyhow::anyhow!("scope already active")));
        assert_eq!(discarded, 0);
        assert_eq!(signal, None);
        assert_eq!(orchestrator.stats.get(PipelineEvent::Persisted), 3);
        assert_eq!(MemoryTopic::named("orch-no-scope").disconnect_count(), 1);
    }

    #[test]
    fn test_run_until_cancelled() {
        let db = NamedTempFile::new().unwrap();
        publish("orch-run", 10);
        let orchestrator = orchestrator(test_config("orch-run", &db));

        let token = orchestrator.shutdown_handle();
        let stats = orchestrator.stats();
        let canceller = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            while stats.get(PipelineEvent::Persisted) < 10 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            token.cancel();
        });

        let report = orchestrator.run().unwrap();
        canceller.join().unwrap();
        assert_eq!(report.reason, ShutdownReason::Cancelled);
        assert_eq!(report.received, 10);
        assert_eq!(report.persisted, 10);
        assert_eq!(report.discarded, 0);
    }

    #[test]
    fn test_unknown_consumer_type_fails_bootstrap() {
        let db = NamedTempFile::new().unwrap();
        let config = Config {
            stream_consumer_type: "KafkaStreamConsumer".to_string(),
            ..test_config("orch-unknown", &db)
        };
        let err = orchestrator(config).run().unwrap_err();
        assert!(format!("{err:#}").contains("Unknown stream consumer type"));
    }

    #[test]
    fn test_missing_schema_file_fails_bootstrap_and_stops_reader() {
        let db = NamedTempFile::new().unwrap();
        let config = Config {
            sql_schema_path: Some(PathBuf::from("/nonexistent/db_schema.sql")),
            ..test_config("orch-schema", &db)
        };
        let err = orchestrator(config).run().unwrap_err();
        assert!(format!("{err:#}").contains("schema"));

        let topic = MemoryTopic::named("orch-schema");
        assert_eq!(topic.connect_count(), 1);
        assert_eq!(topic.disconnect_count(), 1);
    }
}
