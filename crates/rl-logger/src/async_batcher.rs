// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::buffer::BufferPool;
use crate::config::{BatcherConfig, QueueMode};
use crate::constants::DROP_MODE_PASS_PROB;
use crate::dedup::DedupState;
use crate::errors::{Error, ErrorCallback, Result};
use crate::event::PendingEvent;
use crate::event_queue::EventQueue;
use crate::sender::Sender;
use crate::serializer::{CollectionSerializer, SerializerKind};
use crate::trace_logger::{NullTraceLogger, TraceLogger};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// State shared between producers and the drain thread.
struct Shared {
    name: String,
    queue: EventQueue<PendingEvent>,
    config: BatcherConfig,
    kind: SerializerKind,
    dedup: Option<Arc<DedupState>>,
    pool: BufferPool,
    blocked: Mutex<()>,
    unblocked: Condvar,
    error_callback: Option<ErrorCallback>,
}

impl Shared {
    fn report(&self, error: Error) {
        error!("[{}] {error}", self.name);
        if let Some(callback) = &self.error_callback {
            callback(&error);
        }
    }

    /// Wakes every producer blocked on a full queue.
    #[allow(clippy::expect_used)]
    fn notify_popped(&self) {
        if self.config.queue_mode == QueueMode::Block {
            let _guard = self.blocked.lock().expect("lock poisoned");
            self.unblocked.notify_all();
        }
    }

    #[allow(clippy::expect_used)]
    fn wait_until_not_full(&self) {
        let guard = self.blocked.lock().expect("lock poisoned");
        let _guard = self
            .unblocked
            .wait_while(guard, |_| self.queue.is_full())
            .expect("lock poisoned");
    }

    /// Drains the events queued when the cycle starts into one or more buffers.
    async fn run_iteration(&self, sender: &mut dyn Sender) {
        let mut remaining = self.queue.size();
        while remaining > 0 {
            let mut serializer =
                CollectionSerializer::new(self.kind, self.pool.acquire(), self.dedup.clone());
            self.fill_buffer(&mut serializer, &mut remaining);

            if serializer.count() == 0 {
                self.pool.release(serializer.into_buffer());
                continue;
            }

            let count = serializer.count();
            let buffer = match serializer.finalize() {
                Ok(buffer) => Arc::new(buffer),
                Err(e) => {
                    self.report(e);
                    continue;
                }
            };

            debug!(
                "[{}] Sending {count} events in {} bytes",
                self.name,
                buffer.body_len()
            );
            if let Err(e) = sender.send(Arc::clone(&buffer)).await {
                self.report(e);
            }

            // The sender may still hold the buffer.
            if let Ok(buffer) = Arc::try_unwrap(buffer) {
                self.pool.release(buffer);
            }
        }
    }

    /// Adds events until the high water mark. Every buffer takes at least one event.
    fn fill_buffer(&self, serializer: &mut CollectionSerializer, remaining: &mut usize) {
        while *remaining > 0
            && (serializer.count() == 0 || serializer.size() < self.config.send_high_water_mark)
        {
            let Some(pending) = self.queue.pop() else {
                *remaining = 0;
                break;
            };
            *remaining -= 1;
            self.notify_popped();

            if let Err(e) = pending
                .materialize()
                .and_then(|event| serializer.add(event))
            {
                self.report(e);
            }
        }
    }

    async fn run(&self, mut sender: Box<dyn Sender>, cancel: CancellationToken) {
        let mut ticker = interval(self.config.batch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.run_iteration(sender.as_mut()).await,
            }
        }

        if self.queue.size() > 0 {
            debug!("[{}] Flushing {} events on shutdown", self.name, self.queue.size());
            self.run_iteration(sender.as_mut()).await;
        }
    }
}

/// Drains an event queue into size bounded buffers on a dedicated thread.
///
/// Dropping the batcher stops the timer, flushes whatever is still queued and joins the thread.
pub struct AsyncBatcher {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl AsyncBatcher {
    pub fn new(
        name: impl Into<String>,
        config: BatcherConfig,
        kind: SerializerKind,
        dedup: Option<Arc<DedupState>>,
        trace_logger: Option<Arc<dyn TraceLogger>>,
        error_callback: Option<ErrorCallback>,
    ) -> Self {
        let name = name.into();
        let trace_logger = trace_logger.unwrap_or_else(|| Arc::new(NullTraceLogger));
        let queue = EventQueue::new(
            name.as_str(),
            config.send_queue_max_capacity,
            config.subsample_rate,
            config.events_counter_status,
            trace_logger,
        );
        Self {
            shared: Arc::new(Shared {
                name,
                queue,
                config,
                kind,
                dedup,
                pool: BufferPool::new(),
                blocked: Mutex::new(()),
                unblocked: Condvar::new(),
                error_callback,
            }),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    /// Initializes the sender on the drain thread and starts the periodic flush.
    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let worker = thread::Builder::new()
            .name(format!("rl-async-batcher-{}", self.shared.name))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::BackgroundThreadStart(e.to_string())));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let mut sender = sender;
                    if let Err(e) = sender.init().await {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));
                    shared.run(sender, cancel).await;
                });
            })
            .map_err(|e| Error::BackgroundThreadStart(e.to_string()))?;

        let ready = ready_rx.blocking_recv().unwrap_or_else(|_| {
            Err(Error::BackgroundThreadStart(
                "drain thread exited before reporting".to_string(),
            ))
        });
        match ready {
            Ok(()) => {
                self.worker = Some(worker);
                debug!("[{}] Batcher started: {}", self.shared.name, self.shared.config);
                Ok(())
            }
            Err(e) => {
                let _ = worker.join();
                Err(e)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.worker.is_some()
    }

    /// Queues an event for the next drain cycle.
    ///
    /// Subsampled events are accepted and discarded. A full queue blocks the caller in
    /// `BLOCK` mode and is pruned in `DROP` mode.
    pub fn append(&self, event: PendingEvent) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let size = event.size_estimate();
        if !self.shared.queue.push(event, size) {
            return Ok(());
        }

        if self.shared.queue.is_full() {
            match self.shared.config.queue_mode {
                QueueMode::Block => self.shared.wait_until_not_full(),
                QueueMode::Drop => self.shared.queue.prune(DROP_MODE_PASS_PROB),
            }
        }
        Ok(())
    }

    pub fn queue_size(&self) -> usize {
        self.shared.queue.size()
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.shared.config
    }
}

impl Drop for AsyncBatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("[{}] Drain thread panicked", self.shared.name);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::buffer::DataBuffer;
    use crate::event::{Event, OutcomeEvent, OutcomeValue};
    use crate::time::Timestamp;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingSender {
        sent: Arc<AtomicUsize>,
        fail_init: bool,
    }

    #[async_trait]
    impl Sender for CountingSender {
        async fn init(&mut self) -> Result<()> {
            if self.fail_init {
                return Err(Error::Sender("unreachable collector".to_string()));
            }
            Ok(())
        }

        async fn send(&mut self, _buffer: Arc<DataBuffer>) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn outcome(id: &str) -> PendingEvent {
        PendingEvent::from(Event::Outcome(OutcomeEvent::report_outcome(
            id,
            OutcomeValue::Numeric(1.0),
            Timestamp::default(),
        )))
    }

    fn batcher(config: BatcherConfig) -> AsyncBatcher {
        AsyncBatcher::new("test", config, SerializerKind::JsonOutcome, None, None, None)
    }

    #[test]
    fn test_append_before_init_fails() {
        let batcher = batcher(BatcherConfig::default());
        assert!(matches!(batcher.append(outcome("a")), Err(Error::NotInitialized)));
        assert_eq!(batcher.queue_size(), 0);
    }

    #[test]
    fn test_init_twice_fails() {
        let mut batcher = batcher(BatcherConfig::default());
        batcher.init(Box::new(CountingSender::default())).unwrap();
        assert!(matches!(
            batcher.init(Box::new(CountingSender::default())),
            Err(Error::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_sender_init_failure_is_returned() {
        let mut batcher = batcher(BatcherConfig::default());
        let sender = CountingSender {
            fail_init: true,
            ..Default::default()
        };
        assert!(matches!(batcher.init(Box::new(sender)), Err(Error::Sender(_))));
        assert!(!batcher.is_initialized());
    }

    #[test]
    fn test_drop_flushes_pending_events() {
        let sender = CountingSender::default();
        let sent = Arc::clone(&sender.sent);
        {
            let mut batcher = batcher(BatcherConfig {
                send_batch_interval_ms: 60_000,
                ..Default::default()
            });
            batcher.init(Box::new(sender)).unwrap();
            batcher.append(outcome("a")).unwrap();
            batcher.append(outcome("b")).unwrap();
        }
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_batcher_sends_nothing() {
        let sender = CountingSender::default();
        let sent = Arc::clone(&sender.sent);
        {
            let mut batcher = batcher(BatcherConfig {
                send_batch_interval_ms: 10,
                ..Default::default()
            });
            batcher.init(Box::new(sender)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subsampled_append_is_accepted() {
        let mut batcher = batcher(BatcherConfig {
            subsample_rate: f32::MIN_POSITIVE,
            send_batch_interval_ms: 60_000,
            ..Default::default()
        });
        batcher.init(Box::new(CountingSender::default())).unwrap();
        for i in 0..20 {
            batcher.append(outcome(&format!("event-{i}"))).unwrap();
        }
        assert_eq!(batcher.queue_size(), 0);
    }

    #[test]
    fn test_drop_mode_prunes_full_queue() {
        let mut batcher = batcher(BatcherConfig {
            send_queue_max_capacity: 50,
            send_batch_interval_ms: 60_000,
            ..Default::default()
        });
        batcher.init(Box::new(CountingSender::default())).unwrap();
        for i in 0..200 {
            batcher.append(outcome(&format!("event-{i}"))).unwrap();
        }
        assert!(batcher.queue_size() < 200);
    }

    #[test]
    fn test_block_mode_releases_every_producer() {
        let sender = CountingSender::default();
        let sent = Arc::clone(&sender.sent);
        let mut batcher = batcher(BatcherConfig {
            queue_mode: QueueMode::Block,
            send_queue_max_capacity: 64,
            send_batch_interval_ms: 5,
            ..Default::default()
        });
        batcher.init(Box::new(sender)).unwrap();

        thread::scope(|scope| {
            for producer in 0..4 {
                let batcher = &batcher;
                scope.spawn(move || {
                    for i in 0..50 {
                        batcher.append(outcome(&format!("p{producer}-{i}"))).unwrap();
                    }
                });
            }
        });

        drop(batcher);
        assert!(sent.load(Ordering::SeqCst) > 0);
    }
}
