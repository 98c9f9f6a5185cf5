// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::EventsCounterStatus;
use crate::constants::SUBSAMPLE_DROP_PASS;
use crate::trace_logger::{LogLevel, TraceLogger};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// What the queue needs from an entry to subsample, prune and index it.
pub trait QueueEvent {
    fn id(&self) -> &str;

    /// Returns true when the entry should be discarded for this pass.
    fn try_drop(&mut self, pass_prob: f32, drop_pass: u32) -> bool;

    fn set_event_index(&mut self, index: u64);
}

struct QueueState<T> {
    entries: VecDeque<(T, usize)>,
    capacity: usize,
    drop_pass: u32,
    events_counter: u64,
}

/// Byte bounded FIFO shared by producers and the drain thread.
pub struct EventQueue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    max_capacity: usize,
    subsample_rate: f32,
    events_counter_status: EventsCounterStatus,
    trace_logger: Arc<dyn TraceLogger>,
}

impl<T: QueueEvent> EventQueue<T> {
    pub fn new(
        name: impl Into<String>,
        max_capacity: usize,
        subsample_rate: f32,
        events_counter_status: EventsCounterStatus,
        trace_logger: Arc<dyn TraceLogger>,
    ) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                capacity: 0,
                drop_pass: 0,
                events_counter: 0,
            }),
            max_capacity,
            subsample_rate,
            events_counter_status,
            trace_logger,
        }
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        self.state.lock().expect("lock poisoned")
    }

    /// Appends `item` unless subsampling drops it. Returns whether it was enqueued.
    pub fn push(&self, mut item: T, size_estimate: usize) -> bool {
        let mut state = self.lock();

        // Indices are consumed by subsampled events too.
        if self.events_counter_status == EventsCounterStatus::Enable {
            state.events_counter += 1;
            item.set_event_index(state.events_counter);
        }

        if self.subsample_rate < 1.0 && item.try_drop(self.subsample_rate, SUBSAMPLE_DROP_PASS) {
            return false;
        }

        state.entries.push_back((item, size_estimate));
        state.capacity += size_estimate;
        true
    }

    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        let (item, size) = state.entries.pop_front()?;
        state.capacity = state.capacity.saturating_sub(size);
        Some(item)
    }

    /// Drops entries by their own drop decision once the queue is at capacity.
    pub fn prune(&self, pass_prob: f32) {
        let mut state = self.lock();
        if state.capacity < self.max_capacity || state.entries.is_empty() {
            return;
        }

        let QueueState {
            entries,
            capacity,
            drop_pass,
            ..
        } = &mut *state;

        let first = entries.front().map(|(e, _)| e.id().to_string()).unwrap_or_default();
        let last = entries.back().map(|(e, _)| e.id().to_string()).unwrap_or_default();
        let pass = *drop_pass;
        let mut dropped = 0usize;

        entries.retain_mut(|(event, size)| {
            if event.try_drop(pass_prob, pass) {
                *capacity = capacity.saturating_sub(*size);
                dropped += 1;
                false
            } else {
                true
            }
        });
        *drop_pass = drop_pass.wrapping_add(1);
        drop(state);

        self.trace_logger.log(
            LogLevel::Debug,
            &format!(
                "[DROP] [{}] Messages range: {first}-{last} Dropped: {dropped}",
                self.name
            ),
        );
    }

    /// Approximate number of queued entries.
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn is_full(&self) -> bool {
        self.capacity() >= self.max_capacity
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::trace_logger::{NullTraceLogger, TracingTraceLogger};
    use proptest::prelude::*;
    use tracing_test::traced_test;

    #[derive(Debug, Clone, PartialEq)]
    struct TestEvent {
        id: String,
        index: Option<u64>,
    }

    impl TestEvent {
        fn new(id: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                index: None,
            }
        }
    }

    impl QueueEvent for TestEvent {
        fn id(&self) -> &str {
            &self.id
        }

        fn try_drop(&mut self, _pass_prob: f32, _drop_pass: u32) -> bool {
            self.id.starts_with("drop")
        }

        fn set_event_index(&mut self, index: u64) {
            self.index = Some(index);
        }
    }

    fn queue(max_capacity: usize, subsample_rate: f32) -> EventQueue<TestEvent> {
        EventQueue::new(
            "test",
            max_capacity,
            subsample_rate,
            EventsCounterStatus::Enable,
            Arc::new(NullTraceLogger),
        )
    }

    #[test]
    fn test_push_pop() {
        let queue = queue(30, 1.0);
        for id in ["1", "2", "3"] {
            assert!(queue.push(TestEvent::new(id), 10));
        }
        assert_eq!(queue.size(), 3);

        for (i, id) in ["1", "2", "3"].iter().enumerate() {
            let event = queue.pop().unwrap();
            assert_eq!(event.id, *id);
            assert_eq!(event.index, Some(i as u64 + 1));
            assert_eq!(queue.size(), 2 - i);
        }
        assert!(queue.pop().is_none());
        assert_eq!(queue.capacity(), 0);
    }

    #[test]
    fn test_prune_is_gated_by_capacity() {
        let queue = queue(30, 1.0);
        queue.push(TestEvent::new("no_drop_1"), 10);
        queue.push(TestEvent::new("drop_1"), 10);

        queue.prune(1.0);
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.capacity(), 20);

        queue.push(TestEvent::new("no_drop_2"), 10);
        queue.push(TestEvent::new("drop_2"), 10);
        queue.push(TestEvent::new("no_drop_3"), 10);
        assert_eq!(queue.capacity(), 50);
        assert!(queue.is_full());

        queue.prune(1.0);
        assert_eq!(queue.size(), 3);
        assert_eq!(queue.capacity(), 30);

        let survivors: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|e| (e.id, e.index))
            .collect();
        assert_eq!(
            survivors,
            vec![
                ("no_drop_1".to_string(), Some(1)),
                ("no_drop_2".to_string(), Some(3)),
                ("no_drop_3".to_string(), Some(5)),
            ]
        );
    }

    #[test]
    #[traced_test]
    fn test_prune_reports_dropped_range() {
        let queue = EventQueue::new(
            "interaction",
            10,
            1.0,
            EventsCounterStatus::Disable,
            Arc::new(TracingTraceLogger),
        );
        queue.push(TestEvent::new("drop_a"), 10);
        queue.push(TestEvent::new("keep_b"), 10);
        queue.prune(0.5);
        assert!(logs_contain(
            "[DROP] [interaction] Messages range: drop_a-keep_b Dropped: 1"
        ));
    }

    #[test]
    fn test_subsampling_consumes_indices() {
        let queue = queue(30, 0.5);
        for i in 0..10 {
            let id = if i % 2 == 0 {
                format!("drop_{}", i + 1)
            } else {
                format!("no_drop_{}", i + 1)
            };
            queue.push(TestEvent::new(id), 10);
        }
        assert_eq!(queue.size(), 5);

        for i in (1..10).step_by(2) {
            let event = queue.pop().unwrap();
            assert_eq!(event.id, format!("no_drop_{}", i + 1));
            assert_eq!(event.index, Some(i as u64 + 1));
        }
    }

    #[test]
    fn test_concurrent_pushes() {
        let queue = Arc::new(queue(30, 1.0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        queue.push(TestEvent::new(format!("{i}-{j}")), 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.size(), 200);
        assert_eq!(queue.capacity(), 200);
    }

    proptest! {
        #[test]
        fn test_fifo_and_capacity(
            sizes in proptest::collection::vec(0usize..1000, 0..50),
            pops in 0usize..60,
        ) {
            let queue = queue(usize::MAX, 1.0);
            for (i, size) in sizes.iter().enumerate() {
                queue.push(TestEvent::new(i.to_string()), *size);
            }

            let mut expected = sizes.iter().sum::<usize>();
            for i in 0..pops.min(sizes.len()) {
                let event = queue.pop().unwrap();
                prop_assert_eq!(event.id, i.to_string());
                expected -= sizes[i];
                prop_assert_eq!(queue.capacity(), expected);
            }
            prop_assert_eq!(queue.size(), sizes.len() - pops.min(sizes.len()));
        }
    }
}
