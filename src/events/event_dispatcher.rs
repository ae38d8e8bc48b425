use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use tokio::{runtime::Handle, sync::oneshot, task::AbortHandle};

use crate::events::{
    batch_event_processor::{BatchEventProcessor, QueuedEvent},
    throttle_cache::ThrottleCache,
    BeaconSink, TrackingEvent,
};

/// Configuration for [`EventDispatcher`].
#[derive(Debug, Clone)]
pub struct EventDispatcherConfig {
    /// How long queued events wait before being flushed. Zero disables batching: every event is
    /// sent on its own, immediately.
    ///
    /// Defaults to [`EventDispatcherConfig::DEFAULT_BATCH_TIMEOUT`].
    pub batch_timeout: Duration,
    /// Window during which repeated events for the same experiment and treatment are dropped. Zero
    /// disables throttling.
    pub throttle_time: Duration,
    /// Queue size that triggers an early flush.
    ///
    /// Defaults to [`EventDispatcherConfig::MAX_QUEUE_LENGTH`].
    pub max_queue_length: usize,
}

impl EventDispatcherConfig {
    /// Default value for [`EventDispatcherConfig::batch_timeout`].
    pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(1000);
    /// Upper bound for [`EventDispatcherConfig::batch_timeout`].
    pub const MAX_BATCH_TIMEOUT: Duration = Duration::from_millis(60_000);
    /// Upper bound for [`EventDispatcherConfig::throttle_time`].
    pub const MAX_THROTTLE_TIME: Duration = Duration::from_millis(60_000);
    /// Default value for [`EventDispatcherConfig::max_queue_length`].
    pub const MAX_QUEUE_LENGTH: usize = 50;

    /// Create a new `EventDispatcherConfig` using default configuration.
    pub fn new() -> EventDispatcherConfig {
        EventDispatcherConfig::default()
    }

    /// Update batch timeout, clamped to [`EventDispatcherConfig::MAX_BATCH_TIMEOUT`].
    pub fn with_batch_timeout(mut self, batch_timeout: Duration) -> EventDispatcherConfig {
        self.batch_timeout = batch_timeout.min(Self::MAX_BATCH_TIMEOUT);
        self
    }

    /// Update throttle window, clamped to [`EventDispatcherConfig::MAX_THROTTLE_TIME`].
    pub fn with_throttle_time(mut self, throttle_time: Duration) -> EventDispatcherConfig {
        self.throttle_time = throttle_time.min(Self::MAX_THROTTLE_TIME);
        self
    }
}

impl Default for EventDispatcherConfig {
    fn default() -> EventDispatcherConfig {
        EventDispatcherConfig {
            batch_timeout: EventDispatcherConfig::DEFAULT_BATCH_TIMEOUT,
            throttle_time: Duration::ZERO,
            max_queue_length: EventDispatcherConfig::MAX_QUEUE_LENGTH,
        }
    }
}

/// Completes once a dispatched event has been handed to the beacon, whether delivery succeeded or
/// not. Throttled events complete immediately.
///
/// Dropping a `Delivery` does not cancel the delivery.
pub struct Delivery(BoxFuture<'static, ()>);

impl Delivery {
    fn done() -> Delivery {
        Delivery(futures::future::ready(()).boxed())
    }
}

impl Future for Delivery {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.0.poll_unpin(cx)
    }
}

/// Throttles, batches and delivers tracking events.
///
/// Queue, flush timer and throttle cache are guarded by a single lock, so dispatching from
/// multiple threads is safe. At most one flush timer is armed at a time.
#[derive(Clone)]
pub struct EventDispatcher {
    config: EventDispatcherConfig,
    sink: Arc<dyn BeaconSink>,
    runtime: Handle,
    state: Arc<Mutex<DispatcherState>>,
}

struct DispatcherState {
    batch: BatchEventProcessor,
    timer: Option<FlushTimer>,
    next_timer_id: u64,
    throttle: ThrottleCache,
}

struct FlushTimer {
    id: u64,
    handle: AbortHandle,
}

impl DispatcherState {
    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

impl EventDispatcher {
    /// Create a dispatcher delivering to `sink`. Timers and deliveries are spawned on `runtime`.
    pub fn new(
        config: EventDispatcherConfig,
        sink: Arc<dyn BeaconSink>,
        runtime: Handle,
    ) -> EventDispatcher {
        let batch = BatchEventProcessor::new(config.max_queue_length);
        EventDispatcher {
            config,
            sink,
            runtime,
            state: Arc::new(Mutex::new(DispatcherState {
                batch,
                timer: None,
                next_timer_id: 0,
                throttle: ThrottleCache::default(),
            })),
        }
    }

    /// Dispatch an event to the beacon at `url`.
    ///
    /// If `immediate` is set, or batching is disabled, the event is sent right away on its own.
    /// Otherwise it is queued and sent with the next batch.
    pub fn dispatch(&self, event: TrackingEvent, url: &str, immediate: bool) -> Delivery {
        let mut state = self.lock_state();

        if !self.config.throttle_time.is_zero() {
            let window =
                chrono::Duration::milliseconds(self.config.throttle_time.as_millis() as i64);
            let now = event.properties.client_time;
            let key = (
                event.properties.experiment_id.clone(),
                event.properties.experiment_group.clone(),
            );
            if state.throttle.is_throttled(&key, now, window) {
                log::debug!(target: "minixperiment",
                            experiment_id:display = key.0;
                            "tracking event throttled");
                return Delivery::done();
            }
            state.throttle.record(key, now, window);
        }

        if immediate || self.config.batch_timeout.is_zero() {
            drop(state);
            let sink = self.sink.clone();
            let url = url.to_owned();
            let handle = self.runtime.spawn(async move {
                deliver(&*sink, &url, &[event]).await;
            });
            return Delivery(
                async move {
                    // A failed join means the delivery task was cancelled or panicked; there is
                    // nothing left to wait for either way.
                    let _ = handle.await;
                }
                .boxed(),
            );
        }

        let (ack, acked) = oneshot::channel();
        let full = state.batch.push(QueuedEvent { event, ack });

        if full {
            state.disarm_timer();
            let batch = state.batch.take_batch();
            drop(state);
            log::debug!(target: "minixperiment", "event queue is full, flushing early");
            self.runtime
                .spawn(deliver_batch(self.sink.clone(), url.to_owned(), batch));
        } else if state.timer.is_none() {
            self.arm_timer(&mut state, url.to_owned());
        }

        Delivery(
            async move {
                // The sender is dropped without sending only if the batch was lost, e.g. the
                // runtime shut down. The delivery attempt is over in both cases.
                let _ = acked.await;
            }
            .boxed(),
        )
    }

    /// Deliver all queued events to `url` now and disarm the flush timer.
    pub async fn flush(&self, url: &str) {
        let batch = {
            let mut state = self.lock_state();
            state.disarm_timer();
            state.batch.take_batch()
        };
        deliver_batch(self.sink.clone(), url.to_owned(), batch).await;
    }

    fn arm_timer(&self, state: &mut DispatcherState, url: String) {
        let id = state.next_timer_id;
        state.next_timer_id += 1;

        let dispatcher = self.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(dispatcher.config.batch_timeout).await;
            let batch = {
                let mut state = dispatcher.lock_state();
                // The timer may have been disarmed (by an early flush) after it woke up but before
                // it got the lock.
                if state.timer.as_ref().map(|timer| timer.id) != Some(id) {
                    return;
                }
                state.timer = None;
                state.batch.take_batch()
            };
            deliver_batch(dispatcher.sink.clone(), url, batch).await;
        });

        state.timer = Some(FlushTimer {
            id,
            handle: handle.abort_handle(),
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatcherState> {
        // Queue and cache stay structurally valid if another dispatch panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn deliver_batch(sink: Arc<dyn BeaconSink>, url: String, batch: Vec<QueuedEvent>) {
    let (events, acks): (Vec<_>, Vec<_>) = batch
        .into_iter()
        .map(|queued| (queued.event, queued.ack))
        .unzip();

    deliver(&*sink, &url, &events).await;

    for ack in acks {
        // Receiver is gone if the caller did not wait for the delivery.
        let _ = ack.send(());
    }
}

async fn deliver(sink: &dyn BeaconSink, url: &str, events: &[TrackingEvent]) {
    if events.is_empty() {
        return;
    }

    match sink.send_events(url, events).await {
        Ok(()) => {
            log::debug!(target: "minixperiment", url = url, count = events.len(); "delivered tracking events");
        }
        Err(err) => {
            log::warn!(target: "minixperiment", url = url, count = events.len(); "failed to deliver tracking events: {:?}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::runtime::Handle;

    use super::{EventDispatcher, EventDispatcherConfig};
    use crate::testing::{event, FailingSink, RecordingSink};

    const URL: &str = "https://beacon.test/";

    fn dispatcher(config: EventDispatcherConfig) -> (EventDispatcher, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = EventDispatcher::new(config, sink.clone(), Handle::current());
        (dispatcher, sink)
    }

    #[test]
    fn config_is_clamped() {
        let config = EventDispatcherConfig::new()
            .with_batch_timeout(Duration::from_secs(3_600))
            .with_throttle_time(Duration::from_secs(3_600));

        assert_eq!(config.batch_timeout, EventDispatcherConfig::MAX_BATCH_TIMEOUT);
        assert_eq!(config.throttle_time, EventDispatcherConfig::MAX_THROTTLE_TIME);
        assert_eq!(
            EventDispatcherConfig::default().batch_timeout,
            Duration::from_millis(1000)
        );
    }

    #[tokio::test]
    async fn zero_batch_timeout_sends_each_event_immediately() {
        let (dispatcher, sink) =
            dispatcher(EventDispatcherConfig::new().with_batch_timeout(Duration::ZERO));

        dispatcher.dispatch(event("exp_1", "a"), URL, false).await;
        dispatcher.dispatch(event("exp_2", "b"), URL, false).await;

        let requests = sink.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, URL);
        assert_eq!(requests[0].1, vec![event("exp_1", "a")]);
        assert_eq!(requests[1].1, vec![event("exp_2", "b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_events_until_timeout() {
        let (dispatcher, sink) = dispatcher(EventDispatcherConfig::new());

        let first = dispatcher.dispatch(event("exp_1", "a"), URL, false);
        let second = dispatcher.dispatch(event("exp_2", "b"), URL, false);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(sink.requests().is_empty());

        first.await;
        second.await;

        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, vec![event("exp_1", "a"), event("exp_2", "b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_dispatch_bypasses_the_queue() {
        let (dispatcher, sink) = dispatcher(EventDispatcherConfig::new());

        dispatcher.dispatch(event("exp_1", "a"), URL, true).await;

        assert_eq!(sink.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_flushes_early_and_disarms_timer() {
        let (dispatcher, sink) = dispatcher(EventDispatcherConfig::new());

        for i in 0..49 {
            let _ = dispatcher.dispatch(event(&format!("exp_{i}"), "a"), URL, false);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sink.requests().is_empty());

        dispatcher.dispatch(event("exp_49", "a"), URL, false).await;
        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1.len(), 50);

        // Arms a fresh timer; the one armed for the first batch must not fire it early.
        let late = dispatcher.dispatch(event("exp_50", "a"), URL, false);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(sink.requests().len(), 1);

        late.await;
        let requests = sink.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].1, vec![event("exp_50", "a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn throttles_repeated_treatments() {
        let (dispatcher, sink) = dispatcher(
            EventDispatcherConfig::new().with_throttle_time(Duration::from_millis(60_000)),
        );

        let first = dispatcher.dispatch(event("exp_1", "a"), URL, false);
        // Throttled, so this completes without waiting for the batch.
        dispatcher.dispatch(event("exp_1", "a"), URL, false).await;
        assert!(sink.requests().is_empty());

        let other_group = dispatcher.dispatch(event("exp_1", "b"), URL, false);
        first.await;
        other_group.await;

        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, vec![event("exp_1", "a"), event("exp_1", "b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_sends_queue_now() {
        let (dispatcher, sink) = dispatcher(EventDispatcherConfig::new());

        let delivery = dispatcher.dispatch(event("exp_1", "a"), URL, false);
        dispatcher.flush(URL).await;
        delivery.await;
        assert_eq!(sink.requests().len(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_still_completes() {
        let dispatcher = EventDispatcher::new(
            EventDispatcherConfig::new(),
            Arc::new(FailingSink),
            Handle::current(),
        );

        dispatcher.dispatch(event("exp_1", "a"), URL, true).await;
        dispatcher.dispatch(event("exp_2", "a"), URL, false).await;
    }
}
