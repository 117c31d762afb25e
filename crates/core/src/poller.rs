//! Call Record Poller
//!
//! Refreshes a call's authoritative record on a fixed interval until the
//! record reaches a terminal status or the watch is cancelled.

use crate::{
    calling_api::CallingApi,
    error::CallError,
    record::{CallRecord, CallStatus, MergeOutcome, RecordCache},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive failed ticks before the owner is warned.
pub const DEGRADED_AFTER: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// The cached record changed.
    Updated(CallRecord),
    /// A single tick failed; polling continues.
    FetchFailed { consecutive: u32, error: CallError },
    /// Emitted once per failure streak when it reaches [`DEGRADED_AFTER`].
    Degraded { consecutive: u32, error: CallError },
    /// The record is terminal; the watch has stopped for good.
    Finished(CallStatus),
}

#[derive(Clone)]
pub struct CallRecordPoller {
    api: Arc<dyn CallingApi>,
    cache: RecordCache,
    interval: Duration,
}

impl CallRecordPoller {
    pub fn new(api: Arc<dyn CallingApi>, cache: RecordCache, interval: Duration) -> Self {
        Self {
            api,
            cache,
            interval,
        }
    }

    pub fn cache(&self) -> &RecordCache {
        &self.cache
    }

    /// Starts watching `call_id`. The first fetch happens immediately.
    ///
    /// Dropping the returned handle cancels the watch.
    pub fn watch(&self, call_id: impl Into<String>) -> PollHandle {
        let call_id = call_id.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_watch(
            self.api.clone(),
            self.cache.clone(),
            self.interval,
            call_id.clone(),
            cancel_rx,
            events_tx,
        ));
        PollHandle {
            call_id,
            cancel_tx,
            events: events_rx,
            task,
        }
    }
}

/// Disposer for one watch.
pub struct PollHandle {
    call_id: String,
    cancel_tx: watch::Sender<bool>,
    events: mpsc::UnboundedReceiver<PollEvent>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Stops the watch. A fetch in flight is discarded when it lands.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Next event, or `None` once the watch has stopped. Cancel-safe.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        if self.is_cancelled() {
            return None;
        }
        self.events.recv().await
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
        self.task.abort();
    }
}

async fn run_watch(
    api: Arc<dyn CallingApi>,
    cache: RecordCache,
    interval: Duration,
    call_id: String,
    mut cancel_rx: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<PollEvent>,
) {
    let mut ticker = time::interval(interval);
    // A tick that fires while a fetch is in flight is skipped, never queued.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut consecutive_failures = 0u32;
    info!(%call_id, ?interval, "Watching call record");

    loop {
        tokio::select! {
            biased;
            _ = cancel_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel_rx.changed() => break,
            fetched = api.get_call_record(&call_id) => fetched,
        };

        // A record for another call is a bad reply and counts toward the failure streak.
        let fetched = fetched.and_then(|record| {
            if record.call_id == call_id {
                Ok(record)
            } else {
                Err(CallError::Service(format!(
                    "response was for call `{}`",
                    record.call_id
                )))
            }
        });

        match fetched {
            Ok(record) => {
                consecutive_failures = 0;
                let status = record.call_status;
                let merged = cache.merge_if(record, || !*cancel_rx.borrow());
                match merged {
                    None => break,
                    Some(MergeOutcome::Stale) => {
                        debug!(%call_id, ?status, "Dropped stale call record");
                    }
                    Some(_) => {
                        if let Some(current) = cache.get(&call_id) {
                            let _ = events.send(PollEvent::Updated(current));
                        }
                    }
                }
                if let Some(current) = cache.get(&call_id) {
                    if current.call_status.is_terminal() {
                        info!(
                            %call_id,
                            status = ?current.call_status,
                            "Call record is terminal; polling stopped"
                        );
                        let _ = events.send(PollEvent::Finished(current.call_status));
                        break;
                    }
                }
            }
            Err(error) => {
                if *cancel_rx.borrow() {
                    break;
                }
                consecutive_failures += 1;
                warn!(%call_id, consecutive_failures, %error, "Call record refresh failed");
                let event = if consecutive_failures == DEGRADED_AFTER {
                    PollEvent::Degraded {
                        consecutive: consecutive_failures,
                        error,
                    }
                } else {
                    PollEvent::FetchFailed {
                        consecutive: consecutive_failures,
                        error,
                    }
                };
                let _ = events.send(event);
            }
        }
    }
    debug!(%call_id, "Call record watch finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calling_api::{MockCallingApi, WebCallRegistration};
    use crate::record::{AgentSummary, sample_record};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    /// Serves fetches from a script; a `Gate` entry blocks until the test releases it.
    enum Step {
        Reply(Result<CallRecord, CallError>),
        Gate(oneshot::Receiver<Result<CallRecord, CallError>>),
    }

    struct ScriptedApi {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CallingApi for ScriptedApi {
        async fn register_web_call(&self, _: &str) -> Result<WebCallRegistration, CallError> {
            unreachable!("the poller never registers calls")
        }

        async fn get_call_record(&self, call_id: &str) -> Result<CallRecord, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            let result = match step {
                Some(Step::Reply(result)) => result,
                Some(Step::Gate(rx)) => rx
                    .await
                    .unwrap_or_else(|_| Err(CallError::Service("gate dropped".into()))),
                None => Ok(sample_record(call_id, CallStatus::Ongoing)),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn list_agents(&self) -> Result<Vec<AgentSummary>, CallError> {
            Ok(vec![])
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn poller(api: Arc<dyn CallingApi>) -> CallRecordPoller {
        CallRecordPoller::new(api, RecordCache::new(), DEFAULT_POLL_INTERVAL)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_terminal_status() {
        let mut api = MockCallingApi::new();
        let mut seq = mockall::Sequence::new();
        for status in [CallStatus::Registered, CallStatus::Ongoing, CallStatus::Ended] {
            api.expect_get_call_record()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |id| Ok(sample_record(id, status)));
        }
        let poller = poller(Arc::new(api));
        let mut handle = poller.watch("call_1");

        let mut seen = Vec::new();
        while let Some(event) = handle.next_event().await {
            seen.push(event);
        }

        assert_eq!(seen.len(), 4);
        assert!(matches!(
            seen[0],
            PollEvent::Updated(ref r) if r.call_status == CallStatus::Registered
        ));
        assert_eq!(seen[3], PollEvent::Finished(CallStatus::Ended));
        assert_eq!(
            poller.cache().get("call_1").unwrap().call_status,
            CallStatus::Ended
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_responses_never_move_backwards() {
        let api = ScriptedApi::new(vec![
            Step::Reply(Ok(sample_record("call_1", CallStatus::Ongoing))),
            Step::Reply(Ok(sample_record("call_1", CallStatus::Registered))),
            Step::Reply(Ok(sample_record("call_1", CallStatus::Ongoing))),
            Step::Reply(Ok(sample_record("call_1", CallStatus::Error))),
        ]);
        let mut handle = poller(api).watch("call_1");

        let mut ranks = Vec::new();
        while let Some(event) = handle.next_event().await {
            if let PollEvent::Updated(record) = event {
                ranks.push(record.call_status.rank());
            }
        }
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{ranks:?}");
        assert_eq!(ranks.last(), Some(&CallStatus::Error.rank()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_polling() {
        let api = ScriptedApi::new(vec![
            Step::Reply(Err(CallError::Service("502".into()))),
            Step::Reply(Err(CallError::Service("502".into()))),
            Step::Reply(Err(CallError::NotFound("call".into()))),
            Step::Reply(Err(CallError::Service("502".into()))),
            Step::Reply(Ok(sample_record("call_1", CallStatus::Ended))),
        ]);
        let mut handle = poller(api.clone()).watch("call_1");

        let mut seen = Vec::new();
        while let Some(event) = handle.next_event().await {
            seen.push(event);
        }

        let degraded: Vec<_> = seen
            .iter()
            .filter(|e| matches!(e, PollEvent::Degraded { .. }))
            .collect();
        assert_eq!(degraded.len(), 1);
        assert!(matches!(
            degraded[0],
            PollEvent::Degraded { consecutive: 3, .. }
        ));
        assert!(matches!(seen[3], PollEvent::FetchFailed { consecutive: 4, .. }));
        assert_eq!(seen.last(), Some(&PollEvent::Finished(CallStatus::Ended)));
        assert_eq!(api.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_for_other_call_extends_failure_streak() {
        let api = ScriptedApi::new(vec![
            Step::Reply(Err(CallError::Service("502".into()))),
            Step::Reply(Ok(sample_record("call_2", CallStatus::Ongoing))),
            Step::Reply(Err(CallError::Service("502".into()))),
        ]);
        let poller = poller(api.clone());
        let mut handle = poller.watch("call_1");

        assert!(matches!(
            handle.next_event().await,
            Some(PollEvent::FetchFailed { consecutive: 1, .. })
        ));
        match handle.next_event().await {
            Some(PollEvent::FetchFailed {
                consecutive: 2,
                error,
            }) => assert_eq!(error.reason(), "response was for call `call_2`"),
            other => panic!("expected a second failure, got {other:?}"),
        }
        assert!(matches!(
            handle.next_event().await,
            Some(PollEvent::Degraded { consecutive: 3, .. })
        ));
        assert!(poller.cache().get("call_2").is_none());
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_fixed_interval() {
        let api = ScriptedApi::new(vec![]);
        let mut handle = poller(api.clone()).watch("call_1");

        handle.next_event().await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_skips_ticks() {
        let (release_tx, release_rx) = oneshot::channel();
        let api = ScriptedApi::new(vec![Step::Gate(release_rx)]);
        let mut handle = poller(api.clone()).watch("call_1");

        // Three intervals elapse while the first fetch is still pending.
        time::sleep(Duration::from_secs(16)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        release_tx
            .send(Ok(sample_record("call_1", CallStatus::Ongoing)))
            .unwrap();
        handle.next_event().await.unwrap();
        // One catch-up fetch at t=16, the next one not before t=20.
        time::sleep(Duration::from_secs(3)).await;

        assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_in_flight_result() {
        let (release_tx, release_rx) = oneshot::channel();
        let api = ScriptedApi::new(vec![Step::Gate(release_rx)]);
        let poller = poller(api.clone());
        let mut handle = poller.watch("call_1");

        settle().await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        handle.cancel();
        let _ = release_tx.send(Ok(sample_record("call_1", CallStatus::Ended)));
        time::sleep(Duration::from_secs(30)).await;

        assert!(poller.cache().get("call_1").is_none());
        assert_eq!(handle.next_event().await, None);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels() {
        let api = ScriptedApi::new(vec![]);
        let handle = poller(api.clone()).watch("call_1");
        settle().await;
        drop(handle);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }
}
