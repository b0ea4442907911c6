//! Event Bridge
//!
//! Reconciles the client's callback-driven delivery with the sequential
//! style of test procedures. A wait subscribes its handlers, then pumps the
//! event stream until one of three things happens:
//!
//! 1. the handlers have fired (`Matched`)
//! 2. the session state left the allowed set (`UnexpectedState`)
//! 3. the time budget ran out (`Timeout`)
//!
//! The checks run in that order before every pump, so a wait issued against
//! an already deviated session fails without consuming any of its budget.
//! Handler subscriptions are scoped guards and are gone once the wait
//! returns, by any path, including cancellation of the wait future.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::callbacks::{CallbackManager, Subscription};
use crate::errors::{HarnessError, HarnessResult, TimeoutKind};
use crate::events::{Callback, ClientEvent, EventKind, EventReceiver};
use crate::state::ConnectionState;

// ----------------------------------------------------------------------------
// Wait Outcome
// ----------------------------------------------------------------------------

/// Result of one wait invocation. Exactly one variant per call.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    Matched(T),
    Timeout { elapsed: Duration },
    UnexpectedState { current: ConnectionState },
}

impl<T> WaitOutcome<T> {
    pub fn is_matched(&self) -> bool {
        matches!(self, WaitOutcome::Matched(_))
    }

    /// Convert into a harness result, attributing failures to `awaited`
    pub fn into_result(
        self,
        kind: TimeoutKind,
        awaited: &str,
        expected: &[ConnectionState],
    ) -> HarnessResult<T> {
        match self {
            WaitOutcome::Matched(value) => Ok(value),
            WaitOutcome::Timeout { elapsed } => Err(HarnessError::timeout(kind, awaited, elapsed)),
            WaitOutcome::UnexpectedState { current } => Err(HarnessError::UnexpectedState {
                current,
                expected: expected.to_vec(),
                awaited: awaited.to_string(),
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Expectations
// ----------------------------------------------------------------------------

/// A handler waiting for one event kind during a joint wait
pub struct Expectation<'h> {
    kind: EventKind,
    inbox: Arc<Mutex<VecDeque<ClientEvent>>>,
    deliver: Box<dyn FnMut(&ClientEvent) -> bool + Send + 'h>,
    fired: usize,
}

impl<'h> Expectation<'h> {
    /// Expect an `E`, invoking `handler` once per delivery
    pub fn on<E, F>(mut handler: F) -> Self
    where
        E: Callback,
        F: FnMut(&E) + Send + 'h,
    {
        Self {
            kind: E::kind(),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            deliver: Box::new(move |event| match E::from_event(event) {
                Some(payload) => {
                    handler(&payload);
                    true
                }
                None => false,
            }),
            fired: 0,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn has_fired(&self) -> bool {
        self.fired > 0
    }

    pub fn fire_count(&self) -> usize {
        self.fired
    }

    fn subscribe(&self, callbacks: &CallbackManager) -> Subscription {
        let inbox = Arc::clone(&self.inbox);
        callbacks.subscribe_raw(self.kind, move |event| {
            inbox.lock().push_back(event.clone());
        })
    }

    /// Hand queued deliveries to the handler on the waiting task
    fn drain(&mut self) {
        loop {
            let next = self.inbox.lock().pop_front();
            let Some(event) = next else {
                break;
            };
            if (self.deliver)(&event) {
                self.fired += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    All,
    Any,
}

impl Completion {
    fn is_satisfied(&self, expectations: &[Expectation<'_>]) -> bool {
        match self {
            Completion::All => expectations.iter().all(Expectation::has_fired),
            Completion::Any => expectations.iter().any(Expectation::has_fired),
        }
    }
}

/// Human-readable description of what a joint wait is waiting for
pub fn describe(expectations: &[Expectation<'_>]) -> String {
    let names: Vec<String> = expectations.iter().map(|e| e.kind.to_string()).collect();
    names.join(" + ")
}

// ----------------------------------------------------------------------------
// Event Bridge
// ----------------------------------------------------------------------------

/// Owns the event stream, the dispatch table and the lifecycle state of one
/// session
pub struct EventBridge {
    label: String,
    callbacks: CallbackManager,
    events: EventReceiver,
    state: ConnectionState,
    stream_closed: bool,
}

impl EventBridge {
    pub fn new(label: impl Into<String>, events: EventReceiver) -> Self {
        Self {
            label: label.into(),
            callbacks: CallbackManager::new(),
            events,
            state: ConnectionState::Connecting,
            stream_closed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }

    /// Enter `Disconnecting` without an event; used by teardown only
    pub fn begin_teardown(&mut self) {
        let previous = self.state;
        self.state = self.state.begin_teardown();
        if self.state != previous {
            info!("[{}] {} -> {}", self.label, previous, self.state);
        }
    }

    /// Run one dispatch cycle.
    ///
    /// Waits at most `budget` for the next event, then also delivers whatever
    /// else is already queued. Returns the number of events delivered.
    pub async fn pump(&mut self, budget: Duration) -> usize {
        if self.stream_closed {
            tokio::time::sleep(budget).await;
            return 0;
        }

        let first = match tokio::time::timeout(budget, self.events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!("[{}] Event stream closed, treating as dropped connection", self.label);
                self.stream_closed = true;
                ClientEvent::dropped()
            }
            Err(_) => return 0,
        };

        self.deliver(first);
        let mut delivered = 1;

        while let Ok(event) = self.events.try_recv() {
            self.deliver(event);
            delivered += 1;
        }

        delivered
    }

    fn deliver(&mut self, event: ClientEvent) {
        let previous = self.state;
        self.state = self.state.on_event(&event);

        if self.state != previous {
            info!(
                "[{}] {} -> {} on {}",
                self.label,
                previous,
                self.state,
                event.kind_name()
            );
        } else {
            debug!("[{}] Delivering {} in {}", self.label, event.kind_name(), self.state);
        }

        let listeners = self.callbacks.dispatch(&event);
        if listeners == 0 {
            debug!("[{}] No listener for {}", self.label, event.kind_name());
        }
    }

    /// Wait for a single `E`, invoking `handler` for every delivery.
    ///
    /// Returns the last payload the handler saw.
    pub async fn wait_for<E, F>(
        &mut self,
        expected: &[ConnectionState],
        timeout: Duration,
        mut handler: F,
    ) -> WaitOutcome<E>
    where
        E: Callback,
        F: FnMut(&E) + Send,
    {
        let mut last: Option<E> = None;
        let outcome = {
            let mut expectations = [Expectation::on(|payload: &E| {
                handler(payload);
                last = Some(payload.clone());
            })];
            self.wait_until(expected, timeout, &mut expectations, Completion::All)
                .await
        };

        match outcome {
            WaitOutcome::Matched(()) => match last {
                Some(payload) => WaitOutcome::Matched(payload),
                None => unreachable!("a fired expectation always records its payload"),
            },
            WaitOutcome::Timeout { elapsed } => WaitOutcome::Timeout { elapsed },
            WaitOutcome::UnexpectedState { current } => WaitOutcome::UnexpectedState { current },
        }
    }

    /// Wait until every expectation has fired at least once, in any order
    pub async fn wait_for_all(
        &mut self,
        expected: &[ConnectionState],
        timeout: Duration,
        expectations: &mut [Expectation<'_>],
    ) -> WaitOutcome<()> {
        self.wait_until(expected, timeout, expectations, Completion::All)
            .await
    }

    /// Wait until any one expectation has fired
    pub async fn wait_for_any(
        &mut self,
        expected: &[ConnectionState],
        timeout: Duration,
        expectations: &mut [Expectation<'_>],
    ) -> WaitOutcome<()> {
        self.wait_until(expected, timeout, expectations, Completion::Any)
            .await
    }

    async fn wait_until(
        &mut self,
        expected: &[ConnectionState],
        timeout: Duration,
        expectations: &mut [Expectation<'_>],
        completion: Completion,
    ) -> WaitOutcome<()> {
        let start = Instant::now();
        let awaited = describe(expectations);
        let _subscriptions: Vec<Subscription> = expectations
            .iter()
            .map(|expectation| expectation.subscribe(&self.callbacks))
            .collect();

        loop {
            for expectation in expectations.iter_mut() {
                expectation.drain();
            }

            if completion.is_satisfied(expectations) {
                debug!("[{}] {} arrived after {:?}", self.label, awaited, start.elapsed());
                return WaitOutcome::Matched(());
            }

            if !expected.contains(&self.state) {
                warn!("[{}] {} whilst waiting for {}", self.label, self.state, awaited);
                return WaitOutcome::UnexpectedState {
                    current: self.state,
                };
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!("[{}] Timed out waiting for {} after {:?}", self.label, awaited, elapsed);
                return WaitOutcome::Timeout { elapsed };
            }

            self.pump(timeout - elapsed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{create_event_channel, Connected, Disconnected, EventSender, LoggedOn};
    use crate::state::ResultCode;
    use crate::JobId;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Ping {
        seq: u32,
    }
    crate::service_callback!(Ping, "test.ping");

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Pong {
        seq: u32,
    }
    crate::service_callback!(Pong, "test.pong");

    const LOGGED_ON: &[ConnectionState] = &[ConnectionState::LoggedOn];

    fn ping(seq: u32) -> ClientEvent {
        ClientEvent::service("test.ping", JobId(1), serde_json::json!({ "seq": seq }))
    }

    fn pong(seq: u32) -> ClientEvent {
        ClientEvent::service("test.pong", JobId(2), serde_json::json!({ "seq": seq }))
    }

    /// Bridge already in LoggedOn
    async fn logged_on_bridge() -> (EventBridge, EventSender) {
        let (sender, receiver) = create_event_channel();
        let mut bridge = EventBridge::new("test", receiver);
        sender.send(ClientEvent::Connected(Connected)).unwrap();
        sender
            .send(ClientEvent::LoggedOn(LoggedOn {
                result: ResultCode::Ok,
            }))
            .unwrap();
        bridge.pump(Duration::from_millis(10)).await;
        assert_eq!(bridge.state(), ConnectionState::LoggedOn);
        (bridge, sender)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_matches_and_invokes_handler() {
        let (mut bridge, sender) = logged_on_bridge().await;
        sender.send(ping(3)).unwrap();

        let mut seen = Vec::new();
        let outcome = bridge
            .wait_for::<Ping, _>(LOGGED_ON, Duration::from_secs(1), |p| seen.push(p.seq))
            .await;

        assert_eq!(outcome, WaitOutcome::Matched(Ping { seq: 3 }));
        assert_eq!(seen, vec![3]);
        assert_eq!(bridge.callbacks().total_listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out_within_budget() {
        let (mut bridge, _sender) = logged_on_bridge().await;
        let start = Instant::now();

        let outcome = bridge
            .wait_for::<Ping, _>(LOGGED_ON, Duration::from_secs(2), |_| {})
            .await;

        let elapsed = start.elapsed();
        assert!(matches!(outcome, WaitOutcome::Timeout { .. }));
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2200));
        assert_eq!(bridge.callbacks().listener_count(&Ping::kind()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_handler_is_not_invoked_on_redelivery() {
        let (mut bridge, sender) = logged_on_bridge().await;
        sender.send(ping(1)).unwrap();

        let mut calls = 0;
        let outcome = bridge
            .wait_for::<Ping, _>(LOGGED_ON, Duration::from_secs(1), |_| calls += 1)
            .await;
        assert!(outcome.is_matched());

        sender.send(ping(2)).unwrap();
        assert_eq!(bridge.pump(Duration::from_millis(10)).await, 1);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_fast_instead_of_timing_out() {
        let (sender, receiver) = create_event_channel();
        let mut bridge = EventBridge::new("test", receiver);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = sender.send(ClientEvent::Disconnected(Disconnected {
                user_initiated: false,
            }));
        });

        let start = Instant::now();
        let outcome = bridge
            .wait_for::<Connected, _>(&[ConnectionState::Connecting], Duration::from_secs(5), |_| {})
            .await;

        assert_eq!(
            outcome,
            WaitOutcome::UnexpectedState {
                current: ConnectionState::Disconnected
            }
        );
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(bridge.callbacks().total_listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_in_deviated_state_fails_without_pumping() {
        let (sender, receiver) = create_event_channel();
        let mut bridge = EventBridge::new("test", receiver);
        sender.send(ping(1)).unwrap();

        let start = Instant::now();
        let outcome = bridge
            .wait_for::<Ping, _>(LOGGED_ON, Duration::from_secs(5), |_| {})
            .await;

        assert_eq!(
            outcome,
            WaitOutcome::UnexpectedState {
                current: ConnectionState::Connecting
            }
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
        // the queued event was left for the next pump
        assert_eq!(bridge.pump(Duration::from_millis(1)).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_all_independent_of_arrival_order() {
        for pong_first in [true, false] {
            let (mut bridge, sender) = logged_on_bridge().await;
            tokio::spawn(async move {
                let (first, second) = if pong_first {
                    (pong(1), ping(1))
                } else {
                    (ping(1), pong(1))
                };
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = sender.send(first);
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = sender.send(second);
            });

            let mut pings = 0;
            let mut pongs = 0;
            let outcome = {
                let mut expectations = [
                    Expectation::on(|_: &Ping| pings += 1),
                    Expectation::on(|_: &Pong| pongs += 1),
                ];
                bridge
                    .wait_for_all(LOGGED_ON, Duration::from_secs(1), &mut expectations)
                    .await
            };

            assert_eq!(outcome, WaitOutcome::Matched(()));
            assert_eq!((pings, pongs), (1, 1));
            assert_eq!(bridge.callbacks().total_listeners(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_all_shares_one_budget() {
        let (mut bridge, sender) = logged_on_bridge().await;
        sender.send(ping(1)).unwrap();

        let start = Instant::now();
        let mut expectations = [
            Expectation::on(|_: &Ping| {}),
            Expectation::on(|_: &Pong| {}),
        ];
        let outcome = bridge
            .wait_for_all(LOGGED_ON, Duration::from_secs(2), &mut expectations)
            .await;

        assert!(matches!(outcome, WaitOutcome::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_millis(2200));
        assert!(expectations[0].has_fired());
        assert!(!expectations[1].has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_any_stops_at_first_firing() {
        let (mut bridge, sender) = logged_on_bridge().await;
        sender.send(pong(9)).unwrap();

        let mut expectations = [
            Expectation::on(|_: &Ping| {}),
            Expectation::on(|_: &Pong| {}),
        ];
        let outcome = bridge
            .wait_for_any(LOGGED_ON, Duration::from_secs(1), &mut expectations)
            .await;

        assert_eq!(outcome, WaitOutcome::Matched(()));
        assert_eq!(expectations[1].fire_count(), 1);
        assert_eq!(bridge.callbacks().total_listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_is_a_dropped_connection() {
        let (mut bridge, sender) = logged_on_bridge().await;
        drop(sender);

        let outcome = bridge
            .wait_for::<Ping, _>(LOGGED_ON, Duration::from_secs(1), |_| {})
            .await;
        assert_eq!(
            outcome,
            WaitOutcome::UnexpectedState {
                current: ConnectionState::Disconnected
            }
        );
    }

    #[test]
    fn test_outcome_into_result() {
        let error = WaitOutcome::<()>::Timeout {
            elapsed: Duration::from_secs(2),
        }
        .into_result(TimeoutKind::Wait, "test.ping", LOGGED_ON)
        .unwrap_err();
        assert!(error.is_timeout());

        let error = WaitOutcome::<()>::UnexpectedState {
            current: ConnectionState::Disconnected,
        }
        .into_result(TimeoutKind::Wait, "test.ping", LOGGED_ON)
        .unwrap_err();
        assert!(error.is_unexpected_state());

        assert_eq!(
            WaitOutcome::Matched(5).into_result(TimeoutKind::Wait, "x", LOGGED_ON).unwrap(),
            5
        );
    }
}
