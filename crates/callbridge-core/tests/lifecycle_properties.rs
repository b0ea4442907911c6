//! Property Tests for the Lifecycle State Machine and Joint Waits

use std::time::Duration;

use callbridge_core::{
    create_event_channel, ClientEvent, Connected, ConnectionState, Disconnected, EventBridge,
    Expectation, JobId, LoggedOff, LoggedOn, ResultCode, WaitOutcome,
};
use proptest::prelude::*;
use serde::Deserialize;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct Ping {}
callbridge_core::service_callback!(Ping, "prop.ping");

#[derive(Debug, Clone, Deserialize)]
struct Pong {}
callbridge_core::service_callback!(Pong, "prop.pong");

const ORDER: [ConnectionState; 6] = [
    ConnectionState::Connecting,
    ConnectionState::Connected,
    ConnectionState::LoggedOn,
    ConnectionState::LoggedOut,
    ConnectionState::Disconnecting,
    ConnectionState::Disconnected,
];

fn position(state: ConnectionState) -> usize {
    ORDER.iter().position(|s| *s == state).unwrap_or(usize::MAX)
}

/// Edges an event may take; staying put is always allowed
fn is_event_edge(from: ConnectionState, to: ConnectionState) -> bool {
    type S = ConnectionState;

    from == to
        || matches!(
            (from, to),
            (S::Connecting, S::Connected) | (S::Connected, S::LoggedOn) | (S::LoggedOn, S::LoggedOut)
        )
        || (to == S::Disconnected && !from.is_terminal())
}

fn lifecycle_event() -> impl Strategy<Value = ClientEvent> {
    prop_oneof![
        Just(ClientEvent::Connected(Connected)),
        any::<bool>().prop_map(|ok| ClientEvent::LoggedOn(LoggedOn {
            result: if ok { ResultCode::Ok } else { ResultCode::InvalidPassword },
        })),
        Just(ClientEvent::LoggedOff(LoggedOff {
            result: ResultCode::Ok
        })),
        any::<bool>().prop_map(|user_initiated| ClientEvent::Disconnected(Disconnected {
            user_initiated
        })),
        Just(ClientEvent::service("prop.ping", JobId(1), serde_json::json!({}))),
    ]
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

// ----------------------------------------------------------------------------
// Properties
// ----------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_state_follows_lifecycle_edges(
        start in prop::sample::select(ORDER.to_vec()),
        events in prop::collection::vec(lifecycle_event(), 0..24),
    ) {
        let mut state = start;
        let mut disconnected = state.is_terminal();

        for event in &events {
            let next = state.on_event(event);
            prop_assert!(position(next) >= position(state));
            prop_assert!(is_event_edge(state, next), "{} -> {} on {:?}", state, next, event);
            if disconnected {
                prop_assert_eq!(next, ConnectionState::Disconnected);
            }
            disconnected = next.is_terminal();
            state = next;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_joint_wait_matches_iff_every_kind_arrives_in_time(
        arrivals in prop::collection::vec(
            (any::<bool>(), prop_oneof![0u64..900, 1_100u64..2_000]),
            0..6,
        )
    ) {
        let expect_match = [true, false].iter().all(|ping| {
            arrivals.iter().any(|(is_ping, delay)| is_ping == ping && *delay < 1_000)
        });

        let (outcome, listeners) = paused_runtime().block_on(async {
            let (sender, receiver) = create_event_channel();
            let mut bridge = EventBridge::new("prop", receiver);
            sender.send(ClientEvent::Connected(Connected)).unwrap();
            sender
                .send(ClientEvent::LoggedOn(LoggedOn { result: ResultCode::Ok }))
                .unwrap();
            bridge.pump(Duration::from_millis(1)).await;

            for &(is_ping, delay) in &arrivals {
                let sender = sender.clone();
                let kind = if is_ping { "prop.ping" } else { "prop.pong" };
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    let _ = sender.send(ClientEvent::service(kind, JobId(1), serde_json::json!({})));
                });
            }

            let outcome = {
                let mut expectations = [
                    Expectation::on(|_: &Ping| {}),
                    Expectation::on(|_: &Pong| {}),
                ];
                bridge
                    .wait_for_all(&[ConnectionState::LoggedOn], Duration::from_secs(1), &mut expectations)
                    .await
            };
            (outcome, bridge.callbacks().total_listeners())
        });

        prop_assert_eq!(listeners, 0);
        if expect_match {
            prop_assert_eq!(outcome, WaitOutcome::Matched(()));
        } else {
            let timed_out = matches!(outcome, WaitOutcome::Timeout { .. });
            prop_assert!(timed_out);
        }
    }
}
