//! Session
//!
//! One credential-bound logical connection. The session drives its
//! [`ConnectionState`] purely from delivered events through its
//! [`EventBridge`], and hands out the typed handlers that procedures use to
//! issue requests.
//!
//! ```text
//! Connecting --Connected--> Connected --LoggedOn(Ok)--> LoggedOn
//!                                                          |
//!                                                     LoggedOff
//!                                                          v
//!   Disconnected <--Disconnected-- Disconnecting <--- LoggedOut
//! ```
//!
//! Any non-terminal state falls straight to `Disconnected` when the
//! connection drops. `Disconnected` is absorbing.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bridge::{describe, EventBridge, Expectation, WaitOutcome};
use crate::client::ClientConnection;
use crate::config::HarnessConfig;
use crate::credentials::LogonDetails;
use crate::errors::{HarnessError, HarnessResult, TimeoutKind};
use crate::events::{Callback, Connected, Disconnected, EventReceiver, LoggedOn};
use crate::handlers::{AppsHandler, JobIdSource, MatchmakingHandler, PersonaState, UserHandler};
use crate::state::ConnectionState;

const CONNECTING: &[ConnectionState] = &[ConnectionState::Connecting];
const CONNECTED: &[ConnectionState] = &[ConnectionState::Connected];
const LOGGED_ON: &[ConnectionState] = &[ConnectionState::LoggedOn];
const TEARING_DOWN: &[ConnectionState] = &[
    ConnectionState::LoggedOut,
    ConnectionState::Disconnecting,
];

/// A logical connection bound to one identity
pub struct Session<C: ClientConnection> {
    name: String,
    client: Arc<C>,
    bridge: EventBridge,
    details: LogonDetails,
    config: HarnessConfig,
    user: UserHandler<C>,
    apps: AppsHandler<C>,
    matchmaking: MatchmakingHandler<C>,
}

impl<C: ClientConnection> Session<C> {
    /// Create a session over `client`, whose events arrive on `events`
    pub fn new(
        name: impl Into<String>,
        client: Arc<C>,
        events: EventReceiver,
        details: LogonDetails,
        config: HarnessConfig,
    ) -> Self {
        let name = name.into();
        let jobs = Arc::new(JobIdSource::default());
        Self {
            bridge: EventBridge::new(name.clone(), events),
            user: UserHandler::new(Arc::clone(&client), Arc::clone(&jobs)),
            apps: AppsHandler::new(Arc::clone(&client), Arc::clone(&jobs)),
            matchmaking: MatchmakingHandler::new(Arc::clone(&client), jobs),
            name,
            client,
            details,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn username(&self) -> &str {
        self.details.username()
    }

    pub fn state(&self) -> ConnectionState {
        self.bridge.state()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn user(&self) -> &UserHandler<C> {
        &self.user
    }

    pub fn apps(&self) -> &AppsHandler<C> {
        &self.apps
    }

    pub fn matchmaking(&self) -> &MatchmakingHandler<C> {
        &self.matchmaking
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }

    /// Connect and log on.
    ///
    /// A logon answered with anything but `Ok` fails with `LogonRejected`
    /// and leaves the session `Connected`. Post-logon announcements are not
    /// acknowledged and are not awaited.
    pub async fn initialize(&mut self) -> HarnessResult<()> {
        info!("[{}] Connecting as '{}'", self.name, self.details.username());
        self.client.connect()?;
        self.bridge
            .wait_for::<Connected, _>(CONNECTING, self.config.connect_timeout(), |_| {})
            .await
            .into_result(TimeoutKind::Connect, "Connected", CONNECTING)?;

        self.user.log_on(&self.details)?;
        let logged_on = self
            .bridge
            .wait_for::<LoggedOn, _>(CONNECTED, self.config.logon_timeout(), |_| {})
            .await
            .into_result(TimeoutKind::Logon, "LoggedOn", CONNECTED)?;

        if !logged_on.result.is_ok() {
            warn!("[{}] Logon rejected: {}", self.name, logged_on.result);
            return Err(HarnessError::LogonRejected {
                username: self.details.username().to_string(),
                result: logged_on.result,
            });
        }

        self.user.set_persona_state(PersonaState::Online)?;
        self.apps.games_played(&[self.config.app_id])?;
        info!("[{}] Logged on", self.name);
        Ok(())
    }

    /// Log off (or disconnect) and wait for `Disconnected`.
    ///
    /// Idempotent: a session that is already disconnected returns at once.
    pub async fn teardown(&mut self) -> HarnessResult<()> {
        let state = self.bridge.state();
        if state.is_terminal() {
            return Ok(());
        }

        info!("[{}] Tearing down from {}", self.name, state);
        self.bridge.begin_teardown();
        if state == ConnectionState::LoggedOn {
            self.user.log_off()?;
        } else {
            self.client.disconnect()?;
        }

        let timeout = self.config.disconnect_timeout();
        let outcome = self
            .bridge
            .wait_for::<Disconnected, _>(TEARING_DOWN, timeout, |_| {})
            .await;

        match outcome {
            WaitOutcome::Matched(_) => {}
            // Disconnected may have been applied by a pump before the wait
            // subscribed its handler
            WaitOutcome::UnexpectedState {
                current: ConnectionState::Disconnected,
            } => {}
            other => {
                other.into_result(TimeoutKind::Disconnect, "Disconnected", TEARING_DOWN)?;
            }
        }

        info!("[{}] Disconnected", self.name);
        Ok(())
    }

    /// Wait for `E` with the default handler budget
    pub async fn wait_for<E, F>(&mut self, handler: F) -> HarnessResult<E>
    where
        E: Callback,
        F: FnMut(&E) + Send,
    {
        let timeout = self.config.handler_timeout();
        self.wait_for_within(timeout, handler).await
    }

    /// Wait for `E` with an explicit budget
    pub async fn wait_for_within<E, F>(&mut self, timeout: Duration, handler: F) -> HarnessResult<E>
    where
        E: Callback,
        F: FnMut(&E) + Send,
    {
        self.bridge
            .wait_for(LOGGED_ON, timeout, handler)
            .await
            .into_result(TimeoutKind::Wait, &E::kind().to_string(), LOGGED_ON)
    }

    /// Wait until every expectation has fired
    pub async fn wait_for_all(&mut self, expectations: &mut [Expectation<'_>]) -> HarnessResult<()> {
        let awaited = describe(expectations);
        let timeout = self.config.handler_timeout();
        self.bridge
            .wait_for_all(LOGGED_ON, timeout, expectations)
            .await
            .into_result(TimeoutKind::Wait, &awaited, LOGGED_ON)
    }

    /// Wait until one of the expectations has fired
    pub async fn wait_for_any(&mut self, expectations: &mut [Expectation<'_>]) -> HarnessResult<()> {
        let awaited = describe(expectations);
        let timeout = self.config.handler_timeout();
        self.bridge
            .wait_for_any(LOGGED_ON, timeout, expectations)
            .await
            .into_result(TimeoutKind::Wait, &awaited, LOGGED_ON)
    }
}
