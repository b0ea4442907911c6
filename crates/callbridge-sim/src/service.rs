//! Simulated Lobby Service
//!
//! An in-memory stand-in for the remote service. Requests are handled
//! synchronously when a client submits them; every answer is scheduled for
//! delivery after a sampled latency. Delivery to one client preserves
//! submission order, while different clients see independent latencies, so
//! there is no ordering between sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use callbridge_core::handlers::{
    kinds, CreateLobbyRequest, GamesPlayedRequest, GetLobbyListRequest, LobbyCreated,
    LobbyDataSet, LobbyId, LobbyJoined, LobbyLeft, LobbyList, LobbyMemberChanged, LobbyMetadata,
    LobbyRequest, LobbySummary, LobbyType, MemberChange, SetLobbyDataRequest,
    SetPersonaStateRequest,
};
use callbridge_core::{
    create_event_channel, ClientEvent, Connected, Disconnected, EventReceiver, EventSender,
    HarnessConfig, JobId, LoggedOff, LoggedOn, LogonDetails, LogonSecret, ResultCode,
    ServiceMessage, Session,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::SimulatedClient;
use crate::config::SimulationConfig;

const FIRST_LOBBY_ID: u64 = 0x0186_0000_0000_0001;

/// Identifies one attached client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

/// Counters for what the service has seen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub connects: u64,
    pub logons_accepted: u64,
    pub logons_rejected: u64,
    pub requests: u64,
    pub lobbies_created: u64,
    pub lobbies_deleted: u64,
    pub sessions_dropped: u64,
}

// ----------------------------------------------------------------------------
// Delivery
// ----------------------------------------------------------------------------

struct Scheduled {
    due: Instant,
    event: ClientEvent,
}

/// Forward scheduled events to the session once they fall due
async fn forward(mut queue: mpsc::UnboundedReceiver<Scheduled>, events: EventSender) {
    while let Some(scheduled) = queue.recv().await {
        tokio::time::sleep_until(scheduled.due).await;
        if events.send(scheduled.event).is_err() {
            break;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Presence {
    Offline,
    Connected,
    LoggedOn(String),
}

struct ClientSlot {
    outbox: mpsc::UnboundedSender<Scheduled>,
    next_due: Instant,
    presence: Presence,
}

// ----------------------------------------------------------------------------
// Service State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Account {
    secret: LogonSecret,
}

#[derive(Debug, Clone)]
struct Lobby {
    app_id: u32,
    owner: String,
    members: Vec<String>,
    max_members: u32,
    lobby_type: LobbyType,
    metadata: LobbyMetadata,
}

#[derive(Debug, Clone)]
struct Deletion {
    app_id: u32,
    by: String,
    at: Instant,
}

struct ServiceState {
    config: SimulationConfig,
    rng: fastrand::Rng,
    accounts: HashMap<String, Account>,
    clients: HashMap<ClientId, ClientSlot>,
    lobbies: BTreeMap<LobbyId, Lobby>,
    deletions: Vec<Deletion>,
    next_client: u64,
    next_lobby: u64,
    stats: ServiceStats,
}

impl ServiceState {
    fn deliver(&mut self, id: ClientId, event: ClientEvent) {
        let latency = self.config.sample_latency(&mut self.rng);
        let Some(slot) = self.clients.get_mut(&id) else {
            return;
        };

        let due = (Instant::now() + latency).max(slot.next_due);
        slot.next_due = due;
        if slot.outbox.send(Scheduled { due, event }).is_err() {
            debug!("Client {:?} is gone, dropping delivery", id);
        }
    }

    fn respond<T: Serialize>(&mut self, id: ClientId, kind: &str, job_id: JobId, body: &T) {
        match ServiceMessage::encode(kind, job_id, body) {
            Ok(message) => self.deliver(id, ClientEvent::Service(message)),
            Err(e) => warn!("Failed to encode {}: {}", kind, e),
        }
    }

    fn presence(&self, id: ClientId) -> Presence {
        self.clients
            .get(&id)
            .map(|slot| slot.presence.clone())
            .unwrap_or(Presence::Offline)
    }

    fn set_presence(&mut self, id: ClientId, presence: Presence) {
        if let Some(slot) = self.clients.get_mut(&id) {
            slot.presence = presence;
        }
    }

    fn client_of(&self, username: &str) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|(_, slot)| matches!(&slot.presence, Presence::LoggedOn(user) if user == username))
            .map(|(id, _)| *id)
    }

    fn notify_members(&mut self, lobby_id: LobbyId, member: &str, change: MemberChange) {
        let Some(lobby) = self.lobbies.get(&lobby_id) else {
            return;
        };
        let recipients: Vec<ClientId> = lobby
            .members
            .iter()
            .filter(|m| m.as_str() != member)
            .filter_map(|m| self.client_of(m))
            .collect();

        let notification = LobbyMemberChanged {
            lobby_id,
            member: member.to_string(),
            change,
        };
        for recipient in recipients {
            self.respond(recipient, kinds::LOBBY_MEMBER_CHANGED, JobId(0), &notification);
        }
    }

    /// Remove `username` from a lobby, handing over ownership or deleting
    /// the lobby when it empties
    fn remove_member(&mut self, lobby_id: LobbyId, username: &str) {
        let Some(lobby) = self.lobbies.get_mut(&lobby_id) else {
            return;
        };
        lobby.members.retain(|m| m != username);

        if lobby.members.is_empty() {
            let app_id = lobby.app_id;
            self.lobbies.remove(&lobby_id);
            if self.config.peer_delete_window().is_some() {
                self.deletions.push(Deletion {
                    app_id,
                    by: username.to_string(),
                    at: Instant::now(),
                });
            }
            self.stats.lobbies_deleted += 1;
            debug!("Lobby {:?} deleted by '{}'", lobby_id, username);
            return;
        }

        if lobby.owner == username {
            lobby.owner = lobby.members[0].clone();
        }
        self.notify_members(lobby_id, username, MemberChange::Left);
    }

    /// Forget the session's presence, leaving every lobby it was in
    fn release(&mut self, id: ClientId) {
        if let Presence::LoggedOn(username) = self.presence(id) {
            let joined: Vec<LobbyId> = self
                .lobbies
                .iter()
                .filter(|(_, lobby)| lobby.members.contains(&username))
                .map(|(lobby_id, _)| *lobby_id)
                .collect();
            for lobby_id in joined {
                self.remove_member(lobby_id, &username);
            }
        }
        self.set_presence(id, Presence::Offline);
    }

    fn drop_session(&mut self, id: ClientId, reason: &str) {
        warn!("Dropping client {:?}: {}", id, reason);
        self.release(id);
        self.stats.sessions_dropped += 1;
        self.deliver(
            id,
            ClientEvent::Disconnected(Disconnected {
                user_initiated: false,
            }),
        );
    }

    fn check_logon(&self, details: &LogonDetails) -> ResultCode {
        let Some(account) = self.accounts.get(details.username()) else {
            return ResultCode::InvalidPassword;
        };
        if self.client_of(details.username()).is_some() {
            return ResultCode::LoggedInElsewhere;
        }

        match (&account.secret, details.secret()) {
            (LogonSecret::LoginKey(expected), LogonSecret::LoginKey(given)) if expected == given => {
                ResultCode::Ok
            }
            (
                LogonSecret::Password {
                    password: expected,
                    auth_code: required,
                },
                LogonSecret::Password {
                    password: given,
                    auth_code: supplied,
                },
            ) if expected == given => match (required, supplied) {
                (None, _) => ResultCode::Ok,
                (Some(_), None) => ResultCode::AccountLogonDenied,
                (Some(required), Some(supplied)) if required == supplied => ResultCode::Ok,
                (Some(_), Some(_)) => ResultCode::InvalidLoginAuthCode,
            },
            _ => ResultCode::InvalidPassword,
        }
    }

    fn summary(lobby_id: LobbyId, lobby: &Lobby) -> LobbySummary {
        LobbySummary {
            lobby_id,
            owner: lobby.owner.clone(),
            members: lobby.members.len() as u32,
            max_members: lobby.max_members,
            metadata: lobby.metadata.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    fn handle(&mut self, id: ClientId, message: ServiceMessage) {
        let Presence::LoggedOn(username) = self.presence(id) else {
            warn!("Ignoring {} from client {:?} that is not logged on", message.kind, id);
            return;
        };
        self.stats.requests += 1;

        let result = match message.kind.as_str() {
            kinds::SET_PERSONA_STATE => message
                .decode::<SetPersonaStateRequest>()
                .map(|request| debug!("'{}' is now {:?}", username, request.state)),
            kinds::GAMES_PLAYED => message
                .decode::<GamesPlayedRequest>()
                .map(|request| debug!("'{}' is playing {:?}", username, request.app_ids)),
            kinds::CREATE_LOBBY => message
                .decode::<CreateLobbyRequest>()
                .map(|request| self.create_lobby(id, &username, message.job_id, request)),
            kinds::SET_LOBBY_DATA => message
                .decode::<SetLobbyDataRequest>()
                .map(|request| self.set_lobby_data(id, &username, message.job_id, request)),
            kinds::GET_LOBBY_LIST => message
                .decode::<GetLobbyListRequest>()
                .map(|request| self.get_lobby_list(id, &username, message.job_id, request)),
            kinds::JOIN_LOBBY => message
                .decode::<LobbyRequest>()
                .map(|request| self.join_lobby(id, &username, message.job_id, request)),
            kinds::LEAVE_LOBBY => message
                .decode::<LobbyRequest>()
                .map(|request| self.leave_lobby(id, &username, message.job_id, request)),
            other => {
                warn!("Unknown request kind '{}'", other);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Malformed {} from '{}': {}", message.kind, username, e);
        }
    }

    fn create_lobby(&mut self, id: ClientId, username: &str, job_id: JobId, request: CreateLobbyRequest) {
        if request.max_members == 0 {
            let response = LobbyCreated {
                job_id,
                result: ResultCode::InvalidParam,
                lobby_id: None,
            };
            self.respond(id, kinds::CREATE_LOBBY_RESPONSE, job_id, &response);
            return;
        }

        let lobby_id = LobbyId(FIRST_LOBBY_ID + self.next_lobby);
        self.next_lobby += 1;
        self.lobbies.insert(
            lobby_id,
            Lobby {
                app_id: request.app_id,
                owner: username.to_string(),
                members: vec![username.to_string()],
                max_members: request.max_members,
                lobby_type: request.lobby_type,
                metadata: LobbyMetadata::new(),
            },
        );
        self.stats.lobbies_created += 1;
        info!("'{}' created lobby {:?} for app {}", username, lobby_id, request.app_id);

        let response = LobbyCreated {
            job_id,
            result: ResultCode::Ok,
            lobby_id: Some(lobby_id),
        };
        self.respond(id, kinds::CREATE_LOBBY_RESPONSE, job_id, &response);
    }

    fn set_lobby_data(&mut self, id: ClientId, username: &str, job_id: JobId, request: SetLobbyDataRequest) {
        let result = match self.lobbies.get_mut(&request.lobby_id) {
            None => ResultCode::NoMatch,
            Some(lobby) if lobby.app_id != request.app_id => ResultCode::NoMatch,
            Some(lobby) if lobby.owner != username => ResultCode::AccessDenied,
            Some(lobby) => {
                lobby.metadata.extend(request.metadata);
                ResultCode::Ok
            }
        };

        let response = LobbyDataSet {
            job_id,
            result,
            lobby_id: request.lobby_id,
        };
        self.respond(id, kinds::SET_LOBBY_DATA_RESPONSE, job_id, &response);
    }

    fn get_lobby_list(&mut self, id: ClientId, username: &str, job_id: JobId, request: GetLobbyListRequest) {
        if let Some(window) = self.config.peer_delete_window() {
            let now = Instant::now();
            self.deletions
                .retain(|deletion| now.duration_since(deletion.at) < window);
            let raced = self
                .deletions
                .iter()
                .any(|deletion| deletion.app_id == request.app_id && deletion.by != username);
            if raced {
                self.drop_session(id, "lobby list raced a peer's deletion");
                return;
            }
        }

        let lobbies: Vec<LobbySummary> = self
            .lobbies
            .iter()
            .filter(|(_, lobby)| lobby.app_id == request.app_id)
            .filter(|(_, lobby)| {
                matches!(lobby.lobby_type, LobbyType::Public)
                    || lobby.members.iter().any(|m| m == username)
            })
            .map(|(lobby_id, lobby)| Self::summary(*lobby_id, lobby))
            .collect();

        let response = LobbyList {
            job_id,
            result: ResultCode::Ok,
            lobbies,
        };
        self.respond(id, kinds::GET_LOBBY_LIST_RESPONSE, job_id, &response);
    }

    fn join_lobby(&mut self, id: ClientId, username: &str, job_id: JobId, request: LobbyRequest) {
        let (result, members) = match self.lobbies.get_mut(&request.lobby_id) {
            None => (ResultCode::NoMatch, Vec::new()),
            Some(lobby) if lobby.app_id != request.app_id => (ResultCode::NoMatch, Vec::new()),
            Some(lobby) if lobby.members.iter().any(|m| m == username) => {
                (ResultCode::Ok, lobby.members.clone())
            }
            Some(lobby) if lobby.members.len() as u32 >= lobby.max_members => {
                (ResultCode::Busy, Vec::new())
            }
            Some(lobby) => {
                lobby.members.push(username.to_string());
                (ResultCode::Ok, lobby.members.clone())
            }
        };

        let response = LobbyJoined {
            job_id,
            result,
            lobby_id: request.lobby_id,
            members,
        };
        self.respond(id, kinds::JOIN_LOBBY_RESPONSE, job_id, &response);

        if result.is_ok() {
            self.notify_members(request.lobby_id, username, MemberChange::Entered);
        }
    }

    fn leave_lobby(&mut self, id: ClientId, username: &str, job_id: JobId, request: LobbyRequest) {
        let is_member = self
            .lobbies
            .get(&request.lobby_id)
            .map(|lobby| lobby.app_id == request.app_id && lobby.members.iter().any(|m| m == username))
            .unwrap_or(false);

        let result = if is_member {
            self.remove_member(request.lobby_id, username);
            ResultCode::Ok
        } else {
            ResultCode::NoMatch
        };

        let response = LobbyLeft {
            job_id,
            result,
            lobby_id: request.lobby_id,
        };
        self.respond(id, kinds::LEAVE_LOBBY_RESPONSE, job_id, &response);
    }
}

// ----------------------------------------------------------------------------
// Simulated Service
// ----------------------------------------------------------------------------

/// Shared handle to the in-memory service
#[derive(Clone)]
pub struct SimulatedService {
    state: Arc<Mutex<ServiceState>>,
}

impl SimulatedService {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = fastrand::Rng::with_seed(config.seed);
        Self {
            state: Arc::new(Mutex::new(ServiceState {
                config,
                rng,
                accounts: HashMap::new(),
                clients: HashMap::new(),
                lobbies: BTreeMap::new(),
                deletions: Vec::new(),
                next_client: 0,
                next_lobby: 0,
                stats: ServiceStats::default(),
            })),
        }
    }

    /// Accept `details` as a valid identity. A password with a second-factor
    /// code makes that code mandatory for the account.
    pub fn register_account(&self, details: &LogonDetails) {
        debug!("Registering account '{}'", details.username());
        self.state.lock().accounts.insert(
            details.username().to_string(),
            Account {
                secret: details.secret().clone(),
            },
        );
    }

    /// Attach a new client. Must be called within a tokio runtime.
    pub fn client(&self) -> (SimulatedClient, EventReceiver) {
        let (events, receiver) = create_event_channel();
        let (outbox, queue) = mpsc::unbounded_channel();
        tokio::spawn(forward(queue, events));

        let mut state = self.state.lock();
        state.next_client += 1;
        let id = ClientId(state.next_client);
        state.clients.insert(
            id,
            ClientSlot {
                outbox,
                next_due: Instant::now(),
                presence: Presence::Offline,
            },
        );
        drop(state);

        (SimulatedClient::new(id, self.clone()), receiver)
    }

    /// Attach a client and wrap it in a session for `details`
    pub fn session(
        &self,
        name: impl Into<String>,
        details: LogonDetails,
        config: HarnessConfig,
    ) -> Session<SimulatedClient> {
        let (client, events) = self.client();
        Session::new(name, Arc::new(client), events, details, config)
    }

    /// Drop whatever session `username` has, as the remote side would
    pub fn drop_connection(&self, username: &str) -> bool {
        let mut state = self.state.lock();
        match state.client_of(username) {
            Some(id) => {
                state.drop_session(id, "dropped by operator");
                true
            }
            None => false,
        }
    }

    /// Lobbies of `app_id` as an observer with no membership sees them
    pub fn public_lobbies(&self, app_id: u32) -> Vec<LobbySummary> {
        let state = self.state.lock();
        state
            .lobbies
            .iter()
            .filter(|(_, lobby)| lobby.app_id == app_id)
            .map(|(lobby_id, lobby)| ServiceState::summary(*lobby_id, lobby))
            .collect()
    }

    pub fn lobby_count(&self) -> usize {
        self.state.lock().lobbies.len()
    }

    pub fn stats(&self) -> ServiceStats {
        self.state.lock().stats.clone()
    }

    pub fn latency_bound(&self) -> Duration {
        Duration::from_millis(self.state.lock().config.latency_range.1)
    }

    // ------------------------------------------------------------------------
    // Client primitives
    // ------------------------------------------------------------------------

    pub(crate) fn connect(&self, id: ClientId) {
        let mut state = self.state.lock();
        if state.presence(id) != Presence::Offline {
            debug!("Client {:?} is already connected", id);
            return;
        }
        state.stats.connects += 1;
        state.set_presence(id, Presence::Connected);
        state.deliver(id, ClientEvent::Connected(Connected));
    }

    pub(crate) fn disconnect(&self, id: ClientId) {
        let mut state = self.state.lock();
        state.release(id);
        state.deliver(
            id,
            ClientEvent::Disconnected(Disconnected {
                user_initiated: true,
            }),
        );
    }

    pub(crate) fn logon(&self, id: ClientId, details: &LogonDetails) {
        let mut state = self.state.lock();
        if state.presence(id) != Presence::Connected {
            warn!("Client {:?} logged on without a fresh connection", id);
            return;
        }

        let result = state.check_logon(details);
        if result.is_ok() {
            state.stats.logons_accepted += 1;
            state.set_presence(id, Presence::LoggedOn(details.username().to_string()));
            info!("'{}' logged on", details.username());
        } else {
            state.stats.logons_rejected += 1;
            info!("Rejected logon for '{}': {}", details.username(), result);
        }
        state.deliver(id, ClientEvent::LoggedOn(LoggedOn { result }));
    }

    pub(crate) fn logoff(&self, id: ClientId) {
        let mut state = self.state.lock();
        if !matches!(state.presence(id), Presence::LoggedOn(_)) {
            debug!("Client {:?} logged off while not logged on", id);
        }
        state.release(id);
        state.deliver(
            id,
            ClientEvent::LoggedOff(LoggedOff {
                result: ResultCode::Ok,
            }),
        );
        state.deliver(
            id,
            ClientEvent::Disconnected(Disconnected {
                user_initiated: true,
            }),
        );
    }

    pub(crate) fn handle(&self, id: ClientId, message: ServiceMessage) {
        self.state.lock().handle(id, message);
    }

    pub(crate) fn detach(&self, id: ClientId) {
        let mut state = self.state.lock();
        state.release(id);
        state.clients.remove(&id);
    }
}

impl Default for SimulatedService {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}
