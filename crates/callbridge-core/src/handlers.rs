//! Handler collaborators
//!
//! Typed request builders exposed by a session. Each handler shares the
//! session's client and job-id source; requests are fire-and-forget and
//! return the [`JobId`] that the matching response callback echoes back.
//! Waiting for the response is the procedure's business.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::ClientConnection;
use crate::credentials::LogonDetails;
use crate::errors::{HarnessError, HarnessResult};
use crate::events::{JobId, ServiceMessage};
use crate::service_callback;
use crate::state::ResultCode;

// ----------------------------------------------------------------------------
// Message Kinds
// ----------------------------------------------------------------------------

pub mod kinds {
    pub const SET_PERSONA_STATE: &str = "user.set_persona_state";
    pub const GAMES_PLAYED: &str = "apps.games_played";

    pub const CREATE_LOBBY: &str = "matchmaking.create_lobby";
    pub const CREATE_LOBBY_RESPONSE: &str = "matchmaking.create_lobby.response";
    pub const SET_LOBBY_DATA: &str = "matchmaking.set_lobby_data";
    pub const SET_LOBBY_DATA_RESPONSE: &str = "matchmaking.set_lobby_data.response";
    pub const GET_LOBBY_LIST: &str = "matchmaking.get_lobby_list";
    pub const GET_LOBBY_LIST_RESPONSE: &str = "matchmaking.get_lobby_list.response";
    pub const JOIN_LOBBY: &str = "matchmaking.join_lobby";
    pub const JOIN_LOBBY_RESPONSE: &str = "matchmaking.join_lobby.response";
    pub const LEAVE_LOBBY: &str = "matchmaking.leave_lobby";
    pub const LEAVE_LOBBY_RESPONSE: &str = "matchmaking.leave_lobby.response";
    pub const LOBBY_MEMBER_CHANGED: &str = "matchmaking.lobby_member_changed";
}

// ----------------------------------------------------------------------------
// Domain Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonaState {
    Offline,
    Online,
    Busy,
    Away,
    Snooze,
    LookingToTrade,
    LookingToPlay,
    Invisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LobbyType {
    Private,
    FriendsOnly,
    Public,
    Invisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberChange {
    Entered,
    Left,
}

pub type LobbyMetadata = BTreeMap<String, String>;

// ----------------------------------------------------------------------------
// Request Bodies
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPersonaStateRequest {
    pub state: PersonaState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamesPlayedRequest {
    pub app_ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateLobbyRequest {
    pub app_id: u32,
    pub lobby_type: LobbyType,
    pub max_members: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetLobbyDataRequest {
    pub app_id: u32,
    pub lobby_id: LobbyId,
    pub metadata: LobbyMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetLobbyListRequest {
    pub app_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyRequest {
    pub app_id: u32,
    pub lobby_id: LobbyId,
}

// ----------------------------------------------------------------------------
// Response Callbacks
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyCreated {
    pub job_id: JobId,
    pub result: ResultCode,
    #[serde(default)]
    pub lobby_id: Option<LobbyId>,
}
service_callback!(LobbyCreated, kinds::CREATE_LOBBY_RESPONSE);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyDataSet {
    pub job_id: JobId,
    pub result: ResultCode,
    pub lobby_id: LobbyId,
}
service_callback!(LobbyDataSet, kinds::SET_LOBBY_DATA_RESPONSE);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySummary {
    pub lobby_id: LobbyId,
    pub owner: String,
    pub members: u32,
    pub max_members: u32,
    #[serde(default)]
    pub metadata: LobbyMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyList {
    pub job_id: JobId,
    pub result: ResultCode,
    #[serde(default)]
    pub lobbies: Vec<LobbySummary>,
}
service_callback!(LobbyList, kinds::GET_LOBBY_LIST_RESPONSE);

impl LobbyList {
    pub fn find(&self, lobby_id: LobbyId) -> Option<&LobbySummary> {
        self.lobbies.iter().find(|lobby| lobby.lobby_id == lobby_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyJoined {
    pub job_id: JobId,
    pub result: ResultCode,
    pub lobby_id: LobbyId,
    #[serde(default)]
    pub members: Vec<String>,
}
service_callback!(LobbyJoined, kinds::JOIN_LOBBY_RESPONSE);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyLeft {
    pub job_id: JobId,
    pub result: ResultCode,
    pub lobby_id: LobbyId,
}
service_callback!(LobbyLeft, kinds::LEAVE_LOBBY_RESPONSE);

/// Unsolicited notification to current lobby members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyMemberChanged {
    pub lobby_id: LobbyId,
    pub member: String,
    pub change: MemberChange,
}
service_callback!(LobbyMemberChanged, kinds::LOBBY_MEMBER_CHANGED);

// ----------------------------------------------------------------------------
// Job Ids
// ----------------------------------------------------------------------------

/// Monotonic job-id allocator shared by a session's handlers
#[derive(Debug, Default)]
pub struct JobIdSource {
    last: AtomicU64,
}

impl JobIdSource {
    pub fn next(&self) -> JobId {
        JobId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

fn submit<C, T>(client: &C, jobs: &JobIdSource, kind: &str, body: &T) -> HarnessResult<JobId>
where
    C: ClientConnection,
    T: Serialize,
{
    let job_id = jobs.next();
    let message = ServiceMessage::encode(kind, job_id, body)
        .map_err(|e| HarnessError::client(format!("Failed to encode {}: {}", kind, e)))?;
    debug!("Submitting {} as {}", kind, job_id);
    client.send(message)?;
    Ok(job_id)
}

// ----------------------------------------------------------------------------
// User Handler
// ----------------------------------------------------------------------------

/// Account-level requests
pub struct UserHandler<C> {
    client: Arc<C>,
    jobs: Arc<JobIdSource>,
}

impl<C: ClientConnection> UserHandler<C> {
    pub fn new(client: Arc<C>, jobs: Arc<JobIdSource>) -> Self {
        Self { client, jobs }
    }

    pub fn log_on(&self, details: &LogonDetails) -> HarnessResult<()> {
        debug!("Logging on as '{}'", details.username());
        self.client.logon(details)
    }

    pub fn log_off(&self) -> HarnessResult<()> {
        self.client.logoff()
    }

    /// Announce presence; no acknowledgement is sent
    pub fn set_persona_state(&self, state: PersonaState) -> HarnessResult<JobId> {
        submit(
            &*self.client,
            &self.jobs,
            kinds::SET_PERSONA_STATE,
            &SetPersonaStateRequest { state },
        )
    }
}

// ----------------------------------------------------------------------------
// Apps Handler
// ----------------------------------------------------------------------------

/// Usage signaling
pub struct AppsHandler<C> {
    client: Arc<C>,
    jobs: Arc<JobIdSource>,
}

impl<C: ClientConnection> AppsHandler<C> {
    pub fn new(client: Arc<C>, jobs: Arc<JobIdSource>) -> Self {
        Self { client, jobs }
    }

    /// Report the apps currently in use; no acknowledgement is sent
    pub fn games_played(&self, app_ids: &[u32]) -> HarnessResult<JobId> {
        submit(
            &*self.client,
            &self.jobs,
            kinds::GAMES_PLAYED,
            &GamesPlayedRequest {
                app_ids: app_ids.to_vec(),
            },
        )
    }
}

// ----------------------------------------------------------------------------
// Matchmaking Handler
// ----------------------------------------------------------------------------

/// Lobby requests; answers arrive as the response callbacks above
pub struct MatchmakingHandler<C> {
    client: Arc<C>,
    jobs: Arc<JobIdSource>,
}

impl<C: ClientConnection> MatchmakingHandler<C> {
    pub fn new(client: Arc<C>, jobs: Arc<JobIdSource>) -> Self {
        Self { client, jobs }
    }

    pub fn create_lobby(
        &self,
        app_id: u32,
        lobby_type: LobbyType,
        max_members: u32,
    ) -> HarnessResult<JobId> {
        submit(
            &*self.client,
            &self.jobs,
            kinds::CREATE_LOBBY,
            &CreateLobbyRequest {
                app_id,
                lobby_type,
                max_members,
            },
        )
    }

    pub fn set_lobby_data(
        &self,
        app_id: u32,
        lobby_id: LobbyId,
        metadata: LobbyMetadata,
    ) -> HarnessResult<JobId> {
        submit(
            &*self.client,
            &self.jobs,
            kinds::SET_LOBBY_DATA,
            &SetLobbyDataRequest {
                app_id,
                lobby_id,
                metadata,
            },
        )
    }

    pub fn get_lobby_list(&self, app_id: u32) -> HarnessResult<JobId> {
        submit(
            &*self.client,
            &self.jobs,
            kinds::GET_LOBBY_LIST,
            &GetLobbyListRequest { app_id },
        )
    }

    pub fn join_lobby(&self, app_id: u32, lobby_id: LobbyId) -> HarnessResult<JobId> {
        submit(
            &*self.client,
            &self.jobs,
            kinds::JOIN_LOBBY,
            &LobbyRequest { app_id, lobby_id },
        )
    }

    pub fn leave_lobby(&self, app_id: u32, lobby_id: LobbyId) -> HarnessResult<JobId> {
        submit(
            &*self.client,
            &self.jobs,
            kinds::LEAVE_LOBBY,
            &LobbyRequest { app_id, lobby_id },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Callback, ClientEvent};
    use crate::mock_client::{ClientCall, MockClient};

    #[test]
    fn test_job_ids_are_unique_and_increasing() {
        let jobs = JobIdSource::default();
        let first = jobs.next();
        let second = jobs.next();
        assert!(second > first);
    }

    #[test]
    fn test_create_lobby_submits_encoded_request() {
        let (client, _events) = MockClient::new();
        let client = Arc::new(client);
        let matchmaking = MatchmakingHandler::new(Arc::clone(&client), Arc::default());

        let job_id = matchmaking
            .create_lobby(570, LobbyType::Public, 4)
            .unwrap();

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        let ClientCall::Send(message) = &calls[0] else {
            panic!("expected a send, got {:?}", calls[0]);
        };
        assert_eq!(message.kind, kinds::CREATE_LOBBY);
        assert_eq!(message.job_id, job_id);
        assert_eq!(
            message.decode::<CreateLobbyRequest>().unwrap(),
            CreateLobbyRequest {
                app_id: 570,
                lobby_type: LobbyType::Public,
                max_members: 4,
            }
        );
    }

    #[test]
    fn test_lobby_list_callback_decodes_and_finds() {
        let event = ClientEvent::service(
            kinds::GET_LOBBY_LIST_RESPONSE,
            JobId(3),
            serde_json::json!({
                "job_id": 3,
                "result": "Ok",
                "lobbies": [{
                    "lobby_id": 42,
                    "owner": "alice",
                    "members": 1,
                    "max_members": 4,
                    "metadata": { "mode": "ranked" }
                }]
            }),
        );

        let list = LobbyList::from_event(&event).unwrap();
        assert_eq!(list.result, ResultCode::Ok);
        let lobby = list.find(LobbyId(42)).unwrap();
        assert_eq!(lobby.metadata.get("mode").map(String::as_str), Some("ranked"));
        assert!(list.find(LobbyId(7)).is_none());
    }
}
