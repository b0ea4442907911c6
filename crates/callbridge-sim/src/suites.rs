//! Ordered Lobby Suites
//!
//! Built-in procedure groups exercising the matchmaking handler end to end.
//! Every procedure depends on what the previous ones left behind: the lobby
//! created first is recorded in the fixture and used until it is left.
//!
//! Sessions are initialized before the group runs and torn down after it,
//! whatever the procedures did.

use callbridge_core::handlers::{
    LobbyCreated, LobbyDataSet, LobbyId, LobbyJoined, LobbyLeft, LobbyList, LobbyMemberChanged,
    LobbyMetadata, LobbySummary, LobbyType, MemberChange,
};
use callbridge_core::{
    ClientConnection, FixtureState, HarnessConfig, HarnessError, HarnessResult, JobId,
    LogonDetails, ProcedureGroup, ResultCode, RunReport, SequentialRunner, Session, Slot,
};
use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::service::SimulatedService;

pub const PRIMARY: &str = "PRIMARY";
pub const SECONDARY: &str = "SECONDARY";

const LOBBY: Slot<LobbyId> = Slot::new("lobby");
const MAX_MEMBERS: u32 = 4;
const MODE_KEY: &str = "mode";
const MODE_VALUE: &str = "integration";

// ----------------------------------------------------------------------------
// Contract Checks
// ----------------------------------------------------------------------------

fn expect_ok(procedure: &str, what: &str, result: ResultCode) -> HarnessResult<()> {
    if result.is_ok() {
        Ok(())
    } else {
        Err(HarnessError::assertion(procedure, format!("{} returned {}", what, result)))
    }
}

fn expect_job(procedure: &str, sent: JobId, answered: JobId) -> HarnessResult<()> {
    if sent == answered {
        Ok(())
    } else {
        Err(HarnessError::assertion(
            procedure,
            format!("response for {} arrived while awaiting {}", answered, sent),
        ))
    }
}

// ----------------------------------------------------------------------------
// Shared Steps
// ----------------------------------------------------------------------------

async fn create_lobby<C: ClientConnection>(
    procedure: &str,
    session: &mut Session<C>,
    fixture: &mut FixtureState,
) -> HarnessResult<LobbyId> {
    let app_id = session.config().app_id;
    let job_id = session
        .matchmaking()
        .create_lobby(app_id, LobbyType::Public, MAX_MEMBERS)?;

    let created = session.wait_for::<LobbyCreated, _>(|_| {}).await?;
    expect_job(procedure, job_id, created.job_id)?;
    expect_ok(procedure, "create_lobby", created.result)?;

    let lobby_id = created
        .lobby_id
        .ok_or_else(|| HarnessError::assertion(procedure, "created lobby carries no id"))?;
    fixture.put(LOBBY, lobby_id)?;
    info!("[{}] Created lobby {:?}", session.name(), lobby_id);
    Ok(lobby_id)
}

async fn find_lobby<C: ClientConnection>(
    procedure: &str,
    session: &mut Session<C>,
    lobby_id: LobbyId,
) -> HarnessResult<LobbySummary> {
    let app_id = session.config().app_id;
    let job_id = session.matchmaking().get_lobby_list(app_id)?;

    let list = session.wait_for::<LobbyList, _>(|_| {}).await?;
    expect_job(procedure, job_id, list.job_id)?;
    expect_ok(procedure, "get_lobby_list", list.result)?;

    list.find(lobby_id).cloned().ok_or_else(|| {
        HarnessError::assertion(
            procedure,
            format!("lobby {:?} missing from {} listed", lobby_id, list.lobbies.len()),
        )
    })
}

async fn leave_lobby<C: ClientConnection>(
    procedure: &str,
    session: &mut Session<C>,
    lobby_id: LobbyId,
) -> HarnessResult<()> {
    let app_id = session.config().app_id;
    let job_id = session.matchmaking().leave_lobby(app_id, lobby_id)?;

    let left = session.wait_for::<LobbyLeft, _>(|_| {}).await?;
    expect_job(procedure, job_id, left.job_id)?;
    expect_ok(procedure, "leave_lobby", left.result)?;
    if left.lobby_id != lobby_id {
        return Err(HarnessError::assertion(
            procedure,
            format!("left {:?} instead of {:?}", left.lobby_id, lobby_id),
        ));
    }
    Ok(())
}

/// Wait for the notification a peer's action causes on `observer`.
///
/// Sessions have no ordering between them, so the observer only looks after
/// the configured peer delay.
async fn observe_member_change<C: ClientConnection>(
    procedure: &str,
    observer: &mut Session<C>,
    lobby_id: LobbyId,
    member: &str,
    change: MemberChange,
) -> HarnessResult<()> {
    tokio::time::sleep(observer.config().peer_delay()).await;

    let seen = observer.wait_for::<LobbyMemberChanged, _>(|_| {}).await?;
    if seen.lobby_id == lobby_id && seen.member == member && seen.change == change {
        Ok(())
    } else {
        Err(HarnessError::assertion(
            procedure,
            format!("expected {} {:?} {:?}, observed {:?}", member, change, lobby_id, seen),
        ))
    }
}

// ----------------------------------------------------------------------------
// Single User
// ----------------------------------------------------------------------------

/// Context of the single-identity suite
pub struct SingleUserContext<C: ClientConnection> {
    pub primary: Session<C>,
    pub fixture: FixtureState,
}

fn single_create_lobby<C: ClientConnection>(
    ctx: &mut SingleUserContext<C>,
) -> BoxFuture<'_, HarnessResult<()>> {
    Box::pin(async move {
        create_lobby("create_lobby", &mut ctx.primary, &mut ctx.fixture).await?;
        Ok(())
    })
}

fn single_set_lobby_data<C: ClientConnection>(
    ctx: &mut SingleUserContext<C>,
) -> BoxFuture<'_, HarnessResult<()>> {
    Box::pin(async move {
        const PROCEDURE: &str = "set_lobby_data";
        let lobby_id = *ctx.fixture.get(LOBBY)?;
        let app_id = ctx.primary.config().app_id;

        let mut metadata = LobbyMetadata::new();
        metadata.insert(MODE_KEY.to_string(), MODE_VALUE.to_string());
        let job_id = ctx
            .primary
            .matchmaking()
            .set_lobby_data(app_id, lobby_id, metadata)?;

        let set = ctx.primary.wait_for::<LobbyDataSet, _>(|_| {}).await?;
        expect_job(PROCEDURE, job_id, set.job_id)?;
        expect_ok(PROCEDURE, "set_lobby_data", set.result)
    })
}

fn single_find_lobby<C: ClientConnection>(
    ctx: &mut SingleUserContext<C>,
) -> BoxFuture<'_, HarnessResult<()>> {
    Box::pin(async move {
        const PROCEDURE: &str = "find_lobby";
        let lobby_id = *ctx.fixture.get(LOBBY)?;
        let lobby = find_lobby(PROCEDURE, &mut ctx.primary, lobby_id).await?;

        if lobby.owner != ctx.primary.username() {
            return Err(HarnessError::assertion(
                PROCEDURE,
                format!("lobby owned by '{}'", lobby.owner),
            ));
        }
        match lobby.metadata.get(MODE_KEY) {
            Some(value) if value == MODE_VALUE => Ok(()),
            other => Err(HarnessError::assertion(
                PROCEDURE,
                format!("metadata '{}' is {:?}", MODE_KEY, other),
            )),
        }
    })
}

fn single_leave_lobby<C: ClientConnection>(
    ctx: &mut SingleUserContext<C>,
) -> BoxFuture<'_, HarnessResult<()>> {
    Box::pin(async move {
        let lobby_id = *ctx.fixture.get(LOBBY)?;
        leave_lobby("leave_lobby", &mut ctx.primary, lobby_id).await
    })
}

pub fn single_user_group<C: ClientConnection>() -> HarnessResult<ProcedureGroup<SingleUserContext<C>>> {
    let mut group = ProcedureGroup::new(Suite::SingleUser.name());
    group.register(10, "create_lobby", single_create_lobby::<C>)?;
    group.register(20, "set_lobby_data", single_set_lobby_data::<C>)?;
    group.register(30, "find_lobby", single_find_lobby::<C>)?;
    group.register(40, "leave_lobby", single_leave_lobby::<C>)?;
    Ok(group)
}

/// Initialize `primary`, run the single-user group and tear down
pub async fn run_single_user<C: ClientConnection>(primary: Session<C>) -> HarnessResult<RunReport> {
    let mut group = single_user_group()?;
    let mut ctx = SingleUserContext {
        primary,
        fixture: FixtureState::new(),
    };

    let outcome = match ctx.primary.initialize().await {
        Ok(()) => Ok(SequentialRunner::run(&mut group, &mut ctx).await),
        Err(e) => Err(e),
    };

    let teardown = ctx.primary.teardown().await;
    finish(outcome, vec![teardown])
}

// ----------------------------------------------------------------------------
// Dual User
// ----------------------------------------------------------------------------

/// Context of the two-identity suite
pub struct DualUserContext<C: ClientConnection> {
    pub primary: Session<C>,
    pub secondary: Session<C>,
    pub fixture: FixtureState,
}

fn dual_primary_creates_lobby<C: ClientConnection>(
    ctx: &mut DualUserContext<C>,
) -> BoxFuture<'_, HarnessResult<()>> {
    Box::pin(async move {
        create_lobby("primary_creates_lobby", &mut ctx.primary, &mut ctx.fixture).await?;
        Ok(())
    })
}

fn dual_secondary_finds_lobby<C: ClientConnection>(
    ctx: &mut DualUserContext<C>,
) -> BoxFuture<'_, HarnessResult<()>> {
    Box::pin(async move {
        const PROCEDURE: &str = "secondary_finds_lobby";
        let lobby_id = *ctx.fixture.get(LOBBY)?;
        let lobby = find_lobby(PROCEDURE, &mut ctx.secondary, lobby_id).await?;

        if lobby.members != 1 {
            return Err(HarnessError::assertion(
                PROCEDURE,
                format!("expected only the owner, found {} members", lobby.members),
            ));
        }
        Ok(())
    })
}

fn dual_secondary_joins_lobby<C: ClientConnection>(
    ctx: &mut DualUserContext<C>,
) -> BoxFuture<'_, HarnessResult<()>> {
    Box::pin(async move {
        const PROCEDURE: &str = "secondary_joins_lobby";
        let lobby_id = *ctx.fixture.get(LOBBY)?;
        let app_id = ctx.secondary.config().app_id;

        let job_id = ctx.secondary.matchmaking().join_lobby(app_id, lobby_id)?;
        let joined = ctx.secondary.wait_for::<LobbyJoined, _>(|_| {}).await?;
        expect_job(PROCEDURE, job_id, joined.job_id)?;
        expect_ok(PROCEDURE, "join_lobby", joined.result)?;

        let owner = ctx.primary.username().to_string();
        if !joined.members.contains(&owner) {
            return Err(HarnessError::assertion(
                PROCEDURE,
                format!("owner '{}' missing from members {:?}", owner, joined.members),
            ));
        }

        let member = ctx.secondary.username().to_string();
        observe_member_change(PROCEDURE, &mut ctx.primary, lobby_id, &member, MemberChange::Entered)
            .await
    })
}

fn dual_secondary_leaves_lobby<C: ClientConnection>(
    ctx: &mut DualUserContext<C>,
) -> BoxFuture<'_, HarnessResult<()>> {
    Box::pin(async move {
        const PROCEDURE: &str = "secondary_leaves_lobby";
        let lobby_id = *ctx.fixture.get(LOBBY)?;
        leave_lobby(PROCEDURE, &mut ctx.secondary, lobby_id).await?;

        let member = ctx.secondary.username().to_string();
        observe_member_change(PROCEDURE, &mut ctx.primary, lobby_id, &member, MemberChange::Left)
            .await
    })
}

fn dual_primary_leaves_lobby<C: ClientConnection>(
    ctx: &mut DualUserContext<C>,
) -> BoxFuture<'_, HarnessResult<()>> {
    Box::pin(async move {
        let lobby_id = *ctx.fixture.get(LOBBY)?;
        leave_lobby("primary_leaves_lobby", &mut ctx.primary, lobby_id).await
    })
}

pub fn dual_user_group<C: ClientConnection>() -> HarnessResult<ProcedureGroup<DualUserContext<C>>> {
    let mut group = ProcedureGroup::new(Suite::DualUser.name());
    group.register(10, "primary_creates_lobby", dual_primary_creates_lobby::<C>)?;
    group.register(20, "secondary_finds_lobby", dual_secondary_finds_lobby::<C>)?;
    group.register(30, "secondary_joins_lobby", dual_secondary_joins_lobby::<C>)?;
    group.register(40, "secondary_leaves_lobby", dual_secondary_leaves_lobby::<C>)?;
    group.register(50, "primary_leaves_lobby", dual_primary_leaves_lobby::<C>)?;
    Ok(group)
}

/// Initialize both sessions concurrently, run the dual-user group and tear
/// both down
pub async fn run_dual_user<C: ClientConnection>(
    primary: Session<C>,
    secondary: Session<C>,
) -> HarnessResult<RunReport> {
    let mut group = dual_user_group()?;
    let mut ctx = DualUserContext {
        primary,
        secondary,
        fixture: FixtureState::new(),
    };

    let initialized = tokio::try_join!(ctx.primary.initialize(), ctx.secondary.initialize());
    let outcome = match initialized {
        Ok(_) => Ok(SequentialRunner::run(&mut group, &mut ctx).await),
        Err(e) => Err(e),
    };

    let (primary, secondary) = tokio::join!(ctx.primary.teardown(), ctx.secondary.teardown());
    finish(outcome, vec![primary, secondary])
}

fn finish(
    outcome: HarnessResult<RunReport>,
    teardowns: Vec<HarnessResult<()>>,
) -> HarnessResult<RunReport> {
    let mut teardown_error = None;
    for result in teardowns {
        if let Err(e) = result {
            warn!("Teardown failed: {}", e);
            teardown_error.get_or_insert(e);
        }
    }

    let report = outcome?;
    match teardown_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

// ----------------------------------------------------------------------------
// Catalog
// ----------------------------------------------------------------------------

/// Logon details for the identities a suite needs
#[derive(Debug, Clone)]
pub struct Identities {
    pub primary: LogonDetails,
    pub secondary: LogonDetails,
}

impl Identities {
    /// Built-in identities for runs without configured credentials
    pub fn simulated() -> HarnessResult<Self> {
        Ok(Self {
            primary: LogonDetails::with_login_key("sim-primary", "sim-primary-key")?,
            secondary: LogonDetails::with_login_key("sim-secondary", "sim-secondary-key")?,
        })
    }

    /// Make both identities valid on `service`
    pub fn register(&self, service: &SimulatedService) {
        service.register_account(&self.primary);
        service.register_account(&self.secondary);
    }
}

/// Built-in suites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    SingleUser,
    DualUser,
}

impl Suite {
    pub const ALL: [Suite; 2] = [Suite::SingleUser, Suite::DualUser];

    pub fn name(&self) -> &'static str {
        match self {
            Suite::SingleUser => "single-user",
            Suite::DualUser => "dual-user",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Suite::SingleUser => "create, describe, find and leave a lobby as one identity",
            Suite::DualUser => "a second identity finds, joins and leaves the primary's lobby",
        }
    }

    pub fn from_name(name: &str) -> Option<Suite> {
        Suite::ALL.into_iter().find(|suite| suite.name() == name)
    }

    /// Credential prefixes of the identities the suite logs on
    pub fn identities(&self) -> &'static [&'static str] {
        match self {
            Suite::SingleUser => &[PRIMARY],
            Suite::DualUser => &[PRIMARY, SECONDARY],
        }
    }

    /// Procedure names in execution order
    pub fn procedures(&self) -> HarnessResult<Vec<String>> {
        let names = match self {
            Suite::SingleUser => single_user_group::<crate::SimulatedClient>()?
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            Suite::DualUser => dual_user_group::<crate::SimulatedClient>()?
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        Ok(names)
    }

    /// Run against `service` with fresh sessions for `identities`
    pub async fn run(
        &self,
        service: &SimulatedService,
        identities: &Identities,
        config: &HarnessConfig,
    ) -> HarnessResult<RunReport> {
        info!("Starting suite '{}'", self.name());
        match self {
            Suite::SingleUser => {
                let primary = service.session(PRIMARY, identities.primary.clone(), config.clone());
                run_single_user(primary).await
            }
            Suite::DualUser => {
                let primary = service.session(PRIMARY, identities.primary.clone(), config.clone());
                let secondary =
                    service.session(SECONDARY, identities.secondary.clone(), config.clone());
                run_dual_user(primary, secondary).await
            }
        }
    }
}
