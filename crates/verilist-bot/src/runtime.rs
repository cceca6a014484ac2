//! Wiring from configuration to running pipelines.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use verilist_atproto::{
    build_http_client, BskyAgent, ConstellationIndex, Credentials, PdsResolver, RepoLister,
    XrpcClient, XrpcError,
};
use verilist_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings, MigrationError, PoolError};
use verilist_engine::source::{JetstreamSettings, JetstreamSource};
use verilist_engine::{
    run_backfill, run_stream, BackfillSettings, ExecutorSettings, FanoutExecutor, LinkIndex,
    RateController, Shutdown, SocialClient, SourceError, StreamSummary, VerifierDirectory,
    VerifierReport,
};
use verilist_ledger::{CheckpointStore, Ledger, LedgerCounts, LedgerError};
use verilist_types::VERIFICATION_COLLECTION;

use crate::config::{Config, DatabaseConfig};
use crate::status::{self, StatusState};

/// Name of the stream whose checkpoint is stored.
pub const JETSTREAM_STREAM: &str = "jetstream";

/// Errors that stop the process before or while it runs a command.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to get database connection: {0}")]
    Connection(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("account.identifier and account.password must be set")]
    MissingCredentials,

    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    #[error("login failed: {0}")]
    Login(#[source] XrpcError),

    #[error("failed to bind status server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Opens the pool and applies pending migrations.
pub fn open_database(config: &DatabaseConfig) -> Result<DbPool, StartupError> {
    let pool = create_pool(
        &config.path,
        DbRuntimeSettings {
            busy_timeout_ms: config.busy_timeout_ms,
            pool_max_size: config.pool_max_size,
        },
    )?;
    let conn = pool
        .get()
        .map_err(|e| StartupError::Connection(e.to_string()))?;
    let applied = run_migrations(&conn)?;
    if applied > 0 {
        tracing::info!(count = applied, path = %config.path, "applied database migrations");
    }
    Ok(pool)
}

/// Network collaborators, logged in.
pub struct Remote {
    pub http: reqwest::Client,
    pub agent: Arc<BskyAgent>,
    pub owner_did: String,
}

/// Builds the agent and logs in. Failure here is fatal.
pub async fn connect(config: &Config) -> Result<Remote, StartupError> {
    if config.account.identifier.is_empty() || config.account.password.is_empty() {
        return Err(StartupError::MissingCredentials);
    }
    let http = build_http_client();
    let pds = XrpcClient::new(http.clone(), &config.account.service)
        .map_err(|e| StartupError::Endpoint(format!("account.service: {e}")))?;
    let appview = XrpcClient::new(http.clone(), &config.endpoints.appview)
        .map_err(|e| StartupError::Endpoint(format!("endpoints.appview: {e}")))?;
    let agent = BskyAgent::new(
        pds,
        appview,
        Credentials {
            identifier: config.account.identifier.clone(),
            password: config.account.password.clone(),
        },
    )
    .with_chat_proxy(config.endpoints.chat_proxy.clone());

    let session = agent.login().await.map_err(StartupError::Login)?;
    Ok(Remote {
        http,
        agent: Arc::new(agent),
        owner_did: session.did,
    })
}

pub fn directory(config: &Config) -> VerifierDirectory {
    VerifierDirectory::new(
        config.verifiers.iter().cloned(),
        config.blacklist.verifiers.iter().cloned(),
    )
}

/// Assembles the executor shared by both pipelines.
pub fn build_executor(
    config: &Config,
    pool: &DbPool,
    social: Arc<dyn SocialClient>,
    index: Arc<dyn LinkIndex>,
    owner_did: &str,
    announce: bool,
) -> FanoutExecutor {
    FanoutExecutor::new(
        social,
        index,
        Ledger::new(pool.clone()),
        Arc::new(directory(config)),
        Arc::new(RateController::new(config.pacing.to_pacing())),
        ExecutorSettings {
            owner_did: owner_did.to_string(),
            catch_all_list: config.lists.catch_all.clone(),
            announce,
            operator_did: config.notify.operator.clone(),
        },
    )
}

fn link_index(config: &Config, remote: &Remote) -> Result<Arc<ConstellationIndex>, StartupError> {
    ConstellationIndex::new(remote.http.clone(), &config.endpoints.constellation)
        .map(Arc::new)
        .map_err(|e| StartupError::Endpoint(format!("endpoints.constellation: {e}")))
}

/// Follows the live stream until shutdown.
///
/// Resumes from `stream.cursor` when set, else from the stored checkpoint,
/// else from the live tip.
pub async fn watch(
    config: &Config,
    pool: DbPool,
    mut shutdown: Shutdown,
) -> Result<StreamSummary, StartupError> {
    let remote = connect(config).await?;
    let index = link_index(config, &remote)?;
    let executor = build_executor(
        config,
        &pool,
        remote.agent.clone(),
        index,
        &remote.owner_did,
        config.announcements.enabled,
    );
    tracing::info!(
        owner = %remote.owner_did,
        verifiers = executor.directory().len(),
        announce = config.announcements.enabled,
        "fan-out executor ready"
    );

    let checkpoint = CheckpointStore::new(pool.clone(), JETSTREAM_STREAM);
    let stored = checkpoint.load().await?;
    let resume_from = match config.stream.cursor {
        Some(cursor) => {
            tracing::info!(cursor, stored = ?stored, "starting from configured cursor");
            Some(cursor)
        }
        None => {
            tracing::info!(cursor = ?stored, "resuming from stored checkpoint");
            stored
        }
    };

    if config.server.enabled {
        serve_status(config, &pool, checkpoint.clone(), shutdown.clone()).await?;
    }

    let mut source = JetstreamSource::new(
        JetstreamSettings {
            endpoint: config.endpoints.jetstream.clone(),
            collection: VERIFICATION_COLLECTION.to_string(),
            reconnect_delay: config.stream.reconnect_delay(),
            max_reconnect_attempts: config.stream.max_reconnect_attempts,
        },
        resume_from,
    );
    Ok(run_stream(&mut source, &executor, &checkpoint, &mut shutdown).await?)
}

async fn serve_status(
    config: &Config,
    pool: &DbPool,
    checkpoint: CheckpointStore,
    mut shutdown: Shutdown,
) -> Result<(), StartupError> {
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    let app = status::app(Arc::new(StatusState {
        ledger: Ledger::new(pool.clone()),
        checkpoint,
    }));

    tracing::info!(%addr, "serving status endpoint");
    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "status server failed");
        }
    });
    Ok(())
}

/// Walks verifier histories and performs every missing effect.
///
/// An empty `verifiers` list means every configured, non-blacklisted verifier.
pub async fn backfill(
    config: &Config,
    pool: DbPool,
    verifiers: Vec<String>,
    announce: bool,
    shutdown: Shutdown,
) -> Result<Vec<VerifierReport>, StartupError> {
    let remote = connect(config).await?;
    let index = link_index(config, &remote)?;
    let executor = build_executor(
        config,
        &pool,
        remote.agent.clone(),
        index,
        &remote.owner_did,
        announce,
    );
    let verifiers = if verifiers.is_empty() {
        executor.directory().active_verifiers()
    } else {
        verifiers
    };

    let resolver = Arc::new(PdsResolver::new(
        remote.http.clone(),
        config.endpoints.plc_directory.clone(),
        config.endpoints.default_pds.clone(),
    ));
    let lister = Arc::new(RepoLister::new(remote.http.clone(), resolver));
    let settings = BackfillSettings {
        collection: VERIFICATION_COLLECTION.to_string(),
        page_limit: config.backfill.page_limit,
        concurrency: config.backfill.concurrency,
    };

    tracing::info!(verifiers = verifiers.len(), announce, "starting backfill");
    let reports = run_backfill(verifiers, lister, &executor, &settings, &shutdown).await;

    let counts = executor.ledger().counts().await?;
    tracing::info!(
        verifiers = reports.len(),
        processed = reports.iter().map(|r| r.processed).sum::<u64>(),
        performed = reports.iter().map(|r| r.performed).sum::<u64>(),
        already_done = reports.iter().map(|r| r.already_done).sum::<u64>(),
        failed = reports.iter().map(|r| r.failed).sum::<u64>(),
        effects = counts.effects,
        verifications = counts.verifications,
        "backfill finished"
    );
    Ok(reports)
}

/// Stored checkpoint and ledger counts.
pub async fn read_status(pool: DbPool) -> Result<(Option<i64>, LedgerCounts), StartupError> {
    let checkpoint = CheckpointStore::new(pool.clone(), JETSTREAM_STREAM).load().await?;
    let counts = Ledger::new(pool).counts().await?;
    Ok((checkpoint, counts))
}
