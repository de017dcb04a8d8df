use crate::{
    api::AppState,
    clock::{Clock, SystemClock},
    config::{Config, FeatureFlags, StoreKind, POLL_GVMS_BY_MRN_JOB},
    error::{AppError, AppResult},
    gvms::{GvmsApi, GvmsApiClient},
    ledger::{InMemoryLedger, LedgerStore, PgLedgerRepository},
    middleware::DevCredentials,
    polling::PollingService,
    publisher::{LogSink, PublishSink, ResilientPublisher, WebhookSink},
    scheduler::{self, CronJob, JobHandle, ScheduleTokenProvider},
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Everything `main` needs: the HTTP state and the running scheduled jobs.
pub struct Application {
    pub state: AppState,
    pub jobs: Vec<JobHandle>,
}

pub async fn initialize_app(config: &Config) -> AppResult<Application> {
    info!("Initializing application components ...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Ledger + execution tokens share one store
    let (ledger, tokens): (Arc<dyn LedgerStore>, Arc<dyn ScheduleTokenProvider>) =
        match config.store {
            StoreKind::Postgres => {
                let pool = initialize_database(&config.database_url).await?;
                let repository = Arc::new(PgLedgerRepository::new(pool));
                (repository.clone(), repository)
            }
            StoreKind::Memory => {
                warn!("⚠️  Using in-memory store - state is lost on restart and not shared across replicas");
                let ledger = Arc::new(InMemoryLedger::new());
                (ledger.clone(), ledger)
            }
        };

    let gvms: Arc<dyn GvmsApi> = Arc::new(GvmsApiClient::new(&config.gvms, clock.clone())?);
    info!(base_url = %config.gvms.base_url, "✅ GVMS API client initialized");

    let sink: Arc<dyn PublishSink> = match &config.publisher.endpoint {
        Some(endpoint) => {
            info!(%endpoint, "✅ Publishing matched GMRs to webhook sink");
            Arc::new(WebhookSink::new(endpoint.clone(), config.publisher.timeout())?)
        }
        None => {
            warn!("⚠️  PUBLISHER__ENDPOINT not set - matched GMRs will only be logged");
            Arc::new(LogSink)
        }
    };
    let publisher = Arc::new(ResilientPublisher::new(sink, &config.publisher));

    let polling = Arc::new(PollingService::new(
        ledger.clone(),
        gvms.clone(),
        publisher,
        clock.clone(),
        config.polling.clone(),
    ));

    let jobs = start_jobs(config, &polling, clock.clone(), tokens)?;

    let state = AppState {
        polling,
        ledger,
        gvms,
        clock,
        dev_credentials: dev_credentials(&config.features),
    };

    info!("✅ Application state initialized");
    Ok(Application { state, jobs })
}

fn start_jobs(
    config: &Config,
    polling: &Arc<PollingService>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn ScheduleTokenProvider>,
) -> AppResult<Vec<JobHandle>> {
    let mut jobs = Vec::new();

    if !config.features.enable_gmr_polling {
        warn!("⚠️  GMR polling disabled by feature flag");
        return Ok(jobs);
    }

    let expression = scheduler::schedule_for(config, POLL_GVMS_BY_MRN_JOB)?;
    let service = polling.clone();
    let poll_job = CronJob::new(
        POLL_GVMS_BY_MRN_JOB,
        expression,
        clock,
        tokens,
        move |cancel: CancellationToken| {
            let service = service.clone();
            let span = info_span!("poll_cycle", cycle_id = %Uuid::new_v4());
            async move {
                let summary = service.poll_items(&cancel).await?;
                debug!(?summary, "Poll cycle summary");
                Ok::<(), AppError>(())
            }
            .instrument(span)
        },
    )?;
    jobs.push(poll_job.start());

    Ok(jobs)
}

/// Stop every job, each with its own bounded wait.
pub async fn stop_jobs(jobs: Vec<JobHandle>, timeout: Duration) {
    for job in jobs {
        let name = job.name().to_string();
        if job.is_finished() {
            warn!(job = %name, "Job loop had already exited");
            continue;
        }
        if job.stop(timeout).await {
            info!(job = %name, "✓ Job stopped");
        }
    }
}

fn dev_credentials(features: &FeatureFlags) -> Option<Arc<DevCredentials>> {
    if !features.enable_dev_endpoints {
        return None;
    }

    match (&features.dev_username, &features.dev_password) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            Some(Arc::new(DevCredentials {
                username: username.clone(),
                password: password.clone(),
            }))
        }
        _ => {
            warn!("⚠️  Dev endpoints enabled but FEATURES__DEV_USERNAME/FEATURES__DEV_PASSWORD missing - not mounting them");
            None
        }
    }
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
