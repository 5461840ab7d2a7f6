//! Service wiring: picks in-memory or persistent backends and assembles the
//! producer, status service, record queries, rate limiter, and worker pool.

use std::sync::Arc;

use docflow_analysis::{Analyzer, FinancialAnalyzer};
use docflow_infra::{
    cache::{CacheBackend, CacheLayer, InMemoryCache},
    config::AppConfig,
    intake::{DocumentIntake, PdfIntake},
    jobs::{InMemoryJobStore, JobProducer, JobStatusService, JobStore, JobWorker, StallReaper, TaskHandle, WorkerHandle},
    queries::RecordQueries,
    ratelimit::{CounterStore, InMemoryCounterStore, RateLimiter},
    records::{AnalysisStore, AuditSink, DocumentStore, InMemoryAuditLog, InMemoryRecords},
};

#[cfg(feature = "redis")]
use docflow_infra::{
    cache::RedisCache,
    jobs::RedisJobStore,
    ratelimit::RedisCounterStore,
    records::PostgresRecordStore,
    redis_conn::RedisHandle,
};

/// Everything the routes and workers need, built once at startup.
pub struct AppServices {
    pub config: AppConfig,
    pub producer: JobProducer,
    pub status: JobStatusService,
    pub queries: RecordQueries,
    pub limiter: RateLimiter,
    worker: Arc<JobWorker>,
    reaper: Arc<StallReaper>,
}

/// Storage backends behind the services.
pub struct Backends {
    pub jobs: Arc<dyn JobStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub analyses: Arc<dyn AnalysisStore>,
    pub audit: Arc<dyn AuditSink>,
    pub cache: Arc<dyn CacheBackend>,
    pub counters: Arc<dyn CounterStore>,
}

impl Backends {
    pub fn in_memory(config: &AppConfig) -> Self {
        Self {
            jobs: InMemoryJobStore::arc(config.worker.job_retention),
            documents: Arc::new(InMemoryRecords::new()),
            analyses: Arc::new(InMemoryRecords::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            cache: Arc::new(InMemoryCache::new()),
            counters: Arc::new(InMemoryCounterStore::new()),
        }
    }

    #[cfg(feature = "redis")]
    pub async fn persistent(config: &AppConfig) -> anyhow::Result<Self> {
        let redis = RedisHandle::connect(&config.redis_url).await?;
        let records = Arc::new(PostgresRecordStore::connect(config.require_database_url()?).await?);
        records.ensure_schema().await?;
        tracing::info!("using persistent stores (redis + postgres)");

        Ok(Self {
            jobs: Arc::new(RedisJobStore::new(redis.clone(), config.worker.job_retention)),
            documents: records.clone(),
            analyses: records.clone(),
            audit: records,
            cache: Arc::new(RedisCache::new(redis.clone())),
            counters: Arc::new(RedisCounterStore::new(redis)),
        })
    }
}

/// Background loops started by [`AppServices::spawn_background`].
pub struct Background {
    worker: WorkerHandle,
    reaper: TaskHandle,
}

impl Background {
    /// Stop popping, let in-flight jobs finish, then stop the reaper.
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
        self.reaper.shutdown().await;
    }
}

impl AppServices {
    pub fn assemble(config: AppConfig, backends: Backends, analyzer: Arc<dyn Analyzer>) -> Self {
        let cache = CacheLayer::new(backends.cache, config.cache);
        let intake: Arc<dyn DocumentIntake> = Arc::new(PdfIntake::new(config.intake.clone()));

        let producer = JobProducer::new(
            intake.clone(),
            backends.documents.clone(),
            backends.jobs.clone(),
            backends.audit,
            cache.clone(),
            config.intake.max_query_chars,
        );
        let status = JobStatusService::new(backends.jobs.clone(), cache.clone());
        let queries = RecordQueries::new(backends.documents.clone(), backends.analyses.clone(), intake, cache.clone());
        let limiter = RateLimiter::new(backends.counters, config.rate_limit);
        let worker = Arc::new(JobWorker::new(
            backends.jobs.clone(),
            backends.documents,
            backends.analyses,
            analyzer,
            cache.clone(),
        ));
        let reaper = Arc::new(StallReaper::new(backends.jobs, cache, config.worker.stall_timeout));

        Self {
            config,
            producer,
            status,
            queries,
            limiter,
            worker,
            reaper,
        }
    }

    /// Start the worker pool and the stall reaper on the current runtime.
    pub fn spawn_background(&self) -> Background {
        Background {
            worker: self.worker.clone().spawn(self.config.worker.clone()),
            reaper: self.reaper.clone().spawn(),
        }
    }
}

pub async fn build_services(config: AppConfig) -> anyhow::Result<AppServices> {
    let analyzer: Arc<dyn Analyzer> = Arc::new(FinancialAnalyzer::default());

    if config.use_persistent_stores {
        #[cfg(feature = "redis")]
        {
            let backends = Backends::persistent(&config).await?;
            return Ok(AppServices::assemble(config, backends, analyzer));
        }
        #[cfg(not(feature = "redis"))]
        tracing::warn!("USE_PERSISTENT_STORES is set but this build lacks the `redis` feature; using in-memory stores");
    }

    let backends = Backends::in_memory(&config);
    Ok(AppServices::assemble(config, backends, analyzer))
}
