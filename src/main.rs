use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use wayfarer::{
    application::{
        context::AppContext, error::AppError, query::QueryPipeline, repos::DocumentStore, seed,
    },
    cache::{CacheConfig, CacheStore, MemoryCacheStore},
    config::{self, CacheBackend, DatabaseBackend},
    infra::{
        cache_warmer::CacheWarmer, db::PostgresDocumentStore, error::InfraError,
        memory::MemoryDocumentStore, redis::RedisCacheStore, telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let context = build_context(&settings).await?;
    match command {
        config::Command::Serve(_) => run_serve(&settings, context).await,
        config::Command::WarmCache(_) => run_warm_cache(context).await,
        config::Command::RecomputeRatings(args) => run_recompute(context, args).await,
        config::Command::Import(args) => run_import(context, args).await,
        config::Command::Purge(args) => run_purge(context, args).await,
    }
}

async fn run_serve(settings: &config::Settings, context: AppContext) -> Result<(), AppError> {
    let warmer_handle = settings.warmer.enabled.then(|| {
        let warmer = CacheWarmer::new(context.tours.clone());
        tokio::spawn(warmer.run(settings.warmer.interval))
    });

    info!(
        target = "wayfarer::serve",
        cache_enabled = context.cache.is_enabled(),
        warmer = settings.warmer.enabled,
        "resource layer ready; press ctrl-c to stop"
    );

    let result = tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)));

    if let Some(handle) = warmer_handle {
        handle.abort();
        let _ = handle.await;
    }
    info!(target = "wayfarer::serve", "shutting down");
    result
}

async fn run_warm_cache(context: AppContext) -> Result<(), AppError> {
    let report = CacheWarmer::new(context.tours.clone())
        .warm_once()
        .await
        .map_err(|err| AppError::unexpected(err.to_string()))?;
    info!(
        target = "wayfarer::warm_cache",
        stats_groups = report.stats_groups,
        tours = report.tours,
        "warm pass completed"
    );
    Ok(())
}

async fn run_recompute(context: AppContext, args: config::RecomputeArgs) -> Result<(), AppError> {
    match args.tour {
        Some(tour_id) => {
            let aggregate = context.ratings.recompute(tour_id).await?;
            info!(
                target = "wayfarer::ratings",
                %tour_id,
                quantity = aggregate.ratings_quantity,
                average = aggregate.ratings_average,
                "rating aggregate recomputed"
            );
        }
        None => {
            let tours = context.ratings.recompute_all().await?;
            info!(target = "wayfarer::ratings", tours, "all rating aggregates recomputed");
        }
    }
    Ok(())
}

async fn run_import(context: AppContext, args: config::ImportArgs) -> Result<(), AppError> {
    info!(
        target = "wayfarer::import",
        path = %args.dir.display(),
        "Starting import"
    );
    let report = seed::import_dir(&context, &args.dir).await?;
    info!(
        target = "wayfarer::import",
        aggregates = report.aggregates,
        "Import completed"
    );
    Ok(())
}

async fn run_purge(context: AppContext, args: config::PurgeArgs) -> Result<(), AppError> {
    if !args.yes {
        return Err(AppError::validation(
            "purge deletes every document; re-run with --yes to confirm",
        ));
    }
    let report = seed::purge_all(&context).await?;
    info!(
        target = "wayfarer::purge",
        documents = report.documents,
        cache_flushed = report.cache_flushed,
        "Purge completed"
    );
    Ok(())
}

async fn build_context(settings: &config::Settings) -> Result<AppContext, AppError> {
    let store = init_document_store(settings).await?;
    let cache_config = CacheConfig::from(&settings.cache);
    let cache_store = init_cache_store(settings, &cache_config).await;

    Ok(AppContext::new(
        store,
        cache_store,
        cache_config,
        QueryPipeline::new(settings.query.max_limit),
        settings.environment,
    ))
}

async fn init_document_store(
    settings: &config::Settings,
) -> Result<Arc<dyn DocumentStore>, AppError> {
    let database = &settings.database;
    match database.backend {
        DatabaseBackend::Memory => {
            warn!(
                target = "wayfarer::bootstrap",
                "using the in-process document store; data is lost on exit"
            );
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        DatabaseBackend::Postgres => {
            let url = database
                .url
                .as_ref()
                .ok_or_else(|| InfraError::configuration("database url is not configured"))
                .map_err(AppError::from)?;

            let pool = PostgresDocumentStore::connect(
                url,
                database.max_connections.get(),
                database.acquire_timeout,
            )
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

            PostgresDocumentStore::run_migrations(&pool)
                .await
                .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

            Ok(Arc::new(PostgresDocumentStore::new(pool)))
        }
    }
}

/// The cache is advisory: an unreachable Redis degrades to the in-process
/// store instead of failing startup.
async fn init_cache_store(
    settings: &config::Settings,
    cache_config: &CacheConfig,
) -> Arc<dyn CacheStore> {
    let memory = || -> Arc<dyn CacheStore> { Arc::new(MemoryCacheStore::new(cache_config)) };

    match (settings.cache.backend, settings.cache.url.as_deref()) {
        (CacheBackend::Redis, Some(url)) => {
            match RedisCacheStore::connect(url, cache_config.operation_timeout()).await {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    warn!(
                        target = "wayfarer::bootstrap",
                        error = %err,
                        "redis cache unavailable; falling back to the in-process cache"
                    );
                    memory()
                }
            }
        }
        _ => memory(),
    }
}
