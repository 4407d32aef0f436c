use std::{collections::BTreeSet, process, sync::Arc};

use serde::Serialize;
use tracker_cache::{
    application::{error::AppError, repos::SystemClock},
    cache::{CacheConfig, CacheRouter},
    config::{self, Command, QueryArgs, Settings, StatsArgs},
    domain::{
        actor::Actor,
        predicate::{Predicate, Property, Value},
        task::ShardKey,
    },
    infra::{error::InfraError, snapshot::Snapshot, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report.chain(), source = report.source, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report.chain(), source = report.source, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging)?;
    let snapshot = Snapshot::load(&settings.snapshot.path)?;

    match cli_args.command {
        Command::Query(args) => run_query(&settings, snapshot, args).await,
        Command::Stats(args) => run_stats(&settings, snapshot, args).await,
        Command::Shards => {
            let shards = snapshot.into_source().shards();
            print_json(&shards)
        }
    }
}

async fn run_query(
    settings: &Settings,
    snapshot: Snapshot,
    args: QueryArgs,
) -> Result<(), AppError> {
    let affiliations = args
        .affiliations
        .iter()
        .map(ShardKey::new)
        .collect::<Result<Vec<_>, _>>()?;
    let actor = snapshot.actor(&args.actor).with_shards(affiliations);
    let predicates = args.all_predicates();

    let router = build_router(settings, snapshot);
    for key in warm_targets(&actor, &predicates) {
        router.query(&actor, &[Predicate::shard(key)]).await;
    }

    let result = router.query(&actor, &predicates).await;
    info!(
        actor = %actor.name,
        total = result.total(),
        erroneous = result.erroneous().len(),
        "Query finished"
    );
    router.close();
    print_json(&result)
}

async fn run_stats(
    settings: &Settings,
    snapshot: Snapshot,
    args: StatsArgs,
) -> Result<(), AppError> {
    let key = ShardKey::new(args.project)?;
    let router = build_router(settings, snapshot);
    let actor = Actor::new("tracker-cache").with_shards([key.clone()]);

    let loaded = router.query(&actor, &[Predicate::shard(key.clone())]).await;
    if loaded.erroneous().contains(&key) {
        router.close();
        return Err(AppError::unexpected(format!("shard `{key}` failed to load")));
    }

    let stats = router.stats(&key).await?;
    router.close();
    match stats {
        Some(stats) => print_json(&stats),
        None => Err(AppError::unexpected(format!("shard `{key}` is not cached"))),
    }
}

fn build_router(settings: &Settings, snapshot: Snapshot) -> CacheRouter {
    CacheRouter::new(
        Arc::new(snapshot.into_source()),
        Arc::new(SystemClock),
        CacheConfig::from(&settings.cache),
    )
}

/// Shards a one-shot query may touch: explicit shard equalities, else the
/// actor's affiliations.
fn warm_targets(actor: &Actor, predicates: &[Predicate]) -> BTreeSet<ShardKey> {
    let named: BTreeSet<ShardKey> = predicates
        .iter()
        .filter(|predicate| {
            predicate.property == Property::Shard && predicate.operator.is_inclusive()
        })
        .flat_map(|predicate| predicate.values.iter())
        .filter_map(|value| match value {
            Value::Shard(key) => Some(key.clone()),
            _ => None,
        })
        .collect();
    if named.is_empty() {
        actor.shards.clone()
    } else {
        named
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
