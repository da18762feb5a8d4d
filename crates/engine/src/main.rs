use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use vigil_common::clock::{Clock, SystemClock};
use vigil_engine::alert::{ConditionRegistry, DefaultEvalHandler, EvalHandler, Rule};
use vigil_engine::api::{self, ApiState};
use vigil_engine::config::{self, EngineConfig};
use vigil_engine::datasource::PrometheusQueryHandler;
use vigil_engine::engine::{AlertEngine, EngineDeps};
use vigil_engine::metrics::EngineMetrics;
use vigil_engine::notifier::{NotificationService, NotifierRegistry};
use vigil_engine::result_handler::ResultHandler;
use vigil_engine::rule_reader::StoreRuleReader;
use vigil_engine::shutdown;
use vigil_engine::store::{
    create_pool, migrator, AlertStore, AnnotationStore, MemoryStore, NotificationStore, PgStore,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "vigil-engine", version, about = "Vigil alert rule engine")]
struct Args {
    #[arg(long, short, default_value = "vigil.yaml", help = "Path to engine config file")]
    config: PathBuf,

    #[arg(long, help = "Validate config and rules, then exit")]
    check: bool,
}

struct Stores {
    alerts: Arc<dyn AlertStore>,
    annotations: Arc<dyn AnnotationStore>,
    notifications: Arc<dyn NotificationStore>,
}

impl Stores {
    fn new<S>(store: S) -> Self
    where
        S: AlertStore + AnnotationStore + NotificationStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            alerts: store.clone(),
            annotations: store.clone(),
            notifications: store,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();
    let cfg = config::load_from_file(&args.config)?;
    let rule_defs = match &cfg.rules_file {
        Some(path) => config::load_rules_file(Path::new(path))?,
        None => Vec::new(),
    };

    let client = reqwest::Client::new();
    let registry = Arc::new(ConditionRegistry::with_builtins(Arc::new(
        PrometheusQueryHandler::new(client.clone(), cfg.datasources.clone()),
    )));
    let notifier_registry = Arc::new(NotifierRegistry::with_builtins(client));

    if args.check {
        return check(&cfg, rule_defs, &registry, &notifier_registry);
    }

    let stores = open_stores(&cfg).await?;
    for def in &rule_defs {
        stores.alerts.upsert_alert(def).await?;
    }
    for notifier in &cfg.notifiers {
        stores.notifications.upsert_notifier(notifier).await?;
    }
    tracing::info!(
        rules = rule_defs.len(),
        notifiers = cfg.notifiers.len(),
        "seeded store"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = EngineMetrics::new();
    let eval_handler: Arc<dyn EvalHandler> = Arc::new(DefaultEvalHandler::new(clock.clone()));
    let ready = Arc::new(AtomicBool::new(false));

    let api_state = ApiState {
        metrics: metrics.clone(),
        alerts: stores.alerts.clone(),
        registry: registry.clone(),
        eval_handler: eval_handler.clone(),
        clock: clock.clone(),
        min_interval_seconds: cfg.alerting.min_interval_seconds,
        ready: ready.clone(),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.api_addr).await?;
    tracing::info!(api_addr = %cfg.api_addr, "engine API server starting");
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(listener, api_state).await {
            tracing::error!(error = %e, "engine API server failed");
        }
    });

    if !cfg.alerting.enabled {
        tracing::warn!("alerting disabled, serving API only");
        ready.store(true, Ordering::Relaxed);
        shutdown::wait_for_shutdown().await;
        api_handle.abort();
        return Ok(());
    }

    let notifications = Arc::new(NotificationService::new(
        stores.notifications.clone(),
        notifier_registry,
        clock.clone(),
        metrics.clone(),
        cfg.alerting.notification_timeout(),
    ));
    let result_handler = Arc::new(ResultHandler::new(
        stores.alerts.clone(),
        stores.annotations.clone(),
        notifications,
        clock.clone(),
        metrics.clone(),
    ));
    let rule_reader = Arc::new(StoreRuleReader::new(
        stores.alerts.clone(),
        registry,
        cfg.cluster,
        cfg.alerting.min_interval_seconds,
    ));

    let engine = AlertEngine::new(
        EngineDeps {
            clock,
            rule_reader,
            eval_handler,
            result_handler,
            metrics,
        },
        cfg.alerting.clone(),
    );

    // A second signal while draining aborts in-flight evaluations.
    let disposer = engine.disposer();
    let shutdown_signal = async move {
        shutdown::wait_for_shutdown().await;
        tracing::info!("shutdown requested, draining; press ctrl-c again to abort evaluations");
        tokio::spawn(async move {
            shutdown::ctrl_c().await;
            tracing::warn!("aborting in-flight evaluations");
            disposer.dispose();
        });
    };

    ready.store(true, Ordering::Relaxed);
    engine.run(shutdown_signal).await;
    api_handle.abort();
    Ok(())
}

async fn open_stores(cfg: &EngineConfig) -> Result<Stores, BoxError> {
    let Some(url) = &cfg.database_url else {
        tracing::warn!("no database_url configured, using in-memory store");
        return Ok(Stores::new(MemoryStore::new()));
    };

    let pool = create_pool(url, cfg.database_max_connections).await?;
    let applied = migrator::run_migrations(&pool).await?;
    tracing::info!(applied = applied.len(), "database migrations complete");
    Ok(Stores::new(PgStore::new(pool)))
}

fn check(
    cfg: &EngineConfig,
    rule_defs: Vec<vigil_engine::alert::RuleDefinition>,
    registry: &ConditionRegistry,
    notifiers: &NotifierRegistry,
) -> Result<(), BoxError> {
    let mut problems = Vec::new();
    for def in rule_defs {
        let id = def.id;
        match Rule::from_definition(def, registry, cfg.alerting.min_interval_seconds) {
            Ok(rule) => tracing::info!(rule_id = id, name = %rule.name, "rule ok"),
            Err(e) => problems.push(e.to_string()),
        }
    }
    for n in &cfg.notifiers {
        if let Err(e) = notifiers.build(n) {
            problems.push(format!("notifier {}: {e}", n.id));
        }
    }

    if problems.is_empty() {
        tracing::info!("configuration ok");
        Ok(())
    } else {
        for p in &problems {
            tracing::error!(problem = %p, "invalid configuration");
        }
        Err(format!("{} configuration problem(s)", problems.len()).into())
    }
}
