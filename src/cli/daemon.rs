use anyhow::{Context, Result, anyhow};
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::CliFlags;
use crate::core::config::{PipelineConfig, SECRET_ENV};
use crate::core::generation::invoker::ModelInvoker;
use crate::core::lifecycle::LifecycleManager;
use crate::core::llm::catalog::ProviderCatalog;
use crate::core::pipeline::Pipeline;
use crate::core::pipeline::trigger::TriggerAdapter;
use crate::core::pipeline::worker::{WorkerPool, WorkerSettings};
use crate::core::store::ContentStore;
use crate::core::terminal::{self, GuideSection};
use crate::interfaces::web::{ApiServer, ApiServerConfig};

/// Boot the store, workers, schedules and API; run until Ctrl-C or a fatal halt.
pub async fn run_daemon(flags: &CliFlags) -> Result<()> {
    let config = PipelineConfig::load(flags.config.as_deref()).await?;
    crate::logging::init(&config.log_level, config.log_file.as_deref())?;
    terminal::print_banner();

    let db_path = config.database_path();
    let store = ContentStore::open(&db_path)
        .await
        .with_context(|| format!("opening store at {}", db_path.display()))?;
    store
        .verify_constraints()
        .await
        .map_err(|e| anyhow!("Refusing to start: {}", e))?;

    let catalog = ProviderCatalog::builtin()?.merged_with(&config.providers);
    let router = catalog.build_router();
    let served = router.models();
    if served.is_empty() {
        warn!("No provider API keys found. Every job will fail with an unknown-model error");
    } else {
        info!("Serving {} model(s): {}", served.len(), served.join(", "));
    }

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        ModelInvoker::new(router),
        config.model_registry(),
        config.retry_policy(),
    ));
    let trigger = TriggerAdapter::new(store.clone(), &config.models);

    let mut lifecycle = LifecycleManager::new().await?;
    let schedules = lifecycle
        .register_schedules(&config.schedules, trigger.clone())
        .await?;

    let api_status = match config.trigger_secret() {
        Some(secret) => {
            let api = ApiServer::new(ApiServerConfig {
                store: store.clone(),
                trigger,
                secret: secret.to_string(),
                api_host: config.api.host.clone(),
                api_port: config.api.port,
            });
            lifecycle.attach(Arc::new(Mutex::new(api)));
            format!("http://{}:{}", config.api.host, config.api.port)
        }
        None => {
            warn!(
                "No trigger secret configured ([trigger] secret or ${}). API server disabled",
                SECRET_ENV
            );
            "disabled (no trigger secret)".to_string()
        }
    };

    lifecycle.start().await?;

    let settings = WorkerSettings::from(&config.queue);
    let pool = WorkerPool::new(pipeline, settings);
    let shutdown = pool.shutdown_token();
    let mut worker = tokio::spawn(pool.run());

    GuideSection::new("Pipeline Running")
        .status("Status", &format!("{}", style("RUNNING").green().bold()))
        .status("Store", &db_path.display().to_string())
        .status("Workers", &settings.max_concurrency.to_string())
        .status("Schedules", &schedules.to_string())
        .status("API", &api_status)
        .blank()
        .status(
            "Press Ctrl+C to stop",
            &format!("{}", style("Ctrl+C").bold().yellow()),
        )
        .print();
    println!();

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested. Draining in-flight jobs");
            shutdown.cancel();
            (&mut worker).await
        }
        joined = &mut worker => joined,
    };

    lifecycle.shutdown().await?;
    outcome??;
    terminal::print_goodbye();
    Ok(())
}
