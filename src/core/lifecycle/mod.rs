use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;
use tracing::{error, info, warn};

use crate::core::config::ScheduleConfig;
use crate::core::pipeline::trigger::{Scope, TriggerAdapter};

#[derive(Debug, PartialEq)]
pub enum LifecycleState {
    Init,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<Arc<Mutex<dyn LifecycleComponent + Send + Sync>>>,
    pub scheduler: JobScheduler,
}

impl LifecycleManager {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            state: LifecycleState::Init,
            components: Vec::new(),
            scheduler,
        })
    }

    pub fn attach(&mut self, component: Arc<Mutex<dyn LifecycleComponent + Send + Sync>>) {
        self.components.push(component);
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Register each configured schedule as a cron job that fires the trigger in-process.
    pub async fn register_schedules(
        &mut self,
        schedules: &[ScheduleConfig],
        trigger: TriggerAdapter,
    ) -> Result<usize> {
        for schedule in schedules {
            let scope = Scope::parse(&schedule.scope)?;
            let kinds = schedule.job_kinds()?;
            let trigger = trigger.clone();
            let label = format!("{} [{}]", schedule.cron, scope);

            let job = tokio_cron_scheduler::Job::new_async(
                schedule.cron.as_str(),
                move |_uuid, mut _l| {
                    let trigger = trigger.clone();
                    let scope = scope.clone();
                    let kinds = kinds.clone();
                    Box::pin(async move {
                        if let Err(e) = trigger.enqueue(&scope, &kinds).await {
                            error!("Scheduled trigger '{}' failed: {}", scope, e);
                        }
                    })
                },
            )
            .map_err(|e| anyhow!("Invalid cron expression '{}': {}", schedule.cron, e))?;
            self.scheduler.add(job).await?;
            info!("Registered schedule {}", label);
        }
        Ok(schedules.len())
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.lock().await.on_init().await?;
        }

        for comp in &self.components {
            comp.lock().await.on_start().await?;
        }

        info!("Lifecycle Phase: Ready (Starting Scheduler)");
        self.scheduler.start().await?;
        self.state = LifecycleState::Ready;

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Scheduler shutdown error: {}", e);
        }
        for comp in &self.components {
            if let Err(e) = comp.lock().await.on_shutdown().await {
                warn!("Component shutdown error: {}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ModelsConfig;
    use crate::core::store::ContentStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl LifecycleComponent for Recorder {
        async fn on_start(&mut self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn on_shutdown(&mut self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn components_start_and_stop_with_the_manager() {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let mut lifecycle = LifecycleManager::new().await.unwrap();
        lifecycle.attach(Arc::new(Mutex::new(Recorder {
            starts: starts.clone(),
            stops: stops.clone(),
        })));

        lifecycle.start().await.unwrap();
        assert_eq!(lifecycle.state(), &LifecycleState::Ready);
        lifecycle.shutdown().await.unwrap();
        assert_eq!(lifecycle.state(), &LifecycleState::Shutdown);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected() {
        let store = ContentStore::in_memory().await.unwrap();
        let trigger = TriggerAdapter::new(store, &ModelsConfig::default());
        let mut lifecycle = LifecycleManager::new().await.unwrap();
        let bad = ScheduleConfig {
            cron: "every morning".into(),
            scope: "next:24h".into(),
            kinds: vec![],
        };
        assert!(lifecycle.register_schedules(&[bad], trigger).await.is_err());
    }

    #[tokio::test]
    async fn valid_schedules_register() {
        let store = ContentStore::in_memory().await.unwrap();
        let trigger = TriggerAdapter::new(store, &ModelsConfig::default());
        let mut lifecycle = LifecycleManager::new().await.unwrap();
        let schedules = vec![ScheduleConfig {
            cron: "0 0 6 * * *".into(),
            scope: "next:48h".into(),
            kinds: vec!["preview".into()],
        }];
        assert_eq!(
            lifecycle.register_schedules(&schedules, trigger).await.unwrap(),
            1
        );
    }
}
