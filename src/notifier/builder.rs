use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ChangeNotifier;
use super::NotifierInner;
use crate::poller::ChangeDetector;
use crate::poller::Poller;
use crate::spawn_sweeper;
use crate::BoundedTtlCache;
use crate::Error;
use crate::ListenerRegistry;
use crate::NotifierConfig;
use crate::ResilientExecutor;
use crate::ResourceMonitor;
use crate::Result;
use crate::StorageCollaborator;

/// Fluent construction of a [`ChangeNotifier`].
///
/// Without an explicit [`NotifierBuilder::config`], configuration is loaded from `CONFIG_PATH`
/// and `NOTIFY__` environment variables on top of the defaults.
pub struct NotifierBuilder {
    storage: Arc<dyn StorageCollaborator>,
    config: Option<NotifierConfig>,
    resource_monitor: Option<Arc<dyn ResourceMonitor>>,
}

impl NotifierBuilder {
    pub fn new(storage: Arc<dyn StorageCollaborator>) -> Self {
        Self {
            storage,
            config: None,
            resource_monitor: None,
        }
    }

    pub fn config(
        mut self,
        config: NotifierConfig,
    ) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the default monitor, which purges expired cache entries under pressure
    pub fn resource_monitor(
        mut self,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        self.resource_monitor = Some(monitor);
        self
    }

    /// Validates the configuration and starts the cache sweeper.
    ///
    /// Must be called from within a tokio runtime; the poller and push supervisors are spawned
    /// onto it.
    pub fn build(self) -> Result<ChangeNotifier> {
        let runtime = Handle::try_current().map_err(|e| {
            Error::Validation(format!("ChangeNotifier must be built inside a tokio runtime: {e}"))
        })?;

        let config = match self.config {
            Some(config) => config,
            None => NotifierConfig::new()?,
        }
        .validate()?;

        let cache = Arc::new(BoundedTtlCache::from_config(&config.cache));
        let monitor = self
            .resource_monitor
            .unwrap_or_else(|| cache.clone() as Arc<dyn ResourceMonitor>);
        let executor =
            Arc::new(ResilientExecutor::new(config.executor.clone()).with_resource_monitor(monitor));
        let registry = Arc::new(ListenerRegistry::new());
        let detector = Arc::new(ChangeDetector::new(
            cache.clone(),
            registry.clone(),
            config.poller.clock_skew_tolerance(),
        ));

        let shutdown = CancellationToken::new();
        let poller = Arc::new(Poller::new(
            self.storage.clone(),
            executor.clone(),
            detector.clone(),
            config.executor.clone(),
            config.poller.clone(),
            runtime,
            shutdown.child_token(),
        ));
        spawn_sweeper(cache.clone(), config.cache.sweep_interval(), shutdown.child_token());

        info!(?config, "Change notifier started");

        Ok(ChangeNotifier {
            inner: Arc::new(NotifierInner {
                storage: self.storage,
                executor,
                cache,
                registry,
                detector,
                poller,
                lifecycle: ReentrantMutex::new(()),
                shutdown,
                destroyed: AtomicBool::new(false),
            }),
        })
    }
}
