use crate::locator::{Locator, ResolveCache};
use crate::service::Service;
use crate::storage::Storage;
use crate::transport::ClientTransport;
use captains_log::filter::LogFilter;
use cocaine_core::ClientConfig;
use std::sync::Arc;

/// Entry point of a client process.
///
/// Owns the config, the logger shared by every connection, the locator and the optional
/// resolve cache. Create it once at startup and call [ServiceFactory::shutdown] on exit.
pub struct ServiceFactory<P: ClientTransport> {
    pub logger: Arc<LogFilter>,
    config: ClientConfig,
    locator: Arc<Locator<P>>,
    cache: Option<Arc<ResolveCache>>,
}

impl<P: ClientTransport> ServiceFactory<P> {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let logger = Arc::new(LogFilter::new());
        let cache = config
            .resolve_cache_ttl
            .map(|ttl| Arc::new(ResolveCache::new(ttl, config.resolve_cache_size)));
        let locator = Arc::new(Locator::new(config.clone(), cache.clone(), logger.clone()));
        Arc::new(Self { logger, config, locator, cache })
    }

    #[inline]
    pub fn set_log_level(&self, level: log::Level) {
        self.logger.set_level(level);
    }

    #[inline]
    pub fn get_config(&self) -> &ClientConfig {
        &self.config
    }

    #[inline]
    pub fn locator(&self) -> &Arc<Locator<P>> {
        &self.locator
    }

    #[inline]
    pub fn cache(&self) -> Option<&Arc<ResolveCache>> {
        self.cache.as_ref()
    }

    /// `version` 0 accepts whatever the locator returns
    pub fn create_service(&self, name: &str, version: u64) -> Service<P> {
        Service::new(
            name,
            version,
            None,
            self.locator.clone(),
            self.config.clone(),
            self.logger.clone(),
        )
    }

    /// Resolve through routing groups with a pinned seed
    pub fn create_service_seeded(&self, name: &str, version: u64, seed: &str) -> Service<P> {
        Service::new(
            name,
            version,
            Some(seed.to_string()),
            self.locator.clone(),
            self.config.clone(),
            self.logger.clone(),
        )
    }

    pub fn create_storage(&self) -> Storage<P> {
        Storage::new(self.create_service("storage", 0))
    }

    /// Drops the locator connection, services own theirs
    pub fn shutdown(&self) {
        self.locator.disconnect();
    }
}
