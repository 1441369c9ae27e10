use crate::channel::Channel;
use crate::connection::Connection;
use crate::transport::ClientTransport;
use captains_log::filter::LogFilter;
use cocaine_core::api::{ResolveInfo, ServiceApi, locator_api};
use cocaine_core::{ClientConfig, CocaineError, Endpoint};
use parking_lot::Mutex;
use rmpv::Value;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const LOCATOR_NAME: &'static str = "locator";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    name: String,
    seed: Option<String>,
    locators: Vec<Endpoint>,
}

/// Time and size bounded cache of resolve results.
///
/// Shared by every service created from the same factory, guarded by a mutex since resolution
/// may run on any worker thread.
pub struct ResolveCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<FxHashMap<CacheKey, (Instant, ResolveInfo)>>,
}

impl ResolveCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { ttl, capacity: capacity.max(1), entries: Mutex::new(FxHashMap::default()) }
    }

    fn get(&self, key: &CacheKey) -> Option<ResolveInfo> {
        let mut entries = self.entries.lock();
        let fresh = match entries.get(key) {
            Some((at, info)) if at.elapsed() < self.ttl => Some(info.clone()),
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            entries.remove(key);
        }
        fresh
    }

    fn put(&self, key: CacheKey, info: ResolveInfo) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            // evict the oldest entry
            let oldest = entries.iter().min_by_key(|(_, (at, _))| *at).map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (Instant::now(), info));
    }

    pub fn invalidate(&self, name: &str) {
        self.entries.lock().retain(|k, _| k.name != name);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Client of the locator, the directory service of the cloud.
///
/// The locator protocol is static, its connection is established on demand and re-established
/// transparently after it dropped.
pub struct Locator<P: ClientTransport> {
    conn: Connection<P>,
    api: ServiceApi,
    endpoints: Vec<Endpoint>,
    config: ClientConfig,
    cache: Option<Arc<ResolveCache>>,
    logger: Arc<LogFilter>,
}

impl<P: ClientTransport> fmt::Debug for Locator<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.conn, f)
    }
}

impl<P: ClientTransport> Locator<P> {
    pub fn new(
        config: ClientConfig, cache: Option<Arc<ResolveCache>>, logger: Arc<LogFilter>,
    ) -> Self {
        Self {
            conn: Connection::new(LOCATOR_NAME, config.clone(), logger.clone()),
            api: locator_api(),
            endpoints: config.locators.clone(),
            config,
            cache,
            logger,
        }
    }

    #[inline]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub async fn connect(&self) -> Result<(), CocaineError> {
        if self.conn.is_connected() {
            return Ok(());
        }
        self.conn.connect(&self.endpoints).await
    }

    /// Open a session for any method of the locator API
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Channel, CocaineError> {
        let Some(m) = self.api.find(method) else {
            return Err(CocaineError::NoSuchMethod(method.to_string()));
        };
        self.connect().await?;
        self.conn.invoke(m.id, args, Vec::new(), m.tx.clone(), m.rx.clone()).await
    }

    #[inline]
    pub async fn resolve(&self, name: &str) -> Result<ResolveInfo, CocaineError> {
        self.resolve_with(name, None).await
    }

    /// Resolve a service name, `seed` pins the version inside routing groups.
    ///
    /// When the locator drops in the middle of a resolve, it is retried up to
    /// `config.resolve_retries` times.
    #[inline]
    pub async fn resolve_with(
        &self, name: &str, seed: Option<&str>,
    ) -> Result<ResolveInfo, CocaineError> {
        self.resolve_inner(name, seed, true).await
    }

    /// Ask the locator even when the cache holds an entry, the cache is refreshed
    #[inline]
    pub async fn resolve_fresh(
        &self, name: &str, seed: Option<&str>,
    ) -> Result<ResolveInfo, CocaineError> {
        self.resolve_inner(name, seed, false).await
    }

    async fn resolve_inner(
        &self, name: &str, seed: Option<&str>, use_cache: bool,
    ) -> Result<ResolveInfo, CocaineError> {
        let key = CacheKey {
            name: name.to_string(),
            seed: seed.map(|s| s.to_string()),
            locators: self.endpoints.clone(),
        };
        if let Some(cache) = self.cache.as_ref().filter(|_| use_cache) {
            if let Some(info) = cache.get(&key) {
                logger_trace!(self.logger, "{:?} resolve {} from cache", self, name);
                return Ok(info);
            }
        }
        let mut attempt = 0;
        loop {
            match self.try_resolve(name, seed).await {
                Ok(info) => {
                    logger_debug!(
                        self.logger,
                        "{:?} resolved {}: version {}, endpoints {:?}, api {}",
                        self,
                        name,
                        info.version,
                        info.endpoints,
                        info.api
                    );
                    if let Some(cache) = self.cache.as_ref() {
                        cache.put(key, info.clone());
                    }
                    return Ok(info);
                }
                Err(e) if e.is_disconnect() && attempt < self.config.resolve_retries => {
                    attempt += 1;
                    logger_warn!(
                        self.logger,
                        "{:?} resolve {} interrupted: {}, retry {}",
                        self,
                        name,
                        e,
                        attempt
                    );
                }
                Err(e) => {
                    logger_warn!(self.logger, "{:?} resolve {} failed: {}", self, name, e);
                    return Err(resolve_error(name, e));
                }
            }
        }
    }

    async fn try_resolve(
        &self, name: &str, seed: Option<&str>,
    ) -> Result<ResolveInfo, CocaineError> {
        let mut args = vec![Value::from(name)];
        if let Some(seed) = seed {
            args.push(Value::from(seed));
        }
        let mut ch = self.call("resolve", args).await?;
        let v = ch.rx.get_timeout(self.config.timeout.resolve_timeout).await?;
        ResolveInfo::from_value(&v)
    }

    /// Ask the locator to refresh the given routing groups
    pub async fn refresh(&self, groups: &[&str]) -> Result<(), CocaineError> {
        let groups = groups.iter().map(|g| Value::from(*g)).collect();
        let mut ch = self.call("refresh", vec![Value::Array(groups)]).await?;
        ch.rx.get_timeout(self.config.timeout.resolve_timeout).await?;
        Ok(())
    }

    /// The nodes of the cluster as seen by the locator
    pub async fn cluster(&self) -> Result<Value, CocaineError> {
        let mut ch = self.call("cluster", Vec::new()).await?;
        ch.rx.get_timeout(self.config.timeout.resolve_timeout).await
    }

    /// Subscribe to the routing table updates, one chunk per update
    pub async fn routing(&self, uuid: &str) -> Result<Channel, CocaineError> {
        self.call("routing", vec![Value::from(uuid)]).await
    }

    pub fn invalidate(&self, name: &str) {
        if let Some(cache) = self.cache.as_ref() {
            cache.invalidate(name);
        }
    }

    pub fn disconnect(&self) {
        self.conn.disconnect();
    }
}

fn resolve_error(name: &str, e: CocaineError) -> CocaineError {
    let reason = match e {
        CocaineError::Timeout(_) | CocaineError::Resolve { .. } => return e,
        CocaineError::Service(e) => e.reason,
        CocaineError::Choke => "empty answer".to_string(),
        e => e.to_string(),
    };
    CocaineError::Resolve { name: name.to_string(), reason }
}
