use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const LOCATOR_DEFAULT_HOST: &'static str = "127.0.0.1";
pub const LOCATOR_DEFAULT_PORT: u16 = 10053;

/// A `(host, port)` pair a service or the locator listens on
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    #[inline]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(LOCATOR_DEFAULT_HOST, LOCATOR_DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Accepts `host:port` and `[v6addr]:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some((host, port)) = s.rsplit_once(':') else {
            return Err(format!("endpoint `{}` has no port", s));
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("endpoint `{}` has no host", s));
        }
        match port.parse::<u16>() {
            Ok(port) => Ok(Self::new(host, port)),
            Err(e) => Err(format!("endpoint `{}` has invalid port: {}", s, e)),
        }
    }
}

/// Parse a locator list as handed to processes by the runtime.
///
/// protocol 0: a single `host:port`
///
/// protocol 1: comma separated `host:port` list
pub fn parse_locators(input: &str, protocol: u32) -> Result<Vec<Endpoint>, String> {
    match protocol {
        0 => Ok(vec![Endpoint::from_str(input)?]),
        1 => input.split(',').filter(|s| !s.trim().is_empty()).map(Endpoint::from_str).collect(),
        _ => Err(format!("locator protocol {} not supported", protocol)),
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Candidate endpoints of the locator, tried in order
    pub locators: Vec<Endpoint>,
    pub timeout: TimeoutSetting,
    /// How many encoded frames may wait in the write queue of one connection,
    /// writers are suspended beyond it.
    pub thresholds: usize,
    /// Read buffer size of the socket
    pub stream_buf_size: usize,
    /// Keep resolve results for this long, None to disable the cache
    pub resolve_cache_ttl: Option<Duration>,
    /// Max number of cached resolve results
    pub resolve_cache_size: usize,
    /// How many times resolve() is retried when the locator drops during a resolve
    pub resolve_retries: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            locators: vec![Endpoint::default()],
            timeout: TimeoutSetting::default(),
            thresholds: 128,
            stream_buf_size: 8 * 1024,
            resolve_cache_ttl: None,
            resolve_cache_size: 128,
            resolve_retries: 0,
        }
    }
}

/// All the durations are unbounded when set to zero
#[derive(Clone, Copy, Debug)]
pub struct TimeoutSetting {
    /// TCP connect timeout of one endpoint
    pub connect_timeout: Duration,
    /// Socket write timeout
    pub write_timeout: Duration,
    /// How long to wait for the locator answer
    pub resolve_timeout: Duration,
}

impl Default for TimeoutSetting {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            resolve_timeout: Duration::from_secs(0),
        }
    }
}
