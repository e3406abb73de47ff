//! Service configuration
//!
//! Read from `<dir>/consometer.yaml`, with `CONSOMETER__SECTION__KEY` environment
//! variables taking precedence over the file.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use consometer_common::{
    GraphiteSettings, OpenstackCredentials, RabbitSettings, RetrySettings, RunConfig,
    DEFAULT_CHUNK_SIZE,
};

use crate::telemetry;

/// Directory searched when `--config` is not given
pub const DEFAULT_CONFIG_DIR: &str = "/etc/swift-consometer/";

/// File name looked up inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "consometer.yaml";

/// Prefix of overriding environment variables
pub const ENV_PREFIX: &str = "CONSOMETER";

/// Keys that must be present; `region` is checked separately since `regions` may replace it
const MANDATORY_KEYS: &[&str] = &[
    "credentials.openstack.keystone_uri",
    "credentials.openstack.swift_conso_user",
    "credentials.openstack.swift_conso_password",
    "credentials.openstack.swift_conso_tenant",
    "credentials.openstack.swift_conso_domain",
    "credentials.rabbit.host",
    "credentials.rabbit.user",
    "credentials.rabbit.password",
    "credentials.rabbit.exchange",
    "credentials.rabbit.routing_key",
    "credentials.rabbit.vhost",
    "credentials.rabbit.queue",
    "timeout",
    "workers",
    "log_level",
];

/// Loaded and validated configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub run: RunConfig,
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    credentials: Credentials,
    timeout: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    regions: Vec<String>,
    workers: usize,
    log_level: String,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default)]
    graphite: GraphiteSection,
    #[serde(default)]
    retry: RetrySection,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    openstack: OpenstackSection,
    rabbit: RabbitSection,
}

#[derive(Debug, Deserialize)]
struct OpenstackSection {
    keystone_uri: String,
    swift_conso_user: String,
    swift_conso_password: String,
    swift_conso_tenant: String,
    swift_conso_domain: String,
}

#[derive(Debug, Deserialize)]
struct RabbitSection {
    host: String,
    user: String,
    password: String,
    vhost: String,
    exchange: String,
    routing_key: String,
    queue: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GraphiteSection {
    hostname: String,
    port: u16,
    prefix: String,
}

impl Default for GraphiteSection {
    fn default() -> Self {
        let defaults = GraphiteSettings::default();
        Self {
            hostname: defaults.hostname,
            port: defaults.port,
            prefix: defaults.prefix,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RetrySection {
    attempts: u32,
    backoff: String,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: RetrySettings::default().attempts,
            backoff: "200ms".to_string(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl ServiceConfig {
    /// Load `<dir>/consometer.yaml` overlaid with the process environment
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_with_env(dir, environment())
    }

    fn load_with_env(dir: &Path, env: Environment) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        let settings = Config::builder()
            .add_source(File::from(path.as_path()).format(FileFormat::Yaml).required(true))
            .add_source(env)
            .build()
            .with_context(|| format!("Read config failed: {}", path.display()))?;

        check_mandatory_keys(&settings).context("Check config file failed")?;

        let file: FileConfig = settings
            .try_deserialize()
            .context("Malformed configuration")?;
        file.validate()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
}

fn check_mandatory_keys(settings: &Config) -> Result<()> {
    for key in MANDATORY_KEYS {
        if settings.get::<config::Value>(key).is_err() {
            bail!("Incomplete configuration. Missing key {}", key);
        }
    }
    let has_region = settings.get::<config::Value>("region").is_ok()
        || settings.get::<config::Value>("regions").is_ok();
    if !has_region {
        bail!("Incomplete configuration. Missing key region");
    }
    Ok(())
}

impl FileConfig {
    fn validate(self) -> Result<ServiceConfig> {
        let timeout = parse_duration("timeout", &self.timeout)?;
        let backoff = parse_duration("retry.backoff", &self.retry.backoff)?;

        if timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.retry.attempts == 0 {
            bail!("retry.attempts must be at least 1");
        }
        if telemetry::level_directive(&self.log_level).is_none() {
            bail!("Bad log level: {}", self.log_level);
        }

        let regions = if self.regions.is_empty() {
            self.region.into_iter().filter(|r| !r.is_empty()).collect()
        } else {
            self.regions
        };
        if regions.is_empty() {
            bail!("at least one region must be configured");
        }

        let openstack = self.credentials.openstack;
        let rabbit = self.credentials.rabbit;
        let run = RunConfig {
            timeout,
            workers: self.workers,
            chunk_size: self.chunk_size,
            regions,
            retry: RetrySettings {
                attempts: self.retry.attempts,
                backoff,
            },
            openstack: OpenstackCredentials {
                keystone_uri: openstack.keystone_uri,
                user: openstack.swift_conso_user,
                password: openstack.swift_conso_password,
                tenant: openstack.swift_conso_tenant,
                domain: openstack.swift_conso_domain,
            },
            rabbit: RabbitSettings {
                host: rabbit.host,
                user: rabbit.user,
                password: rabbit.password,
                vhost: rabbit.vhost,
                exchange: rabbit.exchange,
                routing_key: rabbit.routing_key,
                queue: rabbit.queue,
            },
            graphite: GraphiteSettings {
                hostname: self.graphite.hostname,
                port: self.graphite.port,
                prefix: self.graphite.prefix,
            },
        };

        Ok(ServiceConfig {
            run,
            log_level: self.log_level,
        })
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).with_context(|| format!("Bad duration for {}: {}", key, value))
}
