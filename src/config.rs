use crate::connection::ConnectOptions;
use crate::ldap_protocol::SearchScope;
use crate::tls;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Client profile: where to connect, how to authenticate, and search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub url: String,
    /// 2 or 3 (default 3).
    pub protocol_version: Option<i32>,
    /// Issue StartTLS before binding (ldap:// only).
    #[serde(default)]
    pub starttls: bool,
    /// Seconds allowed for TCP connect and TLS handshake.
    pub network_timeout: Option<u64>,
    #[serde(default)]
    pub bind: BindConfig,
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindConfig {
    /// Empty or absent means anonymous bind.
    pub binddn: Option<String>,
    pub credentials: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM bundle trusted in addition to the system roots.
    pub ca_file: Option<String>,
    /// Do not verify the server certificate (test deployments only).
    pub skip_verify: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub base: Option<String>,
    /// base, one_level or subtree.
    #[serde(default = "default_scope")]
    pub scope: SearchScope,
    pub size_limit: Option<i32>,
    pub time_limit: Option<i32>,
}

fn default_scope() -> SearchScope {
    SearchScope::Subtree
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base: None,
            scope: default_scope(),
            size_limit: None,
            time_limit: None,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("Read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content).with_context(|| format!("Parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Transport settings for `Connection::initialize_with`; loads the CA file if one is set.
    pub fn connect_options(&self) -> Result<ConnectOptions> {
        let mut options = ConnectOptions {
            network_timeout: self.network_timeout.map(Duration::from_secs),
            ..ConnectOptions::default()
        };
        if let Some(tls_config) = &self.tls {
            options.tls_skip_verify = tls_config.skip_verify.unwrap_or(false);
            if let Some(ca_file) = &tls_config.ca_file {
                options.tls_ca_pem = Some(tls::load_ca_file(Path::new(ca_file))?);
            }
        }
        Ok(options)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "ldap://localhost:389/".to_string(),
            protocol_version: Some(3),
            starttls: false,
            network_timeout: Some(5),
            bind: BindConfig::default(),
            tls: None,
            search: SearchConfig::default(),
        }
    }
}
