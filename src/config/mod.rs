use crate::s3::error::S3Error;
use anyhow::{Context, Result};
use hyper::Uri;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Connection profile: one endpoint plus the credentials to use with it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Endpoint URL, e.g. `https://s3.amazonaws.com` or `http://127.0.0.1:9000`
    pub endpoint: String,

    /// AWS access key ID. Leave both keys out for anonymous access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// AWS secret access key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// STS session token for temporary credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// AWS region (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

impl Profile {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: None,
            secret_key: None,
            session_token: None,
            region: default_region(),
            insecure: false,
            request_timeout: default_request_timeout(),
        }
    }

    pub fn with_keys(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// No key pair configured
    pub fn is_anonymous(&self) -> bool {
        self.access_key.is_none() && self.secret_key.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// Validated `scheme://host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
}

impl Endpoint {
    /// Parse and validate an endpoint URL.
    ///
    /// Only `http` and `https` are accepted, the host must be non-empty and
    /// the URL must not carry a path (other than `/`), query or credentials.
    pub fn parse(url: &str) -> std::result::Result<Self, S3Error> {
        let invalid = |reason: &str| {
            S3Error::InvalidArgument(format!("invalid endpoint {:?}: {}", url, reason))
        };

        let uri: Uri = url.trim().parse().map_err(|_| invalid("not a URL"))?;

        let scheme = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("https") => Scheme::Https,
            Some(s) if s.eq_ignore_ascii_case("http") => Scheme::Http,
            Some(_) => return Err(invalid("scheme must be http or https")),
            None => return Err(invalid("missing scheme")),
        };

        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        if authority.as_str().contains('@') {
            return Err(invalid("credentials in the URL are not supported"));
        }
        let host = authority.host();
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        if uri.query().is_some() {
            return Err(invalid("query strings are not allowed"));
        }
        if !matches!(uri.path(), "" | "/") {
            return Err(invalid("paths are not allowed"));
        }

        Ok(Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port: authority.port_u16(),
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// `scheme://host[:port]` without a trailing slash
    pub fn base_url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        write!(f, "{}://{}", scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named profiles
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    /// Profile used when none is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
}

impl Config {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a profile by name, or the default profile if not specified
    pub fn get_profile(&self, name: Option<&str>) -> Option<&Profile> {
        if let Some(name) = name {
            self.profiles.get(name)
        } else if let Some(default) = &self.default_profile {
            self.profiles.get(default)
        } else {
            self.profiles.values().next()
        }
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config = serde_yaml::from_str(&content)
        .context("Failed to parse YAML configuration")?;

    for (name, profile) in &config.profiles {
        validate_profile(profile).with_context(|| format!("Invalid profile '{}'", name))?;
    }

    Ok(config)
}

fn validate_profile(profile: &Profile) -> Result<()> {
    Endpoint::parse(&profile.endpoint)?;
    if profile.access_key.is_some() != profile.secret_key.is_some() {
        anyhow::bail!("access_key and secret_key must be set together");
    }
    if profile.request_timeout == 0 {
        anyhow::bail!("request_timeout must be at least 1 second");
    }
    Ok(())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Load configuration from environment variables
///
/// Supports both AWS standard variables and the short S3_ forms:
/// - S3_ENDPOINT (required)
/// - AWS_ACCESS_KEY_ID / S3_KEY
/// - AWS_SECRET_ACCESS_KEY / S3_SECRET
/// - AWS_SESSION_TOKEN (optional)
/// - AWS_REGION (optional, defaults to us-east-1)
/// - S3_INSECURE (optional, `true` or `1`)
///
/// Without a key pair the profile is anonymous.
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let endpoint = std::env::var("S3_ENDPOINT")
        .context("S3_ENDPOINT environment variable not set")?;

    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("S3_KEY"))
        .ok();
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("S3_SECRET"))
        .ok();

    let region = std::env::var("AWS_REGION").unwrap_or_else(|_| default_region());

    let profile = Profile {
        endpoint: endpoint.trim().to_string(),
        access_key,
        secret_key,
        session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        region,
        insecure: env_flag("S3_INSECURE"),
        request_timeout: default_request_timeout(),
    };
    validate_profile(&profile).context("Invalid environment configuration")?;

    let mut config = Config::new();
    config.profiles.insert("default".to_string(), profile);
    config.default_profile = Some("default".to_string());

    Ok(config)
}

/// Load configuration from file or environment
///
/// Tries the YAML file first when a path is given, otherwise reads the
/// environment.
///
/// # Arguments
/// * `config_path` - Optional path to YAML config file
/// * `profile_name` - Optional profile name to use (only relevant for YAML configs)
pub fn load_config(config_path: Option<&str>, profile_name: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        let mut config = load_from_yaml(path)?;

        // If a specific profile is requested, make it the default
        if let Some(name) = profile_name {
            if !config.profiles.contains_key(name) {
                anyhow::bail!("Profile '{}' not found in config file", name);
            }
            config.default_profile = Some(name.to_string());
        }

        Ok(config)
    } else {
        load_from_env()
    }
}
