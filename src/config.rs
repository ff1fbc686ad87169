//! Gate configuration.
//!
//! Loaded from a JSON file; string values may reference environment
//! variables as `${NAME}`.

use std::{env, fs, path::Path, path::PathBuf};

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::DEFAULT_CACHE_TTL_SECONDS;
use crate::cache::CacheKeyTemplate;
use crate::middleware::CredentialSource;
use crate::store::{DatabaseConfig, UserFieldMap};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub users: UserFieldMap,
    pub verifier: VerifierConfig,
    pub http: CredentialSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis URL, or "memory" for an in-process cache
    pub url: String,
    pub store_key: CacheKeyTemplate,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            store_key: CacheKeyTemplate::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Firebase project; implies issuer, audience and Google's JWKS endpoint
    pub project_id: Option<String>,
    pub jwks_url: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// HS256 shared secret, for deployments without a JWKS endpoint
    pub shared_secret: Option<String>,
    pub jwks_cache_seconds: u64,
    pub allow_stale_jwks: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            jwks_url: None,
            issuer: None,
            audience: None,
            shared_secret: None,
            jwks_cache_seconds: DEFAULT_CACHE_TTL_SECONDS,
            allow_stale_jwks: true,
        }
    }
}

/// How tokens get verified, as selected by the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierMode {
    Firebase { project_id: String, jwks_url: String },
    Jwks { jwks_url: String },
    SharedSecret { secret: String },
}

impl VerifierConfig {
    pub fn mode(&self) -> Result<VerifierMode> {
        if let Some(project_id) = &self.project_id {
            let jwks_url = self
                .jwks_url
                .clone()
                .unwrap_or_else(|| crate::auth::FIREBASE_JWKS_URL.to_string());
            return Ok(VerifierMode::Firebase {
                project_id: project_id.clone(),
                jwks_url,
            });
        }

        if let Some(jwks_url) = &self.jwks_url {
            url::Url::parse(jwks_url).map_err(|e| anyhow!("Invalid jwks_url: {}", e))?;
            if self.issuer.is_none() {
                bail!("verifier.issuer is required with verifier.jwks_url");
            }
            return Ok(VerifierMode::Jwks {
                jwks_url: jwks_url.clone(),
            });
        }

        if let Some(secret) = &self.shared_secret {
            return Ok(VerifierMode::SharedSecret {
                secret: secret.clone(),
            });
        }

        Err(anyhow!(
            "No verifier configured: set verifier.project_id, verifier.jwks_url or verifier.shared_secret"
        ))
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        self.users.validate()?;
        self.verifier.mode()?;
        Ok(())
    }
}

pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(p) = env::var("IDENTITY_GATE_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("identity-gate").join("config.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from("identity-gate.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "Could not find identity-gate.json (set IDENTITY_GATE_CONFIG or create ./identity-gate.json)"
    ))
}

pub fn load_config(path: &Path) -> Result<GateConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
    parse_config(&raw, |name| env::var(name).ok())
}

fn parse_config(raw: &str, lookup: impl Fn(&str) -> Option<String> + Copy) -> Result<GateConfig> {
    let mut value: Value = serde_json::from_str(raw)?;
    expand_value(&mut value, lookup);

    let config: GateConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}

fn expand_value(value: &mut Value, lookup: impl Fn(&str) -> Option<String> + Copy) {
    match value {
        Value::String(s) => *s = expand_env_vars(s, lookup),
        Value::Array(items) => items.iter_mut().for_each(|v| expand_value(v, lookup)),
        Value::Object(map) => map.values_mut().for_each(|v| expand_value(v, lookup)),
        _ => {}
    }
}

/// Replace `${NAME}` with the variable's value; unknown names are left as written.
fn expand_env_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            match lookup(&name) {
                Some(val) => out.push_str(&val),
                None => {
                    out.push_str("${");
                    out.push_str(&name);
                    out.push('}');
                }
            }
        } else {
            out.push(ch);
        }
    }

    out
}
