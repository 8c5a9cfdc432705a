use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::auth::ApiToken;

const DEFAULT_API_BASE_URL: &str = "https://api.groupme.com/v3";
const DEFAULT_IMAGE_BASE_URL: &str = "https://image.groupme.com";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No GroupMe token found. Set GROUPME_TOKEN (or add it to .env), or run `groupme auth save-token`.")]
    MissingToken,
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub image_base_url: String,
    pub timeout: Duration,
    pub data_dir: PathBuf,
    pub token_path: PathBuf,
    pub env_token: Option<ApiToken>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_base_url = base_url(
            "GROUPME_API_BASE_URL",
            var("GROUPME_API_BASE_URL").as_deref().unwrap_or(DEFAULT_API_BASE_URL),
        )?;
        let image_base_url = base_url(
            "GROUPME_IMAGE_BASE_URL",
            var("GROUPME_IMAGE_BASE_URL").as_deref().unwrap_or(DEFAULT_IMAGE_BASE_URL),
        )?;

        let timeout = match var("GROUPME_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    name: "GROUPME_TIMEOUT_SECS",
                    reason: format!("{raw:?} is not a whole number of seconds"),
                })?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        name: "GROUPME_TIMEOUT_SECS",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let data_dir = var("GROUPME_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(var("HOME")));
        let token_path = var("GROUPME_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("token.json"));
        let env_token = var("GROUPME_TOKEN").map(|token| ApiToken::new(token.trim()));

        Ok(Self {
            api_base_url,
            image_base_url,
            timeout,
            data_dir,
            token_path,
            env_token,
        })
    }
}

fn base_url(name: &'static str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed).map_err(|err| ConfigError::Invalid {
        name,
        reason: format!("{trimmed:?}: {err}"),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("unsupported scheme {:?}", parsed.scheme()),
        });
    }
    Ok(trimmed.to_string())
}

fn default_data_dir(home: Option<String>) -> PathBuf {
    let base = home.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    base.join(".local").join("share").join("groupme-cli")
}
