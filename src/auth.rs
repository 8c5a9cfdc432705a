use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// GroupMe access token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TokenFile {
    token: Option<String>,
    updated_at: Option<i64>,
}

pub struct AuthStore {
    path: PathBuf,
}

impl AuthStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The environment token wins over the token file.
    pub fn load_token(&self, env_token: Option<&ApiToken>) -> Result<Option<ApiToken>, ConfigError> {
        if let Some(token) = env_token {
            if !token.expose().trim().is_empty() {
                return Ok(Some(token.clone()));
            }
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };

        let file: TokenFile = serde_json::from_str(&contents)?;
        Ok(file
            .token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .map(ApiToken::new))
    }

    pub fn require_token(&self, env_token: Option<&ApiToken>) -> Result<ApiToken, ConfigError> {
        self.load_token(env_token)?.ok_or(ConfigError::MissingToken)
    }

    pub fn store_token(&self, token: &ApiToken) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            ensure_dir(parent).map_err(|err| self.io_error(err))?;
        }

        let file = TokenFile {
            token: Some(token.expose().to_string()),
            updated_at: Some(chrono::Utc::now().timestamp()),
        };
        let payload = serde_json::to_string_pretty(&file)?;
        write_private(&self.path, payload.as_bytes()).map_err(|err| self.io_error(err))?;
        Ok(())
    }

    pub fn clear_token(&self) -> Result<(), ConfigError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn io_error(&self, source: io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Creates missing directories as 0700. Directories that already exist keep
/// their permissions.
fn ensure_dir(path: &Path) -> Result<(), io::Error> {
    if path.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

/// Writes `contents` to a file that is 0600 from the moment it exists.
fn write_private(path: &Path, contents: &[u8]) -> Result<(), io::Error> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // The open mode only applies on creation; tighten a pre-existing file too.
    set_file_permissions(path, 0o600)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(unix)]
fn set_file_permissions(path: &Path, mode: u32) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path, _mode: u32) -> Result<(), io::Error> {
    Ok(())
}
