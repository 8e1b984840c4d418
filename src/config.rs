use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat, Map, Value};
use directories::BaseDirs;

use crate::error::SyncError;

pub const DEFAULT_PROFILE: &str = "kids-first-drc";
pub const DEFAULT_API_ENDPOINT: &str = "https://cavatica-api.sbgenomics.com/v2";

pub const ENV_PREFIX: &str = "SB";
pub const ENV_AUTH_TOKEN: &str = "SB_AUTH_TOKEN";
pub const ENV_API_ENDPOINT: &str = "SB_API_ENDPOINT";

const AUTH_TOKEN_KEY: &str = "auth_token";
const ENDPOINT_KEYS: [&str; 2] = ["api_endpoint", "api_url"];

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_endpoint: String,
    pub auth_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_endpoint", &self.api_endpoint)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// Reads Seven Bridges style credentials from the named profile of
/// `~/.sevenbridges/credentials`. `SB_AUTH_TOKEN` and `SB_API_ENDPOINT` are
/// layered on top and win over the profile; with a token in the environment
/// the file is optional.
pub struct CredentialsLoader;

impl CredentialsLoader {
    pub fn resolve(profile: &str, path: Option<&Path>) -> Result<Credentials, SyncError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        let read_err = |message: String| SyncError::CredentialsRead {
            path: path.clone(),
            message,
        };

        let values = Config::builder()
            .add_source(
                File::from(path.as_path())
                    .format(FileFormat::Ini)
                    .required(false),
            )
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
            .and_then(|settings| settings.try_deserialize::<Map<String, Value>>())
            .map_err(|err| read_err(err.to_string()))?;

        let overrides = Overrides::from_values(&values);
        if let Some(auth_token) = overrides.auth_token.clone() {
            tracing::debug!("using credentials from {ENV_AUTH_TOKEN}");
            return Ok(Credentials {
                api_endpoint: overrides
                    .api_endpoint
                    .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
                auth_token,
            });
        }
        if !path.is_file() {
            return Err(read_err("file not found".to_string()));
        }

        let mut credentials = Self::profile(&values, profile).map_err(|err| match err {
            ProfileError::Missing => SyncError::MissingProfile {
                profile: profile.to_string(),
                path: path.clone(),
            },
            ProfileError::NoToken => SyncError::MissingAuthToken(profile.to_string()),
            ProfileError::Malformed(message) => read_err(message),
        })?;
        if let Some(api_endpoint) = overrides.api_endpoint {
            tracing::debug!("api endpoint overridden by {ENV_API_ENDPOINT}");
            credentials.api_endpoint = api_endpoint;
        }
        Ok(credentials)
    }

    pub fn default_path() -> Result<PathBuf, SyncError> {
        BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".sevenbridges").join("credentials"))
            .ok_or_else(|| SyncError::Filesystem("unable to resolve home directory".to_string()))
    }

    /// Parses credentials file content and returns the named profile.
    pub fn parse_profile(content: &str, profile: &str) -> Result<Credentials, ProfileError> {
        let values = Config::builder()
            .add_source(File::from_str(content, FileFormat::Ini))
            .build()
            .and_then(|settings| settings.try_deserialize::<Map<String, Value>>())
            .map_err(|err| ProfileError::Malformed(err.to_string()))?;
        Self::profile(&values, profile)
    }

    fn profile(values: &Map<String, Value>, profile: &str) -> Result<Credentials, ProfileError> {
        let section = lookup(values, profile)
            .ok_or(ProfileError::Missing)?
            .clone()
            .into_table()
            .map_err(|_| ProfileError::Missing)?;

        let auth_token = string_at(&section, AUTH_TOKEN_KEY).ok_or(ProfileError::NoToken)?;
        let api_endpoint = ENDPOINT_KEYS
            .iter()
            .find_map(|key| string_at(&section, key))
            .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string());
        Ok(Credentials {
            api_endpoint,
            auth_token,
        })
    }
}

/// Values set outside any profile section, in practice the `SB_` environment.
struct Overrides {
    auth_token: Option<String>,
    api_endpoint: Option<String>,
}

impl Overrides {
    fn from_values(values: &Map<String, Value>) -> Self {
        Self {
            auth_token: string_at(values, AUTH_TOKEN_KEY),
            api_endpoint: string_at(values, ENDPOINT_KEYS[0]),
        }
    }
}

/// Keys compare without regard to case, exact spelling first.
fn lookup<'a>(values: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    values.get(key).or_else(|| {
        values
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    })
}

fn string_at(values: &Map<String, Value>, key: &str) -> Option<String> {
    lookup(values, key)
        .and_then(|value| value.clone().into_string().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    Missing,
    NoToken,
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[default]
api_endpoint = https://api.sbgenomics.com/v2
auth_token = aaaa

# delivery account
[kids-first-drc]
api_endpoint = https://cavatica-api.sbgenomics.com/v2
auth_token = bbbb
";

    #[test]
    fn picks_named_profile() {
        let creds = CredentialsLoader::parse_profile(SAMPLE, "kids-first-drc").unwrap();
        assert_eq!(creds.auth_token, "bbbb");
        assert_eq!(creds.api_endpoint, "https://cavatica-api.sbgenomics.com/v2");
    }

    #[test]
    fn missing_profile_is_reported() {
        let err = CredentialsLoader::parse_profile(SAMPLE, "nope").unwrap_err();
        assert_eq!(err, ProfileError::Missing);
    }

    #[test]
    fn endpoint_defaults_to_cavatica() {
        let creds = CredentialsLoader::parse_profile("[p]\nauth_token=t\n", "p").unwrap();
        assert_eq!(creds.api_endpoint, DEFAULT_API_ENDPOINT);
    }

    #[test]
    fn api_url_is_accepted_for_endpoint() {
        let creds =
            CredentialsLoader::parse_profile("[p]\napi_url = https://x/v2\nauth_token = t\n", "p")
                .unwrap();
        assert_eq!(creds.api_endpoint, "https://x/v2");
    }

    #[test]
    fn token_is_redacted_in_debug() {
        let creds = CredentialsLoader::parse_profile(SAMPLE, "default").unwrap();
        assert!(!format!("{creds:?}").contains("aaaa"));
    }
}
