//! SSO configuration resolution.
//!
//! Values come from an ordered list of named sources, tried in sequence,
//! first non-empty wins: the workspace secrets file, then the process
//! environment. Absence of the URL/realm/client-id triple means SSO is
//! disabled and the authentication gate admits all traffic.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Default scope requested from the provider.
pub const DEFAULT_SCOPE: &str = "openid profile email";

/// Default location of the workspace secrets file.
pub const DEFAULT_SECRETS_FILE: &str = ".ploinky/.secrets";

/// Environment variable overriding the secrets-file location.
pub const SECRETS_FILE_ENV: &str = "PLOINKY_SECRETS_FILE";

/// Immutable snapshot of the provider settings.
///
/// Loaded lazily by the auth service and cached until `reload_config`.
#[derive(Debug, Clone)]
pub struct SsoConfig {
    /// Provider base URL (`KEYCLOAK_URL`), trailing slash trimmed.
    pub base_url: String,
    /// Realm name (`KEYCLOAK_REALM`).
    pub realm: String,
    /// OAuth client id (`KEYCLOAK_CLIENT_ID`).
    pub client_id: String,
    /// Optional confidential-client secret (`KEYCLOAK_CLIENT_SECRET`).
    pub client_secret: Option<String>,
    /// Fixed redirect URI (`KEYCLOAK_REDIRECT_URI`); when unset it is
    /// derived from the incoming request as `{base}/auth/callback`.
    pub redirect_uri: Option<String>,
    /// Fixed post-logout redirect (`KEYCLOAK_LOGOUT_REDIRECT_URI`).
    pub post_logout_redirect_uri: Option<String>,
    /// Requested scope (`KEYCLOAK_SCOPE`, default `openid profile email`).
    pub scope: String,
}

/// A named configuration value source.
pub trait ValueSource: Send + Sync {
    /// Source name, for logging.
    fn name(&self) -> &'static str;

    /// Look up a key. `None` and empty strings both mean "not here".
    fn get(&self, key: &str) -> Option<String>;
}

/// `KEY=value` secrets file, dotenv-style.
///
/// Re-read on every lookup so `reload_config` observes edits without a
/// restart; the file is a handful of lines.
pub struct SecretsFile {
    path: PathBuf,
}

impl SecretsFile {
    /// Use an explicit path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the standard location: `$PLOINKY_SECRETS_FILE` if set,
    /// else `.ploinky/.secrets` relative to the working directory.
    #[must_use]
    pub fn standard() -> Self {
        let path = std::env::var(SECRETS_FILE_ENV)
            .map_or_else(|_| PathBuf::from(DEFAULT_SECRETS_FILE), PathBuf::from);
        Self { path }
    }

    fn parse(path: &Path) -> HashMap<String, String> {
        let Ok(contents) = fs::read_to_string(path) else {
            return HashMap::new();
        };
        let mut values = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            values.insert(key.trim().to_string(), value.to_string());
        }
        values
    }
}

impl ValueSource for SecretsFile {
    fn name(&self) -> &'static str {
        "secrets-file"
    }

    fn get(&self, key: &str) -> Option<String> {
        Self::parse(&self.path).remove(key)
    }
}

/// Process environment source.
pub struct ProcessEnv;

impl ValueSource for ProcessEnv {
    fn name(&self) -> &'static str {
        "env"
    }

    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Ordered list of value sources behind the typed [`SsoConfig`].
pub struct ConfigLoader {
    sources: Vec<Box<dyn ValueSource>>,
}

impl ConfigLoader {
    /// Standard layering: secrets file, then process environment.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            sources: vec![Box::new(SecretsFile::standard()), Box::new(ProcessEnv)],
        }
    }

    /// Custom layering, mostly for tests.
    #[must_use]
    pub fn with_sources(sources: Vec<Box<dyn ValueSource>>) -> Self {
        Self { sources }
    }

    /// First non-empty value across the sources, in order.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<String> {
        for source in &self.sources {
            if let Some(value) = source.get(key) {
                if !value.trim().is_empty() {
                    debug!(key, source = source.name(), "resolved config value");
                    return Some(value.trim().to_string());
                }
            }
        }
        None
    }

    /// Read a fresh configuration snapshot.
    ///
    /// Returns `None` when any of URL, realm or client id is missing —
    /// SSO is then disabled and the gate admits everything.
    #[must_use]
    pub fn load(&self) -> Option<SsoConfig> {
        let base_url = self.lookup("KEYCLOAK_URL")?;
        let realm = self.lookup("KEYCLOAK_REALM")?;
        let client_id = self.lookup("KEYCLOAK_CLIENT_ID")?;

        Some(SsoConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            realm,
            client_id,
            client_secret: self.lookup("KEYCLOAK_CLIENT_SECRET"),
            redirect_uri: self.lookup("KEYCLOAK_REDIRECT_URI"),
            post_logout_redirect_uri: self.lookup("KEYCLOAK_LOGOUT_REDIRECT_URI"),
            scope: self
                .lookup("KEYCLOAK_SCOPE")
                .unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    /// Fixed-map source for layering tests.
    struct MapSource(HashMap<String, String>);

    impl ValueSource for MapSource {
        fn name(&self) -> &'static str {
            "map"
        }
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    fn map_source(pairs: &[(&str, &str)]) -> Box<dyn ValueSource> {
        Box::new(MapSource(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        ))
    }

    #[test]
    fn missing_core_values_disable_sso() {
        let loader = ConfigLoader::with_sources(vec![map_source(&[(
            "KEYCLOAK_URL",
            "http://idp",
        )])]);
        assert!(loader.load().is_none());
    }

    #[test]
    fn first_non_empty_source_wins() {
        let loader = ConfigLoader::with_sources(vec![
            map_source(&[
                ("KEYCLOAK_URL", "http://primary"),
                ("KEYCLOAK_REALM", ""),
            ]),
            map_source(&[
                ("KEYCLOAK_URL", "http://fallback"),
                ("KEYCLOAK_REALM", "ploinky"),
                ("KEYCLOAK_CLIENT_ID", "ploinky-router"),
            ]),
        ]);
        let config = loader.load().unwrap();
        assert_eq!(config.base_url, "http://primary");
        // Empty string in the first source falls through to the second.
        assert_eq!(config.realm, "ploinky");
        assert_eq!(config.client_id, "ploinky-router");
    }

    #[test]
    fn scope_defaults_and_base_url_is_normalized() {
        let loader = ConfigLoader::with_sources(vec![map_source(&[
            ("KEYCLOAK_URL", "http://idp/"),
            ("KEYCLOAK_REALM", "ploinky"),
            ("KEYCLOAK_CLIENT_ID", "ploinky-router"),
        ])]);
        let config = loader.load().unwrap();
        assert_eq!(config.base_url, "http://idp");
        assert_eq!(config.scope, DEFAULT_SCOPE);
        assert!(config.client_secret.is_none());
    }

    #[test]
    fn secrets_file_parses_comments_and_quotes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# workspace secrets").unwrap();
        writeln!(file, "KEYCLOAK_URL=http://idp").unwrap();
        writeln!(file, "KEYCLOAK_REALM=\"ploinky\"").unwrap();
        writeln!(file, "KEYCLOAK_CLIENT_ID='ploinky-router'").unwrap();
        writeln!(file, "garbage line without equals").unwrap();
        writeln!(file).unwrap();
        file.flush().unwrap();

        let source = SecretsFile::new(file.path());
        assert_eq!(source.get("KEYCLOAK_URL").as_deref(), Some("http://idp"));
        assert_eq!(source.get("KEYCLOAK_REALM").as_deref(), Some("ploinky"));
        assert_eq!(
            source.get("KEYCLOAK_CLIENT_ID").as_deref(),
            Some("ploinky-router")
        );
        assert!(source.get("MISSING").is_none());
    }

    #[test]
    fn secrets_file_missing_is_an_empty_source() {
        let source = SecretsFile::new("/nonexistent/.secrets");
        assert!(source.get("KEYCLOAK_URL").is_none());
    }

    #[test]
    fn secrets_file_wins_over_later_sources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "KEYCLOAK_URL=http://from-secrets").unwrap();
        file.flush().unwrap();

        let loader = ConfigLoader::with_sources(vec![
            Box::new(SecretsFile::new(file.path())),
            map_source(&[
                ("KEYCLOAK_URL", "http://from-env"),
                ("KEYCLOAK_REALM", "ploinky"),
                ("KEYCLOAK_CLIENT_ID", "ploinky-router"),
            ]),
        ]);
        let config = loader.load().unwrap();
        assert_eq!(config.base_url, "http://from-secrets");
    }
}
