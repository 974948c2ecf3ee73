use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use herald_delivery::{
    ContentRenderer, DeliveryConfig, EmailSender, TemplateRenderer,
    sender::{LogEmailSender, ResendSender},
};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "HERALD_CONFIG";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

const REDACTED: &str = "<redacted>";

/// Top level configuration, read from a RON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Herald {
    /// PostgreSQL connection string. `DATABASE_URL` takes precedence when
    /// set.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Default: 5
    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,

    /// The From address of every broadcast.
    pub sender: String,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub provider: Provider,

    /// HTML template replacing the built-in one.
    #[serde(default)]
    pub template: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    Resend {
        api_key: String,
        #[serde(default)]
        endpoint: Option<String>,
    },
    /// Log emails instead of sending them.
    #[default]
    Log,
}

mod defaults {
    pub const fn max_connections() -> u32 {
        5
    }
}

impl Herald {
    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid
    /// configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        content
            .parse()
            .with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// The connection string, preferring `DATABASE_URL` over the file.
    ///
    /// # Errors
    ///
    /// Returns an error if neither is set.
    pub fn database_url(&self) -> anyhow::Result<String> {
        self.database_url_with(std::env::var(DATABASE_URL_ENV).ok())
    }

    fn database_url_with(&self, env: Option<String>) -> anyhow::Result<String> {
        env.filter(|url| !url.is_empty())
            .or_else(|| self.database_url.clone())
            .with_context(|| {
                format!("No database configured: set `database_url` or {DATABASE_URL_ENV}")
            })
    }

    #[must_use]
    pub fn email_sender(&self) -> Arc<dyn EmailSender> {
        match &self.provider {
            Provider::Resend {
                api_key,
                endpoint: Some(endpoint),
            } => Arc::new(ResendSender::with_endpoint(api_key, endpoint)),
            Provider::Resend {
                api_key,
                endpoint: None,
            } => Arc::new(ResendSender::new(api_key)),
            Provider::Log => Arc::new(LogEmailSender::new()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the configured template cannot be read or lacks
    /// the content placeholder.
    pub fn renderer(&self) -> anyhow::Result<Arc<dyn ContentRenderer>> {
        let Some(path) = &self.template else {
            return Ok(Arc::new(TemplateRenderer::default()));
        };

        let template = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template {}", path.display()))?;
        let renderer = TemplateRenderer::new(template)
            .with_context(|| format!("Unusable template {}", path.display()))?;

        Ok(Arc::new(renderer))
    }

    /// A copy that is safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();

        if let Provider::Resend { api_key, .. } = &mut config.provider {
            *api_key = REDACTED.to_string();
        }
        if config.database_url.is_some() {
            config.database_url = Some(REDACTED.to_string());
        }

        config
    }

    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_pretty(&self) -> anyhow::Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }
}

impl std::str::FromStr for Herald {
    type Err = ron::error::SpannedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config: Self = ron::from_str(s)?;
        config.delivery = config.delivery.normalize();
        Ok(config)
    }
}

/// Find the configuration file using the following precedence:
/// 1. The `--config` argument
/// 2. `HERALD_CONFIG` environment variable
/// 3. ./herald.config.ron (current working directory)
/// 4. /etc/herald/herald.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error naming every location tried if none exists.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    resolve_config_path(
        explicit,
        std::env::var_os(CONFIG_ENV),
        &[
            PathBuf::from("./herald.config.ron"),
            PathBuf::from("/etc/herald/herald.config.ron"),
        ],
    )
}

fn resolve_config_path(
    explicit: Option<&Path>,
    env: Option<OsString>,
    default_paths: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config argument\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    const MINIMAL: &str = r#"(sender: "updates@example.com")"#;

    const FULL: &str = r#"
#![enable(implicit_some)]
(
    database_url: "postgres://herald@localhost/herald",
    max_connections: 10,
    sender: "Acme Updates <updates@example.com>",
    delivery: (
        batch_size: 50,
        worker_count: 8,
        max_retries: 2,
        email_timeout_secs: 5,
        rate_limit: 0.0,
    ),
    provider: Resend(api_key: "re_secret"),
    template: "/etc/herald/template.html",
)
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Herald = MINIMAL.parse().unwrap();

        assert_eq!(config.sender, "updates@example.com");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.provider, Provider::Log);
        assert_eq!(config.delivery, DeliveryConfig::default());
        assert!(config.template.is_none());
    }

    #[test]
    fn test_full_config() {
        let config: Herald = FULL.parse().unwrap();

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.delivery.batch_size, 50);
        assert_eq!(config.delivery.worker_count, 8);
        assert_eq!(config.delivery.retry_policy().max_attempts(), 3);
        assert_eq!(config.delivery.email_timeout(), Duration::from_secs(5));
        // Unspecified values keep their defaults
        assert_eq!(config.delivery.db_timeout(), Duration::from_secs(300));
        // Zero rate is normalised
        assert!((config.delivery.rate_limit - 10.0).abs() < f64::EPSILON);
        assert_eq!(
            config.provider,
            Provider::Resend {
                api_key: "re_secret".to_string(),
                endpoint: None,
            }
        );
        assert_eq!(
            config.template.as_deref(),
            Some(Path::new("/etc/herald/template.html"))
        );
    }

    #[test]
    fn test_sender_is_required() {
        assert!("(provider: Log)".parse::<Herald>().is_err());
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let config: Herald = FULL.parse().unwrap();

        let printed = config.redacted().to_pretty().unwrap();

        assert!(!printed.contains("re_secret"));
        assert!(!printed.contains("postgres://"));
        assert!(printed.contains(REDACTED));
        assert!(printed.contains("updates@example.com"));
    }

    #[test]
    fn test_database_url_prefers_environment() {
        let config: Herald = FULL.parse().unwrap();

        assert_eq!(
            config
                .database_url_with(Some("postgres://env/db".to_string()))
                .unwrap(),
            "postgres://env/db"
        );
        assert_eq!(
            config.database_url_with(None).unwrap(),
            "postgres://herald@localhost/herald"
        );
        assert!(
            MINIMAL
                .parse::<Herald>()
                .unwrap()
                .database_url_with(None)
                .is_err()
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.config.ron");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Herald::load(&path).unwrap();
        assert_eq!(config.sender, "updates@example.com");
    }

    #[test]
    fn test_custom_template() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.html");
        let bad = dir.path().join("bad.html");
        std::fs::write(&good, "<main>{{content}}</main>").unwrap();
        std::fs::write(&bad, "<main>{{title}}</main>").unwrap();

        let mut config: Herald = MINIMAL.parse().unwrap();

        config.template = Some(good);
        assert!(config.renderer().is_ok());

        config.template = Some(bad);
        assert!(config.renderer().is_err());

        config.template = Some(dir.path().join("missing.html"));
        assert!(config.renderer().is_err());
    }

    #[test]
    fn test_config_path_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.ron");
        let from_env = dir.path().join("env.ron");
        let fallback = dir.path().join("fallback.ron");
        for path in [&explicit, &from_env, &fallback] {
            std::fs::write(path, MINIMAL).unwrap();
        }
        let defaults = [dir.path().join("absent.ron"), fallback.clone()];

        assert_eq!(
            resolve_config_path(Some(&explicit), Some(from_env.clone().into()), &defaults)
                .unwrap(),
            explicit
        );
        assert_eq!(
            resolve_config_path(None, Some(from_env.clone().into()), &defaults).unwrap(),
            from_env
        );
        assert_eq!(
            resolve_config_path(None, None, &defaults).unwrap(),
            fallback
        );
    }

    #[test]
    fn test_missing_config_lists_paths_tried() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent.ron");

        let err = resolve_config_path(None, None, std::slice::from_ref(&absent)).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("HERALD_CONFIG"));
        assert!(message.contains(&absent.display().to_string()));

        assert!(resolve_config_path(None, Some(absent.clone().into()), &[]).is_err());
        assert!(resolve_config_path(Some(&absent), None, &[]).is_err());
    }
}
