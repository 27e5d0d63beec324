use std::time::Duration;

use tracing::warn;

/// Runtime configuration (env / `.env`, overridable from the CLI).
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_branch: String,
    pub github_token: Option<String>,
    /// Ceiling on in-flight requests to the hosting origin.
    pub max_concurrent_requests: usize,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_owner: "MicrosoftDocs".to_string(),
            repo_name: "learn".to_string(),
            repo_branch: "main".to_string(),
            github_token: None,
            max_concurrent_requests: 6,
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let repo_owner = dotenv::var("LEARN_REPO_OWNER").unwrap_or(defaults.repo_owner);
        let repo_name = dotenv::var("LEARN_REPO_NAME").unwrap_or(defaults.repo_name);
        let repo_branch = dotenv::var("LEARN_REPO_BRANCH").unwrap_or(defaults.repo_branch);
        let github_token = dotenv::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());

        let max_concurrent_requests = parse_var(
            "LEARN_MAX_CONCURRENT_REQUESTS",
            defaults.max_concurrent_requests,
        )
        .max(1);
        let http_timeout = Duration::from_secs(parse_var(
            "LEARN_HTTP_TIMEOUT_SECS",
            defaults.http_timeout.as_secs(),
        ));

        Self {
            repo_owner,
            repo_name,
            repo_branch,
            github_token,
            max_concurrent_requests,
            http_timeout,
        }
    }
}

/// Numeric env var with a default; unparsable values are reported and ignored.
fn parse_var<T: std::str::FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match dotenv::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, default = %default, "Invalid numeric setting, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_point_at_learn_repo() {
        let config = Config::default();
        assert_eq!(config.repo_owner, "MicrosoftDocs");
        assert_eq!(config.repo_name, "learn");
        assert_eq!(config.repo_branch, "main");
        assert_eq!(config.max_concurrent_requests, 6);
        assert!(config.github_token.is_none());
    }

    #[test]
    fn test_parse_var_falls_back_when_unset() {
        let value: usize = parse_var("LEARN_RESOLVER_TEST_UNSET_VARIABLE", 17);
        assert_eq!(value, 17);
    }
}
