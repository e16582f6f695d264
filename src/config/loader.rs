//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{ProxyConfig, RouteRule};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    ParseRoutes(serde_json::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::ParseRoutes(e) => write!(f, "Routes file parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
///
/// When the config names a `routes_file`, its JSON route list is appended
/// after the inline routes, preserving first-match-wins ordering.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: ProxyConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    if let Some(routes_file) = config.routes_file.clone() {
        let routes_path = resolve_sibling(path, &routes_file);
        let raw = fs::read_to_string(&routes_path).map_err(ConfigError::Io)?;
        let extra: Vec<RouteRule> =
            serde_json::from_str(&raw).map_err(ConfigError::ParseRoutes)?;
        tracing::info!(
            file = %routes_path.display(),
            count = extra.len(),
            "Loaded external route rules"
        );
        config.routes.extend(extra);
    }

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Interpret a relative routes file path relative to the config file.
fn resolve_sibling(config_path: &Path, file: &str) -> std::path::PathBuf {
    let candidate = Path::new(file);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config_with_routes() {
        let toml_src = r#"
            [listener]
            bind_address = "127.0.0.1:8080"

            [[routes]]
            name = "analytics"
            pattern = "/analytics/(.*)"
            target = "http://127.0.0.1:3001"
            rewrite_base = true
            policy = "mock-always-allow"

            [[routes]]
            name = "graph"
            pattern = "/graph(.*)"
            kind = "websocket"

            [routes.websocket]
            handler = "bolt"
            target = "ws://127.0.0.1:7687"
        "#;
        let config: ProxyConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.routes.len(), 2);
        assert!(config.routes[0].rewrite_base);
        assert!(config.routes[1].websocket.is_some());
    }

    #[test]
    fn parses_routes_from_json() {
        let json_src = r#"[
            {"name": "mcp", "pattern": "/mcp(.*)", "target": "http://127.0.0.1:7475", "soft_error": "mcp"},
            {"name": "home", "pattern": "/services", "kind": "splash"}
        ]"#;
        let routes: Vec<RouteRule> = serde_json::from_str(json_src).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].soft_error, crate::config::schema::SoftErrorMode::Mcp);
        assert_eq!(routes[1].kind, crate::config::schema::RouteKind::Splash);
    }
}
