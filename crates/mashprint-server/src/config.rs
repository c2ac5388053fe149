// Configuration loading and parsing (config/mashprint.toml).

use mashprint_core::ClassifierSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::tcp_server::ConnectionLimits;

/// Name of the single config file, under `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "mashprint.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub classifier: ClassifierSettings,
}

/// Raw deserialization target for the whole mashprint.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    server: ServerConfig,
    #[serde(default)]
    classifier: ClassifierSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    /// Port for the one-message-per-connection JSON listener. 0 picks an
    /// ephemeral port.
    pub tcp_port: u16,
    /// Port for the WebSocket listener; omitted to disable it.
    #[serde(default)]
    pub ws_port: Option<u16>,
    /// Largest accepted request, in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Milliseconds a TCP client has to deliver its whole request.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_max_message_bytes() -> usize {
    1024
}

fn default_read_timeout_ms() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".into(),
            tcp_port: 65432,
            ws_port: None,
            max_message_bytes: default_max_message_bytes(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn ws_addr(&self) -> Option<String> {
        self.ws_port.map(|port| format!("{}:{}", self.host, port))
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_message_bytes: self.max_message_bytes,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/mashprint.toml` relative to `base_dir`.
///
/// This does not copy defaults. Prefer `load_config()` which does.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        server: file.server,
        classifier: file.classifier,
    };

    validate(&config)?;

    Ok(config)
}

/// Copy `defaults/mashprint.toml` to `config/mashprint.toml` if the latter is
/// missing. Returns the path written, if any.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let source = base_dir.join("defaults").join(CONFIG_FILE);
    let config_dir = base_dir.join("config");
    let target = config_dir.join(CONFIG_FILE);

    if target.exists() {
        return Ok(None);
    }
    if !source.exists() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither defaults/{CONFIG_FILE} nor config/{CONFIG_FILE} found in {}; \
                 run from the crate root or ensure defaults/ is present",
                base_dir.display()
            ),
        });
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(mut dest) => {
            let content = std::fs::read(&source).map_err(|e| ConfigError::DefaultsCopyError {
                message: format!("failed to read {}: {e}", source.display()),
            })?;
            std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                ConfigError::DefaultsCopyError {
                    message: format!("failed to write {}: {e}", target.display()),
                }
            })?;
            Ok(Some(target))
        }
        // Another process got there first.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", target.display()),
        }),
    }
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures the default config file is copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.host.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "server.host".into(),
            message: "must not be empty".into(),
        });
    }

    if server.max_message_bytes == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.max_message_bytes".into(),
            message: "must be > 0".into(),
        });
    }

    if server.read_timeout_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.read_timeout_ms".into(),
            message: "must be > 0".into(),
        });
    }

    if let Some(ws_port) = server.ws_port {
        if ws_port != 0 && ws_port == server.tcp_port {
            return Err(ConfigError::ValidationError {
                field: "server.ws_port".into(),
                message: format!("must differ from server.tcp_port ({ws_port})"),
            });
        }
    }

    let classifier = &config.classifier;
    if classifier.mash_chunk_size == 0 {
        return Err(ConfigError::ValidationError {
            field: "classifier.mash_chunk_size".into(),
            message: "must be > 0".into(),
        });
    }

    let positive_fields: &[(&str, f64)] = &[
        ("classifier.c", classifier.c),
        ("classifier.tolerance", classifier.tolerance),
    ];
    for (name, val) in positive_fields {
        if !(*val > 0.0) {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: format!("must be > 0, got {val}"),
            });
        }
    }

    if classifier.max_iterations == 0 {
        return Err(ConfigError::ValidationError {
            field: "classifier.max_iterations".into(),
            message: "must be > 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mashprint_core::MASH_CHUNK_SIZE;
    use std::fs;

    /// Helper: returns the path to the mashprint-server crate root
    /// (works whether `cargo test` runs from the crate root or repo root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("crates/mashprint-server/defaults").exists() {
            cwd.join("crates/mashprint-server")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    /// Helper: fresh `<tmp>/<name>/config/mashprint.toml` holding `contents`.
    fn write_config(name: &str, contents: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), contents).unwrap();
        tmp
    }

    fn expect_validation_field(err: ConfigError, expected: &str) {
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, expected),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn load_defaults_file() {
        let tmp = std::env::temp_dir().join("mashprint_config_defaults");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::copy(
            project_root().join("defaults").join(CONFIG_FILE),
            tmp.join("defaults").join(CONFIG_FILE),
        )
        .unwrap();

        let copied = ensure_config_file(&tmp).expect("should copy default config");
        assert_eq!(copied, Some(tmp.join("config").join(CONFIG_FILE)));
        let config = load_config_from(&tmp).expect("should load valid config");

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.tcp_port, 65432);
        assert_eq!(config.server.ws_port, Some(65433));
        assert_eq!(config.server.max_message_bytes, 1024);
        assert_eq!(config.server.read_timeout_ms, 5000);
        assert_eq!(config.classifier.mash_chunk_size, MASH_CHUNK_SIZE);
        assert!(!config.classifier.rebuild_on_new_labeled_data);
        assert!((config.classifier.c - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.classifier.max_iterations, 1000);

        // A second call leaves the existing file alone.
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn classifier_section_is_optional() {
        let tmp = write_config(
            "mashprint_config_no_classifier",
            "[server]\nhost = \"0.0.0.0\"\ntcp_port = 7000\n",
        );

        let config = load_config_from(&tmp).expect("should load without [classifier]");
        assert_eq!(config.server.tcp_addr(), "0.0.0.0:7000");
        assert_eq!(config.server.ws_addr(), None);
        assert_eq!(config.server.max_message_bytes, 1024);
        assert_eq!(
            config.server.connection_limits(),
            ConnectionLimits {
                max_message_bytes: 1024,
                read_timeout: Duration::from_secs(5),
            }
        );
        assert_eq!(config.classifier, ClassifierSettings::default());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn partial_classifier_section_keeps_other_defaults() {
        let tmp = write_config(
            "mashprint_config_partial_classifier",
            r#"
[server]
host = "127.0.0.1"
tcp_port = 7000
ws_port = 7001

[classifier]
mash_chunk_size = 20
rebuild_on_new_labeled_data = true
"#,
        );

        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.server.ws_addr().as_deref(), Some("127.0.0.1:7001"));
        assert_eq!(config.classifier.mash_chunk_size, 20);
        assert!(config.classifier.rebuild_on_new_labeled_data);
        assert_eq!(config.classifier.max_iterations, 1000);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_file_is_reported() {
        let tmp = std::env::temp_dir().join("mashprint_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        match load_config_from(&tmp).unwrap_err() {
            ConfigError::FileNotFound { path } => {
                assert!(path.ends_with("config/mashprint.toml"));
            }
            other => panic!("expected FileNotFound, got: {other}"),
        }
        assert!(matches!(
            ensure_config_file(&tmp),
            Err(ConfigError::DefaultsCopyError { .. })
        ));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let tmp = write_config("mashprint_config_malformed", "[server\nhost = ");
        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::ParseError { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let tmp = write_config(
            "mashprint_config_zero_chunk",
            "[server]\nhost = \"127.0.0.1\"\ntcp_port = 7000\n\n[classifier]\nmash_chunk_size = 0\n",
        );
        expect_validation_field(
            load_config_from(&tmp).unwrap_err(),
            "classifier.mash_chunk_size",
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_non_positive_c() {
        let tmp = write_config(
            "mashprint_config_bad_c",
            "[server]\nhost = \"127.0.0.1\"\ntcp_port = 7000\n\n[classifier]\nc = 0.0\n",
        );
        expect_validation_field(load_config_from(&tmp).unwrap_err(), "classifier.c");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_shared_port() {
        let tmp = write_config(
            "mashprint_config_shared_port",
            "[server]\nhost = \"127.0.0.1\"\ntcp_port = 7000\nws_port = 7000\n",
        );
        expect_validation_field(load_config_from(&tmp).unwrap_err(), "server.ws_port");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_message_size() {
        let tmp = write_config(
            "mashprint_config_zero_message",
            "[server]\nhost = \"127.0.0.1\"\ntcp_port = 7000\nmax_message_bytes = 0\n",
        );
        expect_validation_field(
            load_config_from(&tmp).unwrap_err(),
            "server.max_message_bytes",
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_read_timeout() {
        let tmp = write_config(
            "mashprint_config_zero_timeout",
            "[server]\nhost = \"127.0.0.1\"\ntcp_port = 7000\nread_timeout_ms = 0\n",
        );
        expect_validation_field(
            load_config_from(&tmp).unwrap_err(),
            "server.read_timeout_ms",
        );
        let _ = fs::remove_dir_all(&tmp);
    }
}
