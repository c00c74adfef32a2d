//! Configuration loading: file search, YAML parse, env overrides.
//!
//! Values load onto the compiled defaults, `ENV_DEBUG` beats the file,
//! and the result is validated before the engine ever sees it.

use std::path::{Path, PathBuf};

use tracing::info;

use sonoflux_core::{Config, EngineError};

/// Searched in order when no explicit path is given.
const CANDIDATES: &[&str] = &["config.yaml", "config/config.yaml"];

/// Load, override, and validate the configuration.
pub fn load(explicit: Option<&Path>) -> Result<Config, EngineError> {
    let path = resolve_path(explicit)?;
    info!(path = %path.display(), "loading configuration");

    let data = std::fs::read_to_string(&path)?;
    let mut config: Config = serde_yaml::from_str(&data)
        .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, EngineError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.display().to_string()));
        }
        return Ok(path.to_path_buf());
    }

    CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| {
            EngineError::FileNotFound(
                "config.yaml was not found in the current directory or config/".into(),
            )
        })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(value) = std::env::var("ENV_DEBUG") {
        if let Some(debug_flag) = parse_bool(&value) {
            config.debug = debug_flag;
            info!(debug = debug_flag, "ENV_DEBUG override applied");
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn explicit_missing_path_is_file_not_found() {
        let err = load(Some(Path::new("/nonexistent/config.yaml"))).unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound(_)));
    }

    #[test]
    fn partial_yaml_loads_onto_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "input:\n  buffer_size: 256\ndsp:\n  enabled: true\n  fft_window: Blackman\n",
        );
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.input.buffer_size, 256);
        assert!(config.dsp.enabled);
        assert_eq!(config.dsp.fft_window, "Blackman");
        // Untouched fields keep their defaults.
        assert_eq!(config.input.sample_rate, 44100.0);
        assert_eq!(config.transport.websocket_path, "/ws");
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "input: [not, a, mapping\n");
        assert!(matches!(
            load(Some(&path)).unwrap_err(),
            EngineError::Config(_)
        ));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "input:\n  buffer_size: 1000\n");
        assert!(matches!(
            load(Some(&path)).unwrap_err(),
            EngineError::Config(_)
        ));
    }

    #[test]
    fn env_debug_overrides_the_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "debug: false\n");

        std::env::set_var("ENV_DEBUG", "true");
        let config = load(Some(&path)).unwrap();
        std::env::remove_var("ENV_DEBUG");
        assert!(config.debug);
    }

    #[test]
    fn parse_bool_accepts_the_documented_forms() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }
}
