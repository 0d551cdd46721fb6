mod types;

pub use types::*;

use anyhow::{Context, Result};
use mediaforge_av::transform::check_font_path;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./mediaforge.toml",
        "./config.toml",
        "~/.config/mediaforge/config.toml",
        "/etc/mediaforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    let mut config = Config::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Apply `MEDIAFORGE_*` environment overrides on top of file values.
///
/// `PORT` is honoured as a fallback for `MEDIAFORGE_PORT`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {key}: {e}"))
    }

    if let Some(v) = lookup("MEDIAFORGE_HOST") {
        config.server.host = v;
    }
    if let Some(v) = lookup("MEDIAFORGE_PORT").or_else(|| lookup("PORT")) {
        config.server.port = parsed("MEDIAFORGE_PORT", v)?;
    }
    if let Some(v) = lookup("MEDIAFORGE_UPLOAD_DIR") {
        config.storage.upload_dir = shellexpand::tilde(&v).into_owned().into();
    }
    if let Some(v) = lookup("MEDIAFORGE_OUTPUT_DIR") {
        config.storage.output_dir = shellexpand::tilde(&v).into_owned().into();
    }
    if let Some(v) = lookup("MEDIAFORGE_MAX_UPLOAD_MB") {
        config.storage.max_upload_mb = parsed("MEDIAFORGE_MAX_UPLOAD_MB", v)?;
    }
    if let Some(v) = lookup("MEDIAFORGE_RETENTION_SECS") {
        config.storage.retention_secs = parsed("MEDIAFORGE_RETENTION_SECS", v)?;
    }
    if let Some(v) = lookup("MEDIAFORGE_JOB_TIMEOUT_SECS") {
        config.executor.job_timeout_secs = parsed("MEDIAFORGE_JOB_TIMEOUT_SECS", v)?;
    }
    if let Some(v) = lookup("MEDIAFORGE_WORKERS") {
        config.executor.workers = parsed("MEDIAFORGE_WORKERS", v)?;
    }
    if let Some(v) = lookup("MEDIAFORGE_QUEUE_CAPACITY") {
        config.executor.queue_capacity = parsed("MEDIAFORGE_QUEUE_CAPACITY", v)?;
    }

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.executor.workers == 0 {
        anyhow::bail!("executor.workers must be at least 1");
    }
    if config.executor.queue_capacity == 0 {
        anyhow::bail!("executor.queue_capacity must be at least 1");
    }
    if config.executor.job_timeout_secs == 0 {
        anyhow::bail!("executor.job_timeout_secs must be greater than 0");
    }
    if config.executor.probe_timeout_secs == 0 {
        anyhow::bail!("executor.probe_timeout_secs must be greater than 0");
    }

    if config.storage.max_upload_mb == 0 {
        anyhow::bail!("storage.max_upload_mb must be greater than 0");
    }
    if config.storage.upload_dir == config.storage.output_dir {
        anyhow::bail!(
            "storage.upload_dir and storage.output_dir must differ (both {:?})",
            config.storage.upload_dir
        );
    }

    if !config.fonts.files.contains_key(&config.fonts.default) {
        anyhow::bail!(
            "Default font '{}' is not listed in fonts.files",
            config.fonts.default
        );
    }
    for (name, path) in &config.fonts.files {
        check_font_path(path).with_context(|| format!("Font '{name}' has an unusable path"))?;
        if !path.exists() {
            tracing::warn!("Font file for '{}' does not exist: {:?}", name, path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::PathBuf;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        validate_config(&config).unwrap();
        assert_eq!(config.executor.workers, 1);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.max_upload_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [executor]
            workers = 3
            job_timeout_secs = 120

            [tools]
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.executor.workers, 3);
        assert_eq!(config.executor.queue_capacity, 16);
        assert_eq!(
            config.tools.ffmpeg_path,
            Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))
        );
        assert_eq!(config.fonts.default, "dejavu-sans-bold");
    }

    #[test]
    fn load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nupload_dir = \"/srv/in\"\noutput_dir = \"/srv/out\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.upload_dir, PathBuf::from("/srv/in"));
        assert_eq!(config.storage.output_dir, PathBuf::from("/srv/out"));
    }

    #[test]
    fn load_config_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("MEDIAFORGE_HOST", "127.0.0.1"),
                ("PORT", "9100"),
                ("MEDIAFORGE_WORKERS", "4"),
                ("MEDIAFORGE_QUEUE_CAPACITY", "2"),
                ("MEDIAFORGE_JOB_TIMEOUT_SECS", "30"),
                ("MEDIAFORGE_MAX_UPLOAD_MB", "8"),
                ("MEDIAFORGE_UPLOAD_DIR", "/tmp/in"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.executor.workers, 4);
        assert_eq!(config.executor.queue_capacity, 2);
        assert_eq!(config.executor.job_timeout_secs, 30);
        assert_eq!(config.storage.max_upload_mb, 8);
        assert_eq!(config.storage.upload_dir, PathBuf::from("/tmp/in"));
    }

    #[test]
    fn mediaforge_port_wins_over_port() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, env(&[("PORT", "1"), ("MEDIAFORGE_PORT", "2")])).unwrap();
        assert_eq!(config.server.port, 2);
    }

    #[test]
    fn env_override_rejects_garbage() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, env(&[("MEDIAFORGE_WORKERS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("MEDIAFORGE_WORKERS"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.executor.workers = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.executor.queue_capacity = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.executor.job_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.storage.output_dir = config.storage.upload_dir.clone();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn validate_rejects_unknown_default_font_and_unsafe_paths() {
        let mut config = Config::default();
        config.fonts.default = "comic-sans".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config
            .fonts
            .files
            .insert("evil".to_string(), PathBuf::from("/fonts/a:b.ttf"));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn font_resolution() {
        let fonts = FontsConfig::default();
        assert!(fonts.resolve(None).unwrap().ends_with("DejaVuSans-Bold.ttf"));
        assert!(fonts.resolve(Some("dejavu-sans")).unwrap().ends_with("DejaVuSans.ttf"));
        assert!(fonts.resolve(Some("missing")).is_none());
    }
}
