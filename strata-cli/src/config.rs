use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_base::StrataResult;
use strata_db::files::TextureEncoding;
use strata_jobs::JobsConfig;
use strata_loader::LoaderConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub texture_encoding: TextureEncoding,
    pub generate_mips: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            texture_encoding: TextureEncoding::Png,
            generate_mips: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub database_root: PathBuf,
    pub jobs: JobsConfig,
    pub import: ImportConfig,
    pub loader: LoaderConfig,
}

impl Default for StrataConfig {
    fn default() -> Self {
        StrataConfig {
            database_root: PathBuf::from("data"),
            jobs: JobsConfig::default(),
            import: ImportConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl StrataConfig {
    /// Reads the config at `path`. A missing file gives the defaults, a malformed one is an error.
    pub fn load(path: &Path) -> StrataResult<Self> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {:?}, using defaults", path);
                return Ok(StrataConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: StrataConfig = serde_json::from_str(&json)?;
        log::debug!("Loaded config {:?}: {:?}", path, config);
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = StrataConfig::load(&dir.path().join("strata.json")).unwrap();
        assert_eq!(config, StrataConfig::default());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(
            &path,
            r#"{
                "database_root": "/tmp/resources",
                "jobs": { "worker_threads": 2 },
                "import": { "texture_encoding": "raw" }
            }"#,
        )
        .unwrap();

        let config = StrataConfig::load(&path).unwrap();
        assert_eq!(config.database_root, PathBuf::from("/tmp/resources"));
        assert_eq!(config.jobs.worker_threads, 2);
        assert_eq!(
            config.jobs.completion_poll_interval_ms,
            JobsConfig::default().completion_poll_interval_ms
        );
        assert_eq!(config.import.texture_encoding, TextureEncoding::Raw);
        assert!(!config.import.generate_mips);
        assert_eq!(config.loader.levels_per_epoch, 1);
    }

    #[test]
    fn malformed_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, "{ database_root: ").unwrap();
        assert!(matches!(
            StrataConfig::load(&path),
            Err(strata_base::StrataError::JsonError(_))
        ));
    }
}
