use crate::error::CliError;
use powerfolder_p2p::RpcConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of the YAML configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default = "default_local_peer")]
    pub local_peer: String,
    #[serde(default = "default_remote_peer")]
    pub remote_peer: String,
}

fn default_local_peer() -> String {
    "local".into()
}

fn default_remote_peer() -> String {
    "remote".into()
}

impl Default for Settings {
    fn default() -> Self {
        Self { rpc: RpcConfig::default(), local_peer: default_local_peer(), remote_peer: default_remote_peer() }
    }
}

impl Settings {
    pub fn try_load<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let settings = serde_yml::from_reader(reader)?;
        Ok(settings)
    }

    /// Load the file at `path`, falling back to the defaults if it does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        match Self::try_load(&path) {
            Err(CliError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No configuration file at {}, using defaults", path.as_ref().display());
                Ok(Self::default())
            }
            result => result,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CliError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_yml::to_writer(writer, self)?;
        Ok(())
    }

    pub fn with_timeout(mut self, timeout: Option<u64>) -> Self {
        if let Some(secs) = timeout {
            self.rpc = self.rpc.with_request_timeout(secs);
        }
        self
    }
}

pub fn default_config_path() -> PathBuf {
    let mut home = std::env::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".powerfolder");
    home.push("config.yml");
    home
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load_or_default(dir.path().join("nope.yml")).expect("defaults");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.rpc.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.yml");
        let settings = Settings { local_peer: "laptop".into(), ..Settings::default() }.with_timeout(Some(5));
        settings.save(&path).expect("save");
        let loaded = Settings::try_load(&path).expect("load");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.rpc.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "remote_peer: server\nrpc:\n  request_timeout: 10\n").expect("write");
        let settings = Settings::load_or_default(&path).expect("load");
        assert_eq!(settings.local_peer, "local");
        assert_eq!(settings.remote_peer, "server");
        assert_eq!(settings.rpc.request_timeout(), Duration::from_secs(10));
        // flags win over the file
        assert_eq!(settings.with_timeout(Some(1)).rpc.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn garbage_is_an_invalid_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "rpc: [1, 2").expect("write");
        assert!(matches!(Settings::try_load(&path), Err(CliError::InvalidConfig(_))));
    }
}
