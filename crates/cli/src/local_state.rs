use std::{fs, path::Path};

use engine::ExchangeRate;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What the CLI remembers between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LocalState {
    /// VES per USD. Never sent to the server.
    pub exchange_rate: ExchangeRate,
    /// Token of the identity the records belong to.
    pub token: Option<String>,
}

impl LocalState {
    pub fn load(path: &str) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let parent = Path::new(path).parent();
        if let Some(parent) = parent {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        fs::write(path, payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tally-cli-{}-{name}", std::process::id()))
    }

    #[test]
    fn missing_file_is_the_default_state() {
        let path = scratch("missing").join("state.json");
        let state = LocalState::load(path.to_str().unwrap()).unwrap();
        assert_eq!(state, LocalState::default());
        assert!(!state.exchange_rate.is_usable());
    }

    #[test]
    fn saved_state_is_loaded_back() {
        let dir = scratch("saved");
        let path = dir.join("nested").join("state.json");
        let path = path.to_str().unwrap();

        let state = LocalState {
            exchange_rate: ExchangeRate::new(36.5),
            token: Some("abc".to_string()),
        };
        state.save(path).unwrap();
        assert_eq!(LocalState::load(path).unwrap(), state);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn negative_rate_on_disk_loads_as_unset() {
        let dir = scratch("negative");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");
        fs::write(&path, r#"{ "exchange_rate": -3.0 }"#).unwrap();

        let state = LocalState::load(path.to_str().unwrap()).unwrap();
        assert_eq!(state.exchange_rate, ExchangeRate::UNSET);
        assert_eq!(state.token, None);

        fs::remove_dir_all(dir).unwrap();
    }
}
