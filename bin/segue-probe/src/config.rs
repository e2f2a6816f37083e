use std::path::Path;

use segue::config::PlayerConfig;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub player: PlayerConfig,
    pub http: HttpConfig,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: Option<String>,
    /// Extra request headers, `name: value`.
    pub headers: Vec<String>,
}

impl Config {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = std::fs::read_to_string(path)?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }
}
