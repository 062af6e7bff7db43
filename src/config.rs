use std::net::SocketAddr;

use anyhow::Context;

const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

/// Server settings. Read from the environment, with a `.env` file honoured if present.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub json_logs: bool,
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_owned(),
            port: DEFAULT_PORT,
            json_logs: false,
            cors_origin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let mut config = Config::default();

        if let Some(bind) = var("PAIRWIRE_BIND") {
            config.bind = bind;
        }
        if let Some(port) = var("PAIRWIRE_PORT") {
            config.port = port.parse().with_context(|| format!("PAIRWIRE_PORT={port} is not a port"))?;
        }
        if let Some(json) = var("PAIRWIRE_JSON_LOGS") {
            config.json_logs = match json.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => anyhow::bail!("PAIRWIRE_JSON_LOGS={other} is not a boolean"),
            };
        }
        config.cors_origin = var("PAIRWIRE_CORS_ORIGIN").filter(|origin| !origin.is_empty());

        Ok(config)
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.bind, self.port))
    }
}
