use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct BusConfig {
    pub bus_name: String,
    #[serde(default = "defaults::ring_size_bytes")]
    pub ring_size_bytes: u64,
    #[serde(default = "defaults::max_readers")]
    pub max_readers: u16,
    #[serde(default = "defaults::notify_multicast_addr")]
    pub notify_multicast_addr: Ipv4Addr,
    #[serde(default = "defaults::notify_port")]
    pub notify_port: u16,
    #[serde(default = "defaults::notify_local_if")]
    pub notify_local_if: Ipv4Addr,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("ring_size_bytes must be a power of two, got {0}")]
    InvalidRingSize(u64),
}

mod defaults {
    use std::net::Ipv4Addr;

    pub fn ring_size_bytes() -> u64 {
        1 << 20
    }

    pub fn max_readers() -> u16 {
        32
    }

    pub fn notify_multicast_addr() -> Ipv4Addr {
        Ipv4Addr::new(239, 19, 19, 19)
    }

    pub fn notify_port() -> u16 {
        24191
    }

    pub fn notify_local_if() -> Ipv4Addr {
        Ipv4Addr::UNSPECIFIED
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl BusConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: BusConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.ring_size_bytes.is_power_of_two() {
            return Err(ConfigError::InvalidRingSize(self.ring_size_bytes));
        }
        Ok(())
    }
}
