use clap::{builder::BoolishValueParser, ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::version;

/// Command line and environment configuration for the gateway
#[derive(Debug, Clone, Parser)]
#[command(name = "codies", about = "Codies game server")]
pub struct Config {
    /// Address to listen at
    #[arg(long, env = "CODIES_ADDR", default_value = "0.0.0.0:5000")]
    pub addr: SocketAddr,

    /// Additional valid origins for WebSocket connections
    #[arg(long, env = "CODIES_ORIGINS", value_delimiter = ',')]
    pub origins: Vec<String>,

    /// Enables production mode
    #[arg(long, env = "CODIES_PROD", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub prod: bool,

    /// Enables debug mode
    #[arg(long, env = "CODIES_DEBUG", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub debug: bool,

    /// Address the metrics endpoint listens at (production mode only)
    #[arg(long, env = "CODIES_METRICS_ADDR", default_value = "0.0.0.0:2112")]
    pub metrics_addr: SocketAddr,

    /// Directory holding the built frontend
    #[arg(long, env = "CODIES_STATIC_DIR", default_value = "./frontend/build")]
    pub static_dir: PathBuf,

    /// Maximum number of concurrently active rooms
    #[arg(long, env = "CODIES_MAX_ROOMS", default_value_t = 2500)]
    pub max_rooms: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Production,
    Debug,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required option --prod or --debug")]
    MissingMode,

    #[error("must specify either --prod or --debug")]
    ConflictingModes,

    #[error("running production build without version set")]
    VersionUnset,
}

impl Config {
    /// Resolves the run mode; exactly one of `--prod` and `--debug` must be given.
    pub fn mode(&self) -> Result<Mode, ConfigError> {
        match (self.prod, self.debug) {
            (true, false) => Ok(Mode::Production),
            (false, true) => Ok(Mode::Debug),
            (false, false) => Err(ConfigError::MissingMode),
            (true, true) => Err(ConfigError::ConflictingModes),
        }
    }

    /// Checks the whole configuration against the running build.
    pub fn validate(&self) -> Result<Mode, ConfigError> {
        self.validate_with(version::version_set())
    }

    fn validate_with(&self, version_set: bool) -> Result<Mode, ConfigError> {
        let mode = self.mode()?;
        if mode == Mode::Production && !version_set {
            return Err(ConfigError::VersionUnset);
        }
        Ok(mode)
    }
}
