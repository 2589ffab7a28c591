//! Configuration Module
//!
//! This module provides constants and the runtime configuration for the
//! rexec daemon. Values come from the defaults below, then an optional TOML
//! file, then the command line.

use crate::utils::error::{RexecError, Result};
use rexec::protocol::{COMMAND_CAPACITY, RESPONSE_CAPACITY};
use serde::Deserialize;
use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};

/// Constants for default settings
pub const DEFAULT_BIND_ADDRESS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;
pub const DEFAULT_BACKLOG: i32 = 10;
pub const DEFAULT_LOG_PATH: &str = "connections.log";
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// IPv4 address the listener binds to
    pub bind_address: Ipv4Addr,
    /// TCP port; 0 lets the kernel pick one
    pub port: u16,
    /// Listen queue length handed to the kernel
    pub backlog: i32,
    /// Connection log file
    pub log_path: PathBuf,
    /// Shell used to interpret commands
    pub shell: PathBuf,
    /// Command buffer size in bytes, sentinel included
    pub command_capacity: usize,
    /// Maximum captured output bytes per response
    pub response_capacity: usize,
    /// Optional file receiving a copy of the diagnostic trace
    pub trace_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS,
            port: 0,
            backlog: DEFAULT_BACKLOG,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            shell: PathBuf::from(DEFAULT_SHELL),
            command_capacity: COMMAND_CAPACITY,
            response_capacity: RESPONSE_CAPACITY,
            trace_file: None,
        }
    }
}

impl DaemonConfig {
    /// Load the configuration from a TOML file, or use defaults
    ///
    /// # Arguments
    /// * `path` - Optional path to a TOML configuration file
    ///
    /// # Returns
    /// * `Result<DaemonConfig>` - The parsed configuration or an error
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|e| {
                    RexecError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&contents)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.backlog < 1 {
            return Err(RexecError::InvalidArguments(format!(
                "backlog must be at least 1, got {}",
                self.backlog
            )));
        }
        if self.command_capacity < 2 {
            return Err(RexecError::InvalidArguments(format!(
                "command_capacity must be at least 2, got {}",
                self.command_capacity
            )));
        }
        if self.response_capacity == 0 {
            return Err(RexecError::InvalidArguments(
                "response_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Address the listener binds to
    pub fn socket_address(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.backlog, 10);
        assert_eq!(config.command_capacity, 200);
        assert_eq!(config.response_capacity, 5000);
        assert_eq!(config.log_path, PathBuf::from("connections.log"));
        assert_eq!(config.socket_address().to_string(), "0.0.0.0:0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DaemonConfig::from_toml(
            r#"
            port = 9000
            backlog = 32
            shell = "/bin/bash"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.backlog, 32);
        assert_eq!(config.shell, PathBuf::from("/bin/bash"));
        assert_eq!(config.response_capacity, 5000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        match DaemonConfig::from_toml("colour = \"blue\"") {
            Err(RexecError::Config(_)) => (),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_address = \"127.0.0.1\"\nlog_path = \"/tmp/x.log\"").unwrap();

        let config = DaemonConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bind_address, Ipv4Addr::LOCALHOST);
        assert_eq!(config.log_path, PathBuf::from("/tmp/x.log"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = DaemonConfig::load(Some(Path::new("/nonexistent/rexecd.toml")));
        assert!(matches!(result, Err(RexecError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = DaemonConfig {
            backlog: 0,
            ..DaemonConfig::default()
        };
        assert!(matches!(config.validate(), Err(RexecError::InvalidArguments(_))));

        let config = DaemonConfig {
            command_capacity: 1,
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DaemonConfig {
            response_capacity: 0,
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
