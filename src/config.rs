use std::time::Duration;

use clap::Parser;

use crate::cpu_stress::CpuSettings;
use crate::error::ConfigError;
use crate::logger::{LoggerConfig, LoggerFormat};
use crate::memory_stress::MemorySettings;

/// CPU and memory stress server.
#[derive(Debug, Clone, Parser)]
#[command(name = "stress-bench", version, about)]
pub struct Config {
    #[arg(long, env = "STRESS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "STRESS_PORT", default_value_t = 8080)]
    pub port: u16,

    /// tracing filter directive, e.g. `info` or `stress_bench=debug`
    #[arg(long, env = "STRESS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// text | json
    #[arg(long, env = "STRESS_LOG_FORMAT", default_value = "text")]
    pub log_format: LoggerFormat,

    #[arg(long, env = "STRESS_BLOCK_SIZE_MIB", default_value_t = 10)]
    pub block_size_mib: usize,

    #[arg(long, env = "STRESS_ALLOC_INTERVAL_MS", default_value_t = 500)]
    pub alloc_interval_ms: u64,

    #[arg(long, env = "STRESS_STATUS_INTERVAL_SECS", default_value_t = 5)]
    pub status_interval_secs: u64,

    /// Memory limit used when activation does not name one
    #[arg(long, env = "STRESS_DEFAULT_LIMIT_MIB", default_value_t = 1024)]
    pub default_limit_mib: usize,

    #[arg(long, env = "STRESS_CPU_STATUS_INTERVAL_SECS", default_value_t = 10)]
    pub cpu_status_interval_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.block_size_mib == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.alloc_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("allocation interval"));
        }
        if self.status_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("memory status interval"));
        }
        if self.cpu_status_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("cpu status interval"));
        }
        if self.default_limit_mib == 0 {
            return Err(ConfigError::ZeroDefaultLimit);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            format: self.log_format,
            level: self.log_level.clone(),
            ..LoggerConfig::default()
        }
    }

    pub fn cpu_settings(&self) -> CpuSettings {
        CpuSettings {
            status_interval: Duration::from_secs(self.cpu_status_interval_secs),
            ..CpuSettings::default()
        }
    }

    pub fn memory_settings(&self) -> MemorySettings {
        MemorySettings {
            block_size_mib: self.block_size_mib,
            alloc_interval: Duration::from_millis(self.alloc_interval_ms),
            status_interval: Duration::from_secs(self.status_interval_secs),
            default_limit_mib: self.default_limit_mib,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_service() {
        let cfg = Config::try_parse_from(["stress-bench"]).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.bind_addr(), ("0.0.0.0".to_string(), 8080));
        assert_eq!(cfg.log_format, LoggerFormat::Text);

        let mem = cfg.memory_settings();
        assert_eq!(mem.block_size_mib, 10);
        assert_eq!(mem.alloc_interval, Duration::from_millis(500));
        assert_eq!(mem.status_interval, Duration::from_secs(5));
        assert_eq!(mem.default_limit_mib, 1024);
        assert_eq!(cfg.cpu_settings().status_interval, Duration::from_secs(10));
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "stress-bench",
            "--port",
            "9090",
            "--log-format",
            "json",
            "--block-size-mib",
            "1",
        ])
        .unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.log_format, LoggerFormat::Json);
        assert_eq!(cfg.memory_settings().block_size_mib, 1);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Config::try_parse_from(["stress-bench", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn zero_values_fail_validation() {
        let cfg = Config::try_parse_from(["stress-bench", "--port", "0"]).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroPort)));

        let cfg = Config::try_parse_from(["stress-bench", "--alloc-interval-ms", "0"]).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroInterval(_))));

        let cfg = Config::try_parse_from(["stress-bench", "--block-size-mib", "0"]).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroBlockSize)));
    }
}
