use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub credential: CredentialConfig,
    pub client: ClientConfig,
    pub execution: ExecutionConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        let config: Self = Figment::from(Toml::string(DEFAULT_CONFIG))
            .admerge(Env::prefixed("FANOUT__").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CommonResult<()> {
        if self.execution.partitions == 0 {
            return Err(CommonError::invalid(
                "execution.partitions must be greater than zero",
            ));
        }
        if self.execution.query_column == self.execution.result_column {
            return Err(CommonError::invalid(format!(
                "the query column and the result column must differ: {}",
                self.execution.query_column
            )));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            credential: CredentialConfig::default(),
            client: ClientConfig { enable_tls: true },
            execution: ExecutionConfig::default(),
            telemetry: TelemetryConfig {
                console_traces: false,
            },
        }
    }
}

/// The location of the two secrets needed to reach the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub scope: String,
    pub endpoint_key: String,
    pub token_key: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            scope: "myscope".to_string(),
            endpoint_key: "ds_api".to_string(),
            token_key: "ds_token".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub enable_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub partitions: usize,
    pub query_column: String,
    pub result_column: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            partitions: 1,
            query_column: "sql_query".to_string(),
            result_column: "results".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub console_traces: bool,
}
