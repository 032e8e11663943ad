use arrow_flight::sql::client::FlightSqlServiceClient;
use async_trait::async_trait;
use fanout_common::config::ClientConfig;
use fanout_common::credential::ConnectionCredential;
use futures::{StreamExt, TryStreamExt};
use log::debug;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::client::{RecordBatchStream, SqlClient, SqlConnection};
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone)]
pub struct FlightSqlClientOptions {
    /// Whether to use TLS when the endpoint URL does not specify a scheme.
    pub enable_tls: bool,
}

impl From<&ClientConfig> for FlightSqlClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            enable_tls: config.enable_tls,
        }
    }
}

/// A client for services speaking Arrow Flight SQL.
/// The secret key of the credential is sent as a bearer token.
#[derive(Debug, Clone)]
pub struct FlightSqlClient {
    options: FlightSqlClientOptions,
}

impl FlightSqlClient {
    pub fn new(options: FlightSqlClientOptions) -> Self {
        Self { options }
    }

    pub fn to_url_string(&self, endpoint: &str) -> String {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            let scheme = if self.options.enable_tls {
                "https"
            } else {
                "http"
            };
            format!("{scheme}://{endpoint}")
        }
    }
}

#[async_trait]
impl SqlClient for FlightSqlClient {
    async fn connect(
        &self,
        credential: &ConnectionCredential,
    ) -> ClientResult<Box<dyn SqlConnection>> {
        let url = self.to_url_string(credential.endpoint_url());
        let mut endpoint = Endpoint::from_shared(url.clone())?;
        if url.starts_with("https://") {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }
        let channel = endpoint.connect().await?;
        debug!("connected to Flight SQL endpoint {url}");
        let mut client = FlightSqlServiceClient::new(channel);
        client.set_token(credential.secret_key().to_string());
        Ok(Box::new(FlightSqlConnection { client }))
    }
}

struct FlightSqlConnection {
    client: FlightSqlServiceClient<Channel>,
}

#[async_trait]
impl SqlConnection for FlightSqlConnection {
    async fn query(&mut self, sql: &str) -> ClientResult<RecordBatchStream> {
        let info = self.client.execute(sql.to_string(), None).await?;
        let mut streams = Vec::with_capacity(info.endpoint.len());
        for endpoint in info.endpoint {
            let ticket = endpoint
                .ticket
                .ok_or_else(|| ClientError::protocol("flight endpoint without a ticket"))?;
            let stream = self.client.do_get(ticket).await?;
            streams.push(stream.map_err(ClientError::from));
        }
        Ok(Box::pin(futures::stream::iter(streams).flatten()))
    }
}
