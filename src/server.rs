use crate::config::Config;
use crate::data_store::DataStoreClient;
use crate::processor::{ErrorResponse, MetricsService, NaturalLanguageRequest};
use crate::query::StructuredQuery;
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

/// Longest request line accepted, in bytes.
pub const MAX_REQUEST_LINE: u64 = 64 * 1024;

/// One request line. Every line gets exactly one response line back.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListMetrics,
    Query(StructuredQuery),
    Natural(NaturalLanguageRequest),
}

/// Serves [`MetricsService`] over newline-delimited JSON on a TCP socket.
pub struct ProxyServer<D> {
    config: Config,
    service: Arc<MetricsService<D>>,
}

impl<D> ProxyServer<D>
where
    D: DataStoreClient + 'static,
{
    pub fn new(config: Config, service: MetricsService<D>) -> Self {
        ProxyServer {
            config,
            service: Arc::new(service),
        }
    }

    pub async fn run(&self) -> Result<(), std::io::Error> {
        let server_address = format!("{}:{}", self.config.server_host, self.config.server_port);
        info!("Starting server at {}", server_address);

        let listener = TcpListener::bind(&server_address).await.map_err(|e| {
            error!("Failed to bind server address: {}", e);
            e
        })?;
        info!("Listening for connections on {}", server_address);

        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        loop {
            match listener.accept().await {
                Ok((tcp_stream, addr)) => {
                    info!("New connection accepted from: {}", addr);

                    let service = self.service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(tcp_stream, service).await {
                            warn!("Connection from {} closed with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection<D>(
    stream: TcpStream,
    service: Arc<MetricsService<D>>,
) -> Result<(), std::io::Error>
where
    D: DataStoreClient,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_REQUEST_LINE + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') && n as u64 > MAX_REQUEST_LINE {
            // The rest of the line cannot be resynchronized; answer and hang up.
            warn!("Request line exceeds {} bytes, closing connection", MAX_REQUEST_LINE);
            let response = to_json(&ErrorResponse {
                error: "BadRequest".to_string(),
                message: format!("request line exceeds {} bytes", MAX_REQUEST_LINE),
            });
            write_line(&mut writer, &response).await?;
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        let today = chrono::Local::now().date_naive();
        let response = handle_line(&service, line.trim(), today).await;
        write_line(&mut writer, &response).await?;
    }
    Ok(())
}

async fn write_line(
    writer: &mut OwnedWriteHalf,
    response: &serde_json::Value,
) -> Result<(), std::io::Error> {
    writer.write_all(response.to_string().as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// Answers a single request line with a JSON value.
pub async fn handle_line<D>(
    service: &MetricsService<D>,
    line: &str,
    today: NaiveDate,
) -> serde_json::Value
where
    D: DataStoreClient,
{
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejecting request line {:?}: {}", line, e);
            return to_json(&ErrorResponse {
                error: "BadRequest".to_string(),
                message: e.to_string(),
            });
        }
    };

    let result = match request {
        Request::ListMetrics => Ok(to_json(&service.list_metrics())),
        Request::Query(query) => service.query(query).await.map(|r| to_json(&r)),
        Request::Natural(natural) => service
            .query_natural(natural, today)
            .await
            .map(|r| to_json(&r)),
    };

    result.unwrap_or_else(|e| {
        info!("Request failed with {}: {}", e.kind(), e);
        to_json(&ErrorResponse::from(&e))
    })
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!("Failed to serialize response: {}", e);
        json!({"error": "SerializationError", "message": e.to_string()})
    })
}
