//! Container executor speaking the engine's HTTP API directly.
//!
//! Flow per command: create an exec instance, start it attached and collect
//! the (possibly multiplexed) output stream, then inspect it for the exit
//! code. The whole exchange runs under the command timeout.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::{Certificate, Client, Identity, StatusCode};
use serde_json::{Value, json};

use super::frames::demux;
use super::{BackendExecutor, ExecutorOptions};
use crate::domain::{ConnectionKind, ContainerApiTarget, EXIT_LOCAL_FAILURE, ExecutionLog, TlsMaterial};
use crate::error::{PilotError, Result};

pub struct ContainerApiExecutor {
    client: Client,
    endpoint: String,
    container: String,
    options: ExecutorOptions,
}

/// A failure before the command produced an exit code.
struct ApiFailure(String);

impl ContainerApiExecutor {
    pub fn new(target: ContainerApiTarget, options: ExecutorOptions) -> Result<Self> {
        let mut builder = Client::builder().connect_timeout(options.connect_timeout);
        if let Some(tls) = &target.tls {
            builder = apply_tls(builder, tls)?;
        }
        let client = builder
            .build()
            .map_err(|e| PilotError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: target.endpoint.trim_end_matches('/').to_string(),
            container: target.container,
            options,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn run(&self, command: &str) -> std::result::Result<ExecutionLog, ApiFailure> {
        let exec_id = self.create_exec(command).await?;
        let output = self.start_exec(&exec_id).await?;
        let exit_code = self.exit_code(&exec_id).await?;
        Ok(ExecutionLog::completed(command, output, exit_code))
    }

    async fn create_exec(&self, command: &str) -> std::result::Result<String, ApiFailure> {
        let body = json!({
            "AttachStdout": true,
            "AttachStderr": true,
            "Tty": false,
            "Cmd": ["sh", "-c", command],
        });
        let resp = self
            .client
            .post(self.url(&format!("/containers/{}/exec", self.container)))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let value: Value = resp
                    .json()
                    .await
                    .map_err(|e| ApiFailure(format!("Invalid exec response: {}", e)))?;
                value["Id"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ApiFailure("Exec response has no Id".to_string()))
            }
            StatusCode::NOT_FOUND => Err(ApiFailure(format!("Container '{}' does not exist", self.container))),
            StatusCode::CONFLICT => Err(ApiFailure(format!("Container '{}' is not running", self.container))),
            status => Err(ApiFailure(api_error(status, resp.text().await.unwrap_or_default()))),
        }
    }

    async fn start_exec(&self, exec_id: &str) -> std::result::Result<String, ApiFailure> {
        let resp = self
            .client
            .post(self.url(&format!("/exec/{}/start", exec_id)))
            .json(&json!({ "Detach": false, "Tty": false }))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(ApiFailure(api_error(status, resp.text().await.unwrap_or_default())));
        }

        let cap = self.options.max_output_bytes;
        let mut buf = BytesMut::new();
        let mut truncated = false;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ApiFailure(format!("Output stream interrupted: {}", e)))?;
            let room = cap.saturating_sub(buf.len());
            if chunk.len() > room {
                buf.extend_from_slice(&chunk[..room]);
                truncated = true;
            } else {
                buf.extend_from_slice(&chunk);
            }
        }

        let mut output = demux(buf.freeze());
        if truncated {
            output.push_str("\n... [output truncated]");
        }
        Ok(output)
    }

    async fn exit_code(&self, exec_id: &str) -> std::result::Result<i32, ApiFailure> {
        let resp = self
            .client
            .get(self.url(&format!("/exec/{}/json", exec_id)))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| ApiFailure(format!("Invalid exec inspect response: {}", e)))?;
        Ok(value["ExitCode"].as_i64().map(|c| c as i32).unwrap_or(EXIT_LOCAL_FAILURE))
    }

    fn unreachable(&self, err: reqwest::Error) -> ApiFailure {
        ApiFailure(format!("Docker daemon unreachable at {}: {}", self.endpoint, err))
    }
}

fn api_error(status: StatusCode, body: String) -> String {
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    format!("Docker API error {}: {}", status.as_u16(), message.trim())
}

fn apply_tls(builder: reqwest::ClientBuilder, tls: &TlsMaterial) -> Result<reqwest::ClientBuilder> {
    let mut builder = builder;
    if let Some(ca) = &tls.ca_cert {
        let pem = std::fs::read(ca)?;
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| PilotError::Connection(format!("Invalid CA certificate {}: {}", ca.display(), e)))?;
        builder = builder.add_root_certificate(cert);
    }
    if let (Some(cert), Some(key)) = (&tls.client_cert, &tls.client_key) {
        let cert_pem = std::fs::read(cert)?;
        let key_pem = std::fs::read(key)?;
        let identity = Identity::from_pkcs8_pem(&cert_pem, &key_pem)
            .map_err(|e| PilotError::Connection(format!("Invalid client certificate/key: {}", e)))?;
        builder = builder.identity(identity);
    }
    Ok(builder)
}

#[async_trait]
impl BackendExecutor for ContainerApiExecutor {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::ContainerApi
    }

    async fn execute(&self, command: &str) -> Result<ExecutionLog> {
        log::debug!("engine api exec in {} via {}: {}", self.container, self.endpoint, command);
        let timeout = self.options.command_timeout;
        let log = match tokio::time::timeout(timeout, self.run(command)).await {
            Ok(Ok(log)) => log,
            Ok(Err(ApiFailure(message))) => ExecutionLog::failed(command, message, EXIT_LOCAL_FAILURE),
            Err(_) => ExecutionLog::timed_out(command, timeout.as_millis() as u64),
        };
        Ok(log)
    }

    async fn disconnect(&self) {}
}
