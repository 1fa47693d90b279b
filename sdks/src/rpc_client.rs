// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Newline-framed JSON-RPC client over a Unix domain socket, matching the
//! broker's local-socket front end (§4.1): one request per line, one
//! response per line, requests processed strictly in the order they are
//! written on a given connection.

use std::path::{Path, PathBuf};

use agenshield_core::domain::rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to broker socket at {path}: {source}")]
    Connect { path: PathBuf, source: std::io::Error },
    #[error("broker connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed response from broker: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("broker denied or failed the request: {message} (code {code})")]
    Rpc { code: i64, message: String, data: Option<Value> },
}

impl ClientError {
    fn from_rpc(error: JsonRpcError) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

/// One connection to the broker's local socket. Cheap to hold open for the
/// lifetime of a wrapper process — `call` serializes concurrent callers
/// behind a mutex so requests and their matching responses on the shared
/// connection never interleave.
pub struct BrokerClient {
    reader: Mutex<BufReader<tokio::net::unix::OwnedReadHalf>>,
    writer: Mutex<tokio::net::unix::OwnedWriteHalf>,
}

impl BrokerClient {
    /// Connects to the broker's socket at `socket_path` (typically the
    /// `socket_path` from the broker's own configuration, passed down to the
    /// wrapper process at launch).
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let socket_path = socket_path.as_ref();
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|source| ClientError::Connect { path: socket_path.to_path_buf(), source })?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
        })
    }

    /// Issues a raw JSON-RPC call and returns the decoded `result` value, or
    /// a `ClientError::Rpc` carrying the broker's error code and message.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let request = JsonRpcRequest::new(Value::String(Uuid::new_v4().to_string()), method, params);

        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');

        {
            let mut writer = self.writer.lock().await;
            writer.write_all(&line).await?;
            writer.flush().await?;
        }

        let mut buf = String::new();
        {
            let mut reader = self.reader.lock().await;
            let bytes_read = reader.read_line(&mut buf).await?;
            if bytes_read == 0 {
                return Err(ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "broker closed the connection",
                )));
            }
        }

        let response: JsonRpcResponse = serde_json::from_str(buf.trim_end())?;
        match response.error {
            Some(error) => Err(ClientError::from_rpc(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    /// Issues a raw call and deserializes the result into `T`.
    async fn call_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ClientError> {
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Liveness check; never gated by policy (§4.1 item 4).
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.call("ping", Value::Null).await?;
        Ok(())
    }

    /// Outbound HTTP on the caller's behalf, with secret injection resolved
    /// broker-side (§4.6).
    pub async fn http_request(
        &self,
        url: &str,
        method: &str,
        headers: &std::collections::HashMap<String, String>,
        body: Option<&str>,
    ) -> Result<Value, ClientError> {
        self.call(
            "http_request",
            json!({ "url": url, "method": method, "headers": headers, "body": body }),
        )
        .await
    }

    /// GET-only convenience over `http_request`, reachable over the HTTP
    /// fallback as well as the socket.
    pub async fn open_url(&self, url: &str) -> Result<Value, ClientError> {
        self.call("open_url", json!({ "url": url })).await
    }

    pub async fn file_read(&self, path: &str, binary: bool) -> Result<Value, ClientError> {
        self.call("file_read", json!({ "path": path, "binary": binary })).await
    }

    pub async fn file_list(&self, path: &str) -> Result<Vec<String>, ClientError> {
        #[derive(serde::Deserialize)]
        struct ListResult {
            entries: Vec<String>,
        }
        let result: ListResult = self.call_typed("file_list", json!({ "path": path })).await?;
        Ok(result.entries)
    }

    pub async fn file_write(&self, path: &str, content: &str, append: bool) -> Result<(), ClientError> {
        self.call("file_write", json!({ "path": path, "content": content, "append": append })).await?;
        Ok(())
    }

    /// Launches a binary resolved against the broker's configured PATH,
    /// sandboxed per the linked policy's hints (§4.5).
    pub async fn exec(&self, command: &str, args: &[String]) -> Result<Value, ClientError> {
        self.call("exec", json!({ "command": command, "args": args })).await
    }

    /// Resolves a declared secret by name. Socket-only — the broker rejects
    /// this over the HTTP fallback (§4.2, §4.6).
    pub async fn secret_inject(&self, name: &str) -> Result<Value, ClientError> {
        self.call("secret_inject", json!({ "name": name })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// A bare echo-style stand-in for the broker that answers `ping` with a
    /// canned success and everything else with `method_not_found`, enough to
    /// exercise the framing and error-decoding paths without the full
    /// dispatcher.
    fn spawn_fake_broker(socket_path: std::path::PathBuf) {
        let listener = UnixListener::bind(&socket_path).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                let n = reader.read_line(&mut line).await.unwrap_or(0);
                if n == 0 {
                    return;
                }
                let request: JsonRpcRequest = serde_json::from_str(line.trim_end()).unwrap();
                let response = if request.method == "ping" {
                    JsonRpcResponse::success(request.id, json!({"pong": true}))
                } else {
                    JsonRpcResponse::failure(request.id, JsonRpcError::method_not_found(&request.method))
                };
                let mut out = serde_json::to_vec(&response).unwrap();
                out.push(b'\n');
                write_half.write_all(&out).await.unwrap();
                write_half.flush().await.unwrap();
            }
        });
    }

    #[tokio::test]
    async fn ping_round_trips_through_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("agenshield.sock");
        spawn_fake_broker(socket_path.clone());

        let client = BrokerClient::connect(&socket_path).await.unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_method_surfaces_as_rpc_error() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("agenshield.sock");
        spawn_fake_broker(socket_path.clone());

        let client = BrokerClient::connect(&socket_path).await.unwrap();
        let err = client.call("not_a_real_method", Value::Null).await.unwrap_err();
        match err {
            ClientError::Rpc { code, .. } => {
                assert_eq!(code, agenshield_core::domain::rpc::error_codes::METHOD_NOT_FOUND);
            }
            other => panic!("expected an RPC error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("nonexistent.sock");
        let err = BrokerClient::connect(&socket_path).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}
