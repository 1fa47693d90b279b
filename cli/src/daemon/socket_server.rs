// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Local-socket front end (§4.1): the broker's primary, full-surface RPC
//! ingress. Grounded on the newline-framed accept-loop shape used for Unix
//! socket IPC across the example pack (bind, remove stale socket, spawn one
//! task per connection), adapted to JSON-RPC framing and the shared
//! `Dispatcher` pipeline.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use agenshield_core::application::dispatch::Dispatcher;
use agenshield_core::domain::audit::Channel;
use agenshield_core::domain::repository::PolicyRepository;
use agenshield_core::domain::rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use agenshield_core::domain::scope::ScopeTriple;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// A single frame above this size is rejected with a resource-limit error
/// and the connection is closed (§4.1 "Oversize frames").
const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

pub async fn serve<R>(
    socket_path: &Path,
    dispatcher: Arc<Dispatcher<R>>,
    max_connections: u32,
) -> anyhow::Result<()>
where
    R: PolicyRepository + 'static,
{
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o770))?;
    info!(path = %socket_path.display(), "local-socket front end listening");

    let connection_limit = Arc::new(Semaphore::new(max_connections as usize));

    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to accept socket connection");
                continue;
            }
        };

        let permit = match Arc::clone(&connection_limit).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("socket connection limit reached, dropping connection");
                continue;
            }
        };

        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = handle_connection(stream, dispatcher).await {
                warn!(error = %e, "socket connection ended with an error");
            }
        });
    }
}

/// Requests on one connection are processed strictly in arrival order
/// (§4.1 "Ordering guarantees") — the read loop awaits dispatch before
/// reading the next frame, never spawning per-request tasks.
async fn handle_connection<R>(stream: UnixStream, dispatcher: Arc<Dispatcher<R>>) -> anyhow::Result<()>
where
    R: PolicyRepository + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let bytes_read = read_capped_line(&mut reader, &mut line, MAX_FRAME_BYTES).await?;
        if bytes_read == 0 {
            return Ok(());
        }

        if line.len() > MAX_FRAME_BYTES {
            let response = JsonRpcResponse::failure(
                serde_json::Value::Null,
                JsonRpcError::resource_limit("frame exceeds maximum size"),
            );
            write_response(&mut writer, &response).await?;
            return Ok(());
        }

        let response = match serde_json::from_slice::<JsonRpcRequest>(&line) {
            Ok(request) => {
                dispatcher
                    .dispatch(request, Channel::Socket, ScopeTriple::base())
                    .await
            }
            Err(_) => JsonRpcResponse::failure(serde_json::Value::Null, JsonRpcError::parse_error()),
        };

        write_response(&mut writer, &response).await?;
    }
}

async fn read_capped_line<Reader>(reader: &mut Reader, buf: &mut Vec<u8>, cap: usize) -> anyhow::Result<usize>
where
    Reader: AsyncBufReadExt + Unpin,
{
    let mut total = 0;
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(total);
        }
        if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            if total + pos <= cap {
                buf.extend_from_slice(&chunk[..pos]);
            }
            total += pos + 1;
            reader.consume(pos + 1);
            return Ok(total);
        }
        if total + chunk.len() <= cap {
            buf.extend_from_slice(chunk);
        }
        total += chunk.len();
        reader.consume(chunk.len());
        // Past the cap we keep draining until the newline so the next frame
        // starts clean, without buffering the rest of this oversize one.
    }
}

async fn write_response<W: AsyncWriteExt + Unpin>(writer: &mut W, response: &JsonRpcResponse) -> anyhow::Result<()> {
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
