//! RPC wire protocol: 4-byte big-endian length prefix + JSON payload.
//!
//! Requests carry `{op, args}`; responses `{success, data|error}`. Unknown
//! operations answer with the error string `unknown operation` exactly, so
//! clients can detect an older daemon and fall back to direct mode.

use crate::error::{BeadsError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Error string for unroutable ops; exact-match contract with clients.
pub const UNKNOWN_OPERATION: &str = "unknown operation";

/// Refuse frames larger than this; a request should be small.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// One RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub op: String,
    #[serde(default)]
    pub args: Value,
}

/// One RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    #[must_use]
    pub fn unknown_operation() -> Self {
        Self::err(UNKNOWN_OPERATION)
    }
}

/// Encode a value into one length-prefixed frame.
///
/// # Errors
///
/// Returns `Json` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(value)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        BeadsError::Daemon(format!("frame too large: {} bytes", payload.len()))
    })?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode one frame payload.
///
/// # Errors
///
/// Returns `Json` if deserialization fails.
pub fn decode<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Read one frame from an async stream.
///
/// # Errors
///
/// Returns `Io` on stream failure and `Daemon` on an oversized frame.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(BeadsError::Daemon(format!("frame too large: {len} bytes")));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one frame to an async stream.
///
/// # Errors
///
/// Returns `Io` on stream failure.
pub async fn write_frame<W: AsyncWriteExt + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<()> {
    let frame = encode(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking frame read, for the synchronous CLI client.
///
/// # Errors
///
/// Returns `Io` on stream failure and `Daemon` on an oversized frame.
pub fn read_frame_blocking<R: std::io::Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(BeadsError::Daemon(format!("frame too large: {len} bytes")));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Blocking frame write, for the synchronous CLI client.
///
/// # Errors
///
/// Returns `Io` on stream failure.
pub fn write_frame_blocking<W: std::io::Write, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<()> {
    let frame = encode(value)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_round_trip() {
        let request = Request {
            op: "create".to_string(),
            args: json!({"title": "hello"}),
        };
        let frame = encode(&request).unwrap();
        assert_eq!(
            u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize,
            frame.len() - 4
        );

        let decoded: Request = decode(&frame[4..]).unwrap();
        assert_eq!(decoded.op, "create");
        assert_eq!(decoded.args["title"], "hello");
    }

    #[test]
    fn blocking_round_trip_over_a_buffer() {
        let response = Response::ok(json!({"id": "bd-1"}));
        let mut buffer = Vec::new();
        write_frame_blocking(&mut buffer, &response).unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let payload = read_frame_blocking(&mut cursor).unwrap();
        let decoded: Response = decode(&payload).unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.data.unwrap()["id"], "bd-1");
    }

    #[test]
    fn unknown_operation_is_exact() {
        let response = Response::unknown_operation();
        assert_eq!(response.error.as_deref(), Some("unknown operation"));
    }
}
