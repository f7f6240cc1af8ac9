//! PaddleOCR-json socket protocol.
//!
//! The engine prints `Socket init completed. <addr>:<port>` on stdout once its
//! server is listening. Each request is a fresh TCP connection carrying one
//! JSON line; the engine answers with one JSON line:
//!
//! ```text
//! -> {"image_base64":"iVBORw0..."}
//! <- {"code":100,"data":[{"box":[[..]],"score":0.99,"text":"..."}]}
//! ```
//!
//! Code 100 is success, 101 means no text was found; anything else is an
//! engine-side failure with the message in `data`.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::WorkerError;
use crate::image::EncodedImage;

use super::WorkerEndpoint;

const INIT_MARKER: &str = "Socket init completed.";

pub const CODE_SUCCESS: i64 = 100;
pub const CODE_NO_TEXT: i64 = 101;

#[derive(Debug, Serialize)]
struct Request<'a> {
    image_base64: &'a str,
}

/// Arguments that put the engine in socket mode on a random loopback port,
/// unless the caller already picked a port.
pub fn socket_args(args: &[String]) -> Vec<String> {
    let mut args = args.to_vec();
    if !args.iter().any(|arg| arg.starts_with("-port")) {
        args.push("-addr=loopback".to_string());
        args.push("-port=0".to_string());
    }
    args
}

/// Extract the listening address from the engine's handshake line.
pub fn parse_init_line(line: &str) -> Option<(String, u16)> {
    let (_, rest) = line.split_once(INIT_MARKER)?;
    let (address, port) = rest.trim().rsplit_once(':')?;
    let port = port.trim().parse().ok()?;
    let address = address.trim();
    if address.is_empty() {
        return None;
    }
    Some((address.to_string(), port))
}

pub fn encode_request(image: &EncodedImage) -> Result<String, WorkerError> {
    let mut line = serde_json::to_string(&Request {
        image_base64: image.payload(),
    })
    .map_err(|e| WorkerError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Unwrap the `{code, data}` envelope. Replies without one pass through untouched.
pub fn decode_response(line: &str) -> Result<Value, WorkerError> {
    let value: Value = serde_json::from_str(line.trim())
        .map_err(|e| WorkerError::Protocol(format!("invalid JSON reply: {e}")))?;

    let Some(code) = value.get("code").and_then(Value::as_i64) else {
        return Ok(value);
    };

    match code {
        CODE_SUCCESS => Ok(value.get("data").cloned().unwrap_or(Value::Array(Vec::new()))),
        CODE_NO_TEXT => Ok(Value::Array(Vec::new())),
        code => {
            let message = match value.get("data") {
                Some(Value::String(msg)) => msg.clone(),
                Some(other) => other.to_string(),
                None => "no details".to_string(),
            };
            Err(WorkerError::Engine { code, message })
        }
    }
}

/// Send one request to the engine and read its reply.
pub async fn round_trip(
    endpoint: &WorkerEndpoint,
    image: &EncodedImage,
) -> Result<Value, WorkerError> {
    let payload = encode_request(image)?;
    let mut stream = TcpStream::connect((endpoint.address.as_str(), endpoint.port)).await?;
    stream.write_all(payload.as_bytes()).await?;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(WorkerError::Protocol(
            "connection closed before a reply arrived".to_string(),
        ));
    }

    decode_response(&line)
}
