//! HTTP CONNECT client side of a hop
//!
//! ```text
//! CONNECT host:port HTTP/1.1\r\n
//! Host: host:port\r\n
//! [Proxy-Authorization: Basic base64(user:pass)\r\n]
//! [User-Agent: ua\r\n]
//! \r\n
//! ```

use super::{Credentials, ProxyDescriptor};
use crate::error::SockchainError;
use crate::socks::TargetAddr;
use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the response head we are willing to buffer
const MAX_RESPONSE_HEAD: usize = 8192;

/// Build the CONNECT request text
pub(super) fn build_request(descriptor: &ProxyDescriptor, target: &TargetAddr) -> String {
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");

    if let Credentials::UsernamePassword { username, password } = &descriptor.credentials {
        let encoded = STANDARD.encode(format!("{}:{}", username, password));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", encoded));
    }
    if let Some(user_agent) = &descriptor.user_agent {
        request.push_str(&format!("User-Agent: {}\r\n", user_agent));
    }

    request.push_str("\r\n");
    request
}

/// Send CONNECT for `target` and check the status line
///
/// Returns `true` iff the status code is 200.
pub(super) async fn request_connect<S>(
    stream: &mut S,
    descriptor: &ProxyDescriptor,
    target: &TargetAddr,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = if descriptor.resolve_locally {
        TargetAddr::Ip(target.resolve().await?)
    } else {
        target.clone()
    };

    stream
        .write_all(build_request(descriptor, &target).as_bytes())
        .await?;
    stream.flush().await?;

    let head = match read_response_head(stream).await? {
        Some(head) => head,
        None => {
            tracing::debug!("{} closed before finishing the CONNECT response", descriptor);
            return Ok(false);
        }
    };
    let accepted = parse_status(&head)?;
    if !accepted {
        tracing::debug!(
            "{} refused CONNECT {}: {}",
            descriptor,
            target,
            head.lines().next().unwrap_or("<empty response>")
        );
    }

    Ok(accepted)
}

/// Read the response head up to and including the blank line
///
/// Reads one byte at a time so nothing past the head is consumed from the
/// tunnel. Returns `None` when the peer closes before the blank line.
async fn read_response_head<S>(stream: &mut S) -> Result<Option<String>>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Ok(None);
        }
        head.push(byte[0]);
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(SockchainError::Protocol(format!(
                "HTTP response head exceeds {} bytes",
                MAX_RESPONSE_HEAD
            ))
            .into());
        }
    }

    Ok(Some(String::from_utf8_lossy(&head).into_owned()))
}

/// Decide acceptance from the status line of `head`
///
/// An empty head is a refusal. A status line without two space-separated
/// tokens is a protocol error; a non-numeric status code is a refusal.
fn parse_status(head: &str) -> Result<bool> {
    let status_line = match head.lines().next() {
        Some(line) if !line.is_empty() => line,
        _ => return Ok(false),
    };

    let mut tokens = status_line.split(' ').filter(|t| !t.is_empty());
    let code = match (tokens.next(), tokens.next()) {
        (Some(_), Some(code)) => code,
        _ => {
            return Err(SockchainError::Protocol(format!(
                "Malformed HTTP status line: {}",
                status_line
            ))
            .into())
        }
    };

    Ok(code.parse::<u16>().map(|c| c == 200).unwrap_or(false))
}
