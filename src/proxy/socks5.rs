//! SOCKS5 client side of a hop

use super::{Credentials, ProxyDescriptor};
use crate::error::Socks5Error;
use crate::socks::auth::send_credentials;
use crate::socks::command::{read_command_response, CommandMessage};
use crate::socks::consts::*;
use crate::socks::handshake::{read_handshake_response, HandshakeMessage};
use crate::socks::{SocksCommand, TargetAddr};
use anyhow::{bail, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Negotiate a method, authenticate, and send CONNECT for `target`
///
/// Returns `true` iff the hop replied SUCCEEDED.
pub(super) async fn request_connect<S>(
    stream: &mut S,
    descriptor: &ProxyDescriptor,
    target: &TargetAddr,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let methods = match descriptor.credentials {
        Credentials::Anonymous => vec![SOCKS5_AUTH_METHOD_NONE],
        Credentials::UsernamePassword { .. } => {
            vec![SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_PASSWORD]
        }
    };
    stream
        .write_all(&HandshakeMessage::new(methods).to_bytes())
        .await?;
    stream.flush().await?;

    match (read_handshake_response(stream).await?, &descriptor.credentials) {
        (SOCKS5_AUTH_METHOD_NONE, _) => {}
        (SOCKS5_AUTH_METHOD_PASSWORD, Credentials::UsernamePassword { username, password }) => {
            send_credentials(stream, username, password).await?;
        }
        (method, _) => bail!(
            "{} selected method 0x{:02x} which was not offered",
            descriptor,
            method
        ),
    }

    let target = if descriptor.resolve_locally {
        TargetAddr::Ip(target.resolve().await?)
    } else {
        target.clone()
    };

    let request = CommandMessage::new(SocksCommand::Connect, target);
    stream.write_all(&request.to_bytes()).await?;
    stream.flush().await?;

    let response = read_command_response(stream).await?;
    if !response.is_success() {
        let reason = response
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| Socks5Error::GeneralFailure.to_string());
        tracing::debug!(
            "{} answered CONNECT {} with 0x{:02x} ({})",
            descriptor,
            request.target,
            response.reply,
            reason
        );
    }

    Ok(response.is_success())
}
