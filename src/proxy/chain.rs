//! Proxy chain traversal
//!
//! Dials the first hop, then asks each hop in turn to CONNECT to the next
//! one over the same stream, producing nested tunnels. The last hop is asked
//! to CONNECT to the final target.

use super::{ProxyConnection, ProxyDescriptor};
use crate::error::ConnectError;
use crate::socks::TargetAddr;
use crate::transport::ProxyStream;

/// Open a stream to `target` through `descriptor` and every hop behind it
///
/// Hops are negotiated strictly in order. Any refusal aborts the whole chain
/// and drops the partially tunneled stream.
pub async fn connect_through(
    descriptor: &ProxyDescriptor,
    target: &TargetAddr,
) -> Result<ProxyStream, ConnectError> {
    let hops = descriptor.chain();
    let (first, rest) = hops
        .split_first()
        .ok_or_else(|| ConnectError::chain("Empty proxy chain"))?;

    tracing::debug!("Connecting to {} through {} hop(s)", target, hops.len());

    let mut connection = ProxyConnection::new(first);
    connection.build_connection().await?;

    for next in rest {
        request(&mut connection, &next.server).await?;

        let stream = connection
            .into_stream()
            .ok_or_else(|| ConnectError::chain(format!("Lost the stream to {}", next)))?;
        connection = ProxyConnection::with_stream(next, stream);
        connection.build_connection().await?;
    }

    request(&mut connection, target).await?;

    let stream = connection
        .into_stream()
        .ok_or_else(|| ConnectError::chain(format!("Lost the stream to {}", target)))?;

    Ok(ProxyStream::Tunneled {
        stream,
        target: target.clone(),
    })
}

async fn request(connection: &mut ProxyConnection, addr: &TargetAddr) -> Result<(), ConnectError> {
    let accepted = connection
        .request_connect(addr)
        .await
        .map_err(|e| ConnectError::from_anyhow(&e))?;

    if !accepted {
        return Err(ConnectError::chain(format!(
            "{} refused CONNECT to {}",
            connection.descriptor(),
            addr
        )));
    }

    Ok(())
}
