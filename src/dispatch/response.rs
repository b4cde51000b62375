//! Backend response relay.
//!
//! Responses are opaque. The backend's reply is taken from a single receive
//! of at most [`MAX_RESPONSE_LEN`] bytes and written to the client verbatim.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::dispatch::error::DispatchError;
use crate::resilience::with_timeout;

/// Largest reply read from a backend.
pub const MAX_RESPONSE_LEN: usize = 1024;

/// Write `response` to the client and flush it.
pub async fn relay<W>(
    client: &mut W,
    response: &[u8],
    limit: Option<std::time::Duration>,
) -> Result<(), DispatchError>
where
    W: AsyncWrite + Unpin,
{
    with_timeout(limit, async {
        client.write_all(response).await?;
        client.flush().await
    })
    .await
    .map_err(DispatchError::ClientIo)
}
