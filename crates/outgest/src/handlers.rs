//! The outgest request handler.

use crate::error::{OutgestError, OutgestResult};
use crate::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use seqvault_crypt::{Header, PublicKey};
use seqvault_db::{NewRequest, RequestContext};
use seqvault_storage::{ByteRange, ByteStream, VaultKind};
use serde::Deserialize;
use std::time::Instant;

/// JSON request body.
#[derive(Debug, Deserialize)]
pub struct OutgestBody {
    pub stable_id: Option<String>,
    /// The requesting party's public key, hex-encoded.
    pub pubkey: Option<String>,
    #[serde(default)]
    pub client_ip: Option<String>,
}

/// Byte coordinates over the encrypted body.
#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    #[serde(rename = "startCoordinate", default)]
    pub start_coordinate: u64,
    #[serde(rename = "endCoordinate")]
    pub end_coordinate: Option<u64>,
}

/// Serve one outgest request: re-encrypt the stored header for the
/// requester and stream the (possibly range-limited) encrypted body after
/// it, unmodified.
pub async fn outgest(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
    Json(body): Json<OutgestBody>,
) -> OutgestResult<Response> {
    let started = Instant::now();

    let stable_id = body
        .stable_id
        .filter(|s| !s.is_empty())
        .ok_or(OutgestError::MissingField("stable ID"))?;
    let pubkey = body
        .pubkey
        .filter(|s| !s.is_empty())
        .ok_or(OutgestError::MissingField("public key"))?;
    let recipient =
        PublicKey::from_hex(&pubkey).map_err(|e| OutgestError::InvalidKey(e.to_string()))?;
    let range = ByteRange::new(params.start_coordinate, params.end_coordinate)
        .map_err(|e| OutgestError::InvalidRange(e.to_string()))?;

    // Create the request row; from here on failures are recorded against it.
    let ctx = state
        .store
        .make_request(&NewRequest {
            stable_id,
            user_info: String::new(),
            client_ip: body.client_ip.unwrap_or_default(),
            start_coordinate: params.start_coordinate as i64,
            end_coordinate: params.end_coordinate.map(|end| end as i64),
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "unable to create a request entry");
            OutgestError::Unavailable
        })?;

    let request_id = ctx.request_id;
    tracing::info!(request_id, stable_id = %ctx.stable_id, "outgest request accepted");

    match prepare(&state, &ctx, &recipient, range).await {
        Ok((header_bytes, body_stream)) => {
            Ok(stream_response(state, request_id, started, header_bytes, body_stream))
        }
        Err(cause) => {
            tracing::error!(request_id, error = %cause, "outgest preparation failed");
            if let Err(e) = state.store.download_error(request_id, &cause).await {
                tracing::error!(request_id, error = %e, "could not record request error");
            }
            Err(OutgestError::Unavailable)
        }
    }
}

/// Re-encrypt the stored header for the requester and open the vault body.
async fn prepare(
    state: &AppState,
    ctx: &RequestContext,
    recipient: &PublicKey,
    range: ByteRange,
) -> Result<(Vec<u8>, ByteStream), String> {
    let header_bytes = hex::decode(&ctx.header)
        .map_err(|e| format!("stored header is not valid hex: {e}"))?;
    let header = Header::from_bytes(&header_bytes).map_err(|e| e.to_string())?;
    let reencrypted = header
        .reencrypt(recipient, &state.secret_key, state.signing_key.as_deref())
        .map_err(|e| e.to_string())?;

    let kind: VaultKind = ctx
        .vault_kind
        .parse()
        .map_err(|e: seqvault_storage::StorageError| e.to_string())?;
    let vault = state.vaults.get(kind).map_err(|e| e.to_string())?;
    let stream = vault
        .open_for_read(&ctx.vault_path, range)
        .await
        .map_err(|e| e.to_string())?;

    Ok((reencrypted.serialize(), stream))
}

/// Build the octet stream: the re-encrypted header first, then the body
/// range. The terminal request write happens when the stream ends.
fn stream_response(
    state: AppState,
    request_id: i64,
    started: Instant,
    header_bytes: Vec<u8>,
    mut body_stream: ByteStream,
) -> Response {
    // Pin the try_stream! item type so axum's `Body::from_stream` error bound
    // has a concrete error to resolve against.
    fn pin_stream<S>(s: S) -> S
    where
        S: futures::Stream<Item = Result<Bytes, seqvault_storage::StorageError>>,
    {
        s
    }
    let stream = pin_stream(async_stream::try_stream! {
        let mut delivered = header_bytes.len() as u64;
        yield Bytes::from(header_bytes);

        while let Some(chunk) = body_stream.next().await {
            match chunk {
                Ok(data) => {
                    delivered += data.len() as u64;
                    yield data;
                }
                Err(e) => {
                    tracing::error!(request_id, error = %e, "outgest stream failed");
                    if let Err(db_err) =
                        state.store.download_error(request_id, &e.to_string()).await
                    {
                        tracing::error!(
                            request_id,
                            error = %db_err,
                            "could not record request error"
                        );
                    }
                    // Aborting the stream signals failure to the transport.
                    Err(e)?;
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 { delivered as f64 / elapsed } else { 0.0 };
        if let Err(e) = state
            .store
            .download_complete(request_id, delivered as i64, speed)
            .await
        {
            tracing::error!(request_id, error = %e, "could not record request completion");
        }
        tracing::info!(request_id, bytes = delivered, "outgest complete");
    });

    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}
