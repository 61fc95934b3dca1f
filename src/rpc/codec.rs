//! Frames one call or response envelope per TCP connection.
//!
//! Each envelope is transmitted as a `u32` byte length followed by that many
//! bytes; the caller is responsible for encoding/decoding the bytes
//! themselves with the primitives in [`crate::rpc::wire`].

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RpcError;
use crate::rpc::wire;

/// Largest frame this implementation will allocate a buffer for. Guards
/// against a misbehaving peer claiming an unbounded length.
const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// A call envelope: the invoked method's name, the portable type tag of each
/// argument (carried for overload resolution, per the wire format), and the
/// arguments themselves, already encoded by the calling interface module.
pub struct CallEnvelope {
    pub method: String,
    pub type_tags: Vec<String>,
    pub payload: Vec<u8>,
}

/// A response envelope: either the method's encoded return value, or the
/// exception it raised.
pub enum ResponseEnvelope {
    Ok(Vec<u8>),
    Err(RpcError),
}

pub async fn read_frame(stream: &mut (impl AsyncRead + Unpin)) -> io::Result<Vec<u8>> {
    let len = stream.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_frame(stream: &mut (impl AsyncWrite + Unpin), bytes: &[u8]) -> io::Result<()> {
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(bytes).await?;
    stream.flush().await
}

pub async fn read_call(stream: &mut (impl AsyncRead + Unpin)) -> io::Result<CallEnvelope> {
    let frame = read_frame(stream).await?;
    let mut cursor = io::Cursor::new(frame);
    let method = wire::read_string(&mut cursor)?;
    let type_tags = wire::read_vec(&mut cursor, wire::read_string)?;
    let payload = wire::read_bytes(&mut cursor)?;
    Ok(CallEnvelope { method, type_tags, payload })
}

pub async fn write_call(
    stream: &mut (impl AsyncWrite + Unpin),
    call: &CallEnvelope,
) -> io::Result<()> {
    let mut buf = Vec::new();
    wire::write_string(&mut buf, &call.method)?;
    wire::write_vec(&mut buf, &call.type_tags, |d, t| wire::write_string(d, t))?;
    wire::write_bytes(&mut buf, &call.payload)?;
    write_frame(stream, &buf).await
}

pub async fn read_response(stream: &mut (impl AsyncRead + Unpin)) -> io::Result<ResponseEnvelope> {
    let frame = read_frame(stream).await?;
    let mut cursor = io::Cursor::new(frame);
    if wire::read_bool(&mut cursor)? {
        Ok(ResponseEnvelope::Ok(wire::read_bytes(&mut cursor)?))
    } else {
        Ok(ResponseEnvelope::Err(wire::read_rpc_error(&mut cursor)?))
    }
}

pub async fn write_response(
    stream: &mut (impl AsyncWrite + Unpin),
    response: &ResponseEnvelope,
) -> io::Result<()> {
    let mut buf = Vec::new();
    match response {
        ResponseEnvelope::Ok(payload) => {
            wire::write_bool(&mut buf, true)?;
            wire::write_bytes(&mut buf, payload)?;
        }
        ResponseEnvelope::Err(err) => {
            wire::write_bool(&mut buf, false)?;
            wire::write_rpc_error(&mut buf, err)?;
        }
    }
    write_frame(stream, &buf).await
}
