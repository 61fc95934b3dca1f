//! Primitive binary encode/decode functions shared by every interface's
//! call and response payloads.
//!
//! Every multi-byte integer is big-endian; every variable-length value
//! (strings, byte arrays, lists) is preceded by a `u32` length. This mirrors
//! an XDR-style codec: one write/read function per primitive, composed by
//! each value kind's own encode/decode pair, rather than a single generic
//! (de)serializer.
//!
//! Every function takes a trait object (`&mut dyn Read`/`&mut dyn Write`)
//! rather than a generic parameter, since the composing functions
//! ([`write_vec`]/[`read_vec`], [`write_path`]/[`read_path`]) need to pass
//! one of these functions to another by value.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::error::{ErrorKind, RpcError};
use crate::path::Path;

pub type Result<T> = io::Result<T>;

pub fn write_bool(dest: &mut dyn Write, value: bool) -> Result<()> {
    dest.write_u8(value as u8)
}

pub fn read_bool(src: &mut dyn Read) -> Result<bool> {
    Ok(src.read_u8()? != 0)
}

pub fn write_u32(dest: &mut dyn Write, value: u32) -> Result<()> {
    dest.write_u32::<BigEndian>(value)
}

pub fn read_u32(src: &mut dyn Read) -> Result<u32> {
    src.read_u32::<BigEndian>()
}

pub fn write_i32(dest: &mut dyn Write, value: i32) -> Result<()> {
    dest.write_i32::<BigEndian>(value)
}

pub fn read_i32(src: &mut dyn Read) -> Result<i32> {
    src.read_i32::<BigEndian>()
}

pub fn write_u64(dest: &mut dyn Write, value: u64) -> Result<()> {
    dest.write_u64::<BigEndian>(value)
}

pub fn read_u64(src: &mut dyn Read) -> Result<u64> {
    src.read_u64::<BigEndian>()
}

pub fn write_i64(dest: &mut dyn Write, value: i64) -> Result<()> {
    dest.write_i64::<BigEndian>(value)
}

pub fn read_i64(src: &mut dyn Read) -> Result<i64> {
    src.read_i64::<BigEndian>()
}

pub fn write_bytes(dest: &mut dyn Write, bytes: &[u8]) -> Result<()> {
    write_u32(dest, bytes.len() as u32)?;
    dest.write_all(bytes)
}

pub fn read_bytes(src: &mut dyn Read) -> Result<Vec<u8>> {
    let len = read_u32(src)? as usize;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_string(dest: &mut dyn Write, value: &str) -> Result<()> {
    write_bytes(dest, value.as_bytes())
}

pub fn read_string(src: &mut dyn Read) -> Result<String> {
    let bytes = read_bytes(src)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_path(dest: &mut dyn Write, path: &Path) -> Result<()> {
    write_vec(dest, path.components(), |d, c| write_string(d, c))
}

pub fn read_path(src: &mut dyn Read) -> Result<Path> {
    let components = read_vec(src, read_string)?;
    Ok(Path::from_components(components))
}

pub fn write_vec<T>(
    dest: &mut dyn Write,
    items: &[T],
    mut write_item: impl FnMut(&mut dyn Write, &T) -> Result<()>,
) -> Result<()> {
    write_u32(dest, items.len() as u32)?;
    for item in items {
        write_item(dest, item)?;
    }
    Ok(())
}

pub fn read_vec<T>(
    src: &mut dyn Read,
    mut read_item: impl FnMut(&mut dyn Read) -> Result<T>,
) -> Result<Vec<T>> {
    let len = read_u32(src)? as usize;
    let mut items = Vec::with_capacity(len.min(1 << 16));
    for _ in 0..len {
        items.push(read_item(src)?);
    }
    Ok(items)
}

fn error_kind_from_tag(tag: u32) -> Result<ErrorKind> {
    ErrorKind::from_u32(tag)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown error kind tag"))
}

pub fn write_rpc_error(dest: &mut dyn Write, error: &RpcError) -> Result<()> {
    let tag = error.kind.to_u32().expect("ErrorKind always has a u32 representation");
    write_u32(dest, tag)?;
    write_string(dest, &error.message)?;
    match &error.inner {
        Some(inner) => {
            write_bool(dest, true)?;
            write_rpc_error(dest, inner)?;
        }
        None => write_bool(dest, false)?,
    }
    Ok(())
}

pub fn read_rpc_error(src: &mut dyn Read) -> Result<RpcError> {
    let kind = error_kind_from_tag(read_u32(src)?)?;
    let message = read_string(src)?;
    let inner = if read_bool(src)? { Some(Box::new(read_rpc_error(src)?)) } else { None };
    Ok(RpcError { kind, message, inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn path_round_trips() {
        let path = Path::parse("/a/b/c");
        let mut buf = Vec::new();
        write_path(&mut buf, &path).unwrap();
        let decoded = read_path(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, path);
    }

    #[test]
    fn rpc_error_round_trips_with_nested_inner() {
        let inner = RpcError::not_found("/a");
        let outer = inner.clone().wrap(ErrorKind::Rpc, "invocation failed");
        let mut buf = Vec::new();
        write_rpc_error(&mut buf, &outer).unwrap();
        let decoded = read_rpc_error(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, outer);
    }

    #[test]
    fn string_round_trips_utf8() {
        let mut buf = Vec::new();
        write_string(&mut buf, "héllo").unwrap();
        let decoded = read_string(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, "héllo");
    }
}
