//! On-disk chunk format
//!
//! Every chunk blob is a fixed header followed by the (optionally
//! compressed) element payload. All integers are little-endian.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "GSCK"
//! 4       1     format version
//! 5       1     storage dtype code
//! 6       1     compression code (0 = none, 1 = zstd)
//! 7       1     reserved
//! 8       8     element count
//! 16      4     payload length in bytes
//! 20      4     CRC32 of the payload
//! 24      ..    payload
//! ```
//!
//! The payload is the chunk's elements in C order, each encoded in the
//! storage dtype. Values handed to [`encode_chunk`] are already in the storage
//! domain: integers as exact floats, missing cells mapped to a fill code by
//! the caller. Float dtypes keep NaN.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use gridstore_core::{DType, Error, Result};
use std::io::Cursor;

/// Magic bytes at the start of every chunk
pub const CHUNK_MAGIC: [u8; 4] = *b"GSCK";

/// Current chunk format version
pub const CHUNK_FORMAT_VERSION: u8 = 1;

/// Size of the fixed chunk header
pub const CHUNK_HEADER_SIZE: usize = 24;

const COMPRESSION_NONE: u8 = 0;
const COMPRESSION_ZSTD: u8 = 1;

/// Payload compression applied to a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkCompression {
    /// Raw element bytes
    None,
    /// zstd at the given level
    Zstd(i32),
}

fn write_elements(values: &[f64], dtype: DType) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(values.len() * dtype.size_bytes());
    for &v in values {
        match dtype {
            DType::Float32 => out.write_f32::<LittleEndian>(v as f32)?,
            DType::Float64 => out.write_f64::<LittleEndian>(v)?,
            DType::Int8 => out.write_i8(v.round() as i8)?,
            DType::Int16 => out.write_i16::<LittleEndian>(v.round() as i16)?,
            DType::Int32 => out.write_i32::<LittleEndian>(v.round() as i32)?,
            DType::Int64 => out.write_i64::<LittleEndian>(v.round() as i64)?,
            DType::UInt8 => out.write_u8(v.round() as u8)?,
            DType::UInt16 => out.write_u16::<LittleEndian>(v.round() as u16)?,
            DType::UInt32 => out.write_u32::<LittleEndian>(v.round() as u32)?,
        }
    }
    Ok(out)
}

fn read_elements(bytes: &[u8], dtype: DType, count: usize) -> Result<Vec<f64>> {
    if bytes.len() != count * dtype.size_bytes() {
        return Err(Error::Corruption(format!(
            "chunk payload holds {} bytes, expected {} {} elements",
            bytes.len(),
            count,
            dtype
        )));
    }
    let mut rdr = Cursor::new(bytes);
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let v = match dtype {
            DType::Float32 => rdr.read_f32::<LittleEndian>()? as f64,
            DType::Float64 => rdr.read_f64::<LittleEndian>()?,
            DType::Int8 => rdr.read_i8()? as f64,
            DType::Int16 => rdr.read_i16::<LittleEndian>()? as f64,
            DType::Int32 => rdr.read_i32::<LittleEndian>()? as f64,
            DType::Int64 => rdr.read_i64::<LittleEndian>()? as f64,
            DType::UInt8 => rdr.read_u8()? as f64,
            DType::UInt16 => rdr.read_u16::<LittleEndian>()? as f64,
            DType::UInt32 => rdr.read_u32::<LittleEndian>()? as f64,
        };
        out.push(v);
    }
    Ok(out)
}

/// Serialize chunk elements into a blob
pub fn encode_chunk(values: &[f64], dtype: DType, compression: ChunkCompression) -> Result<Vec<u8>> {
    let raw = write_elements(values, dtype)?;
    let (code, payload) = match compression {
        ChunkCompression::None => (COMPRESSION_NONE, raw),
        ChunkCompression::Zstd(level) => (COMPRESSION_ZSTD, zstd::encode_all(raw.as_slice(), level)?),
    };
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| Error::Storage(format!("chunk payload of {} bytes too large", payload.len())))?;

    let mut out = Vec::with_capacity(CHUNK_HEADER_SIZE + payload.len());
    out.extend_from_slice(&CHUNK_MAGIC);
    out.write_u8(CHUNK_FORMAT_VERSION)?;
    out.write_u8(dtype.code())?;
    out.write_u8(code)?;
    out.write_u8(0)?;
    out.write_u64::<LittleEndian>(values.len() as u64)?;
    out.write_u32::<LittleEndian>(payload_len)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parse a chunk blob back into its storage dtype and elements
pub fn decode_chunk(bytes: &[u8]) -> Result<(DType, Vec<f64>)> {
    if bytes.len() < CHUNK_HEADER_SIZE {
        return Err(Error::Corruption(format!(
            "chunk of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    if bytes[0..4] != CHUNK_MAGIC {
        return Err(Error::Corruption("bad chunk magic".into()));
    }
    let mut rdr = Cursor::new(&bytes[4..CHUNK_HEADER_SIZE]);
    let version = rdr.read_u8()?;
    if version != CHUNK_FORMAT_VERSION {
        return Err(Error::Corruption(format!("unsupported chunk version {}", version)));
    }
    let dtype_code = rdr.read_u8()?;
    let dtype = DType::from_code(dtype_code)
        .ok_or_else(|| Error::Corruption(format!("unknown dtype code {}", dtype_code)))?;
    let compression = rdr.read_u8()?;
    let _reserved = rdr.read_u8()?;
    let count = rdr.read_u64::<LittleEndian>()? as usize;
    let payload_len = rdr.read_u32::<LittleEndian>()? as usize;
    let crc = rdr.read_u32::<LittleEndian>()?;

    let payload = &bytes[CHUNK_HEADER_SIZE..];
    if payload.len() != payload_len {
        return Err(Error::Corruption(format!(
            "chunk payload truncated: {} of {} bytes",
            payload.len(),
            payload_len
        )));
    }
    if crc32fast::hash(payload) != crc {
        return Err(Error::Corruption("chunk checksum mismatch".into()));
    }
    let raw = match compression {
        COMPRESSION_NONE => payload.to_vec(),
        COMPRESSION_ZSTD => zstd::decode_all(payload)?,
        other => return Err(Error::Corruption(format!("unknown compression code {}", other))),
    };
    Ok((dtype, read_elements(&raw, dtype, count)?))
}
