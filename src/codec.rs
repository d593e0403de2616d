//! Length-prefixed, little-endian encodings for everything that touches
//! disk: kv records, logged operations, column family configs and bloom
//! filter bitmaps. Every encoder takes a `compressed` flag; when set the
//! encoded buffer is wrapped with snappy raw compression and the decoder
//! reverses it. Round-trips are byte-exact.

use crate::bloom::BloomFilter;
use crate::column_family::ColumnFamilyConfig;
use crate::error::Error;
use crate::kv::{KeyValue, OpCode, Operation};
use crate::Result;

pub fn serialize_kv(kv: &KeyValue, compressed: bool) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(16 + kv.key.len() + kv.value.len());
    buf.extend_from_slice(&(kv.key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(kv.value.len() as u32).to_le_bytes());
    buf.extend_from_slice(&kv.ttl.to_le_bytes());
    buf.extend_from_slice(&kv.key);
    buf.extend_from_slice(&kv.value);
    maybe_compress(buf, compressed)
}

pub fn deserialize_kv(buf: &[u8], compressed: bool) -> Result<KeyValue> {
    let buf = maybe_decompress(buf, compressed)?;
    let mut r = Reader::new(&buf);
    let key_len = r.read_u32()? as usize;
    let value_len = r.read_u32()? as usize;
    let ttl = r.read_i64()?;
    let key = r.read_bytes(key_len)?;
    let value = r.read_bytes(value_len)?;
    Ok(KeyValue { key, value, ttl })
}

pub fn serialize_operation(op: &Operation, compressed: bool) -> Result<Vec<u8>> {
    let name = op.column_family.as_bytes();
    let mut buf = Vec::with_capacity(5 + name.len());
    buf.push(op.op_code.as_u8());
    buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(&serialize_kv(&op.kv, false)?);
    maybe_compress(buf, compressed)
}

pub fn deserialize_operation(buf: &[u8], compressed: bool) -> Result<Operation> {
    let buf = maybe_decompress(buf, compressed)?;
    let mut r = Reader::new(&buf);
    let op_code = OpCode::from_u8(r.read_u8()?)
        .ok_or_else(|| Error::Corrupted("unknown operation code".into()))?;
    let name_len = r.read_u32()? as usize;
    let column_family = String::from_utf8(r.read_bytes(name_len)?)
        .map_err(|_| Error::Corrupted("column family name is not utf-8".into()))?;
    let kv = deserialize_kv(r.rest(), false)?;
    Ok(Operation {
        op_code,
        column_family,
        kv,
    })
}

pub fn serialize_cf_config(config: &ColumnFamilyConfig) -> Result<Vec<u8>> {
    let name = config.name.as_bytes();
    let mut buf = Vec::with_capacity(17 + name.len());
    buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(&config.flush_threshold.to_le_bytes());
    buf.extend_from_slice(&config.max_level.to_le_bytes());
    buf.extend_from_slice(&config.probability.to_le_bytes());
    buf.push(config.compressed as u8);
    Ok(buf)
}

pub fn deserialize_cf_config(buf: &[u8]) -> Result<ColumnFamilyConfig> {
    let mut r = Reader::new(buf);
    let name_len = r.read_u32()? as usize;
    let name = String::from_utf8(r.read_bytes(name_len)?)
        .map_err(|_| Error::Corrupted("column family name is not utf-8".into()))?;
    let flush_threshold = r.read_i32()?;
    let max_level = r.read_i32()?;
    let probability = f32::from_le_bytes(r.read_array::<4>()?);
    let compressed = r.read_u8()? != 0;
    Ok(ColumnFamilyConfig {
        name,
        flush_threshold,
        max_level,
        probability,
        compressed,
    })
}

pub fn serialize_bloomfilter(filter: &BloomFilter, compressed: bool) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4 + filter.bitmap().len());
    buf.extend_from_slice(&filter.len().to_le_bytes());
    buf.extend_from_slice(filter.bitmap());
    maybe_compress(buf, compressed)
}

pub fn deserialize_bloomfilter(buf: &[u8], compressed: bool) -> Result<BloomFilter> {
    let buf = maybe_decompress(buf, compressed)?;
    let mut r = Reader::new(&buf);
    let len = r.read_u32()? as usize;
    let bitmap = r.read_bytes(len)?;
    Ok(BloomFilter::from_bitmap(bitmap))
}

fn maybe_compress(buf: Vec<u8>, compressed: bool) -> Result<Vec<u8>> {
    if compressed {
        Ok(snap::raw::Encoder::new().compress_vec(&buf)?)
    } else {
        Ok(buf)
    }
}

fn maybe_decompress(buf: &[u8], compressed: bool) -> Result<Vec<u8>> {
    if compressed {
        Ok(snap::raw::Decoder::new().decompress_vec(buf)?)
    } else {
        Ok(buf.to_vec())
    }
}

/// Cursor over an encoded buffer; every read is bounds-checked so a
/// truncated or garbage page surfaces as `Corrupted` instead of a panic.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.pos + N > self.buf.len() {
            return Err(Error::Corrupted("record truncated".into()));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if self.pos + len > self.buf.len() {
            return Err(Error::Corrupted("record truncated".into()));
        }
        let out = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}
