//! Constructs that manipulate the stream itself rather than just consuming bytes from
//! it: jumping (`Pointer`), looking without consuming (`Peek`), recording positions
//! (`Anchor`), padding, reinterpreting the byte view (`Restream`, `ByteSwapped`),
//! bounding a sub by a length prefix (`Prefixed`), and codec tunnels (`Compressed`).

use std::io::Cursor;
use std::sync::Arc;

use super::{Construct, Kind};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::path::Expr;
use crate::stream::{writer, Stream};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCodec {
    Zlib,
}

#[derive(Clone)]
pub(crate) enum Resizer {
    /// Expands each outer byte into 8 "bit bytes" (0x00/0x01) and back. Used to give a
    /// sub-construct a bit-at-a-time view of the stream.
    Bits { msb_first: bool },
}

impl Resizer {
    fn expand(&self, outer: &[u8]) -> Vec<u8> {
        match self {
            Resizer::Bits { msb_first } => {
                let mut bits = Vec::with_capacity(outer.len() * 8);
                for &byte in outer {
                    for i in 0..8 {
                        let shift = if *msb_first { 7 - i } else { i };
                        bits.push((byte >> shift) & 1);
                    }
                }
                bits
            }
        }
    }

    fn contract(&self, inner: &[u8]) -> Result<Vec<u8>> {
        match self {
            Resizer::Bits { msb_first } => {
                if inner.len() % 8 != 0 {
                    return Err(Error::String("bit-stream length is not a multiple of 8".into()));
                }
                let mut out = Vec::with_capacity(inner.len() / 8);
                for chunk in inner.chunks(8) {
                    let mut byte = 0u8;
                    for (i, &bit) in chunk.iter().enumerate() {
                        let shift = if *msb_first { 7 - i } else { i };
                        byte |= (bit & 1) << shift;
                    }
                    out.push(byte);
                }
                Ok(out)
            }
        }
    }

    fn outer_len_for_inner(&self, inner_len: usize) -> usize {
        match self {
            Resizer::Bits { .. } => inner_len.div_ceil(8),
        }
    }
}

impl Construct {
    pub fn pointer(offset: impl Into<Expr>, sub: Construct) -> Self {
        Construct::new(Kind::Pointer { offset: offset.into(), sub: Arc::new(sub) })
    }

    pub fn peek(sub: Construct) -> Self {
        Construct::new(Kind::Peek { sub: Arc::new(sub), build: false })
    }

    /// Like [`Construct::peek`], but build is attempted too (with rollback on failure)
    /// instead of being a no-op.
    pub fn peek_buildable(sub: Construct) -> Self {
        Construct::new(Kind::Peek { sub: Arc::new(sub), build: true })
    }

    pub fn anchor() -> Self {
        Construct::new(Kind::Anchor)
    }

    pub fn aligned(modulus: usize, pad: u8, sub: Construct) -> Self {
        assert!(modulus >= 2, "Aligned requires modulus >= 2");
        Construct::new(Kind::Aligned { modulus, pad, sub: Arc::new(sub) })
    }

    pub fn padding(length: usize, pad: u8, strict: bool) -> Self {
        Construct::new(Kind::Padding { length, pad, strict })
    }

    pub fn padded(length: usize, pad: u8, sub: Construct) -> Self {
        Construct::new(Kind::Padded { length, pad, sub: Arc::new(sub) })
    }

    /// A bitwise view: `sub` sees one "bit byte" (0x00/0x01) per bit of the underlying
    /// stream, most-significant bit first.
    pub fn bitwise(sub: Construct) -> Self {
        Construct::new(Kind::Restream { sub: Arc::new(sub), resizer: Resizer::Bits { msb_first: true } })
    }

    pub fn bitwise_lsb_first(sub: Construct) -> Self {
        Construct::new(Kind::Restream { sub: Arc::new(sub), resizer: Resizer::Bits { msb_first: false } })
    }

    pub fn byte_swapped(size: usize, sub: Construct) -> Self {
        Construct::new(Kind::ByteSwapped { size, sub: Arc::new(sub) })
    }

    pub fn prefixed(length_field: Construct, sub: Construct) -> Self {
        Construct::new(Kind::Prefixed { length: Arc::new(length_field), sub: Arc::new(sub) })
    }

    pub fn compressed(codec: CompressionCodec, sub: Construct) -> Self {
        Construct::new(Kind::Compressed { codec, sub: Arc::new(sub) })
    }
}

pub(super) fn parse_pointer(stream: &mut dyn Stream, ctx: &Context, offset: &Expr, sub: &Arc<Construct>) -> Result<Value> {
    let pos = stream.tell()?;
    let off = offset.eval_int(ctx, None)?;
    stream.seek_abs(off as i64)?;
    let value = sub.do_parse(stream, ctx);
    stream.seek_abs(pos as i64)?;
    value
}

pub(super) fn build_pointer(value: &Value, stream: &mut dyn Stream, ctx: &Context, offset: &Expr, sub: &Arc<Construct>) -> Result<()> {
    let pos = stream.tell()?;
    let off = offset.eval_int(ctx, None)?;
    stream.seek_abs(off as i64)?;
    let result = sub.do_build(value, stream, ctx);
    stream.seek_abs(pos as i64)?;
    result
}

pub(super) fn parse_peek(stream: &mut dyn Stream, ctx: &Context, sub: &Arc<Construct>) -> Result<Value> {
    let pos = stream.tell()?;
    let result = sub.do_parse(stream, ctx);
    stream.seek_abs(pos as i64)?;
    match result {
        Ok(v) => Ok(v),
        Err(e) if e.is_field_error() => Ok(Value::None),
        Err(e) => Err(e),
    }
}

pub(super) fn build_peek(value: &Value, stream: &mut dyn Stream, ctx: &Context, sub: &Arc<Construct>, build: bool) -> Result<()> {
    if !build {
        return Ok(());
    }
    let pos = stream.tell()?;
    if sub.do_build(value, stream, ctx).is_err() {
        stream.seek_abs(pos as i64)?;
    }
    Ok(())
}

pub(super) fn parse_aligned(stream: &mut dyn Stream, ctx: &Context, modulus: usize, _pad: u8, sub: &Arc<Construct>) -> Result<Value> {
    let value = sub.do_parse(stream, ctx)?;
    let pos = stream.tell()?;
    let rem = (pos as usize) % modulus;
    if rem != 0 {
        stream.read_exact_n(modulus - rem)?;
    }
    Ok(value)
}

pub(super) fn build_aligned(value: &Value, stream: &mut dyn Stream, ctx: &Context, modulus: usize, pad: u8, sub: &Arc<Construct>) -> Result<()> {
    sub.do_build(value, stream, ctx)?;
    let pos = stream.tell()?;
    let rem = (pos as usize) % modulus;
    if rem != 0 {
        stream.write_all_bytes(&vec![pad; modulus - rem])?;
    }
    Ok(())
}

pub(super) fn parse_padding(stream: &mut dyn Stream, length: usize, pad: u8, strict: bool) -> Result<()> {
    let pos = stream.tell()?;
    let bytes = stream.read_exact_n(length)?;
    if strict && bytes.iter().any(|&b| b != pad) {
        return Err(Error::Padding { offset: pos });
    }
    Ok(())
}

pub(super) fn build_padding(stream: &mut dyn Stream, length: usize, pad: u8) -> Result<()> {
    stream.write_all_bytes(&vec![pad; length])
}

pub(super) fn parse_padded(stream: &mut dyn Stream, ctx: &Context, length: usize, sub: &Arc<Construct>) -> Result<Value> {
    let start = stream.tell()?;
    let value = sub.do_parse(stream, ctx)?;
    stream.seek_abs((start + length as u64) as i64)?;
    Ok(value)
}

pub(super) fn build_padded(value: &Value, stream: &mut dyn Stream, ctx: &Context, length: usize, pad: u8, sub: &Arc<Construct>) -> Result<()> {
    let mut buf = writer();
    sub.do_build(value, &mut buf, ctx)?;
    let bytes = buf.into_inner();
    if bytes.len() > length {
        return Err(Error::field(length, bytes.len()));
    }
    stream.write_all_bytes(&bytes)?;
    stream.write_all_bytes(&vec![pad; length - bytes.len()])?;
    Ok(())
}

pub(super) fn parse_restream(stream: &mut dyn Stream, ctx: &Context, sub: &Arc<Construct>, resizer: &Resizer) -> Result<Value> {
    let outer = match sub.do_sizeof(ctx) {
        Ok(inner_len) => stream.read_exact_n(resizer.outer_len_for_inner(inner_len))?,
        Err(_) => stream.read_to_end_vec()?,
    };
    let inner_bytes = resizer.expand(&outer);
    let mut inner_stream = Cursor::new(inner_bytes);
    sub.do_parse(&mut inner_stream, ctx)
}

pub(super) fn build_restream(value: &Value, stream: &mut dyn Stream, ctx: &Context, sub: &Arc<Construct>, resizer: &Resizer) -> Result<()> {
    let mut inner_stream = writer();
    sub.do_build(value, &mut inner_stream, ctx)?;
    let outer = resizer.contract(&inner_stream.into_inner())?;
    stream.write_all_bytes(&outer)
}

pub(super) fn parse_byteswapped(stream: &mut dyn Stream, ctx: &Context, size: usize, sub: &Arc<Construct>) -> Result<Value> {
    let mut bytes = stream.read_exact_n(size)?;
    bytes.reverse();
    let mut inner_stream = Cursor::new(bytes);
    sub.do_parse(&mut inner_stream, ctx)
}

pub(super) fn build_byteswapped(value: &Value, stream: &mut dyn Stream, ctx: &Context, size: usize, sub: &Arc<Construct>) -> Result<()> {
    let mut inner_stream = writer();
    sub.do_build(value, &mut inner_stream, ctx)?;
    let mut bytes = inner_stream.into_inner();
    if bytes.len() != size {
        return Err(Error::field(size, bytes.len()));
    }
    bytes.reverse();
    stream.write_all_bytes(&bytes)
}

pub(super) fn parse_prefixed(stream: &mut dyn Stream, ctx: &Context, length: &Arc<Construct>, sub: &Arc<Construct>) -> Result<Value> {
    let len_value = length.do_parse(stream, ctx)?;
    let n = len_value.as_int()? as usize;
    let bytes = stream.read_exact_n(n)?;
    let mut inner_stream = Cursor::new(bytes);
    sub.do_parse(&mut inner_stream, ctx)
}

pub(super) fn build_prefixed(value: &Value, stream: &mut dyn Stream, ctx: &Context, length: &Arc<Construct>, sub: &Arc<Construct>) -> Result<()> {
    let mut inner_stream = writer();
    sub.do_build(value, &mut inner_stream, ctx)?;
    let bytes = inner_stream.into_inner();
    length.do_build(&Value::Int(bytes.len() as i128), stream, ctx)?;
    stream.write_all_bytes(&bytes)
}

pub(super) fn parse_compressed(stream: &mut dyn Stream, ctx: &Context, codec: CompressionCodec, sub: &Arc<Construct>) -> Result<Value> {
    let compressed = stream.read_to_end_vec()?;
    let decompressed = decompress(codec, &compressed)?;
    let mut inner_stream = Cursor::new(decompressed);
    sub.do_parse(&mut inner_stream, ctx)
}

pub(super) fn build_compressed(value: &Value, stream: &mut dyn Stream, ctx: &Context, codec: CompressionCodec, sub: &Arc<Construct>) -> Result<()> {
    let mut inner_stream = writer();
    sub.do_build(value, &mut inner_stream, ctx)?;
    let compressed = compress(codec, &inner_stream.into_inner())?;
    stream.write_all_bytes(&compressed)
}

#[cfg(feature = "zlib")]
fn compress(codec: CompressionCodec, data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write as _;
    match codec {
        CompressionCodec::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

#[cfg(feature = "zlib")]
fn decompress(codec: CompressionCodec, data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;
    use std::io::Read as _;
    match codec {
        CompressionCodec::Zlib => {
            let mut decoder = ZlibDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

#[cfg(not(feature = "zlib"))]
fn compress(_codec: CompressionCodec, _data: &[u8]) -> Result<Vec<u8>> {
    Err(Error::String("Compressed requires the `zlib` feature".into()))
}

#[cfg(not(feature = "zlib"))]
fn decompress(_codec: CompressionCodec, _data: &[u8]) -> Result<Vec<u8>> {
    Err(Error::String("Compressed requires the `zlib` feature".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_reads_from_an_absolute_offset_and_restores_position() {
        let c = Construct::struct_(vec![
            Construct::pointer(4usize, Construct::u8_()).named("far"),
            Construct::u8_().named("near"),
        ]);
        let parsed = c.parse(&[0xAA, 0, 0, 0, 0x42]).unwrap();
        let container = parsed.as_container().unwrap();
        assert_eq!(container.get("far").unwrap().as_int().unwrap(), 0x42);
        assert_eq!(container.get("near").unwrap().as_int().unwrap(), 0xAA);
    }

    #[test]
    fn peek_swallows_field_errors_but_not_other_errors() {
        let c = Construct::peek(Construct::u16_be());
        assert_eq!(c.parse(&[0x01]).unwrap(), Value::None);
        assert_eq!(c.parse(&[0x00, 0x01]).unwrap(), Value::Int(1));
    }

    #[test]
    fn peek_does_not_advance_the_stream() {
        let c = Construct::struct_(vec![
            Construct::peek(Construct::u8_()).named("preview"),
            Construct::u8_().named("actual"),
        ]);
        let parsed = c.parse(&[9]).unwrap();
        let container = parsed.as_container().unwrap();
        assert_eq!(container.get("preview").unwrap().as_int().unwrap(), 9);
        assert_eq!(container.get("actual").unwrap().as_int().unwrap(), 9);
    }

    #[test]
    fn aligned_pads_the_stream_up_to_the_modulus() {
        let c = Construct::struct_(vec![
            Construct::aligned(4, 0, Construct::u8_()).named("byte"),
            Construct::u8_().named("next"),
        ]);
        let parsed = c.parse(&[1, 0, 0, 0, 7]).unwrap();
        assert_eq!(parsed.as_container().unwrap().get("next").unwrap().as_int().unwrap(), 7);
        assert_eq!(c.build(&parsed).unwrap(), vec![1, 0, 0, 0, 7]);
    }

    #[test]
    fn padding_strict_rejects_non_pad_bytes() {
        assert!(parse_padding(&mut crate::stream::reader(&[0, 0]), 2, 0xFF, true).is_err());
        assert!(parse_padding(&mut crate::stream::reader(&[0xFF, 0xFF]), 2, 0xFF, true).is_ok());
    }

    #[test]
    fn padded_truncates_build_but_fails_if_sub_overflows() {
        let c = Construct::padded(4, 0, Construct::u8_());
        let parsed = c.parse(&[9, 0, 0, 0]).unwrap();
        assert_eq!(c.build(&parsed).unwrap(), vec![9, 0, 0, 0]);
    }

    #[test]
    fn byte_swapped_reverses_the_byte_order_before_decoding() {
        let c = Construct::byte_swapped(4, Construct::u32_be());
        assert_eq!(c.parse(&[0x04, 0x03, 0x02, 0x01]).unwrap(), Value::Int(0x01020304));
        assert_eq!(c.build(&Value::Int(0x01020304)).unwrap(), vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn prefixed_bounds_the_sub_construct_to_its_declared_length() {
        let c = Construct::prefixed(Construct::u8_(), Construct::greedy_bytes());
        let parsed = c.parse(&[2, 0xAA, 0xBB, 0xFF]).unwrap();
        assert_eq!(parsed.as_bytes().unwrap(), &[0xAA, 0xBB]);
        assert_eq!(c.build(&parsed).unwrap(), vec![2, 0xAA, 0xBB]);
    }

    #[test]
    fn bitwise_gives_the_sub_construct_a_bit_at_a_time_view() {
        let c = Construct::bitwise(Construct::array(8usize, Construct::u8_()));
        let parsed = c.parse(&[0b1010_0000]).unwrap();
        let bits = parsed.as_list().unwrap();
        assert_eq!(bits.get(0).unwrap().as_int().unwrap(), 1);
        assert_eq!(bits.get(1).unwrap().as_int().unwrap(), 0);
        assert_eq!(c.build(&parsed).unwrap(), vec![0b1010_0000]);
    }

    #[cfg(not(feature = "zlib"))]
    #[test]
    fn compressed_errors_without_the_zlib_feature() {
        let c = Construct::compressed(CompressionCodec::Zlib, Construct::greedy_bytes());
        assert!(c.parse(&[1, 2, 3]).is_err());
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn compressed_round_trips_through_zlib() {
        let c = Construct::compressed(CompressionCodec::Zlib, Construct::greedy_bytes());
        let original = Value::Bytes(b"hello hello hello hello".to_vec());
        let bytes = c.build(&original).unwrap();
        assert_eq!(c.parse(&bytes).unwrap(), original);
    }
}
