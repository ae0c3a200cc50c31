//! Fixed-width fields, formatted integers/floats, varints, and the string family.

use byteorder::{ReadBytesExt, WriteBytesExt, BE, LE};

use super::{Construct, Kind};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::path::Expr;
use crate::stream::Stream;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    W1,
    W2,
    W3,
    W4,
    W8,
}

impl IntWidth {
    pub fn byte_len(self) -> usize {
        match self {
            IntWidth::W1 => 1,
            IntWidth::W2 => 2,
            IntWidth::W3 => 3,
            IntWidth::W4 => 4,
            IntWidth::W8 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FloatWidth {
    F32,
    F64,
}

impl FloatWidth {
    pub fn byte_len(self) -> usize {
        match self {
            FloatWidth::F32 => 4,
            FloatWidth::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDir {
    Right,
    Left,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimDir {
    Right,
    Left,
}

/// Text codecs a [`String`]/[`CString`]/[`GreedyString`] may decode through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Utf8,
    Ascii,
    Latin1,
}

impl Codec {
    fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Codec::Utf8 => {
                String::from_utf8(bytes.to_vec()).map_err(|e| Error::String(format!("invalid utf-8: {e}")))
            }
            Codec::Ascii => {
                if bytes.iter().any(|b| *b > 0x7f) {
                    return Err(Error::String("invalid ascii byte".into()));
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            Codec::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    fn encode(self, s: &str) -> Result<Vec<u8>> {
        match self {
            Codec::Utf8 => Ok(s.as_bytes().to_vec()),
            Codec::Ascii => {
                if !s.is_ascii() {
                    return Err(Error::String("string is not ascii".into()));
                }
                Ok(s.as_bytes().to_vec())
            }
            Codec::Latin1 => s
                .chars()
                .map(|c| u8::try_from(c as u32).map_err(|_| Error::String("char out of latin-1 range".into())))
                .collect(),
        }
    }
}

// ---- Constructors ----

impl Construct {
    pub fn bytes(n: usize) -> Self {
        Construct::new(Kind::StaticBytes(n))
    }

    pub fn bytes_dyn(length: impl Into<Expr>) -> Self {
        Construct::new(Kind::MetaBytes(length.into()))
    }

    pub fn int(width: IntWidth, signed: bool, endian: Endian) -> Self {
        Construct::new(Kind::Int { width, signed, endian })
    }

    pub fn u8_() -> Self {
        Construct::int(IntWidth::W1, false, Endian::Big)
    }
    pub fn i8_() -> Self {
        Construct::int(IntWidth::W1, true, Endian::Big)
    }
    /// Single unsigned byte; the common sub-construct for lazy single-field tests.
    pub fn byte() -> Self {
        Construct::u8_()
    }

    pub fn u16_be() -> Self {
        Construct::int(IntWidth::W2, false, Endian::Big)
    }
    pub fn u16_le() -> Self {
        Construct::int(IntWidth::W2, false, Endian::Little)
    }
    pub fn i16_be() -> Self {
        Construct::int(IntWidth::W2, true, Endian::Big)
    }
    pub fn i16_le() -> Self {
        Construct::int(IntWidth::W2, true, Endian::Little)
    }

    pub fn u24_be() -> Self {
        Construct::int(IntWidth::W3, false, Endian::Big)
    }
    pub fn u24_le() -> Self {
        Construct::int(IntWidth::W3, false, Endian::Little)
    }
    pub fn i24_be() -> Self {
        Construct::int(IntWidth::W3, true, Endian::Big)
    }
    pub fn i24_le() -> Self {
        Construct::int(IntWidth::W3, true, Endian::Little)
    }

    pub fn u32_be() -> Self {
        Construct::int(IntWidth::W4, false, Endian::Big)
    }
    pub fn u32_le() -> Self {
        Construct::int(IntWidth::W4, false, Endian::Little)
    }
    pub fn i32_be() -> Self {
        Construct::int(IntWidth::W4, true, Endian::Big)
    }
    pub fn i32_le() -> Self {
        Construct::int(IntWidth::W4, true, Endian::Little)
    }

    pub fn u64_be() -> Self {
        Construct::int(IntWidth::W8, false, Endian::Big)
    }
    pub fn u64_le() -> Self {
        Construct::int(IntWidth::W8, false, Endian::Little)
    }
    pub fn i64_be() -> Self {
        Construct::int(IntWidth::W8, true, Endian::Big)
    }
    pub fn i64_le() -> Self {
        Construct::int(IntWidth::W8, true, Endian::Little)
    }

    pub fn f32_be() -> Self {
        Construct::new(Kind::Float { width: FloatWidth::F32, endian: Endian::Big })
    }
    pub fn f32_le() -> Self {
        Construct::new(Kind::Float { width: FloatWidth::F32, endian: Endian::Little })
    }
    pub fn f64_be() -> Self {
        Construct::new(Kind::Float { width: FloatWidth::F64, endian: Endian::Big })
    }
    pub fn f64_le() -> Self {
        Construct::new(Kind::Float { width: FloatWidth::F64, endian: Endian::Little })
    }

    pub fn varint() -> Self {
        Construct::new(Kind::VarInt)
    }

    pub fn greedy_bytes() -> Self {
        Construct::new(Kind::GreedyBytes)
    }

    pub fn fixed_string(length: impl Into<Expr>, pad: u8, pad_dir: PadDir, trim_dir: TrimDir) -> Self {
        Construct::new(Kind::FixedString { length: length.into(), pad, pad_dir, trim_dir, codec: None })
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        match kind_mut(&mut self) {
            Kind::FixedString { codec: c, .. } => *c = Some(codec),
            Kind::CString { codec: c, .. } => *c = Some(codec),
            _ => panic!("with_codec is only valid on String/CString constructs"),
        }
        self
    }

    pub fn cstring(terminators: Vec<u8>) -> Self {
        assert!(!terminators.is_empty(), "CString needs at least one terminator byte");
        Construct::new(Kind::CString { terminators, codec: None })
    }

    pub fn greedy_string(codec: Codec) -> Self {
        Construct::new(Kind::GreedyString { codec })
    }

    /// `Prefixed(length_field, GreedyString)` — a length-prefixed string, named per §4.2.
    pub fn pascal_string(length_field: Construct, codec: Codec) -> Self {
        Construct::new(Kind::Prefixed {
            length: std::sync::Arc::new(length_field),
            sub: std::sync::Arc::new(Construct::greedy_string(codec)),
        })
    }
}

/// `Kind` is behind `Arc<Kind>` so clones stay cheap; `with_codec` is only ever called
/// directly after a fresh constructor (refcount 1), so `Arc::get_mut` always succeeds here.
fn kind_mut(c: &mut Construct) -> &mut Kind {
    std::sync::Arc::get_mut(&mut c.kind).expect("with_codec must follow a fresh constructor")
}

// ---- parse/build ----

pub(super) fn parse_static_bytes(stream: &mut dyn Stream, n: usize) -> Result<Value> {
    Ok(Value::Bytes(stream.read_exact_n(n)?))
}

pub(super) fn build_static_bytes(stream: &mut dyn Stream, n: usize, value: &Value) -> Result<()> {
    let bytes = value.as_bytes()?;
    if bytes.len() != n {
        return Err(Error::field(n, bytes.len()));
    }
    stream.write_all_bytes(bytes)
}

pub(super) fn parse_meta_bytes(stream: &mut dyn Stream, ctx: &Context, len: &Expr) -> Result<Value> {
    let n = len.eval_usize(ctx, None)?;
    parse_static_bytes(stream, n)
}

pub(super) fn build_meta_bytes(stream: &mut dyn Stream, ctx: &Context, len: &Expr, value: &Value) -> Result<()> {
    let n = len.eval_usize(ctx, None)?;
    build_static_bytes(stream, n, value)
}

pub(super) fn parse_int(stream: &mut dyn Stream, width: IntWidth, signed: bool, endian: Endian) -> Result<Value> {
    let n = width.byte_len();
    let value = match (signed, endian) {
        (false, Endian::Big) => stream.read_uint::<BE>(n).map(|v| v as i128),
        (false, Endian::Little) => stream.read_uint::<LE>(n).map(|v| v as i128),
        (true, Endian::Big) => stream.read_int::<BE>(n).map(|v| v as i128),
        (true, Endian::Little) => stream.read_int::<LE>(n).map(|v| v as i128),
    }
    .map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::field(n, 0)
        } else {
            Error::Io(e)
        }
    })?;
    Ok(Value::Int(value))
}

pub(super) fn build_int(
    stream: &mut dyn Stream,
    width: IntWidth,
    signed: bool,
    endian: Endian,
    value: &Value,
) -> Result<()> {
    let n = width.byte_len();
    let raw = value.as_int()?;
    match (signed, endian) {
        (false, Endian::Big) => stream.write_uint::<BE>(raw as u64, n),
        (false, Endian::Little) => stream.write_uint::<LE>(raw as u64, n),
        (true, Endian::Big) => stream.write_int::<BE>(raw as i64, n),
        (true, Endian::Little) => stream.write_int::<LE>(raw as i64, n),
    }?;
    Ok(())
}

pub(super) fn parse_float(stream: &mut dyn Stream, width: FloatWidth, endian: Endian) -> Result<Value> {
    let value = match (width, endian) {
        (FloatWidth::F32, Endian::Big) => stream.read_f32::<BE>()? as f64,
        (FloatWidth::F32, Endian::Little) => stream.read_f32::<LE>()? as f64,
        (FloatWidth::F64, Endian::Big) => stream.read_f64::<BE>()?,
        (FloatWidth::F64, Endian::Little) => stream.read_f64::<LE>()?,
    };
    Ok(Value::Float(value))
}

pub(super) fn build_float(stream: &mut dyn Stream, width: FloatWidth, endian: Endian, value: &Value) -> Result<()> {
    let f = f64::try_from(value)?;
    match (width, endian) {
        (FloatWidth::F32, Endian::Big) => stream.write_f32::<BE>(f as f32)?,
        (FloatWidth::F32, Endian::Little) => stream.write_f32::<LE>(f as f32)?,
        (FloatWidth::F64, Endian::Big) => stream.write_f64::<BE>(f)?,
        (FloatWidth::F64, Endian::Little) => stream.write_f64::<LE>(f)?,
    }
    Ok(())
}

pub(super) fn parse_varint(stream: &mut dyn Stream) -> Result<Value> {
    let mut result: u128 = 0;
    let mut shift = 0u32;
    loop {
        let byte = stream.read_u8().map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::field(1, 0)
            } else {
                Error::Io(e)
            }
        })?;
        result |= u128::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 128 {
            return Err(Error::String("varint too long".into()));
        }
    }
    Ok(Value::Int(result as i128))
}

pub(super) fn build_varint(stream: &mut dyn Stream, value: &Value) -> Result<()> {
    let mut n = value.as_int()?;
    if n < 0 {
        return Err(Error::String("VarInt cannot encode a negative value".into()));
    }
    loop {
        let mut byte = (n & 0x7f) as u8;
        n >>= 7;
        if n != 0 {
            byte |= 0x80;
            stream.write_u8(byte)?;
        } else {
            stream.write_u8(byte)?;
            break;
        }
    }
    Ok(())
}

fn strip_pad(bytes: &[u8], pad: u8, dir: PadDir) -> &[u8] {
    match dir {
        PadDir::Right => {
            let end = bytes.iter().rposition(|&b| b != pad).map_or(0, |i| i + 1);
            &bytes[..end]
        }
        PadDir::Left => {
            let start = bytes.iter().position(|&b| b != pad).unwrap_or(bytes.len());
            &bytes[start..]
        }
        PadDir::Center => {
            let start = bytes.iter().position(|&b| b != pad).unwrap_or(bytes.len());
            let end = bytes.iter().rposition(|&b| b != pad).map_or(start, |i| i + 1);
            if start >= end {
                &[]
            } else {
                &bytes[start..end]
            }
        }
    }
}

pub(super) fn parse_fixed_string(
    stream: &mut dyn Stream,
    ctx: &Context,
    length: &Expr,
    pad: u8,
    pad_dir: PadDir,
    codec: Option<&Codec>,
) -> Result<Value> {
    let n = length.eval_usize(ctx, None)?;
    let raw = stream.read_exact_n(n)?;
    let stripped = strip_pad(&raw, pad, pad_dir);
    match codec {
        Some(c) => Ok(Value::Str(c.decode(stripped)?)),
        None => Ok(Value::Bytes(stripped.to_vec())),
    }
}

pub(super) fn build_fixed_string(
    stream: &mut dyn Stream,
    ctx: &Context,
    length: &Expr,
    pad: u8,
    trim_dir: TrimDir,
    codec: Option<&Codec>,
    value: &Value,
) -> Result<()> {
    let n = length.eval_usize(ctx, None)?;
    let mut encoded = match codec {
        Some(c) => c.encode(value.as_str()?)?,
        None => value.as_bytes()?.to_vec(),
    };
    if encoded.len() > n {
        match trim_dir {
            TrimDir::Right => encoded.truncate(n),
            TrimDir::Left => {
                let start = encoded.len() - n;
                encoded.drain(..start);
            }
        }
    } else if encoded.len() < n {
        let pad_len = n - encoded.len();
        encoded.extend(std::iter::repeat(pad).take(pad_len));
    }
    stream.write_all_bytes(&encoded)
}

pub(super) fn parse_cstring(stream: &mut dyn Stream, terminators: &[u8], codec: Option<&Codec>) -> Result<Value> {
    let mut buf = Vec::new();
    loop {
        let b = stream.read_u8().map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::field(1, 0)
            } else {
                Error::Io(e)
            }
        })?;
        if terminators.contains(&b) {
            break;
        }
        buf.push(b);
    }
    match codec {
        Some(c) => Ok(Value::Str(c.decode(&buf)?)),
        None => Ok(Value::Bytes(buf)),
    }
}

pub(super) fn build_cstring(
    stream: &mut dyn Stream,
    terminators: &[u8],
    codec: Option<&Codec>,
    value: &Value,
) -> Result<()> {
    let encoded = match codec {
        Some(c) => c.encode(value.as_str()?)?,
        None => value.as_bytes()?.to_vec(),
    };
    stream.write_all_bytes(&encoded)?;
    stream.write_u8(terminators[0])?;
    Ok(())
}

pub(super) fn parse_greedy_string(stream: &mut dyn Stream, codec: Codec) -> Result<Value> {
    let buf = stream.read_to_end_vec()?;
    Ok(Value::Str(codec.decode(&buf)?))
}

pub(super) fn build_greedy_string(stream: &mut dyn Stream, codec: Codec, value: &Value) -> Result<()> {
    stream.write_all_bytes(&codec.encode(value.as_str()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_be_matches_literal_bytes() {
        let c = Construct::u16_be();
        assert_eq!(c.parse(&[0x01, 0x02]).unwrap(), Value::Int(258));
        assert_eq!(c.build(&Value::Int(258)).unwrap(), vec![0x01, 0x02]);
    }

    #[test]
    fn u24_le_decodes_as_little_endian() {
        let c = Construct::u24_le();
        assert_eq!(c.parse(&[0x01, 0x02, 0x03]).unwrap(), Value::Int(0x030201));
    }

    #[test]
    fn varint_matches_protobuf_base128() {
        let c = Construct::varint();
        assert_eq!(c.parse(&[0x85, 0x05]).unwrap(), Value::Int(645));
        assert_eq!(c.build(&Value::Int(645)).unwrap(), vec![0x85, 0x05]);
    }

    #[test]
    fn varint_rejects_negative_values() {
        assert!(Construct::varint().build(&Value::Int(-1)).is_err());
    }

    #[test]
    fn varint_small_values_fit_one_byte() {
        let c = Construct::varint();
        assert_eq!(c.build(&Value::Int(1)).unwrap(), vec![0x01]);
        assert_eq!(c.parse(&[0x01]).unwrap(), Value::Int(1));
    }

    #[test]
    fn cstring_round_trips_with_ascii_terminator() {
        let c = Construct::cstring(vec![0]).with_codec(Codec::Ascii);
        assert_eq!(c.parse(b"hello\x00").unwrap(), Value::Str("hello".into()));
        assert_eq!(c.build(&Value::Str("hello".into())).unwrap(), b"hello\x00");
    }

    #[test]
    fn cstring_picks_first_terminator_on_build() {
        let c = Construct::cstring(vec![0, b'\n']);
        assert_eq!(c.build(&Value::Bytes(b"x".to_vec())).unwrap(), b"x\x00");
    }

    #[test]
    fn fixed_string_strips_and_repads_right() {
        let c = Construct::fixed_string(8usize, b' ', PadDir::Right, TrimDir::Right).with_codec(Codec::Ascii);
        let parsed = c.parse(b"hi      ").unwrap();
        assert_eq!(parsed, Value::Str("hi".into()));
        assert_eq!(c.build(&parsed).unwrap(), b"hi      ");
    }

    #[test]
    fn fixed_string_trims_overlong_input() {
        let c = Construct::fixed_string(3usize, b' ', PadDir::Right, TrimDir::Right).with_codec(Codec::Ascii);
        assert_eq!(c.build(&Value::Str("abcdef".into())).unwrap(), b"abc");
    }

    #[test]
    fn greedy_bytes_reads_to_eof() {
        let c = Construct::greedy_bytes();
        assert_eq!(c.parse(&[1, 2, 3]).unwrap(), Value::Bytes(vec![1, 2, 3]));
        assert!(c.sizeof(&Context::root()).is_err());
    }

    #[test]
    fn static_bytes_sizeof_is_exact() {
        let c = Construct::bytes(4);
        assert_eq!(c.sizeof(&Context::root()).unwrap(), 4);
        assert!(c.build(&Value::Bytes(vec![1, 2, 3])).is_err());
    }
}
