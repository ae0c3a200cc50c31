//! The construct catalogue: one tagged sum (`Kind`) over every primitive and combinator
//! in the specification, wrapped by [`Construct`] (name + flags + kind). Dispatch lives
//! here; constructors for each family live in the sibling modules so the file a reader
//! opens to find "how does `Range` work" matches the file that builds one.

mod adapters;
mod composites;
mod lazybound;
mod misc;
mod primitives;
mod repeaters;
mod streamwrap;

pub use adapters::HashFn;
pub use composites::BuildFrom;
pub use primitives::{Codec, Endian, IntWidth, PadDir, TrimDir};
pub use streamwrap::CompressionCodec;

use std::io::Read;
use std::sync::Arc;

use bitflags::bitflags;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::path::Expr;
use crate::stream::{reader, writer, Stream};
use crate::value::{Container, ListContainer, Value};

bitflags! {
    /// Inheritable traits of a construct, per §3 of the specification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// Repeaters must pass a private copy of context to each iteration.
        const COPY_CONTEXT = 0b0001;
        /// Size or behaviour depends on context; disables static sizing.
        const DYNAMIC = 0b0010;
        /// On a direct child of a struct/sequence, merge fields upward (modelled as an
        /// explicit `Kind::Embed` node instead; kept for completeness of the bitset).
        const EMBED = 0b0100;
        /// Reserved, kept for bit-compatibility with the source hierarchy.
        const NESTING = 0b1000;
    }
}

pub(crate) type ValuePred = Arc<dyn Fn(&Value, &Context) -> Result<bool> + Send + Sync>;
pub(crate) type AdapterFn = Arc<dyn Fn(Value, &Context) -> Result<Value> + Send + Sync>;
pub(crate) type LazyThunk = Arc<dyn Fn() -> Construct + Send + Sync>;

/// The sum of every construct variant. Never constructed directly by users — go through
/// the `Construct::*` associated functions in the sibling modules.
pub(crate) enum Kind {
    StaticBytes(usize),
    MetaBytes(Expr),
    Int { width: IntWidth, signed: bool, endian: Endian },
    Float { width: primitives::FloatWidth, endian: Endian },
    VarInt,
    GreedyBytes,
    FixedString { length: Expr, pad: u8, pad_dir: PadDir, trim_dir: TrimDir, codec: Option<Codec> },
    CString { terminators: Vec<u8>, codec: Option<Codec> },
    GreedyString { codec: Codec },

    Struct { subs: Vec<Arc<Construct>>, nested: bool, allow_overwrite: bool },
    Sequence { subs: Vec<Arc<Construct>>, nested: bool },
    Embed(Arc<Construct>),
    Union { subs: Vec<Arc<Construct>>, buildfrom: Option<BuildFrom> },
    Select { subs: Vec<Arc<Construct>>, include_name: bool },
    Switch {
        key: Expr,
        cases: indexmap::IndexMap<String, Arc<Construct>>,
        default: Option<Arc<Construct>>,
        include_key: bool,
    },
    If { pred: Expr, then_: Arc<Construct>, else_: Arc<Construct> },

    Array { count: Expr, sub: Arc<Construct> },
    Range { min: usize, max: Option<usize>, sub: Arc<Construct> },
    RepeatUntil { pred: Expr, sub: Arc<Construct> },

    Pointer { offset: Expr, sub: Arc<Construct> },
    Peek { sub: Arc<Construct>, build: bool },
    Anchor,
    Aligned { modulus: usize, pad: u8, sub: Arc<Construct> },
    Padding { length: usize, pad: u8, strict: bool },
    Padded { length: usize, pad: u8, sub: Arc<Construct> },
    Restream { sub: Arc<Construct>, resizer: streamwrap::Resizer },
    ByteSwapped { size: usize, sub: Arc<Construct> },
    Prefixed { length: Arc<Construct>, sub: Arc<Construct> },
    Compressed { codec: CompressionCodec, sub: Arc<Construct> },

    Adapter { sub: Arc<Construct>, decode: AdapterFn, encode: AdapterFn },
    SymmetricAdapter { sub: Arc<Construct>, decode: AdapterFn },
    Validator { sub: Arc<Construct>, pred: ValuePred, message: String },
    Checksum { anchor_name: String, hash: HashFn, sub: Arc<Construct> },

    OnDemand { sub: Arc<Construct>, force_build: bool },
    LazyStruct { subs: Vec<Arc<Construct>> },
    LazyBound { thunk: LazyThunk },

    Pass,
    Terminator,
    Computed(Expr),
    Reconfig { sub: Arc<Construct>, rename: Option<String>, set: Flags, clear: Flags },
    Const { sub: Arc<Construct>, expected: Value },
}

/// One node of a layout description. Immutable once built, cheaply cloned (the `Kind` is
/// behind an `Arc`), and shareable across threads.
pub struct Construct {
    pub(crate) name: Option<String>,
    pub(crate) flags: Flags,
    pub(crate) kind: Arc<Kind>,
}

impl Clone for Construct {
    fn clone(&self) -> Self {
        Construct { name: self.name.clone(), flags: self.flags, kind: Arc::clone(&self.kind) }
    }
}

impl Construct {
    pub(crate) fn new(kind: Kind) -> Self {
        Construct { name: None, flags: Flags::empty(), kind: Arc::new(kind) }
    }

    pub(crate) fn with_flags(kind: Kind, flags: Flags) -> Self {
        Construct { name: None, flags, kind: Arc::new(kind) }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Assigns a name, validating it isn't one of the reserved prefixes (`_`, `<`).
    ///
    /// This is the binary naming operator from §6: `field.named("length")` is the
    /// idiomatic stand-in for the source's `"length" / field` syntax.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(
            !name.is_empty() && !name.starts_with('_') && !name.starts_with('<'),
            "construct names must be non-empty and may not start with '_' or '<': {name:?}"
        );
        self.name = Some(name);
        self
    }

    /// Subscript sugar: a fixed-count array of `self`. Mirrors `construct[n]`.
    pub fn repeat(self, count: impl Into<Expr>) -> Self {
        Construct::new(Kind::Array { count: count.into(), sub: Arc::new(self) })
    }

    /// Subscript sugar: a ranged array of `self`. Mirrors `construct[min:max]`.
    pub fn repeat_range(self, min: usize, max: usize) -> Self {
        Construct::new(Kind::Range { min, max: Some(max), sub: Arc::new(self) })
    }

    /// `Range(0, inf)`.
    pub fn greedy_range(self) -> Self {
        Construct::new(Kind::Range { min: 0, max: None, sub: Arc::new(self) })
    }

    // ---- Public entry points (§6) ----

    pub fn parse(&self, bytes: &[u8]) -> Result<Value> {
        self.parse_with_context(bytes, &Context::root())
    }

    pub fn parse_with_context(&self, bytes: &[u8], ctx: &Context) -> Result<Value> {
        let mut stream = reader(bytes);
        self.parse_stream(&mut stream, ctx)
    }

    pub fn parse_stream(&self, stream: &mut dyn Stream, ctx: &Context) -> Result<Value> {
        self.do_parse(stream, ctx)
    }

    /// Parses from any `Read`, buffering it fully first since most of the catalogue
    /// needs a seekable stream.
    pub fn parse_reader(&self, source: impl Read) -> Result<Value> {
        let mut stream = crate::stream::buffer_reader(source)?;
        self.parse_stream(&mut stream, &Context::root())
    }

    pub fn build(&self, value: &Value) -> Result<Vec<u8>> {
        self.build_with_context(value, &Context::root())
    }

    pub fn build_with_context(&self, value: &Value, ctx: &Context) -> Result<Vec<u8>> {
        let mut stream = writer();
        self.build_stream(value, &mut stream, ctx)?;
        Ok(stream.into_inner())
    }

    pub fn build_stream(&self, value: &Value, stream: &mut dyn Stream, ctx: &Context) -> Result<()> {
        self.do_build(value, stream, ctx)
    }

    pub fn sizeof(&self, ctx: &Context) -> Result<usize> {
        self.do_sizeof(ctx)
    }

    // ---- Dispatch ----

    fn do_parse(&self, stream: &mut dyn Stream, ctx: &Context) -> Result<Value> {
        use Kind::*;
        let v = match self.kind.as_ref() {
            StaticBytes(n) => primitives::parse_static_bytes(stream, *n)?,
            MetaBytes(len) => primitives::parse_meta_bytes(stream, ctx, len)?,
            Int { width, signed, endian } => primitives::parse_int(stream, *width, *signed, *endian)?,
            Float { width, endian } => primitives::parse_float(stream, *width, *endian)?,
            VarInt => primitives::parse_varint(stream)?,
            GreedyBytes => Value::Bytes(stream.read_to_end_vec()?),
            FixedString { length, pad, pad_dir, trim_dir: _, codec } => {
                primitives::parse_fixed_string(stream, ctx, length, *pad, *pad_dir, codec.as_ref())?
            }
            CString { terminators, codec } => primitives::parse_cstring(stream, terminators, codec.as_ref())?,
            GreedyString { codec } => primitives::parse_greedy_string(stream, *codec)?,

            Struct { subs, nested, allow_overwrite } => {
                composites::parse_struct(stream, ctx, subs, *nested, *allow_overwrite)?
            }
            Sequence { subs, nested } => composites::parse_sequence(stream, ctx, subs, *nested)?,
            Embed(inner) => inner.do_parse(stream, ctx)?,
            Union { subs, .. } => composites::parse_union(stream, ctx, subs)?,
            Select { subs, include_name } => composites::parse_select(stream, ctx, subs, *include_name)?,
            Switch { key, cases, default, include_key } => {
                composites::parse_switch(stream, ctx, key, cases, default.as_ref(), *include_key)?
            }
            If { pred, then_, else_ } => {
                if pred.eval_bool(ctx, None)? {
                    then_.do_parse(stream, ctx)?
                } else {
                    else_.do_parse(stream, ctx)?
                }
            }

            Array { count, sub } => repeaters::parse_array(stream, ctx, count, sub)?,
            Range { min, max, sub } => repeaters::parse_range(stream, ctx, *min, *max, sub)?,
            RepeatUntil { pred, sub } => repeaters::parse_repeat_until(stream, ctx, pred, sub)?,

            Pointer { offset, sub } => streamwrap::parse_pointer(stream, ctx, offset, sub)?,
            Peek { sub, .. } => streamwrap::parse_peek(stream, ctx, sub)?,
            Anchor => Value::Int(stream.tell()? as i128),
            Aligned { modulus, pad, sub } => streamwrap::parse_aligned(stream, ctx, *modulus, *pad, sub)?,
            Padding { length, pad, strict } => {
                streamwrap::parse_padding(stream, *length, *pad, *strict)?;
                Value::None
            }
            Padded { length, pad: _, sub } => streamwrap::parse_padded(stream, ctx, *length, sub)?,
            Restream { sub, resizer } => streamwrap::parse_restream(stream, ctx, sub, resizer)?,
            ByteSwapped { size, sub } => streamwrap::parse_byteswapped(stream, ctx, *size, sub)?,
            Prefixed { length, sub } => streamwrap::parse_prefixed(stream, ctx, length, sub)?,
            Compressed { codec, sub } => streamwrap::parse_compressed(stream, ctx, *codec, sub)?,

            Adapter { sub, decode, .. } => decode(sub.do_parse(stream, ctx)?, ctx)?,
            SymmetricAdapter { sub, decode } => decode(sub.do_parse(stream, ctx)?, ctx)?,
            Validator { sub, pred, message } => {
                let v = sub.do_parse(stream, ctx)?;
                if pred(&v, ctx)? {
                    v
                } else {
                    return Err(Error::Adaptation(crate::error::AdaptationError::Validation(message.clone())));
                }
            }
            Checksum { anchor_name, hash, sub } => adapters::parse_checksum(stream, ctx, anchor_name, hash, sub)?,

            OnDemand { sub, .. } => lazybound::parse_on_demand(stream, ctx, sub)?,
            LazyStruct { subs } => lazybound::parse_lazy_struct(stream, ctx, subs)?,
            LazyBound { thunk } => thunk().do_parse(stream, ctx)?,

            Pass => Value::None,
            Terminator => {
                let mut buf = [0u8; 1];
                match stream.read(&mut buf)? {
                    0 => Value::None,
                    n => return Err(Error::Terminator { remaining: n }),
                }
            }
            Computed(expr) => expr.eval(ctx, None)?,
            Reconfig { sub, .. } => sub.do_parse(stream, ctx)?,
            Const { sub, expected } => {
                let v = sub.do_parse(stream, ctx)?;
                if &v == expected {
                    v
                } else {
                    return Err(Error::Const { expected: format!("{expected:?}"), found: format!("{v:?}") });
                }
            }
        };
        Ok(v)
    }

    fn do_build(&self, value: &Value, stream: &mut dyn Stream, ctx: &Context) -> Result<()> {
        use Kind::*;
        match self.kind.as_ref() {
            StaticBytes(n) => primitives::build_static_bytes(stream, *n, value)?,
            MetaBytes(len) => primitives::build_meta_bytes(stream, ctx, len, value)?,
            Int { width, signed, endian } => primitives::build_int(stream, *width, *signed, *endian, value)?,
            Float { width, endian } => primitives::build_float(stream, *width, *endian, value)?,
            VarInt => primitives::build_varint(stream, value)?,
            GreedyBytes => stream.write_all_bytes(value.as_bytes()?)?,
            FixedString { length, pad, pad_dir: _, trim_dir, codec } => {
                primitives::build_fixed_string(stream, ctx, length, *pad, *trim_dir, codec.as_ref(), value)?
            }
            CString { terminators, codec } => primitives::build_cstring(stream, terminators, codec.as_ref(), value)?,
            GreedyString { codec } => primitives::build_greedy_string(stream, *codec, value)?,

            Struct { subs, nested, allow_overwrite } => {
                composites::build_struct(value, stream, ctx, subs, *nested, *allow_overwrite)?
            }
            Sequence { subs, nested } => composites::build_sequence(value, stream, ctx, subs, *nested)?,
            Embed(inner) => inner.do_build(value, stream, ctx)?,
            Union { subs, buildfrom } => composites::build_union(value, stream, ctx, subs, buildfrom.as_ref())?,
            Select { subs, include_name } => composites::build_select(value, stream, ctx, subs, *include_name)?,
            Switch { key, cases, default, include_key } => {
                composites::build_switch(value, stream, ctx, key, cases, default.as_ref(), *include_key)?
            }
            If { pred, then_, else_ } => {
                if pred.eval_bool(ctx, None)? {
                    then_.do_build(value, stream, ctx)?
                } else {
                    else_.do_build(value, stream, ctx)?
                }
            }

            Array { count, sub } => repeaters::build_array(value, stream, ctx, count, sub)?,
            Range { min, max, sub } => repeaters::build_range(value, stream, ctx, *min, *max, sub)?,
            RepeatUntil { pred, sub } => repeaters::build_repeat_until(value, stream, ctx, pred, sub)?,

            Pointer { offset, sub } => streamwrap::build_pointer(value, stream, ctx, offset, sub)?,
            Peek { sub, build } => streamwrap::build_peek(value, stream, ctx, sub, *build)?,
            Anchor => {}
            Aligned { modulus, pad, sub } => streamwrap::build_aligned(value, stream, ctx, *modulus, *pad, sub)?,
            Padding { length, pad, .. } => streamwrap::build_padding(stream, *length, *pad)?,
            Padded { length, pad, sub } => streamwrap::build_padded(value, stream, ctx, *length, *pad, sub)?,
            Restream { sub, resizer } => streamwrap::build_restream(value, stream, ctx, sub, resizer)?,
            ByteSwapped { size, sub } => streamwrap::build_byteswapped(value, stream, ctx, *size, sub)?,
            Prefixed { length, sub } => streamwrap::build_prefixed(value, stream, ctx, length, sub)?,
            Compressed { codec, sub } => streamwrap::build_compressed(value, stream, ctx, *codec, sub)?,

            Adapter { sub, encode, .. } => sub.do_build(&encode(value.clone(), ctx)?, stream, ctx)?,
            SymmetricAdapter { sub, decode } => sub.do_build(&decode(value.clone(), ctx)?, stream, ctx)?,
            Validator { sub, pred, message } => {
                if pred(value, ctx)? {
                    sub.do_build(value, stream, ctx)?
                } else {
                    return Err(Error::Adaptation(crate::error::AdaptationError::Validation(message.clone())));
                }
            }
            Checksum { anchor_name, hash, sub } => adapters::build_checksum(value, stream, ctx, anchor_name, hash, sub)?,

            OnDemand { sub, force_build } => lazybound::build_on_demand(value, stream, ctx, sub, *force_build)?,
            LazyStruct { subs } => lazybound::build_lazy_struct(value, stream, ctx, subs)?,
            LazyBound { thunk } => thunk().do_build(value, stream, ctx)?,

            Pass => {
                if !value.is_none() {
                    return Err(Error::String("Pass can only build an absent value".into()));
                }
            }
            Terminator => {}
            Computed(_) => {}
            Reconfig { sub, .. } => sub.do_build(value, stream, ctx)?,
            Const { sub, expected } => sub.do_build(expected, stream, ctx)?,
        }
        Ok(())
    }

    fn do_sizeof(&self, ctx: &Context) -> Result<usize> {
        use Kind::*;
        match self.kind.as_ref() {
            StaticBytes(n) => Ok(*n),
            MetaBytes(len) => len.eval_usize(ctx, None),
            Int { width, .. } => Ok(width.byte_len()),
            Float { width, .. } => Ok(width.byte_len()),
            VarInt => Err(Error::sizeof("VarInt has no static size")),
            GreedyBytes => Err(Error::sizeof("GreedyBytes has no static size")),
            FixedString { length, .. } => length.eval_usize(ctx, None),
            CString { .. } => Err(Error::sizeof("CString has no static size")),
            GreedyString { .. } => Err(Error::sizeof("GreedyString has no static size")),

            Struct { subs, .. } => subs.iter().try_fold(0usize, |acc, f| Ok(acc + f.do_sizeof(ctx)?)),
            Sequence { subs, .. } => subs.iter().try_fold(0usize, |acc, f| Ok(acc + f.do_sizeof(ctx)?)),
            Embed(inner) => inner.do_sizeof(ctx),
            Union { subs, .. } => subs
                .iter()
                .map(|s| s.do_sizeof(ctx))
                .collect::<Result<Vec<_>>>()
                .map(|sizes| sizes.into_iter().max().unwrap_or(0)),
            Select { .. } => Err(Error::sizeof("Select has no static size")),
            Switch { .. } => Err(Error::sizeof("Switch has no static size")),
            If { .. } => Err(Error::sizeof("If has no static size")),

            Array { count, sub } => {
                let n = count.eval_usize(ctx, None)?;
                Ok(n * sub.do_sizeof(ctx)?)
            }
            Range { .. } => Err(Error::sizeof("Range has no static size")),
            RepeatUntil { .. } => Err(Error::sizeof("RepeatUntil has no static size")),

            Pointer { .. } => Ok(0),
            Peek { sub, .. } => sub.do_sizeof(ctx),
            Anchor => Ok(0),
            Aligned { .. } => Err(Error::sizeof("Aligned has no static size (pad depends on position)")),
            Padding { length, .. } => Ok(*length),
            Padded { length, .. } => Ok(*length),
            Restream { .. } => Err(Error::sizeof("Restream has no static size")),
            ByteSwapped { size, .. } => Ok(*size),
            Prefixed { .. } => Err(Error::sizeof("Prefixed has no static size")),
            Compressed { .. } => Err(Error::sizeof("Compressed has no static size")),

            Adapter { sub, .. } | SymmetricAdapter { sub, .. } | Validator { sub, .. } => sub.do_sizeof(ctx),
            Checksum { sub, .. } => sub.do_sizeof(ctx),

            OnDemand { sub, .. } => sub.do_sizeof(ctx),
            LazyStruct { subs } => subs.iter().try_fold(0usize, |acc, f| Ok(acc + f.do_sizeof(ctx)?)),
            LazyBound { .. } => Err(Error::sizeof("LazyBound has no static size without resolving the thunk")),

            Pass => Ok(0),
            Terminator => Ok(0),
            Computed(_) => Ok(0),
            Reconfig { sub, .. } => sub.do_sizeof(ctx),
            Const { sub, .. } => sub.do_sizeof(ctx),
        }
    }
}

pub(crate) fn wrap_value_as_container(value: &Value) -> Result<Container> {
    value.clone().into_container()
}

pub(crate) fn wrap_value_as_list(value: &Value) -> Result<ListContainer> {
    match value {
        Value::List(l) => Ok(l.clone()),
        other => Err(Error::String(format!("expected a list, found {other:?}"))),
    }
}
