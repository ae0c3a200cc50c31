//! Value transformations: `Adapter`/`SymmetricAdapter`/`Validator`, plus `Checksum`.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;

use super::{AdapterFn, Construct, Kind, ValuePred};
use crate::context::Context;
use crate::error::{AdaptationError, Error, Result};
use crate::stream::Stream;
use crate::value::Value;

/// A hash/checksum function used by [`Construct::checksum`]. Wraps a plain function
/// pointer rather than a closure since the built-ins (`crc32`) need no captured state,
/// and a `fn` is `Copy` and trivially `Send + Sync`.
#[derive(Clone, Copy)]
pub struct HashFn(pub fn(&[u8]) -> Vec<u8>);

impl HashFn {
    pub fn crc32() -> Self {
        HashFn(|bytes| crc32(bytes).to_be_bytes().to_vec())
    }

    pub fn custom(f: fn(&[u8]) -> Vec<u8>) -> Self {
        HashFn(f)
    }
}

/// A dependency-free CRC-32 (IEEE 802.3 polynomial), matching the one every zip/png
/// reader implements by hand rather than reaching for a crate.
fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

impl Construct {
    pub fn adapter<D, E>(sub: Construct, decode: D, encode: E) -> Self
    where
        D: Fn(Value, &Context) -> Result<Value> + Send + Sync + 'static,
        E: Fn(Value, &Context) -> Result<Value> + Send + Sync + 'static,
    {
        Construct::new(Kind::Adapter { sub: Arc::new(sub), decode: Arc::new(decode), encode: Arc::new(encode) })
    }

    pub fn symmetric_adapter<F>(sub: Construct, decode: F) -> Self
    where
        F: Fn(Value, &Context) -> Result<Value> + Send + Sync + 'static,
    {
        Construct::new(Kind::SymmetricAdapter { sub: Arc::new(sub), decode: Arc::new(decode) })
    }

    /// An enum map: integer on the wire, a name in memory.
    pub fn enum_map(sub: Construct, mapping: Vec<(i128, &'static str)>) -> Self {
        let decode_map: IndexMap<i128, &'static str> = mapping.iter().copied().collect();
        let encode_map: IndexMap<&'static str, i128> = mapping.iter().map(|(n, s)| (*s, *n)).collect();
        Construct::adapter(
            sub,
            move |v, _ctx| {
                let n = v.as_int()?;
                decode_map
                    .get(&n)
                    .map(|s| Value::Str(s.to_string()))
                    .ok_or_else(|| Error::Adaptation(AdaptationError::Mapping(n.to_string())))
            },
            move |v, _ctx| {
                let name = v.as_str()?;
                encode_map
                    .get(name)
                    .map(|n| Value::Int(*n))
                    .ok_or_else(|| Error::Adaptation(AdaptationError::Mapping(name.to_string())))
            },
        )
    }

    /// A flags enum: an integer on the wire, a set of named bits in memory.
    pub fn flags_enum(sub: Construct, bits: Vec<(i128, &'static str)>) -> Self {
        let decode_bits = bits.clone();
        let encode_bits = bits;
        Construct::adapter(
            sub,
            move |v, _ctx| {
                let n = v.as_int()?;
                let names: Vec<Value> = decode_bits
                    .iter()
                    .filter(|(bit, _)| n & bit != 0)
                    .map(|(_, name)| Value::Str(name.to_string()))
                    .collect();
                let mut list = crate::value::ListContainer::new();
                for name in names {
                    list.push(name);
                }
                Ok(Value::List(list))
            },
            move |v, _ctx| {
                let list = v.as_list()?;
                let mut n: i128 = 0;
                for item in list.iter() {
                    let name = item.as_str()?;
                    let bit = encode_bits
                        .iter()
                        .find(|(_, candidate)| *candidate == name)
                        .map(|(bit, _)| *bit)
                        .ok_or_else(|| Error::Adaptation(AdaptationError::BitInteger(name.to_string())))?;
                    n |= bit;
                }
                Ok(Value::Int(n))
            },
        )
    }

    pub fn validator<P>(sub: Construct, message: impl Into<String>, pred: P) -> Self
    where
        P: Fn(&Value, &Context) -> Result<bool> + Send + Sync + 'static,
    {
        Construct::new(Kind::Validator { sub: Arc::new(sub), pred: Arc::new(pred), message: message.into() })
    }

    pub fn one_of(sub: Construct, allowed: Vec<Value>) -> Self {
        let allowed: HashSet<String> = allowed.iter().map(|v| format!("{v:?}")).collect();
        Construct::validator(sub, "value not in the allowed set", move |v, _ctx| {
            Ok(allowed.contains(&format!("{v:?}")))
        })
    }

    pub fn none_of(sub: Construct, forbidden: Vec<Value>) -> Self {
        let forbidden: HashSet<String> = forbidden.iter().map(|v| format!("{v:?}")).collect();
        Construct::validator(sub, "value in the forbidden set", move |v, _ctx| {
            Ok(!forbidden.contains(&format!("{v:?}")))
        })
    }

    /// `anchor_name` must refer to a context binding produced by two `Anchor`s sharing a
    /// name inside the same struct (a `{start, end}` range container).
    pub fn checksum(anchor_name: impl Into<String>, hash: HashFn, sub: Construct) -> Self {
        Construct::new(Kind::Checksum { anchor_name: anchor_name.into(), hash, sub: Arc::new(sub) })
    }
}

pub(super) fn parse_checksum(
    stream: &mut dyn Stream,
    ctx: &Context,
    anchor_name: &str,
    hash: &HashFn,
    sub: &Arc<Construct>,
) -> Result<Value> {
    let stored = sub.do_parse(stream, ctx)?;
    let stored_bytes = stored.as_bytes()?.to_vec();
    let (start, end) = anchor_range(ctx, anchor_name)?;
    let pos = stream.tell()?;
    stream.seek_abs(start as i64)?;
    let region = stream.read_exact_n((end - start) as usize)?;
    stream.seek_abs(pos as i64)?;
    let computed = hash.0(&region);
    if computed != stored_bytes {
        debug!("checksum mismatch over anchor {anchor_name:?}: computed {computed:02x?}, stored {stored_bytes:02x?}");
        return Err(Error::Checksum { computed, stored: stored_bytes });
    }
    Ok(Value::Bytes(stored_bytes))
}

pub(super) fn build_checksum(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    anchor_name: &str,
    hash: &HashFn,
    sub: &Arc<Construct>,
) -> Result<()> {
    let _ = value;
    let (start, end) = anchor_range(ctx, anchor_name)?;
    let pos = stream.tell()?;
    stream.seek_abs(start as i64)?;
    let region = stream.read_exact_n((end - start) as usize)?;
    stream.seek_abs(pos as i64)?;
    let computed = hash.0(&region);
    sub.do_build(&Value::Bytes(computed), stream, ctx)
}

fn anchor_range(ctx: &Context, name: &str) -> Result<(u64, u64)> {
    let range = ctx
        .get(name)
        .ok_or_else(|| Error::Lookup(format!("no anchor range named {name:?} in context")))?;
    let container = range.as_container()?;
    let start = container
        .get("start")
        .ok_or_else(|| Error::Lookup(format!("anchor {name:?} has no start")))?
        .as_int()?;
    let end = container
        .get("end")
        .ok_or_else(|| Error::Lookup(format!("anchor {name:?} has no end")))?
        .as_int()?;
    Ok((start as u64, end as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_the_ieee_802_3_polynomial() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn enum_map_decodes_and_encodes_by_name() {
        let c = Construct::enum_map(Construct::u8_(), vec![(1, "data"), (2, "control")]);
        assert_eq!(c.parse(&[2]).unwrap(), Value::Str("control".into()));
        assert_eq!(c.build(&Value::Str("data".into())).unwrap(), vec![1]);
    }

    #[test]
    fn enum_map_rejects_an_unmapped_value() {
        let c = Construct::enum_map(Construct::u8_(), vec![(1, "data")]);
        assert!(matches!(c.parse(&[9]), Err(Error::Adaptation(AdaptationError::Mapping(_)))));
    }

    #[test]
    fn flags_enum_decodes_every_set_bit_as_a_name() {
        let c = Construct::flags_enum(Construct::u8_(), vec![(0x01, "read"), (0x02, "write"), (0x04, "exec")]);
        let parsed = c.parse(&[0x05]).unwrap();
        let names: Vec<_> = parsed.as_list().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
        assert_eq!(names, vec!["read", "exec"]);
        assert_eq!(c.build(&parsed).unwrap(), vec![0x05]);
    }

    #[test]
    fn one_of_accepts_only_the_allowed_set() {
        let c = Construct::one_of(Construct::u8_(), vec![Value::Int(1), Value::Int(2)]);
        assert!(c.parse(&[1]).is_ok());
        assert!(c.parse(&[3]).is_err());
    }

    #[test]
    fn none_of_rejects_the_forbidden_set() {
        let c = Construct::none_of(Construct::u8_(), vec![Value::Int(0)]);
        assert!(c.parse(&[0]).is_err());
        assert!(c.parse(&[1]).is_ok());
    }

    #[test]
    fn checksum_verifies_the_hashed_region_between_two_anchors() {
        let mut range = crate::value::Container::new();
        range.insert("start", Value::Int(0)).unwrap();
        range.insert("end", Value::Int(3)).unwrap();
        let ctx = Context::root().bind("body", Value::Container(range));
        let sub = Arc::new(Construct::bytes(4));

        let mut stream = crate::stream::writer();
        stream.write_all_bytes(&[1, 2, 3]).unwrap();
        build_checksum(&Value::None, &mut stream, &ctx, "body", &HashFn::crc32(), &sub).unwrap();
        let bytes = stream.into_inner();
        assert_eq!(&bytes[3..], crc32(&[1, 2, 3]).to_be_bytes().as_slice());

        let mut reader = crate::stream::reader(&bytes);
        assert!(parse_checksum(&mut reader, &ctx, "body", &HashFn::crc32(), &sub).is_ok());

        let mut tampered = bytes.clone();
        tampered[0] ^= 0xFF;
        let mut reader2 = crate::stream::reader(&tampered);
        assert!(matches!(parse_checksum(&mut reader2, &ctx, "body", &HashFn::crc32(), &sub), Err(Error::Checksum { .. })));
    }
}
