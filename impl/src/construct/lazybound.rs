//! Deferred parsing: `OnDemand` (one field), `LazyStruct` (a struct of them), and
//! `LazyBound` (a thunk for self-referential layouts like linked lists).

use std::sync::Arc;

use super::Construct;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::lazy::{LazyContainer, LazyValue};
use crate::stream::Stream;
use crate::value::Value;

impl Construct {
    /// Defers parsing of `sub` until the returned [`LazyValue`] is forced. Requires `sub`
    /// to have a context-independent static size, since the bytes have to be lifted off
    /// the stream now (and held in memory) even though decoding them is deferred.
    pub fn on_demand(sub: Construct) -> Self {
        Construct::new(super::Kind::OnDemand { sub: Arc::new(sub), force_build: true })
    }

    /// Like [`Construct::on_demand`], but building never forces the value: if the caller
    /// never touched it, a build attempt fails rather than silently re-serialising a
    /// value that was never decoded.
    pub fn on_demand_no_build(sub: Construct) -> Self {
        Construct::new(super::Kind::OnDemand { sub: Arc::new(sub), force_build: false })
    }

    /// A struct whose statically-sized fields are skipped over and parsed only on first
    /// access; any field without a static size is parsed eagerly in place, so later
    /// lazy fields still line up at the right offset.
    pub fn lazy_struct(subs: Vec<Construct>) -> Self {
        Construct::new(super::Kind::LazyStruct { subs: subs.into_iter().map(Arc::new).collect() })
    }

    /// A construct that doesn't exist until asked for — the one way to describe a
    /// recursive layout (a linked list, a tree) without an infinite `Construct` value.
    pub fn lazy_bound<F>(thunk: F) -> Self
    where
        F: Fn() -> Construct + Send + Sync + 'static,
    {
        Construct::new(super::Kind::LazyBound { thunk: Arc::new(thunk) })
    }
}

pub(super) fn parse_on_demand(stream: &mut dyn Stream, ctx: &Context, sub: &Arc<Construct>) -> Result<Value> {
    let len = sub
        .do_sizeof(ctx)
        .map_err(|_| Error::sizeof("OnDemand requires a construct with a known static size"))?;
    let offset = stream.tell()?;
    let raw = stream.read_exact_n(len)?;
    let bytes: Arc<[u8]> = Arc::from(raw.into_boxed_slice());
    let lazy = LazyValue::new(bytes, ctx.clone(), Arc::clone(sub), 0);
    let _ = offset;
    Ok(Value::any(lazy))
}

pub(super) fn build_on_demand(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    sub: &Arc<Construct>,
    force_build: bool,
) -> Result<()> {
    if let Value::Any(boxed) = value {
        if let Some(lazy) = boxed.as_any().downcast_ref::<LazyValue>() {
            if !force_build && !lazy.is_forced() {
                return Err(Error::String("OnDemand value was never forced; nothing to rebuild".into()));
            }
            let forced = lazy.force()?;
            return sub.do_build(&forced, stream, ctx);
        }
    }
    sub.do_build(value, stream, ctx)
}

pub(super) fn parse_lazy_struct(stream: &mut dyn Stream, ctx: &Context, subs: &[Arc<Construct>]) -> Result<Value> {
    let mut scope = ctx.child();
    let mut buffer: Vec<u8> = Vec::new();
    let mut lazy_fields: Vec<(String, Arc<Construct>, u64)> = Vec::new();
    let mut eager_fields: Vec<(String, Value)> = Vec::new();
    let mut order: Vec<String> = Vec::new();

    for sub in subs {
        match sub.do_sizeof(&scope) {
            Ok(len) => {
                let offset = buffer.len() as u64;
                let raw = stream.read_exact_n(len)?;
                buffer.extend_from_slice(&raw);
                if let Some(name) = sub.name() {
                    lazy_fields.push((name.to_string(), Arc::clone(sub), offset));
                    order.push(name.to_string());
                }
            }
            Err(_) => {
                let v = sub.do_parse(stream, &scope)?;
                if let Some(name) = sub.name() {
                    scope = scope.bind(name, v.clone());
                    eager_fields.push((name.to_string(), v));
                    order.push(name.to_string());
                }
            }
        }
    }

    let bytes: Arc<[u8]> = Arc::from(buffer.into_boxed_slice());
    let container = LazyContainer::new_mixed(bytes, scope, lazy_fields, eager_fields, order);
    Ok(Value::Lazy(Arc::new(container)))
}

/// Building a `LazyStruct` only forces the fields the caller actually set (a
/// `LazyContainer` that came from a parse and was never touched round-trips without
/// materialising anything); a plain `Container` passed in builds every field directly.
pub(super) fn build_lazy_struct(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    subs: &[Arc<Construct>],
) -> Result<()> {
    let mut scope = ctx.child();
    for sub in subs {
        let Some(name) = sub.name() else { continue };
        let field_value = match value {
            Value::Lazy(lazy) => lazy.get(name)?,
            other => other.as_container()?.get(name).cloned().unwrap_or(Value::None),
        };
        sub.do_build(&field_value, stream, &scope)?;
        scope = scope.bind(name, field_value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Expr;

    #[test]
    fn on_demand_defers_the_read_until_forced() {
        let c = Construct::on_demand(Construct::u8_());
        let parsed = c.parse(&[42]).unwrap();
        let Value::Any(boxed) = &parsed else { panic!("expected an on-demand value") };
        let lazy = boxed.as_any().downcast_ref::<LazyValue>().unwrap();
        assert!(!lazy.is_forced());
        assert_eq!(lazy.force().unwrap(), Value::Int(42));
        assert_eq!(c.build(&parsed).unwrap(), vec![42]);
    }

    #[test]
    fn on_demand_no_build_errors_if_never_forced() {
        let c = Construct::on_demand_no_build(Construct::u8_());
        let parsed = c.parse(&[42]).unwrap();
        assert!(c.build(&parsed).is_err());
    }

    #[test]
    fn lazy_struct_materialises_fields_on_access_and_round_trips() {
        let c = Construct::lazy_struct(vec![Construct::u8_().named("a"), Construct::u16_be().named("b")]);
        let parsed = c.parse(&[9, 0, 7]).unwrap();
        let Value::Lazy(container) = &parsed else { panic!("expected a lazy container") };
        assert_eq!(container.get("b").unwrap(), Value::Int(7));
        assert_eq!(c.build(&parsed).unwrap(), vec![9, 0, 7]);
    }

    #[test]
    fn lazy_bound_supports_a_self_referential_linked_list() {
        // node := byte value, then either 0x00 (end) or 0x01 followed by another node.
        fn node() -> Construct {
            Construct::struct_(vec![
                Construct::u8_().named("value"),
                Construct::u8_().named("has_next"),
                Construct::if_(Expr::field("has_next").eq(Expr::lit(1i64)), Construct::lazy_bound(node)).named("next"),
            ])
        }

        let bytes = [1, 1, 2, 1, 3, 0];
        let parsed = node().parse(&bytes).unwrap();
        let root = parsed.as_container().unwrap();
        assert_eq!(root.get("value").unwrap().as_int().unwrap(), 1);
        let next = root.get("next").unwrap().as_container().unwrap();
        assert_eq!(next.get("value").unwrap().as_int().unwrap(), 2);
        let last = next.get("next").unwrap().as_container().unwrap();
        assert_eq!(last.get("value").unwrap().as_int().unwrap(), 3);
        assert_eq!(last.get("has_next").unwrap().as_int().unwrap(), 0);

        assert_eq!(node().build(&parsed).unwrap(), bytes);
    }
}
