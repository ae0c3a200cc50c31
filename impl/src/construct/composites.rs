//! `Struct`, `Sequence`, `Embed`, `Union`, `Select`, `Switch`, and the conditionals.

use std::sync::Arc;

use indexmap::IndexMap;

use log::trace;

use super::{Construct, Kind};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::path::Expr;
use crate::stream::Stream;
use crate::value::{Container, ListContainer, Value};

#[derive(Debug, Clone)]
pub enum BuildFrom {
    Index(usize),
    Name(String),
}

impl Construct {
    pub fn struct_(subs: Vec<Construct>) -> Self {
        Construct::new(Kind::Struct {
            subs: subs.into_iter().map(Arc::new).collect(),
            nested: true,
            allow_overwrite: false,
        })
    }

    /// A struct that passes the *outer* context through unwrapped instead of creating a
    /// fresh scope (the un-nested variant from §3's context lifecycle).
    pub fn struct_unnested(subs: Vec<Construct>) -> Self {
        Construct::new(Kind::Struct {
            subs: subs.into_iter().map(Arc::new).collect(),
            nested: false,
            allow_overwrite: false,
        })
    }

    pub fn allow_overwrite(mut self) -> Self {
        if let Kind::Struct { allow_overwrite, .. } =
            Arc::get_mut(&mut self.kind).expect("allow_overwrite must follow a fresh constructor")
        {
            *allow_overwrite = true;
        } else {
            panic!("allow_overwrite is only valid on Struct");
        }
        self
    }

    pub fn sequence(subs: Vec<Construct>) -> Self {
        Construct::new(Kind::Sequence { subs: subs.into_iter().map(Arc::new).collect(), nested: true })
    }

    /// Marks `inner` as merging its fields directly into the enclosing struct/sequence.
    pub fn embed(inner: Construct) -> Self {
        Construct::with_flags(Kind::Embed(Arc::new(inner)), super::Flags::EMBED)
    }

    pub fn union(subs: Vec<Construct>) -> Self {
        Construct::new(Kind::Union { subs: subs.into_iter().map(Arc::new).collect(), buildfrom: None })
    }

    pub fn union_buildfrom(subs: Vec<Construct>, buildfrom: BuildFrom) -> Self {
        Construct::new(Kind::Union {
            subs: subs.into_iter().map(Arc::new).collect(),
            buildfrom: Some(buildfrom),
        })
    }

    pub fn select(subs: Vec<Construct>) -> Self {
        Construct::new(Kind::Select { subs: subs.into_iter().map(Arc::new).collect(), include_name: false })
    }

    pub fn select_include_name(subs: Vec<Construct>) -> Self {
        Construct::new(Kind::Select { subs: subs.into_iter().map(Arc::new).collect(), include_name: true })
    }

    pub fn switch(
        key: impl Into<Expr>,
        cases: Vec<(String, Construct)>,
        default: Option<Construct>,
    ) -> Self {
        let cases = cases.into_iter().map(|(k, c)| (k, Arc::new(c))).collect::<IndexMap<_, _>>();
        Construct::new(Kind::Switch {
            key: key.into(),
            cases,
            default: default.map(Arc::new),
            include_key: false,
        })
    }

    pub fn if_then_else(pred: impl Into<Expr>, then_: Construct, else_: Construct) -> Self {
        Construct::new(Kind::If { pred: pred.into(), then_: Arc::new(then_), else_: Arc::new(else_) })
    }

    /// `IfThenElse(pred, sub, Pass)`.
    pub fn if_(pred: impl Into<Expr>, sub: Construct) -> Self {
        Construct::if_then_else(pred, sub, Construct::pass())
    }
}

// ---- Struct ----

pub(super) fn parse_struct(
    stream: &mut dyn Stream,
    ctx: &Context,
    subs: &[Arc<Construct>],
    nested: bool,
    allow_overwrite: bool,
) -> Result<Value> {
    let mut container = Container::new();
    let mut scope = if nested { ctx.child() } else { ctx.clone() };

    for sub in subs {
        if let Kind::Embed(inner) = sub.kind.as_ref() {
            let v = inner.do_parse(stream, &scope)?;
            let embedded = v.as_container()?;
            for (name, value) in embedded.iter() {
                bind_field(&mut container, &mut scope, name, value.clone(), allow_overwrite)?;
            }
            continue;
        }

        if matches!(sub.kind.as_ref(), Kind::Anchor) {
            // An anchor legitimately reuses the same name twice (start, then the
            // start/end range) to let a `Checksum` find the span it covers — that
            // second write must not go through the struct's overwrite policy, which
            // exists to catch *user* naming mistakes, not this intentional rebind.
            let pos = sub.do_parse(stream, &scope)?;
            if let Some(name) = sub.name() {
                let bound = match scope.get(name) {
                    Some(Value::Int(start)) => {
                        let mut range = Container::new();
                        range.insert("start", Value::Int(start))?;
                        range.insert("end", pos.clone())?;
                        Value::Container(range)
                    }
                    _ => pos,
                };
                container.insert_overwrite(name, bound.clone());
                scope = scope.bind(name, bound);
            }
            continue;
        }

        let value = sub.do_parse(stream, &scope)?;
        if let Some(name) = sub.name() {
            bind_field(&mut container, &mut scope, name, value, allow_overwrite)?;
        }
    }
    Ok(Value::Container(container))
}

fn bind_field(
    container: &mut Container,
    scope: &mut Context,
    name: &str,
    value: Value,
    allow_overwrite: bool,
) -> Result<()> {
    if allow_overwrite {
        container.insert_overwrite(name, value.clone());
    } else {
        container.insert(name, value.clone())?;
    }
    *scope = scope.bind(name, value);
    Ok(())
}

pub(super) fn build_struct(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    subs: &[Arc<Construct>],
    nested: bool,
    allow_overwrite: bool,
) -> Result<()> {
    let container = value.as_container()?;
    let mut scope = if nested { ctx.child() } else { ctx.clone() };

    for sub in subs {
        if let Kind::Embed(inner) = sub.kind.as_ref() {
            // The embedded fields already live directly in `container` (they were merged
            // flat on parse), so handing the whole value through lets `inner` find them
            // under their own names exactly as if it were building standalone.
            inner.do_build(value, stream, &scope)?;
            for (name, v) in container.iter() {
                scope = scope.bind(name, v.clone());
            }
            continue;
        }

        if matches!(sub.kind.as_ref(), Kind::Anchor) {
            // Anchors don't come from the caller's value at all: their binding is the
            // stream position *at build time*, mirroring what parse records.
            sub.do_build(&Value::None, stream, &scope)?;
            if let Some(name) = sub.name() {
                let pos = Value::Int(stream.tell()? as i128);
                let bound = match scope.get(name) {
                    Some(Value::Int(start)) => {
                        let mut range = Container::new();
                        range.insert("start", Value::Int(start))?;
                        range.insert("end", pos)?;
                        Value::Container(range)
                    }
                    _ => pos,
                };
                scope = scope.bind(name, bound);
            }
            continue;
        }

        let field_value = match sub.name() {
            Some(name) => container.get(name).cloned().unwrap_or(Value::None),
            None => Value::None,
        };
        if let Some(name) = sub.name() {
            scope = scope.bind(name, field_value.clone());
        }
        sub.do_build(&field_value, stream, &scope)?;
        let _ = allow_overwrite;
    }
    Ok(())
}

// ---- Sequence ----

pub(super) fn parse_sequence(
    stream: &mut dyn Stream,
    ctx: &Context,
    subs: &[Arc<Construct>],
    nested: bool,
) -> Result<Value> {
    let mut list = ListContainer::new();
    let mut scope = if nested { ctx.child() } else { ctx.clone() };

    for sub in subs {
        if let Kind::Embed(inner) = sub.kind.as_ref() {
            let v = inner.do_parse(stream, &scope)?;
            for item in v.as_list()?.iter() {
                list.push(item.clone());
            }
            continue;
        }
        let value = sub.do_parse(stream, &scope)?;
        if sub.name().is_some() || !matches!(sub.kind.as_ref(), Kind::Pass | Kind::Computed(_) | Kind::Anchor) {
            list.push(value.clone());
        }
        if let Some(name) = sub.name() {
            scope = scope.bind(name, value);
        }
    }
    Ok(Value::List(list))
}

pub(super) fn build_sequence(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    subs: &[Arc<Construct>],
    nested: bool,
) -> Result<()> {
    let list = value.as_list()?;
    let mut scope = if nested { ctx.child() } else { ctx.clone() };
    let mut idx = 0usize;

    for sub in subs {
        let consumes = sub.name().is_some() || !matches!(sub.kind.as_ref(), Kind::Pass | Kind::Computed(_) | Kind::Anchor);
        let item = if consumes {
            let v = list.get(idx).cloned().unwrap_or(Value::None);
            idx += 1;
            v
        } else {
            Value::None
        };
        if let Some(name) = sub.name() {
            scope = scope.bind(name, item.clone());
        }
        sub.do_build(&item, stream, &scope)?;
    }
    Ok(())
}

// ---- Union ----

pub(super) fn parse_union(stream: &mut dyn Stream, ctx: &Context, subs: &[Arc<Construct>]) -> Result<Value> {
    let start = stream.tell()?;
    let mut max_end = start;
    let mut container = Container::new();
    for sub in subs {
        stream.seek_abs(start as i64)?;
        let value = sub.do_parse(stream, ctx)?;
        let end = stream.tell()?;
        trace!("union branch {:?} consumed {} bytes", sub.name(), end - start);
        max_end = max_end.max(end);
        if let Some(name) = sub.name() {
            container.insert_overwrite(name, value);
        } else if let Ok(c) = value.as_container() {
            for (name, v) in c.iter() {
                container.insert_overwrite(name, v.clone());
            }
        }
    }
    stream.seek_abs(max_end as i64)?;
    Ok(Value::Container(container))
}

pub(super) fn build_union(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    subs: &[Arc<Construct>],
    buildfrom: Option<&BuildFrom>,
) -> Result<()> {
    match buildfrom {
        Some(BuildFrom::Index(i)) => subs
            .get(*i)
            .ok_or(Error::Select)?
            .do_build(value, stream, ctx),
        Some(BuildFrom::Name(name)) => subs
            .iter()
            .find(|s| s.name() == Some(name.as_str()))
            .ok_or(Error::Select)?
            .do_build(value, stream, ctx),
        None => {
            for sub in subs {
                let mut probe = crate::stream::writer();
                if sub.do_build(value, &mut probe, ctx).is_ok() {
                    stream.write_all_bytes(&probe.into_inner())?;
                    return Ok(());
                }
            }
            Err(Error::Select)
        }
    }
}

// ---- Select ----

pub(super) fn parse_select(
    stream: &mut dyn Stream,
    ctx: &Context,
    subs: &[Arc<Construct>],
    include_name: bool,
) -> Result<Value> {
    let start = stream.tell()?;
    for sub in subs {
        stream.seek_abs(start as i64)?;
        match sub.do_parse(stream, ctx) {
            Ok(value) => {
                trace!("select chose branch {:?}", sub.name());
                return Ok(if include_name {
                    let mut c = Container::new();
                    c.insert("name", sub.name().map(Value::from).unwrap_or(Value::None))?;
                    c.insert("value", value)?;
                    Value::Container(c)
                } else {
                    value
                });
            }
            Err(e) => {
                trace!("select branch {:?} rejected: {e}", sub.name());
                continue;
            }
        }
    }
    stream.seek_abs(start as i64)?;
    Err(Error::Select)
}

pub(super) fn build_select(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    subs: &[Arc<Construct>],
    _include_name: bool,
) -> Result<()> {
    for sub in subs {
        let mut probe = crate::stream::writer();
        if sub.do_build(value, &mut probe, ctx).is_ok() {
            stream.write_all_bytes(&probe.into_inner())?;
            return Ok(());
        }
    }
    Err(Error::Select)
}

// ---- Switch ----

pub(super) fn parse_switch(
    stream: &mut dyn Stream,
    ctx: &Context,
    key: &Expr,
    cases: &IndexMap<String, Arc<Construct>>,
    default: Option<&Arc<Construct>>,
    include_key: bool,
) -> Result<Value> {
    let key_value = key.eval(ctx, None)?;
    let key_str = value_key(&key_value);
    let chosen = cases
        .get(&key_str)
        .or(default)
        .ok_or_else(|| Error::Switch { key: key_str.clone() })?;
    let value = chosen.do_parse(stream, ctx)?;
    if include_key {
        let mut c = Container::new();
        c.insert("key", key_value)?;
        c.insert("value", value)?;
        Ok(Value::Container(c))
    } else {
        Ok(value)
    }
}

pub(super) fn build_switch(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    key: &Expr,
    cases: &IndexMap<String, Arc<Construct>>,
    default: Option<&Arc<Construct>>,
    include_key: bool,
) -> Result<()> {
    let (key_str, inner_value) = if include_key {
        let c = value.as_container()?;
        let k = c.get("key").cloned().unwrap_or(Value::None);
        let v = c.get("value").cloned().unwrap_or(Value::None);
        (value_key(&k), v)
    } else {
        // Same as parse: the key is some earlier sibling field already bound in `ctx`,
        // not part of this value at all.
        (value_key(&key.eval(ctx, None)?), value.clone())
    };
    let chosen = cases
        .get(&key_str)
        .or(default)
        .ok_or(Error::Switch { key: key_str })?;
    chosen.do_build(&inner_value, stream, ctx)
}

fn value_key(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_binds_fields_in_order_for_later_siblings() {
        let c = Construct::struct_(vec![
            Construct::u8_().named("n"),
            Construct::array(Expr::field("n"), Construct::u8_()).named("items"),
        ]);
        let parsed = c.parse(&[2, 10, 20]).unwrap();
        let container = parsed.as_container().unwrap();
        assert_eq!(container.get("n").unwrap().as_int().unwrap(), 2);
        assert_eq!(container.get("items").unwrap().as_list().unwrap().len(), 2);
        assert_eq!(c.build(&parsed).unwrap(), vec![2, 10, 20]);
    }

    #[test]
    fn struct_rejects_duplicate_field_names_by_default() {
        let c = Construct::struct_(vec![Construct::u8_().named("x"), Construct::u8_().named("x")]);
        assert!(c.parse(&[1, 2]).is_err());
    }

    #[test]
    fn struct_allow_overwrite_accepts_repeated_names() {
        let c = Construct::struct_(vec![Construct::u8_().named("x"), Construct::u8_().named("x")]).allow_overwrite();
        let parsed = c.parse(&[1, 2]).unwrap();
        assert_eq!(parsed.as_container().unwrap().get("x").unwrap().as_int().unwrap(), 2);
    }

    #[test]
    fn embed_merges_fields_into_the_enclosing_struct() {
        let header = Construct::struct_(vec![Construct::u8_().named("kind")]);
        let c = Construct::struct_(vec![Construct::embed(header), Construct::u8_().named("seq")]);
        let parsed = c.parse(&[1, 9]).unwrap();
        let container = parsed.as_container().unwrap();
        assert_eq!(container.get("kind").unwrap().as_int().unwrap(), 1);
        assert_eq!(container.get("seq").unwrap().as_int().unwrap(), 9);
        assert_eq!(c.build(&parsed).unwrap(), vec![1, 9]);
    }

    #[test]
    fn sequence_round_trips_a_list_of_heterogeneous_subs() {
        let c = Construct::sequence(vec![Construct::u8_(), Construct::u16_be()]);
        let parsed = c.parse(&[5, 0, 7]).unwrap();
        let list = parsed.as_list().unwrap();
        assert_eq!(list.get(0).unwrap().as_int().unwrap(), 5);
        assert_eq!(list.get(1).unwrap().as_int().unwrap(), 7);
        assert_eq!(c.build(&parsed).unwrap(), vec![5, 0, 7]);
    }

    #[test]
    fn union_parses_every_branch_from_the_same_offset_and_seeks_furthest() {
        let c = Construct::union(vec![
            Construct::u8_().named("byte"),
            Construct::u16_be().named("word"),
        ]);
        let parsed = c.parse(&[0x00, 0x01]).unwrap();
        let container = parsed.as_container().unwrap();
        assert_eq!(container.get("byte").unwrap().as_int().unwrap(), 0);
        assert_eq!(container.get("word").unwrap().as_int().unwrap(), 1);
    }

    #[test]
    fn select_picks_the_first_branch_that_parses() {
        let c = Construct::select(vec![
            Construct::const_(Construct::bytes(2), Value::Bytes(vec![0xAA, 0xBB])),
            Construct::bytes(2),
        ]);
        let parsed = c.parse(&[0x01, 0x02]).unwrap();
        assert_eq!(parsed.as_bytes().unwrap(), &[0x01, 0x02]);
    }

    #[test]
    fn select_fails_when_no_branch_matches() {
        let c = Construct::select(vec![Construct::const_(Construct::bytes(1), Value::Bytes(vec![0xAA]))]);
        assert!(c.parse(&[0x01]).is_err());
    }

    #[test]
    fn switch_dispatches_on_an_earlier_sibling_field() {
        let c = Construct::struct_(vec![
            Construct::u8_().named("tag"),
            Construct::switch(
                Expr::field("tag"),
                vec![("1".into(), Construct::u8_()), ("2".into(), Construct::u16_be())],
                None,
            )
            .named("body"),
        ]);
        let parsed = c.parse(&[2, 0x00, 0x05]).unwrap();
        assert_eq!(parsed.as_container().unwrap().get("body").unwrap().as_int().unwrap(), 5);
        assert_eq!(c.build(&parsed).unwrap(), vec![2, 0x00, 0x05]);
    }

    #[test]
    fn switch_without_a_matching_case_or_default_errors() {
        let c = Construct::switch(Expr::lit(9i64), vec![("1".into(), Construct::u8_())], None);
        assert!(matches!(c.parse(&[0]), Err(Error::Switch { .. })));
    }

    #[test]
    fn if_then_else_picks_the_branch_matching_the_predicate() {
        let c = Construct::struct_(vec![
            Construct::u8_().named("flag"),
            Construct::if_then_else(Expr::field("flag").eq(Expr::lit(1i64)), Construct::u8_(), Construct::pass())
                .named("extra"),
        ]);
        let parsed = c.parse(&[1, 42]).unwrap();
        assert_eq!(parsed.as_container().unwrap().get("extra").unwrap().as_int().unwrap(), 42);
    }
}
