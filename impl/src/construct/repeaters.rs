//! Fixed-count, bounded, and predicate-terminated repetition.

use std::sync::Arc;

use super::{Construct, Kind};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::path::Expr;
use crate::stream::Stream;
use crate::value::{ListContainer, Value};

impl Construct {
    /// Fixed-count array, resolving `count` from context at parse/build time.
    pub fn array(count: impl Into<Expr>, sub: Construct) -> Self {
        Construct::new(Kind::Array { count: count.into(), sub: Arc::new(sub) })
    }

    pub fn range(min: usize, max: usize, sub: Construct) -> Self {
        assert!(min <= max, "Range requires 0 <= min <= max");
        Construct::new(Kind::Range { min, max: Some(max), sub: Arc::new(sub) })
    }

    /// `Range(0, inf)`.
    pub fn greedy_range_of(sub: Construct) -> Self {
        Construct::new(Kind::Range { min: 0, max: None, sub: Arc::new(sub) })
    }

    /// `Range(0, inf)` that tolerates zero successes without being distinguished from
    /// `greedy_range_of` at the type level — kept as a named alias per §4.4.
    pub fn optional_greedy_range_of(sub: Construct) -> Self {
        Construct::greedy_range_of(sub)
    }

    pub fn repeat_until(pred: impl Into<Expr>, sub: Construct) -> Self {
        Construct::new(Kind::RepeatUntil { pred: pred.into(), sub: Arc::new(sub) })
    }
}

pub(super) fn parse_array(stream: &mut dyn Stream, ctx: &Context, count: &Expr, sub: &Arc<Construct>) -> Result<Value> {
    let n = count.eval_usize(ctx, None)?;
    let mut list = ListContainer::new();
    for i in 0..n {
        match sub.do_parse(stream, ctx) {
            Ok(v) => list.push(v),
            Err(_) => return Err(Error::Array { expected: n, found: i }),
        }
    }
    Ok(Value::List(list))
}

pub(super) fn build_array(value: &Value, stream: &mut dyn Stream, ctx: &Context, count: &Expr, sub: &Arc<Construct>) -> Result<()> {
    let n = count.eval_usize(ctx, None)?;
    let list = value.as_list()?;
    if list.len() != n {
        return Err(Error::Array { expected: n, found: list.len() });
    }
    for item in list.iter() {
        sub.do_build(item, stream, ctx)?;
    }
    Ok(())
}

pub(super) fn parse_range(
    stream: &mut dyn Stream,
    ctx: &Context,
    min: usize,
    max: Option<usize>,
    sub: &Arc<Construct>,
) -> Result<Value> {
    let mut list = ListContainer::new();
    loop {
        if let Some(max) = max {
            if list.len() >= max {
                break;
            }
        }
        let pos = stream.tell()?;
        let scope = ctx.child();
        match sub.do_parse(stream, &scope) {
            Ok(v) => list.push(v),
            Err(_) => {
                stream.seek_abs(pos as i64)?;
                break;
            }
        }
    }
    if list.len() < min {
        return Err(Error::Range { min, max: max.unwrap_or(usize::MAX), found: list.len() });
    }
    Ok(Value::List(list))
}

pub(super) fn build_range(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    min: usize,
    max: Option<usize>,
    sub: &Arc<Construct>,
) -> Result<()> {
    let list = value.as_list()?;
    let max = max.unwrap_or(usize::MAX);
    if list.len() < min || list.len() > max {
        return Err(Error::Range { min, max, found: list.len() });
    }
    for item in list.iter() {
        sub.do_build(item, stream, ctx)?;
    }
    Ok(())
}

pub(super) fn parse_repeat_until(
    stream: &mut dyn Stream,
    ctx: &Context,
    pred: &Expr,
    sub: &Arc<Construct>,
) -> Result<Value> {
    let mut list = ListContainer::new();
    loop {
        let item = sub
            .do_parse(stream, ctx)
            .map_err(|_| Error::Array { expected: list.len() + 1, found: list.len() })?;
        let stop = pred.eval_bool(ctx, Some(&item))?;
        list.push(item);
        if stop {
            break;
        }
    }
    Ok(Value::List(list))
}

/// Per §9's resolved open question: each iteration builds against a fresh child scope
/// of the context `RepeatUntil` itself received, mirroring the parse side.
pub(super) fn build_repeat_until(
    value: &Value,
    stream: &mut dyn Stream,
    ctx: &Context,
    pred: &Expr,
    sub: &Arc<Construct>,
) -> Result<()> {
    let list = value.as_list()?;
    if list.is_empty() {
        return Err(Error::Array { expected: 1, found: 0 });
    }
    for (i, item) in list.iter().enumerate() {
        let iter_scope = ctx.child();
        sub.do_build(item, stream, &iter_scope)?;
        let stop = pred.eval_bool(&iter_scope, Some(item))?;
        if !stop && i == list.len() - 1 {
            return Err(Error::Array { expected: i + 2, found: i + 1 });
        }
    }
    Ok(())
}
