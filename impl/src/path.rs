//! A small expression DSL standing in for the closures a combinator would otherwise
//! require for "the length is whatever field `n` holds" or "stop once `this == 0`".
//!
//! Every construct parameter that the catalogue document calls a "context function" or
//! a "predicate" is, concretely, an [`Expr`] here. Users who want something the DSL
//! can't express drop to [`Expr::custom`], which wraps an arbitrary closure — the DSL
//! is sugar over that escape hatch, not a replacement for it.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::value::Value;

type CustomFn = Arc<dyn Fn(&Context, Option<&Value>) -> Result<Value> + Send + Sync>;

/// An expression evaluated against the current context and, where one exists, the
/// value currently being examined (the `this` of a predicate).
#[derive(Clone)]
pub enum Expr {
    /// A literal value, independent of context.
    Lit(Value),
    /// The value currently under examination (e.g. the item `RepeatUntil` just parsed).
    This,
    /// Looks up a name in the current context. Dotted names (`"hdr.len"`) walk through
    /// nested containers.
    Field(String),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    /// The byte/item length of whatever the inner expression evaluates to.
    Len(Box<Expr>),
    /// Escape hatch for anything the DSL can't express.
    Custom(CustomFn),
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lit(v) => write!(f, "Lit({v:?})"),
            Expr::This => write!(f, "This"),
            Expr::Field(n) => write!(f, "Field({n:?})"),
            Expr::Custom(_) => write!(f, "Custom(..)"),
            Expr::Eq(a, b) => write!(f, "({a:?} == {b:?})"),
            Expr::Ne(a, b) => write!(f, "({a:?} != {b:?})"),
            Expr::Lt(a, b) => write!(f, "({a:?} < {b:?})"),
            Expr::Le(a, b) => write!(f, "({a:?} <= {b:?})"),
            Expr::Gt(a, b) => write!(f, "({a:?} > {b:?})"),
            Expr::Ge(a, b) => write!(f, "({a:?} >= {b:?})"),
            Expr::And(a, b) => write!(f, "({a:?} && {b:?})"),
            Expr::Or(a, b) => write!(f, "({a:?} || {b:?})"),
            Expr::Not(a) => write!(f, "!{a:?}"),
            Expr::Add(a, b) => write!(f, "({a:?} + {b:?})"),
            Expr::Sub(a, b) => write!(f, "({a:?} - {b:?})"),
            Expr::Mul(a, b) => write!(f, "({a:?} * {b:?})"),
            Expr::Len(a) => write!(f, "len({a:?})"),
        }
    }
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn this() -> Self {
        Expr::This
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Lit(value.into())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Context, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Expr::Custom(Arc::new(f))
    }

    pub fn eq(self, other: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(other))
    }
    pub fn ne(self, other: Expr) -> Self {
        Expr::Ne(Box::new(self), Box::new(other))
    }
    pub fn lt(self, other: Expr) -> Self {
        Expr::Lt(Box::new(self), Box::new(other))
    }
    pub fn le(self, other: Expr) -> Self {
        Expr::Le(Box::new(self), Box::new(other))
    }
    pub fn gt(self, other: Expr) -> Self {
        Expr::Gt(Box::new(self), Box::new(other))
    }
    pub fn ge(self, other: Expr) -> Self {
        Expr::Ge(Box::new(self), Box::new(other))
    }
    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }
    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
    pub fn add(self, other: Expr) -> Self {
        Expr::Add(Box::new(self), Box::new(other))
    }
    pub fn sub(self, other: Expr) -> Self {
        Expr::Sub(Box::new(self), Box::new(other))
    }
    pub fn mul(self, other: Expr) -> Self {
        Expr::Mul(Box::new(self), Box::new(other))
    }
    pub fn len(self) -> Self {
        Expr::Len(Box::new(self))
    }

    /// Evaluates the expression. `this`, when present, is what [`Expr::This`] resolves to.
    pub fn eval(&self, ctx: &Context, this: Option<&Value>) -> Result<Value> {
        match self {
            Expr::Lit(v) => Ok(v.clone()),
            Expr::This => this
                .cloned()
                .ok_or_else(|| Error::String("`this` referenced outside a predicate".into())),
            Expr::Field(name) => resolve_field(ctx, name),
            Expr::Custom(f) => f(ctx, this),
            Expr::Eq(a, b) => Ok(Value::Bool(a.eval(ctx, this)? == b.eval(ctx, this)?)),
            Expr::Ne(a, b) => Ok(Value::Bool(a.eval(ctx, this)? != b.eval(ctx, this)?)),
            Expr::Lt(a, b) => Ok(Value::Bool(a.eval_int(ctx, this)? < b.eval_int(ctx, this)?)),
            Expr::Le(a, b) => Ok(Value::Bool(a.eval_int(ctx, this)? <= b.eval_int(ctx, this)?)),
            Expr::Gt(a, b) => Ok(Value::Bool(a.eval_int(ctx, this)? > b.eval_int(ctx, this)?)),
            Expr::Ge(a, b) => Ok(Value::Bool(a.eval_int(ctx, this)? >= b.eval_int(ctx, this)?)),
            Expr::And(a, b) => Ok(Value::Bool(a.eval_bool(ctx, this)? && b.eval_bool(ctx, this)?)),
            Expr::Or(a, b) => Ok(Value::Bool(a.eval_bool(ctx, this)? || b.eval_bool(ctx, this)?)),
            Expr::Not(a) => Ok(Value::Bool(!a.eval_bool(ctx, this)?)),
            Expr::Add(a, b) => Ok(Value::Int(a.eval_int(ctx, this)? + b.eval_int(ctx, this)?)),
            Expr::Sub(a, b) => Ok(Value::Int(a.eval_int(ctx, this)? - b.eval_int(ctx, this)?)),
            Expr::Mul(a, b) => Ok(Value::Int(a.eval_int(ctx, this)? * b.eval_int(ctx, this)?)),
            Expr::Len(a) => {
                let v = a.eval(ctx, this)?;
                let len = match &v {
                    Value::Bytes(b) => b.len(),
                    Value::Str(s) => s.len(),
                    Value::List(l) => l.len(),
                    Value::Container(c) => c.len(),
                    other => {
                        return Err(Error::String(format!("len() of non-sized value {other:?}")))
                    }
                };
                Ok(Value::Int(len as i128))
            }
        }
    }

    pub fn eval_int(&self, ctx: &Context, this: Option<&Value>) -> Result<i128> {
        self.eval(ctx, this)?.as_int()
    }

    pub fn eval_usize(&self, ctx: &Context, this: Option<&Value>) -> Result<usize> {
        let n = self.eval_int(ctx, this)?;
        usize::try_from(n).map_err(|_| Error::String(format!("expected a non-negative size, found {n}")))
    }

    pub fn eval_bool(&self, ctx: &Context, this: Option<&Value>) -> Result<bool> {
        match self.eval(ctx, this)? {
            Value::Bool(b) => Ok(b),
            Value::Int(n) => Ok(n != 0),
            other => Err(Error::String(format!("expected a bool, found {other:?}"))),
        }
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Lit(Value::Int(n as i128))
    }
}

impl From<usize> for Expr {
    fn from(n: usize) -> Self {
        Expr::Lit(Value::Int(n as i128))
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::field(name)
    }
}

fn resolve_field(ctx: &Context, path: &str) -> Result<Value> {
    let mut parts = path.split('.').peekable();
    // Each leading `_` segment hops up one enclosing scope before any field lookup
    // happens, per §3's "`_` refers to the parent context".
    let mut scope = ctx.clone();
    while parts.peek() == Some(&"_") {
        parts.next();
        scope = scope
            .parent()
            .ok_or_else(|| Error::Lookup("`_` has no parent scope here".into()))?;
    }
    let first = parts.next().ok_or_else(|| Error::Lookup(format!("empty field path {path:?}")))?;
    let mut value = scope
        .get(first)
        .ok_or_else(|| Error::Lookup(format!("no field named {first:?} in context")))?;
    for part in parts {
        let container = value.as_container()?;
        value = container
            .get(part)
            .cloned()
            .ok_or_else(|| Error::Lookup(format!("no field named {part:?}")))?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_and_comparison() {
        let ctx = Context::root().bind("length", Value::Int(3));
        let expr = Expr::field("length").eq(Expr::lit(3i64));
        assert!(expr.eval_bool(&ctx, None).unwrap());
    }

    #[test]
    fn this_refers_to_examined_value() {
        let expr = Expr::this().eq(Expr::lit(0i64));
        let ctx = Context::root();
        assert!(expr.eval_bool(&ctx, Some(&Value::Int(0))).unwrap());
        assert!(!expr.eval_bool(&ctx, Some(&Value::Int(1))).unwrap());
    }

    #[test]
    fn dotted_path_walks_nested_containers() {
        let mut inner = crate::value::Container::new();
        inner.insert("len", Value::Int(7)).unwrap();
        let ctx = Context::root().bind("hdr", Value::Container(inner));
        let expr = Expr::field("hdr.len");
        assert_eq!(expr.eval(&ctx, None).unwrap(), Value::Int(7));
    }

    #[test]
    fn len_of_bytes() {
        let expr = Expr::this().len();
        let ctx = Context::root();
        let v = Value::Bytes(vec![1, 2, 3]);
        assert_eq!(expr.eval(&ctx, Some(&v)).unwrap(), Value::Int(3));
    }
}
