//! The small constructs that don't belong to any of the bigger families: `Pass`,
//! `Terminator`, `Computed`, `Reconfig`, and `Const`.

use std::sync::Arc;

use super::{Construct, Flags, Kind};
use crate::path::Expr;
use crate::value::Value;

impl Construct {
    /// Consumes nothing, produces `Value::None`. Used as the `else_` half of [`Construct::if_`]
    /// and as a placeholder sub wherever the catalogue needs a no-op.
    pub fn pass() -> Self {
        Construct::new(Kind::Pass)
    }

    /// Fails unless the stream is exhausted at this point.
    pub fn terminator() -> Self {
        Construct::new(Kind::Terminator)
    }

    /// A value derived entirely from context, consuming no bytes either way.
    pub fn computed(expr: impl Into<Expr>) -> Self {
        Construct::new(Kind::Computed(expr.into()))
    }

    /// Rebinds `sub`'s name and/or flags without touching its wire behaviour. The new
    /// name and flags are applied to the wrapper itself (so `.name()`/`.flags()` reflect
    /// them immediately); the fields on [`Kind::Reconfig`] just record what changed.
    pub fn reconfig(sub: Construct, rename: Option<&str>, set: Flags, clear: Flags) -> Self {
        let name = rename.map(str::to_string).or_else(|| sub.name.clone());
        let flags = (sub.flags | set) & !clear;
        let mut reconfigured = Construct::new(Kind::Reconfig {
            sub: Arc::new(sub),
            rename: rename.map(str::to_string),
            set,
            clear,
        });
        reconfigured.name = name;
        reconfigured.flags = flags;
        reconfigured
    }

    /// `sub`, but parsing fails unless the decoded value equals `expected`, and building
    /// always writes `expected` regardless of what's passed in.
    pub fn const_(sub: Construct, expected: Value) -> Self {
        Construct::new(Kind::Const { sub: Arc::new(sub), expected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::Error;

    #[test]
    fn pass_consumes_nothing_and_builds_only_from_none() {
        let c = Construct::pass();
        assert_eq!(c.parse(&[1, 2, 3]).unwrap(), Value::None);
        assert!(c.build(&Value::None).is_ok());
        assert!(c.build(&Value::Int(1)).is_err());
    }

    #[test]
    fn terminator_requires_the_stream_to_be_exhausted() {
        let c = Construct::terminator();
        assert!(c.parse(&[]).is_ok());
        assert!(c.parse(&[1]).is_err());
    }

    #[test]
    fn computed_reads_from_context_and_consumes_no_bytes() {
        let c = Construct::computed(Expr::field("n").add(Expr::lit(1i64)));
        let ctx = Context::root().bind("n", Value::Int(4));
        assert_eq!(c.parse_with_context(&[], &ctx).unwrap(), Value::Int(5));
    }

    #[test]
    fn const_rejects_a_mismatched_value() {
        let c = Construct::const_(Construct::u8_(), Value::Int(7));
        assert!(c.parse(&[7]).is_ok());
        assert!(matches!(c.parse(&[8]), Err(Error::Const { .. })));
    }

    #[test]
    fn reconfig_renames_without_changing_wire_behaviour() {
        let c = Construct::reconfig(Construct::u8_(), Some("renamed"), Flags::empty(), Flags::empty());
        assert_eq!(c.name(), Some("renamed"));
        assert_eq!(c.parse(&[5]).unwrap(), Value::Int(5));
    }
}
