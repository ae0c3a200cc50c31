//! The scoped name → value mapping threaded through every parse/build call.
//!
//! Modelled as an immutable, `Arc`-linked chain of frames rather than a cloned
//! `HashMap`: pushing a child scope (struct nesting, a `Select`/`Range` rollback
//! point) is an `Arc` bump, not a deep copy, and discarding a failed branch is just
//! dropping the child `Arc` and keeping the parent.

use std::sync::Arc;

use crate::value::Value;

#[derive(Debug)]
struct Frame {
    parent: Option<Context>,
    bindings: Vec<(String, Value)>,
}

/// A scope. Cheap to clone (`Arc` bump); child scopes see their own bindings plus
/// everything visible through the reserved `_` key on the parent.
#[derive(Debug, Clone)]
pub struct Context(Arc<Frame>);

impl Default for Context {
    fn default() -> Self {
        Self::root()
    }
}

impl Context {
    /// The empty top-level context created by a public `parse`/`build` entry point.
    pub fn root() -> Self {
        Context(Arc::new(Frame { parent: None, bindings: Vec::new() }))
    }

    /// A fresh child scope whose `_` resolves to `self` (nested struct semantics).
    pub fn child(&self) -> Self {
        Context(Arc::new(Frame { parent: Some(self.clone()), bindings: Vec::new() }))
    }

    /// Binds `name` in a *new* scope layered on top of `self`, leaving `self` untouched.
    /// This is how a struct records each sibling's value before the next sibling runs.
    #[must_use]
    pub fn bind(&self, name: impl Into<String>, value: Value) -> Self {
        let mut bindings = Vec::with_capacity(1);
        bindings.push((name.into(), value));
        Context(Arc::new(Frame { parent: Some(self.clone()), bindings }))
    }

    /// Looks up `name` in this scope, then walks up through `_` parents.
    ///
    /// `name == "_"` returns the parent scope's outermost value is not meaningful on its
    /// own; callers that want "the parent context" use [`Context::parent`] instead.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut cur = self;
        loop {
            if let Some((_, v)) = cur.0.bindings.iter().rev().find(|(n, _)| n == name) {
                return Some(v.clone());
            }
            match &cur.0.parent {
                Some(p) => cur = p,
                None => return None,
            }
        }
    }

    /// The enclosing scope, i.e. what the reserved `_` key refers to.
    pub fn parent(&self) -> Option<Context> {
        self.0.parent.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_bindings_are_visible_to_later_fields() {
        let root = Context::root();
        let after_a = root.bind("a", Value::Int(1));
        let after_b = after_a.bind("b", Value::Int(2));
        assert_eq!(after_b.get("a"), Some(Value::Int(1)));
        assert_eq!(after_b.get("b"), Some(Value::Int(2)));
        assert_eq!(after_a.get("b"), None);
    }

    #[test]
    fn child_scope_sees_parent_through_underscore_walk() {
        let outer = Context::root().bind("x", Value::Int(42));
        let inner = outer.child();
        assert_eq!(inner.get("x"), Some(Value::Int(42)));
        assert_eq!(inner.parent().unwrap().get("x"), Some(Value::Int(42)));
    }

    #[test]
    fn rollback_is_just_dropping_the_child() {
        let base = Context::root().bind("kept", Value::Int(1));
        let speculative = base.bind("scratch", Value::Int(99));
        drop(speculative);
        assert_eq!(base.get("scratch"), None);
        assert_eq!(base.get("kept"), Some(Value::Int(1)));
    }
}
