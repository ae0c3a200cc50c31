//! Deferred, cached parsing: [`LazyContainer`] (a struct whose fields are materialised on
//! first access) and [`LazyValue`] (the single-field equivalent produced by `OnDemand`).

use std::sync::{Arc, Mutex, OnceLock};

use indexmap::IndexMap;
use log::trace;

use crate::construct::Construct;
use crate::context::Context;
use crate::error::Result;
use crate::value::{Container, Value};

/// One not-yet-parsed (or already-cached) field of a [`LazyContainer`].
#[derive(Debug)]
struct LazyField {
    name: String,
    construct: Arc<Construct>,
    offset: u64,
}

/// A struct record whose fields are parsed from the underlying bytes the first time
/// they're asked for, then cached. Two invariants hold: repeated access of the same
/// field returns the identical value, and building from a `LazyContainer` never forces
/// a field the builder doesn't itself need (see [`LazyContainer::get`] vs.
/// [`LazyContainer::materialize`]).
#[derive(Debug)]
pub struct LazyContainer {
    bytes: Arc<[u8]>,
    ctx: Context,
    fields: Vec<LazyField>,
    /// Declaration order of every field, lazy or eager — `fields` alone only covers the
    /// deferred ones, but `materialize` and `field_names` need the full shape.
    order: Vec<String>,
    cache: Mutex<IndexMap<String, Value>>,
}

impl LazyContainer {
    pub fn new(
        bytes: Arc<[u8]>,
        ctx: Context,
        fields: Vec<(String, Arc<Construct>, u64)>,
    ) -> Self {
        let order = fields.iter().map(|(name, ..)| name.clone()).collect();
        LazyContainer {
            bytes,
            ctx,
            fields: fields
                .into_iter()
                .map(|(name, construct, offset)| LazyField { name, construct, offset })
                .collect(),
            order,
            cache: Mutex::new(IndexMap::new()),
        }
    }

    /// Like [`LazyContainer::new`], but some fields were already parsed eagerly (e.g. a
    /// `LazyStruct` field whose size isn't known without reading it) and just need to be
    /// seeded into the cache rather than deferred.
    pub fn new_mixed(
        bytes: Arc<[u8]>,
        ctx: Context,
        lazy_fields: Vec<(String, Arc<Construct>, u64)>,
        eager_fields: Vec<(String, Value)>,
        order: Vec<String>,
    ) -> Self {
        let cache = Mutex::new(eager_fields.into_iter().collect());
        LazyContainer {
            bytes,
            ctx,
            fields: lazy_fields
                .into_iter()
                .map(|(name, construct, offset)| LazyField { name, construct, offset })
                .collect(),
            order,
            cache,
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Parses `name` from the underlying bytes if it hasn't been already, and returns
    /// the (now cached) value.
    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(v) = self.cache.lock().unwrap().get(name) {
            return Ok(v.clone());
        }
        let field = self
            .fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| crate::error::Error::Lookup(format!("no lazy field named {name:?}")))?;
        trace!("materialising lazy field {name:?} at offset {}", field.offset);
        let mut cursor = std::io::Cursor::new(self.bytes.as_ref());
        cursor.set_position(field.offset);
        let value = field.construct.parse_stream(&mut cursor, &self.ctx)?;
        self.cache.lock().unwrap().insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Forces every field and returns a plain [`Container`]. Used when a caller treats
    /// the lazy record as an ordinary one (equality, iteration, nesting into another
    /// container).
    pub fn materialize(&self) -> Result<Container> {
        let mut out = Container::new();
        for name in &self.order {
            let v = self.get(name)?;
            out.insert_overwrite(name.clone(), v);
        }
        Ok(out)
    }
}

impl PartialEq for LazyContainer {
    fn eq(&self, other: &Self) -> bool {
        self.materialize().ok() == other.materialize().ok()
    }
}

/// The single-value equivalent of [`LazyContainer`], produced by `OnDemand`.
#[derive(Debug, Clone)]
pub struct LazyValue {
    inner: Arc<LazyValueInner>,
}

#[derive(Debug)]
struct LazyValueInner {
    bytes: Arc<[u8]>,
    ctx: Context,
    construct: Arc<Construct>,
    offset: u64,
    cache: OnceLock<Value>,
}

impl LazyValue {
    pub fn new(bytes: Arc<[u8]>, ctx: Context, construct: Arc<Construct>, offset: u64) -> Self {
        LazyValue {
            inner: Arc::new(LazyValueInner { bytes, ctx, construct, offset, cache: OnceLock::new() }),
        }
    }

    /// True if the value has already been pulled off the stream.
    pub fn is_forced(&self) -> bool {
        self.inner.cache.get().is_some()
    }

    /// Parses the value if necessary and returns it. Safe to call repeatedly and from
    /// multiple threads; the underlying read happens at most once.
    pub fn force(&self) -> Result<Value> {
        if let Some(v) = self.inner.cache.get() {
            return Ok(v.clone());
        }
        trace!("forcing on-demand value at offset {}", self.inner.offset);
        let mut cursor = std::io::Cursor::new(self.inner.bytes.as_ref());
        cursor.set_position(self.inner.offset);
        let value = self.inner.construct.parse_stream(&mut cursor, &self.inner.ctx)?;
        Ok(self.inner.cache.get_or_init(|| value).clone())
    }
}

impl PartialEq for LazyValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.force().ok() == other.force().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::Construct;

    #[test]
    fn lazy_container_caches_and_skips_unaccessed_fields() {
        let bytes: Arc<[u8]> = Arc::from(vec![0xAA, 0xBB, 0xCC, 0xDD].into_boxed_slice());
        let fields = vec![
            ("a".to_string(), Arc::new(Construct::byte()), 0u64),
            ("b".to_string(), Arc::new(Construct::byte()), 1u64),
            ("c".to_string(), Arc::new(Construct::byte()), 2u64),
        ];
        let lazy = LazyContainer::new(bytes, Context::root(), fields);
        let b = lazy.get("b").unwrap();
        assert_eq!(b, Value::Int(0xBB));
        // repeated access returns the same (cached) value without re-reading
        assert_eq!(lazy.get("b").unwrap(), Value::Int(0xBB));
        assert!(!lazy.cache.lock().unwrap().contains_key("a"));
    }

    #[test]
    fn lazy_value_forces_once() {
        let bytes: Arc<[u8]> = Arc::from(vec![7u8].into_boxed_slice());
        let lv = LazyValue::new(bytes, Context::root(), Arc::new(Construct::byte()), 0);
        assert!(!lv.is_forced());
        assert_eq!(lv.force().unwrap(), Value::Int(7));
        assert!(lv.is_forced());
    }
}
