//! The type-dispatched encoder.
//!
//! An [`Encoder`] owns a registry mapping concrete types to [`Handler`]s,
//! a set of declared ancestor edges, and a per-type resolution cache.
//! Resolution for a type is: exact match, else the nearest registered
//! ancestor (breadth-first over declared parents, siblings in declaration
//! order), else the default handler. The first resolution of each type is
//! cached, so steady-state dispatch is one hash lookup.
//!
//! `encode` is total. Handler errors, handler panics and runaway nesting
//! all degrade to a fallback value; logging must never be the reason an
//! application goes down.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::builtin;
use crate::config::EncoderConfig;
use crate::error::{ConflictError, HandlerError};
use crate::handler::{self, EncodeContext, EncodeTuple, Handler};
use crate::lineage::{TypeKey, Upcast, UpcastFn};
use crate::value;

/// Type name reported for type-erased values of unregistered types.
const UNKNOWN_TYPE: &str = "unknown";

struct Entry {
    key: TypeKey,
    handler: Arc<dyn Handler>,
}

/// Handlers, ancestor edges and the default handler.
pub(crate) struct Registry {
    handlers: HashMap<TypeId, Entry>,
    ancestors: HashMap<TypeId, Vec<Arc<dyn Upcast>>>,
    names: HashMap<TypeId, &'static str>,
    default: Arc<dyn Handler>,
}

impl Registry {
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            ancestors: HashMap::new(),
            names: HashMap::new(),
            default: handler::unknown_handler(),
        }
    }

    /// Insert or replace the handler for `key`, returning the previous one.
    pub(crate) fn put(
        &mut self,
        key: TypeKey,
        handler: Arc<dyn Handler>,
    ) -> Option<Arc<dyn Handler>> {
        self.names.insert(key.id(), key.name());
        self.handlers
            .insert(key.id(), Entry { key, handler })
            .map(|prev| prev.handler)
    }

    fn contains(&self, id: TypeId) -> bool {
        self.handlers.contains_key(&id)
    }

    fn add_ancestor(&mut self, child: TypeKey, edge: Arc<dyn Upcast>) {
        self.names.insert(child.id(), child.name());
        self.names.insert(edge.parent().id(), edge.parent().name());
        let parents = self.ancestors.entry(child.id()).or_default();
        match parents.iter_mut().find(|p| p.parent() == edge.parent()) {
            Some(existing) => *existing = edge,
            None => parents.push(edge),
        }
    }

    fn resolve(&self, id: TypeId) -> Resolution {
        let subject = self.names.get(&id).copied();
        let mut queue: VecDeque<(TypeId, Vec<Arc<dyn Upcast>>)> = VecDeque::new();
        let mut seen = HashSet::new();
        queue.push_back((id, Vec::new()));

        while let Some((current, path)) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(entry) = self.handlers.get(&current) {
                return Resolution {
                    handler: Arc::clone(&entry.handler),
                    path,
                    via: Some(entry.key),
                    subject,
                };
            }
            for edge in self.ancestors.get(&current).into_iter().flatten() {
                let mut next = path.clone();
                next.push(Arc::clone(edge));
                queue.push_back((edge.parent().id(), next));
            }
        }

        Resolution {
            handler: Arc::clone(&self.default),
            path: Vec::new(),
            via: None,
            subject,
        }
    }
}

/// Cached outcome of resolving one concrete type.
struct Resolution {
    handler: Arc<dyn Handler>,
    /// Upcasts from the concrete type to the handler's type.
    path: Vec<Arc<dyn Upcast>>,
    /// Type whose handler was chosen; `None` for the default handler.
    via: Option<TypeKey>,
    /// Name of the concrete type, when the registry knows it.
    subject: Option<&'static str>,
}

impl Resolution {
    fn project<'a>(&self, value: &'a dyn Any) -> Option<&'a dyn Any> {
        self.path.iter().try_fold(value, |current, edge| edge.apply(current))
    }
}

/// Type-dispatched encoder for structured log fields.
///
/// Construct one at startup, register caller types, then share it
/// (`&Encoder` or `Arc<Encoder>`) with every call site that logs. Each
/// instance is independent; tests build their own.
///
/// ```
/// use arclog::Encoder;
/// use serde_json::json;
///
/// struct UserId(u64);
///
/// let encoder = Encoder::new();
/// encoder
///     .register(|id: &UserId, _| Ok(json!(format!("user-{}", id.0))))
///     .unwrap();
///
/// assert_eq!(encoder.encode(&UserId(7)), json!("user-7"));
/// assert_eq!(encoder.encode(&f64::NAN), json!("NaN"));
/// ```
pub struct Encoder {
    config: EncoderConfig,
    registry: RwLock<Registry>,
    cache: RwLock<HashMap<TypeId, Arc<Resolution>>>,
}

impl Encoder {
    /// Encoder with the built-in handlers and default configuration.
    pub fn new() -> Self {
        Self::with_config(EncoderConfig::default())
    }

    /// Encoder with the built-in handlers and the given configuration.
    pub fn with_config(config: EncoderConfig) -> Self {
        let mut registry = Registry::new();
        builtin::install(&mut registry);
        Self::from_registry(config, registry)
    }

    /// Encoder with no handlers at all; every value takes the default path.
    pub fn empty() -> Self {
        Self::from_registry(EncoderConfig::default(), Registry::new())
    }

    fn from_registry(config: EncoderConfig, registry: Registry) -> Self {
        Self {
            config,
            registry: RwLock::new(registry),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The encoder's configuration.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    // --- Registration ---

    /// Register `handler` for `T`.
    ///
    /// # Errors
    ///
    /// [`ConflictError`] if `T` already has a handler (built-in or not).
    /// Use [`register_override`](Self::register_override) to replace one.
    pub fn register<T, F>(&self, handler: F) -> Result<(), ConflictError>
    where
        T: Any,
        F: Fn(&T, &EncodeContext<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register_handler(TypeKey::of::<T>(), handler::handler_fn(handler), false)
            .map(|_| ())
    }

    /// Register `handler` for `T`, replacing any existing handler.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn register_override<T, F>(&self, handler: F) -> bool
    where
        T: Any,
        F: Fn(&T, &EncodeContext<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        // Cannot conflict when overwriting.
        self.register_handler(TypeKey::of::<T>(), handler::handler_fn(handler), true)
            .unwrap_or(false)
    }

    /// Type-erased registration.
    ///
    /// With `overwrite` unset this behaves like [`register`](Self::register);
    /// with it set, like [`register_override`](Self::register_override).
    /// Returns whether an existing handler was replaced.
    ///
    /// # Errors
    ///
    /// [`ConflictError`] if `key` is registered and `overwrite` is false.
    pub fn register_handler(
        &self,
        key: TypeKey,
        handler: Arc<dyn Handler>,
        overwrite: bool,
    ) -> Result<bool, ConflictError> {
        let mut registry = self.write_registry();
        if !overwrite && registry.contains(key.id()) {
            return Err(ConflictError { key });
        }
        let replaced = registry.put(key, handler).is_some();
        self.invalidate(&registry);
        tracing::debug!(type_name = key.name(), replaced, "registered encoder handler");
        Ok(replaced)
    }

    /// Encode `T` through its `Display` impl.
    ///
    /// # Errors
    ///
    /// [`ConflictError`] if `T` already has a handler.
    pub fn register_display<T: Any + fmt::Display>(&self) -> Result<(), ConflictError> {
        self.register_handler(TypeKey::of::<T>(), handler::display_handler::<T>(), false)
            .map(|_| ())
    }

    /// Encode `T` through its `serde::Serialize` impl (struct-shaped output).
    ///
    /// # Errors
    ///
    /// [`ConflictError`] if `T` already has a handler.
    pub fn register_serialize<T: Any + Serialize>(&self) -> Result<(), ConflictError> {
        self.register_handler(TypeKey::of::<T>(), handler::serialize_handler::<T>(), false)
            .map(|_| ())
    }

    /// Encode the error type `E` as `{"kind": <type name>, "message": ...}`.
    ///
    /// # Errors
    ///
    /// [`ConflictError`] if `E` already has a handler.
    pub fn register_error<E: std::error::Error + 'static>(&self) -> Result<(), ConflictError> {
        self.register_handler(TypeKey::of::<E>(), handler::error_handler::<E>(), false)
            .map(|_| ())
    }

    /// Encode the collection `C` as an array of its `T` elements.
    ///
    /// # Errors
    ///
    /// [`ConflictError`] if `C` already has a handler.
    pub fn register_sequence<C, T>(&self) -> Result<(), ConflictError>
    where
        C: Any,
        T: Any,
        for<'a> &'a C: IntoIterator<Item = &'a T>,
    {
        self.register_handler(TypeKey::of::<C>(), handler::sequence_handler::<C, T>(), false)
            .map(|_| ())
    }

    /// Encode the map `C` as an object of its `K -> V` entries.
    ///
    /// # Errors
    ///
    /// [`ConflictError`] if `C` already has a handler.
    pub fn register_mapping<C, K, V>(&self) -> Result<(), ConflictError>
    where
        C: Any,
        K: Any,
        V: Any,
        for<'a> &'a C: IntoIterator<Item = (&'a K, &'a V)>,
    {
        self.register_handler(
            TypeKey::of::<C>(),
            handler::mapping_handler::<C, K, V>(),
            false,
        )
        .map(|_| ())
    }

    /// Encode `Option<T>` as null or the encoding of the inner value.
    ///
    /// # Errors
    ///
    /// [`ConflictError`] if `Option<T>` already has a handler.
    pub fn register_optional<T: Any>(&self) -> Result<(), ConflictError> {
        self.register_handler(
            TypeKey::of::<Option<T>>(),
            handler::optional_handler::<T>(),
            false,
        )
        .map(|_| ())
    }

    /// Encode the tuple `T` as an array of its elements.
    ///
    /// # Errors
    ///
    /// [`ConflictError`] if `T` already has a handler.
    pub fn register_tuple<T: EncodeTuple>(&self) -> Result<(), ConflictError> {
        self.register_handler(TypeKey::of::<T>(), handler::tuple_handler::<T>(), false)
            .map(|_| ())
    }

    /// Declare that `C` is-a `P`.
    ///
    /// When `C` has no handler of its own, it resolves to the nearest
    /// ancestor with one, and that handler receives `project(&child)`.
    /// Declaring the same parent twice replaces the projection in place.
    pub fn declare_ancestor<C: Any, P: Any>(&self, project: fn(&C) -> &P) {
        let child = TypeKey::of::<C>();
        let parent = TypeKey::of::<P>();
        if child == parent {
            return;
        }
        let mut registry = self.write_registry();
        registry.add_ancestor(child, Arc::new(UpcastFn::new(project)));
        self.invalidate(&registry);
        tracing::debug!(
            child = child.name(),
            parent = parent.name(),
            "declared encoder ancestor"
        );
    }

    /// Replace the handler used for types with no registered handler or ancestor.
    pub fn set_default<F>(&self, handler: F)
    where
        F: Fn(&dyn Any, &EncodeContext<'_>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let mut registry = self.write_registry();
        registry.default = handler::erased_handler_fn(handler);
        self.invalidate(&registry);
        tracing::debug!("replaced default encoder handler");
    }

    // --- Introspection ---

    /// Whether `T` has a handler of its own (ancestors are not consulted).
    pub fn is_registered<T: Any>(&self) -> bool {
        self.read_registry().contains(TypeId::of::<T>())
    }

    /// The type whose handler `T` resolves to, or `None` for the default handler.
    pub fn resolves_to<T: Any>(&self) -> Option<TypeKey> {
        self.resolve(TypeId::of::<T>()).via
    }

    /// All types with a handler of their own, in no particular order.
    pub fn registered_types(&self) -> Vec<TypeKey> {
        self.read_registry()
            .handlers
            .values()
            .map(|entry| entry.key)
            .collect()
    }

    /// Number of concrete types with a cached resolution.
    pub fn cached_resolutions(&self) -> usize {
        self.read_cache().len()
    }

    // --- Encoding ---

    /// Encode `value`. Never fails.
    pub fn encode<T: Any>(&self, value: &T) -> Value {
        self.encode_at(value, Some(std::any::type_name::<T>()), 0)
    }

    /// Encode a type-erased value. Never fails.
    pub fn encode_dyn(&self, value: &dyn Any) -> Value {
        self.encode_at(value, None, 0)
    }

    /// Encode `value`, rendering it with `Debug` instead of the default
    /// handler when nothing is registered for its type or its ancestors.
    pub fn encode_debug<T: Any + fmt::Debug>(&self, value: &T) -> Value {
        if self.resolve(TypeId::of::<T>()).via.is_none() {
            return Value::String(format!("{value:?}"));
        }
        self.encode(value)
    }

    /// Encode named log fields into one object, in the order given.
    ///
    /// A repeated name keeps its first position and takes the last value.
    pub fn encode_fields<'a, I>(&self, fields: I) -> Map<String, Value>
    where
        I: IntoIterator<Item = (&'a str, &'a dyn Any)>,
    {
        fields
            .into_iter()
            .map(|(name, value)| (name.to_owned(), self.encode_dyn(value)))
            .collect()
    }

    pub(crate) fn encode_at(
        &self,
        value: &dyn Any,
        type_name: Option<&'static str>,
        depth: usize,
    ) -> Value {
        let resolution = self.resolve(value.type_id());
        let type_name = type_name.or(resolution.subject).unwrap_or(UNKNOWN_TYPE);

        if depth > self.config.max_depth {
            tracing::warn!(
                type_name,
                max_depth = self.config.max_depth,
                "encoder depth limit reached"
            );
            return Value::String(value::MAX_DEPTH_EXCEEDED.to_owned());
        }

        let cx = EncodeContext::new(self, depth, type_name);
        let Some(target) = resolution.project(value) else {
            let err = HandlerError::TypeMismatch {
                expected: resolution.via.map_or(UNKNOWN_TYPE, |key| key.name()),
            };
            return self.fallback(value::HANDLER_ERROR, err.to_string(), type_name);
        };

        if !self.config.catch_panics {
            return match resolution.handler.encode(target, &cx) {
                Ok(encoded) => encoded,
                Err(err) => self.fallback(value::HANDLER_ERROR, err.to_string(), type_name),
            };
        }

        match catch_unwind(AssertUnwindSafe(|| resolution.handler.encode(target, &cx))) {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(err)) => self.fallback(value::HANDLER_ERROR, err.to_string(), type_name),
            Err(payload) => {
                self.fallback(value::HANDLER_PANIC, panic_message(payload.as_ref()), type_name)
            }
        }
    }

    fn fallback(&self, kind: &str, message: String, type_name: &'static str) -> Value {
        tracing::warn!(type_name, kind, error = %message, "encoder handler failed, using fallback");
        value::failure(kind, message, type_name)
    }

    fn resolve(&self, id: TypeId) -> Arc<Resolution> {
        if let Some(hit) = self.read_cache().get(&id) {
            return Arc::clone(hit);
        }

        // Hold the registry read lock while filling the cache so a
        // concurrent registration cannot be overwritten by a stale entry.
        let registry = self.read_registry();
        let resolution = Arc::new(registry.resolve(id));
        tracing::trace!(
            type_name = resolution.subject.unwrap_or(UNKNOWN_TYPE),
            via = resolution.via.map(|key| key.name()),
            "resolved encoder handler"
        );
        self.write_cache().insert(id, Arc::clone(&resolution));
        resolution
    }

    fn invalidate(&self, _registry: &RwLockWriteGuard<'_, Registry>) {
        self.write_cache().clear();
    }

    // Poisoning is recovered: the registry is only mutated by single
    // inserts, so a panicking writer cannot leave it half-updated.

    fn read_registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<TypeId, Arc<Resolution>>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<TypeId, Arc<Resolution>>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("config", &self.config)
            .field("handlers", &self.read_registry().handlers.len())
            .field("cached_resolutions", &self.cached_resolutions())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
