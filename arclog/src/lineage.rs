//! Runtime type identity and declared ancestry.
//!
//! Rust has no class hierarchy to walk, so "is-a" relationships are
//! declared explicitly: a child type names a parent and supplies a
//! projection `fn(&Child) -> &Parent`. Newtypes and wrapper structs are
//! the usual case (`struct RequestId(Uuid)` is-a `Uuid`).

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifies a concrete `'static` type at runtime.
///
/// Equality and hashing use only the [`TypeId`]; the name is carried
/// for diagnostics and for the default encoding of unknown types.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// The key for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying [`TypeId`].
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, as reported by [`std::any::type_name`].
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without module path or generic arguments.
    ///
    /// `my_app::errors::ValueError` becomes `ValueError`,
    /// `alloc::vec::Vec<u8>` becomes `Vec`.
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeKey").field(&self.name).finish()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head)
}

/// One declared child-to-parent edge.
pub(crate) trait Upcast: Send + Sync {
    /// The parent this edge leads to.
    fn parent(&self) -> TypeKey;

    /// Project a child value onto its parent. `None` if `value` is not the child type.
    fn apply<'a>(&self, value: &'a dyn Any) -> Option<&'a dyn Any>;
}

pub(crate) struct UpcastFn<C, P> {
    project: fn(&C) -> &P,
}

impl<C: Any, P: Any> UpcastFn<C, P> {
    pub(crate) fn new(project: fn(&C) -> &P) -> Self {
        Self { project }
    }
}

impl<C: Any, P: Any> Upcast for UpcastFn<C, P> {
    fn parent(&self) -> TypeKey {
        TypeKey::of::<P>()
    }

    fn apply<'a>(&self, value: &'a dyn Any) -> Option<&'a dyn Any> {
        let child = value.downcast_ref::<C>()?;
        Some((self.project)(child) as &dyn Any)
    }
}
