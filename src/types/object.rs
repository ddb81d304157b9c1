//! Persistable object model.
//!
//! Types opt into persistence by implementing [`Persistable`], which replaces
//! runtime reflection with an explicit member table. Live objects are shared
//! through [`ObjectRef`] handles; identity is the handle's allocation, never
//! value equality, so two equal-looking objects remain two graph nodes.

use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::handler::{LoadHandler, SaveHandler};
use crate::registry::ConvertError;

/// Shared, lockable handle to a live persistable object.
pub type ObjectRef = Arc<RwLock<dyn Persistable>>;

/// Wrap a value in an [`ObjectRef`].
pub fn object<T: Persistable>(value: T) -> ObjectRef {
    Arc::new(RwLock::new(value))
}

/// Identity of a live object (its allocation address).
///
/// Only meaningful while the object is alive; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(usize);

impl ObjectId {
    /// Identity of the object behind `object`.
    pub fn of(object: &ObjectRef) -> Self {
        Self(Arc::as_ptr(object) as *const () as usize)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Which members a type exposes to discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Every member returned by [`Persistable::describe_members`].
    #[default]
    AllMembers,
    /// Only members explicitly marked with [`Member::tagged`].
    TaggedOnly,
}

/// Raw value of a member captured at discovery time.
#[derive(Clone)]
pub enum MemberValue {
    /// Plain data, stored inline.
    Value(serde_json::Value),
    /// Another live object; stored as a reference or, for plain-value
    /// objects, embedded inline.
    Object(ObjectRef),
    /// A value that failed to serialize; reported and skipped at build time.
    Invalid(String),
}

impl fmt::Debug for MemberValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Object(o) => f.debug_tuple("Object").field(&ObjectId::of(o)).finish(),
            Self::Invalid(reason) => f.debug_tuple("Invalid").field(reason).finish(),
        }
    }
}

/// A named member of a persistable object.
#[derive(Debug, Clone)]
pub struct Member {
    /// Member name, unique within the owning object.
    pub name: String,
    /// Captured value.
    pub value: MemberValue,
    /// Whether the member is explicitly tagged for capture.
    pub tagged: bool,
}

impl Member {
    /// Inline value member. A value that cannot be represented as data is
    /// kept as [`MemberValue::Invalid`] so the builder can report it.
    pub fn value<T: Serialize + ?Sized>(name: impl Into<String>, value: &T) -> Self {
        let value = match serde_json::to_value(value) {
            Ok(value) => MemberValue::Value(value),
            Err(e) => MemberValue::Invalid(e.to_string()),
        };
        Self {
            name: name.into(),
            value,
            tagged: false,
        }
    }

    /// Reference member pointing at another live object.
    pub fn object(name: impl Into<String>, target: &ObjectRef) -> Self {
        Self {
            name: name.into(),
            value: MemberValue::Object(Arc::clone(target)),
            tagged: false,
        }
    }

    /// Optional reference member; `None` is stored inline as `null`.
    pub fn optional_object(name: impl Into<String>, target: Option<&ObjectRef>) -> Self {
        match target {
            Some(target) => Self::object(name, target),
            None => Self {
                name: name.into(),
                value: MemberValue::Value(serde_json::Value::Null),
                tagged: false,
            },
        }
    }

    /// Mark the member for capture under [`CaptureMode::TaggedOnly`].
    pub fn tagged(mut self) -> Self {
        self.tagged = true;
        self
    }
}

/// Opt-in custom save/load hooks.
///
/// Objects exposing hooks but no members are persisted entirely through
/// them; composite objects with hooks get both their members and whatever
/// the hooks write.
pub trait PersistHooks {
    /// Write custom data for this object.
    fn on_save(&self, handler: &mut SaveHandler<'_>) -> Result<(), ConvertError>;

    /// Restore custom data. References requested here are wired after every
    /// node in the unit exists.
    fn on_load(&mut self, handler: &mut LoadHandler<'_>) -> Result<(), ConvertError>;
}

/// A type that can take part in graph persistence.
///
/// Every method except [`type_name`](Persistable::type_name) and the `Any`
/// accessors has a default, so a type only implements the capabilities it
/// actually has. Discovery classifies each object from these capabilities.
pub trait Persistable: Any + Send + Sync {
    /// Declared type identity, stored in every node and used to construct
    /// a fresh instance on load.
    fn type_name(&self) -> &'static str;

    /// Which members discovery captures.
    fn capture_mode(&self) -> CaptureMode {
        CaptureMode::AllMembers
    }

    /// Current member table.
    fn describe_members(&self) -> Vec<Member> {
        Vec::new()
    }

    /// Apply an inline value captured under `name`.
    fn apply_value(&mut self, name: &str, _value: serde_json::Value) -> Result<(), String> {
        Err(format!("unknown member '{}'", name))
    }

    /// Wire a reference captured under `name`.
    fn apply_reference(&mut self, name: &str, _target: ObjectRef) -> Result<(), String> {
        Err(format!("unknown reference member '{}'", name))
    }

    /// Custom save/load hooks, if the type has them.
    fn hooks(&self) -> Option<&dyn PersistHooks> {
        None
    }

    /// Mutable access to the custom hooks.
    fn hooks_mut(&mut self) -> Option<&mut dyn PersistHooks> {
        None
    }

    /// Whether the object's lifecycle belongs to the host collaborator.
    fn is_host_managed(&self) -> bool {
        false
    }

    /// Opaque value representation, for types persisted as plain data.
    fn to_plain(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore from the representation produced by [`to_plain`](Persistable::to_plain).
    fn apply_plain(&mut self, _value: serde_json::Value) -> Result<(), String> {
        Err(format!("{} cannot be restored from a plain value", self.type_name()))
    }

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Borrow the concrete type behind `object`, if it is a `T`.
pub fn with_object<T: Persistable, R>(object: &ObjectRef, f: impl FnOnce(&T) -> R) -> Option<R> {
    let guard = object.read();
    guard.as_any().downcast_ref::<T>().map(f)
}

/// Mutably borrow the concrete type behind `object`, if it is a `T`.
pub fn with_object_mut<T: Persistable, R>(
    object: &ObjectRef,
    f: impl FnOnce(&mut T) -> R,
) -> Option<R> {
    let mut guard = object.write();
    guard.as_any_mut().downcast_mut::<T>().map(f)
}

/// Whether two handles point at the same live object.
pub fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    ObjectId::of(a) == ObjectId::of(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        count: u32,
    }

    impl Persistable for Counter {
        fn type_name(&self) -> &'static str {
            "Counter"
        }

        fn describe_members(&self) -> Vec<Member> {
            vec![Member::value("count", &self.count)]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_identity_is_by_allocation() {
        let a = object(Counter::default());
        let b = object(Counter::default());
        let a2 = Arc::clone(&a);

        assert!(same_object(&a, &a2));
        assert!(!same_object(&a, &b));
        assert_eq!(ObjectId::of(&a), ObjectId::of(&a2));
    }

    #[test]
    fn test_downcast_helpers() {
        let c = object(Counter { count: 3 });
        assert_eq!(with_object::<Counter, _>(&c, |c| c.count), Some(3));

        with_object_mut::<Counter, _>(&c, |c| c.count += 1);
        assert_eq!(with_object::<Counter, _>(&c, |c| c.count), Some(4));
    }

    #[test]
    fn test_default_capabilities() {
        let c = Counter::default();
        assert!(c.hooks().is_none());
        assert!(!c.is_host_managed());
        assert!(c.to_plain().is_none());
        assert_eq!(c.capture_mode(), CaptureMode::AllMembers);
    }

    #[test]
    fn test_optional_object_member() {
        let m = Member::optional_object("target", None);
        assert!(matches!(m.value, MemberValue::Value(serde_json::Value::Null)));
        assert!(!m.tagged);
        assert!(Member::value("x", &1).tagged().tagged);
    }

    #[test]
    fn test_unserializable_value_is_marked_invalid() {
        let mut bad: std::collections::HashMap<Vec<u8>, u8> = std::collections::HashMap::new();
        bad.insert(vec![1], 1);
        let m = Member::value("inv", &bad);
        assert!(matches!(m.value, MemberValue::Invalid(_)));
    }
}
