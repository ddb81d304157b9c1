//! Fixture types shared by the integration suites.

#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use graph_persistence_kernel::host::{HostCollaborator, HostError, HostObjectTable};
use graph_persistence_kernel::{
    object, with_object, ConvertError, ConverterRegistry, InstanceDescriptor, LoadHandler, Member,
    ObjectRef, Persistable, PersistHooks, PersistenceContext, PersistenceManager, Pipeline, SaveHandler,
    SaveStore, SemVer,
};

// ============================================================================
// Composite: members, references, an inlined plain value
// ============================================================================

#[derive(Default)]
pub struct Character {
    pub name: String,
    pub level: u32,
    pub friend: Option<ObjectRef>,
    pub inventory: Option<ObjectRef>,
    pub color: Option<ObjectRef>,
}

impl Character {
    pub fn new(name: &str, level: u32) -> Self {
        Self {
            name: name.to_string(),
            level,
            ..Self::default()
        }
    }
}

impl Persistable for Character {
    fn type_name(&self) -> &'static str {
        "Character"
    }

    fn describe_members(&self) -> Vec<Member> {
        vec![
            Member::value("name", &self.name),
            Member::value("level", &self.level),
            Member::optional_object("friend", self.friend.as_ref()),
            Member::optional_object("inventory", self.inventory.as_ref()),
            Member::optional_object("color", self.color.as_ref()),
        ]
    }

    fn apply_value(&mut self, name: &str, value: serde_json::Value) -> Result<(), String> {
        match name {
            "name" => self.name = serde_json::from_value(value).map_err(|e| e.to_string())?,
            "level" => self.level = serde_json::from_value(value).map_err(|e| e.to_string())?,
            "friend" | "inventory" if value.is_null() => {}
            "color" if value.is_null() => self.color = None,
            "color" => {
                let mut color = Color::default();
                color.apply_plain(value)?;
                self.color = Some(object(color));
            }
            other => return Err(format!("unknown member {}", other)),
        }
        Ok(())
    }

    fn apply_reference(&mut self, name: &str, target: ObjectRef) -> Result<(), String> {
        match name {
            "friend" => self.friend = Some(target),
            "inventory" => self.inventory = Some(target),
            other => return Err(format!("unknown reference {}", other)),
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Plain value
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u8, pub u8, pub u8);

impl Persistable for Color {
    fn type_name(&self) -> &'static str {
        "Color"
    }

    fn to_plain(&self) -> Option<serde_json::Value> {
        Some(json!([self.0, self.1, self.2]))
    }

    fn apply_plain(&mut self, value: serde_json::Value) -> Result<(), String> {
        let (r, g, b): (u8, u8, u8) = serde_json::from_value(value).map_err(|e| e.to_string())?;
        *self = Color(r, g, b);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Hook-only object
// ============================================================================

#[derive(Default)]
pub struct Inventory {
    pub items: Vec<String>,
    pub owner: Option<ObjectRef>,
}

impl Persistable for Inventory {
    fn type_name(&self) -> &'static str {
        "Inventory"
    }

    fn apply_reference(&mut self, name: &str, target: ObjectRef) -> Result<(), String> {
        match name {
            "owner" => {
                self.owner = Some(target);
                Ok(())
            }
            other => Err(format!("unknown reference {}", other)),
        }
    }

    fn hooks(&self) -> Option<&dyn PersistHooks> {
        Some(self)
    }

    fn hooks_mut(&mut self) -> Option<&mut dyn PersistHooks> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PersistHooks for Inventory {
    fn on_save(&self, handler: &mut SaveHandler<'_>) -> Result<(), ConvertError> {
        handler.write("items", &self.items)?;
        if let Some(owner) = &self.owner {
            handler.write_reference("owner", owner)?;
        }
        Ok(())
    }

    fn on_load(&mut self, handler: &mut LoadHandler<'_>) -> Result<(), ConvertError> {
        self.items = handler.read("items")?;
        handler.request_reference("owner");
        Ok(())
    }
}

// ============================================================================
// Converter-only object
// ============================================================================

pub struct Coin {
    pub value: u32,
}

impl Persistable for Coin {
    fn type_name(&self) -> &'static str {
        "Coin"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn register_coin(converters: &mut ConverterRegistry) {
    converters.register_fn(
        |type_name| type_name == "Coin",
        |obj: &dyn Persistable, handler: &mut SaveHandler<'_>| {
            let value = obj
                .as_any()
                .downcast_ref::<Coin>()
                .map(|c| c.value)
                .ok_or_else(|| ConvertError::WrongType("Coin".to_string()))?;
            handler.write("value", &value)
        },
        |handler: &mut LoadHandler<'_>| {
            let value: u32 = handler.read("value")?;
            Ok(object(Coin { value }))
        },
    );
}

// ============================================================================
// Host-managed object and a recording host
// ============================================================================

#[derive(Default)]
pub struct Door {
    pub open: bool,
}

impl Persistable for Door {
    fn type_name(&self) -> &'static str {
        "Door"
    }

    fn describe_members(&self) -> Vec<Member> {
        vec![Member::value("open", &self.open)]
    }

    fn apply_value(&mut self, name: &str, value: serde_json::Value) -> Result<(), String> {
        match name {
            "open" => {
                self.open = serde_json::from_value(value).map_err(|e| e.to_string())?;
                Ok(())
            }
            other => Err(format!("unknown member {}", other)),
        }
    }

    fn is_host_managed(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Default)]
pub struct RecordingHost {
    pub live: Mutex<Vec<InstanceDescriptor>>,
    pub objects: Mutex<HostObjectTable>,
    pub instantiated: Mutex<Vec<InstanceDescriptor>>,
    pub disposed: Mutex<Vec<InstanceDescriptor>>,
}

impl HostCollaborator for RecordingHost {
    fn live_instances(&self, group: &str) -> Vec<InstanceDescriptor> {
        self.live.lock().iter().filter(|d| d.group == group).cloned().collect()
    }

    fn instantiate(&self, descriptor: &InstanceDescriptor) -> Result<(), HostError> {
        self.instantiated.lock().push(descriptor.clone());
        self.live.lock().push(descriptor.clone());
        Ok(())
    }

    fn dispose(&self, descriptor: &InstanceDescriptor) -> Result<(), HostError> {
        self.disposed.lock().push(descriptor.clone());
        self.live.lock().retain(|d| d.instance_id != descriptor.instance_id);
        Ok(())
    }

    fn host_objects(&self, group: &str) -> HostObjectTable {
        self.objects
            .lock()
            .iter()
            .filter(|(path, _)| path.group() == Some(group))
            .map(|(path, object)| (path.clone(), object.clone()))
            .collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn context() -> PersistenceContext {
    let mut context = PersistenceContext::default();
    context.types.register_default::<Character>();
    context.types.register_default::<Inventory>();
    context.types.register_default::<Color>();
    register_coin(&mut context.converters);
    context
}

pub fn manager(store: Arc<dyn SaveStore>, pipeline: Pipeline, version: SemVer) -> PersistenceManager {
    PersistenceManager::new(store, pipeline, version, context())
}

pub fn name_of(object: &ObjectRef) -> String {
    with_object::<Character, _>(object, |c| c.name.clone()).unwrap_or_default()
}

pub fn friend_of(object: &ObjectRef) -> Option<ObjectRef> {
    with_object::<Character, _>(object, |c| c.friend.clone()).flatten()
}
