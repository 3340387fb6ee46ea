//! Per-store type-handler registry
//!
//! A registry extends the codec with user types. Each handler owns one tag
//! in the user range (`0x40..=0xFF`) and one concrete Rust type; on encode
//! it lowers the user value to a built-in [`Value`] representation, on
//! decode it lifts that representation back. The codec stays monomorphic:
//! it only ever writes and reads built-in values, with the handler tag in
//! front.
//!
//! Registries are immutable after construction and captured by a store
//! when it is opened. Re-opening a store with a different registry over
//! data written by another is the caller's responsibility; decoding
//! succeeds for overlapping tags and fails with an unknown-tag error
//! otherwise.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MartenError, Result};
use crate::value::{ExtValue, Value};

/// First tag available to user extension types.
pub const USER_TAG_MIN: u8 = 0x40;

/// Read-only ambient state passed to handler decoders (crypto parameters,
/// upstream references and the like).
#[derive(Clone, Default)]
pub struct HandlerContext {
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl HandlerContext {
    pub fn new(payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            payload: Some(payload),
        }
    }

    /// Downcast the context payload.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("present", &self.payload.is_some())
            .finish()
    }
}

/// Encoder/decoder pair for one user type.
///
/// The lowered representation must be a single built-in value (a list or
/// map of fields, typically); the codec writes exactly one nested value
/// after the handler tag, which keeps skipping and metadata projection
/// working without consulting the registry.
pub trait TypeHandler: Send + Sync {
    /// Tag byte, `>= 0x40`. Part of the on-disk contract of every store
    /// opened with this registry.
    fn tag(&self) -> u8;

    /// `TypeId` of the concrete type this handler owns.
    fn type_id(&self) -> TypeId;

    /// Lower a user value to its built-in representation.
    fn encode(&self, value: &dyn ExtValue) -> Result<Value>;

    /// Lift the built-in representation back to a user value
    /// (an [`Value::Ext`] wrapping the concrete type).
    fn decode(&self, repr: Value, ctx: &HandlerContext) -> Result<Value>;
}

/// Immutable extension table mapping tag and type identity to handlers.
pub struct HandlerRegistry {
    by_tag: HashMap<u8, Arc<dyn TypeHandler>>,
    by_type: HashMap<TypeId, Arc<dyn TypeHandler>>,
    context: HandlerContext,
}

impl HandlerRegistry {
    /// Build both lookup tables eagerly, validating that no two handlers
    /// share a tag or a type and that every tag is in the user range.
    pub fn new(
        handlers: Vec<Arc<dyn TypeHandler>>,
        context: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<Self> {
        let mut by_tag = HashMap::with_capacity(handlers.len());
        let mut by_type = HashMap::with_capacity(handlers.len());
        for handler in handlers {
            let tag = handler.tag();
            if tag < USER_TAG_MIN {
                return Err(MartenError::Registry {
                    reason: format!(
                        "tag 0x{:02X} is below the user range (0x{:02X}..)",
                        tag, USER_TAG_MIN
                    ),
                });
            }
            if by_tag.insert(tag, handler.clone()).is_some() {
                return Err(MartenError::Registry {
                    reason: format!("duplicate handler tag 0x{:02X}", tag),
                });
            }
            let tid = TypeHandler::type_id(handler.as_ref());
            if by_type.insert(tid, handler).is_some() {
                return Err(MartenError::Registry {
                    reason: format!("duplicate handler type behind tag 0x{:02X}", tag),
                });
            }
        }
        Ok(Self {
            by_tag,
            by_type,
            context: context.map(HandlerContext::new).unwrap_or_default(),
        })
    }

    pub fn by_tag(&self, tag: u8) -> Option<&Arc<dyn TypeHandler>> {
        self.by_tag.get(&tag)
    }

    pub fn by_type(&self, id: TypeId) -> Option<&Arc<dyn TypeHandler>> {
        self.by_type.get(&id)
    }

    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<u8> = self.by_tag.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("tags", &tags)
            .finish()
    }
}
