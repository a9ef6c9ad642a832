//! Route relations.
//!
//! A relation is a (target, state, priority) triple attached to a
//! route: "set target to state" when the route locks respectively
//! unlocks. Relations own nothing; they resolve their target through
//! the [`LayoutContext`] on every operation and die with their route.

use tracing::debug;

use crate::error::RailError;
use crate::ids::{LocoId, ObjectIdentifier, ObjectType};
use crate::model::LayoutContext;
use crate::serialize::{Properties, Writer};

/// Pack a locomotive function relation state byte: bit 7 carries
/// on/off, bits 0-6 the function slot.
pub const fn loco_function_relation_state(nr: u8, on: bool) -> u8 {
    (nr & 0x7F) | ((on as u8) << 7)
}

/// Unpack the locomotive function relation state byte.
pub const fn unpack_loco_function_relation_state(state: u8) -> (u8, bool) {
    (state & 0x7F, state & 0x80 != 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub target: ObjectIdentifier,
    /// Opaque state byte interpreted by the target kind.
    pub state: u8,
    /// Traversal position; ascending on reserve/lock/execute,
    /// descending on rollback and release.
    pub priority: u8,
}

impl Relation {
    pub const fn new(target: ObjectIdentifier, state: u8, priority: u8) -> Self {
        Self {
            target,
            state,
            priority,
        }
    }

    /// Locomotive targets do not participate in reservation.
    fn is_reservable(&self) -> bool {
        !matches!(self.target.kind, ObjectType::Loco)
    }

    pub fn reserve(&self, ctx: &dyn LayoutContext, loco: LocoId) -> Result<(), RailError> {
        if !self.is_reservable() {
            return Ok(());
        }
        ctx.reserve_object(self.target, loco)
    }

    pub fn lock(&self, ctx: &dyn LayoutContext, loco: LocoId) -> Result<(), RailError> {
        if !self.is_reservable() {
            return Ok(());
        }
        ctx.lock_object(self.target, loco)
    }

    pub fn release(&self, ctx: &dyn LayoutContext, loco: LocoId) {
        if !self.is_reservable() {
            return;
        }
        if let Err(err) = ctx.release_object(self.target, loco) {
            debug!(target = %self.target, %err, "unable to release relation target");
        }
    }

    /// Set the target to the prescribed state.
    pub fn execute(&self, ctx: &dyn LayoutContext) -> Result<(), RailError> {
        ctx.apply_relation_state(self.target, self.state)
    }

    pub fn serialize(&self) -> String {
        Writer::new("Relation")
            .field("targettype", self.target.kind.code())
            .field("targetid", self.target.id)
            .field("state", self.state)
            .field("priority", self.priority)
            .finish()
    }

    pub fn deserialize(serialized: &str) -> Result<Self, RailError> {
        let props = Properties::parse(serialized);
        if props.object_type() != Some("Relation") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not a Relation".to_string(),
            ));
        }
        let kind = ObjectType::from_code(props.get_u8("targettype", 0)).ok_or_else(|| {
            RailError::ConfigInvalid("relation has an unknown target type".to_string())
        })?;
        Ok(Relation::new(
            ObjectIdentifier::new(kind, props.get_u16("targetid", 0)),
            props.get_u8("state", 0),
            props.get_u8("priority", 0),
        ))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
