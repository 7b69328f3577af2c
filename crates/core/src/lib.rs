//! `shopgeo-core`: domain building blocks for shop location validation.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, the time source, external location UIDs and the shop /
//! validation-task value types shared by stores, resolvers and the scheduler.

pub mod clock;
pub mod error;
pub mod id;
pub mod location;
pub mod shop;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use id::{ShopId, TaskId, UserId};
pub use location::{LocationUid, OsmElementType};
pub use shop::{NewShop, Shop};
pub use validation::{
    AppliedValidation, Coordinates, NewValidationTask, QueuedValidation, ResolvedLocation,
    ValidationReason, ValidationTask,
};
