//! The record model: dynamic field bags, resource kinds and the typed
//! wrappers layered over them.

pub mod fields;
pub mod kinds;
pub mod lazy;
pub mod record;
pub mod value;

pub use fields::Fields;
pub use kinds::{Attachment, Bug, Comment, Component, FlagType, Group, Product, User};
pub use lazy::LazyRecord;
pub use record::{ResourceKind, ResourceRecord};
pub use value::FieldValue;
