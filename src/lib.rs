//! Client library for the Bugzilla REST API.
//!
//! Records are open field bags ([`object::ResourceRecord`]) tagged with a
//! [`object::ResourceKind`]; typed wrappers such as [`object::Bug`] add
//! derived accessors and write-body construction on top without closing
//! the schema. Partial fetches hand back an [`object::LazyRecord`] that
//! transparently completes itself over the same connection when an elided
//! field is read.
//!
//! ```no_run
//! use bugzilla_rest::rest::Bugzilla;
//!
//! # async fn demo() -> bugzilla_rest::error::Result<()> {
//! let bz = Bugzilla::new("https://bugzilla.example.com/", None)?;
//! let bug = bz.get_bug("1234").await?;
//! println!("{}", bug.summary().unwrap_or("(no summary)"));
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod error;
pub mod object;
pub mod rest;
pub mod time;

pub use dispatch::ListChange;
pub use error::{Error, Result};
pub use object::{
    Attachment, Bug, Comment, Component, FieldValue, Fields, FlagType, Group, LazyRecord,
    Product, ResourceKind, ResourceRecord, User,
};
pub use rest::Bugzilla;
