//! Railyard Common Library
//!
//! Shared foundation for all Railyard workspace crates: typed
//! identifiers, scalar datatypes, the reserve/lock/release protocol,
//! the layout entities, the semicolon-delimited persistence codec and
//! TOML configuration loading.
//!
//! # Module Structure
//!
//! - [`ids`] - Typed entity identifiers and [`ids::ObjectIdentifier`]
//! - [`datatypes`] - Scalar types and closed enums of the layout domain
//! - [`model`] - Layout entities (tracks, signals, routes, locos, ...)
//! - [`serialize`] - Flat `key=value` persistence codec
//! - [`queue`] - Blocking event queue used by the automode runners
//! - [`config`] - TOML configuration loading
//! - [`settings`] - Runtime settings stored in the settings table
//! - [`error`] - The shared [`error::RailError`] type

pub mod config;
pub mod datatypes;
pub mod error;
pub mod ids;
pub mod model;
pub mod prelude;
pub mod queue;
pub mod serialize;
pub mod settings;
