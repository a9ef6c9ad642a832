//! The automode engine.
//!
//! One long-lived runner thread per locomotive in automode. The pure
//! transition table lives in [`machine`]; the threaded runner with its
//! search, drive and release side effects in [`runner`].

pub mod machine;
pub mod runner;

pub use runner::{go_to_auto, release_loco};
