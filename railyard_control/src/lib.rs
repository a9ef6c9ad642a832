//! Railyard Control Core
//!
//! The process-wide [`manager::Manager`] registry, the per-locomotive
//! [`automode`] engine, the observer fan-out, the text command surface
//! and the storage contract.
//!
//! Data flow: hardware events enter through the manager's event
//! fan-in, mutate the affected entity and fan out to observers; UI and
//! automode commands enter through the manager's command fan-in and
//! leave as entity mutations plus driver commands. Automode runners
//! read the layout graph and issue manager calls; feedback events wake
//! the runner owning the locomotive through its per-loco queue.

pub mod automode;
pub mod command;
pub mod manager;
pub mod observer;
pub mod storage;

pub use manager::Manager;
