pub mod action;
pub mod command;
pub mod coordinator;
pub mod handle;
pub mod input;
#[cfg(feature = "local")]
pub mod local;
pub mod sessions;
