//! Voice scheduling conversation core: Channel/VAD/Session/Turn Controller
//! pipeline plus the workflow engine and admin surface that drive it.

pub mod admin;
pub mod audio;
pub mod channel;
pub mod config;
pub mod debug;
pub mod external;
pub mod session;
pub mod tools;
pub mod turn_controller;
pub mod vad;
pub mod workflow;
