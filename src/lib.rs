pub mod cli;
pub mod client;
pub mod config;
pub mod error;

pub use client::SandboxClient;
pub use error::{Result, SandboxError};
