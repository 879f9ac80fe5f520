#![doc = include_str!("../README.md")]
#![warn(rust_2018_idioms)]

pub use crate::client::{ChainRead, Client, HEARTBEAT_INTERVAL, MAX_READ};
pub use crate::error::Error;
pub use crate::handler::code;
pub use crate::provider::{ArenaProvider, MemoryProvider, Module, ProviderError};
pub use crate::server::{diagnostic_from_env, Server, DEFAULT_PORT};

pub mod chain;
pub mod frame;
pub mod hex;
pub mod tlv;

mod client;
mod error;
mod handler;
mod provider;
mod server;
mod session;
