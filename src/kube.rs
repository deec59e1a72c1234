mod client;
mod context;
mod factory;

pub use client::*;
pub use context::*;
pub use factory::*;
