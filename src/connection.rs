mod lifecycle;
mod proxy;
mod store;

pub use lifecycle::*;
pub use proxy::*;
pub use store::*;
