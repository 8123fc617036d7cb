pub mod manager;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use manager::*;
pub use memory::*;
pub use redis_store::*;
pub use store::*;
