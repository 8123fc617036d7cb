pub mod memory;
pub mod publisher;
pub mod redis_stream;
pub mod retry;

pub use memory::*;
pub use publisher::*;
pub use redis_stream::*;
pub use retry::*;
