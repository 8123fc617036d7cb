pub mod redis;
pub mod supabase;

pub use self::redis::{connect_redis_pool, RedisPoolError};
pub use supabase::{SupabaseClient, SupabaseError};
