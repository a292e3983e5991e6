//! Short-TTL session store backends
//!
//! Keys are namespaced `call:<id>:<field>`, values are JSON. The store
//! exists for cross-process handoff and observability; the hot-path
//! speaking flag is an in-process atomic owned by the controller, so every
//! caller treats store failures as degradation, never as call failure.

mod memory;
mod redis_store;

pub use memory::InMemorySessionStore;
pub use redis_store::RedisSessionStore;

pub(crate) fn store_key(call_id: &str, field: voxline_core::SessionField) -> String {
    format!("call:{}:{}", call_id, field.as_str())
}
