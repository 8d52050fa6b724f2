//! # Shared Memory Store
//!
//! Concurrent, TTL-bounded key/value cache that council agents use to
//! persist intermediate state between dispatches.
//!
//! ## Threat Model
//!
//! Agents run in parallel and write on every dispatch. Without bounds the
//! cache becomes an attack surface of its own:
//! - **Memory explosion**: unbounded entry accumulation (capacity purge)
//! - **Stale state**: agents reading values long past their useful life (TTL)
//! - **Writer contention**: many agents racing on one lock (single writer)
//!
//! ## Design
//!
//! | Concern | Mechanism |
//! |---------|-----------|
//! | Mutation | One consumer thread drains a write queue |
//! | Reads | Point-in-time lookup under a short lock |
//! | Capacity | Globally oldest-created entry evicted on overflow |
//! | Expiry | Min-heap keyed by absolute expiry, reconciled on sweep |
//!
//! ## Example
//!
//! ```rust
//! use sentinel_memory::{MemoryConfig, SharedMemory};
//! use serde_json::json;
//!
//! let memory = SharedMemory::new(MemoryConfig::default())?;
//! memory.write("risk:context_risk", json!(0.7), None)?;
//! memory.flush();
//!
//! assert_eq!(memory.read("risk:context_risk"), Some(json!(0.7)));
//! # Ok::<(), sentinel_memory::MemoryError>(())
//! ```
//!
//! ## Security Notes
//!
//! - Keys are hashed before storage; raw agent keys never index the map
//! - Only malformed keys raise; every other failure degrades to a miss

mod error;
mod store;

pub use error::{MemoryError, Result};
pub use store::{MemoryConfig, SharedMemory, MAX_KEY_LEN};
