//! Session management for stateful tool clients.
//!
//! A session is one client connection to one tool group, addressed by a
//! session id `<group>-<instance>`. Sessions are created on first reference,
//! become ready once their scenario is loaded, and are destroyed only by an
//! explicit close.
//!
//! ```text
//! caller threads                     bridge worker
//! ──────────────                     ─────────────
//! get_or_create("fs-1") ──▶ SessionRegistry
//!                            ├─ "fs-1"  → SessionSlot { client, ready }
//!                            └─ "calc-1"→ SessionSlot { client, ready }
//!                                              │ lock_client() / release()
//!                                              ▼
//!                                        remote tool server
//! ```

mod registry;
mod types;

pub use registry::{CloseReport, RegistryStats, SessionRegistry};
pub use types::{SessionHandle, SessionInfo, SessionKey, SessionSlot};
