//! Hubbub room relay engine.
//!
//! Sans-IO core of the relay: everything here is a plain state machine that
//! the server crate drives from its tasks. Nothing in this crate touches a
//! socket, spawns a task or reads the clock directly.
//!
//! ## Architecture
//!
//! ```text
//! hubbub-core
//!   ├─ Room            (registry, host, fan-out, control protocol)
//!   │   ├─ IdAllocator (client ids)
//!   │   ├─ ReplayStore (buffered broadcasts for late joiners)
//!   │   └─ ObjectTable (object ownership and authority)
//!   ├─ RoomDirectory   (cluster room index by id and by application build)
//!   ├─ ServerDirectory (live game servers and their load)
//!   └─ Environment     (time abstraction)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod directory;
pub mod env;
pub mod objects;
pub mod replay;
pub mod room;

pub use allocator::{AllocError, IdAllocator};
pub use directory::{RoomDirectory, RoomListing, ServerDirectory, ServerListing};
pub use env::Environment;
pub use objects::{AuthorityError, GameObject, ObjectTable};
pub use replay::{BufferedMessage, ReplayStore};
pub use room::{ClientSink, Room, RoomConfig, RoomError, SinkError};

/// Default client id pool size per room (`i16::MAX`).
pub const DEFAULT_MAX_CLIENTS: u32 = 32_767;
