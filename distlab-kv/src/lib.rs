//! A single-node versioned key/value store, a retrying client, and a
//! distributed lock built out of the client's atomic compare-and-set
//! `Put`. See `server`, `clerk`, and `lock` for the three pieces.

pub mod clerk;
pub mod lock;
pub mod server;

pub use clerk::{Clerk, KvClerk, PutOutcome};
pub use lock::Lock;
pub use server::{GetArgs, GetReply, KvServer, KvStatus, PutArgs, PutReply};

#[cfg(test)]
mod model;
