//! The KV server (spec §4.1): a process-wide mapping from key to
//! `(value, version)` guarded by a single mutex. Every RPC handler
//! acquires the mutex once and holds it for its entire body, so every
//! operation observes a consistent snapshot — linearizable per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use distlab_rpc::{EndpointId, LocalNetwork};

/// Protocol-level outcome of a `Get` or `Put`. `MAYBE` is never sent on the
/// wire — it is synthesized client-side by `Clerk::put` — so it has no
/// variant here.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum KvStatus {
    Ok,
    NoKey,
    Version,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetArgs {
    pub key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetReply {
    pub value: String,
    pub version: u64,
    pub status: KvStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PutArgs {
    pub key: String,
    pub value: String,
    /// Version the caller believes is current. `0` means "install only if
    /// the key is absent."
    pub version: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PutReply {
    pub status: KvStatus,
}

#[derive(Clone, Debug)]
struct VersionedValue {
    value: String,
    version: u64,
}

pub struct KvServer {
    state: Mutex<HashMap<String, VersionedValue>>,
}

impl Default for KvServer {
    fn default() -> Self {
        Self::new()
    }
}

impl KvServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VersionedValue>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `NO_KEY` if `args.key` is absent, else the stored pair with
    /// `OK`.
    pub fn get(&self, args: &GetArgs) -> GetReply {
        let state = self.lock();
        match state.get(&args.key) {
            None => GetReply {
                value: String::new(),
                version: 0,
                status: KvStatus::NoKey,
            },
            Some(v) => {
                tracing::trace!(key = %args.key, version = v.version, "get hit");
                GetReply {
                    value: v.value.clone(),
                    version: v.version,
                    status: KvStatus::Ok,
                }
            }
        }
    }

    /// Installs or overwrites `args.key` conditioned on `args.version`
    /// matching the currently-stored version, or `0` installing a new key.
    pub fn put(&self, args: &PutArgs) -> PutReply {
        let mut state = self.lock();
        let current_version = state.get(&args.key).map(|v| v.version);
        let status = match current_version {
            None if args.version == 0 => {
                state.insert(
                    args.key.clone(),
                    VersionedValue {
                        value: args.value.clone(),
                        version: 1,
                    },
                );
                KvStatus::Ok
            }
            None => KvStatus::NoKey,
            Some(v) if v == args.version => {
                state.insert(
                    args.key.clone(),
                    VersionedValue {
                        value: args.value.clone(),
                        version: v + 1,
                    },
                );
                KvStatus::Ok
            }
            Some(_) => KvStatus::Version,
        };
        tracing::debug!(key = %args.key, expected = args.version, ?status, "put");
        PutReply { status }
    }

    /// Wires `Get` and `Put` into a simulated network under the
    /// conventional `KvServer.Get`/`KvServer.Put` method names.
    pub fn register_on(self: &Arc<Self>, net: &LocalNetwork, endpoint: EndpointId) {
        let kv = Arc::clone(self);
        net.register(endpoint, "KvServer.Get", move |args: GetArgs| kv.get(&args));
        let kv = Arc::clone(self);
        net.register(endpoint, "KvServer.Put", move |args: PutArgs| kv.put(&args));
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self, key: &str) -> Option<(String, u64)> {
        self.lock().get(key).map(|v| (v.value.clone(), v.version))
    }
}
