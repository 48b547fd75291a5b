//! The RPC primitive the rest of the workspace is built on:
//!
//! ```text
//! Call(target, method, args, reply) -> bool
//! ```
//!
//! `false` means "no reply received; outcome unknown" — the request may
//! never have arrived, or it may have arrived and been processed but the
//! reply was lost. `true` means "reply delivered; server processed the
//! request exactly once for that reply." The real transport (framing,
//! serialization-on-the-wire, sockets) is an external collaborator and out
//! of scope here; [`LocalNetwork`] is a simulated, configurably-lossy
//! stand-in used to exercise [`Rpc`] callers in tests, the way the Go labs'
//! `labrpc` package exercises `Clerk`/`Coordinator` in the original source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use distlab_base::{err, Result};

/// Names a single service endpoint (one KV server, one Coordinator) in the
/// simulated network.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub u64);

/// The capability every client (`Clerk`, `Worker`) is generic over.
///
/// `Ok(Some(reply))` is the delivered case, `Ok(None)` is the
/// undelivered/transport-failure case. `Err` is reserved for conditions the
/// spec's protocol does not model at all (a malformed message), not for
/// ordinary network unreliability.
pub trait Rpc: Send + Sync {
    fn call<A, R>(&self, target: EndpointId, method: &str, args: &A) -> Result<Option<R>>
    where
        A: Serialize,
        R: DeserializeOwned;
}

type Handler = Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// How the simulated network treats requests and replies in flight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reliability {
    Reliable,
    /// Each leg of a round trip is dropped independently with the given
    /// probability. Modeling the two legs separately matters: the Clerk's
    /// `MAYBE` ambiguity depends on *which* leg was lost, not just whether
    /// the round trip as a whole succeeded.
    Unreliable { drop_request: f64, drop_reply: f64 },
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::Reliable
    }
}

/// A tiny splitmix64 generator. Not cryptographic; it only needs to be a
/// reproducible source of "roll the dice" decisions for drop probabilities.
struct Rng(AtomicU64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(AtomicU64::new(seed))
    }

    fn next_unit(&self) -> f64 {
        let mut z = self
            .0
            .fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
            .wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        (z >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[derive(Default)]
struct Registry {
    handlers: HashMap<(EndpointId, String), Handler>,
    partitioned: std::collections::HashSet<EndpointId>,
}

/// An in-process simulated network: a registry of named service methods
/// plus a reliability model. Encodes messages with `rmp_serde`.
pub struct LocalNetwork {
    registry: RwLock<Registry>,
    reliability: Mutex<Reliability>,
    rng: Rng,
}

impl Default for LocalNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            reliability: Mutex::new(Reliability::default()),
            rng: Rng::new(0xD1A5_7AB0),
        }
    }

    fn lock_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_registry_mut(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_reliability(&self) -> std::sync::MutexGuard<'_, Reliability> {
        self.reliability.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a handler for `method` on `endpoint`. `F` is invoked with
    /// decoded args and returns the (not-yet-encoded) reply; encoding
    /// happens on both sides of the wire so callers and handlers never see
    /// raw bytes.
    ///
    /// Decode/encode failures inside the handler indicate a mismatch
    /// between the types a caller used and the types registered for this
    /// method — a programming error, not a simulated network condition.
    /// Surfaced as `Err` from `call`, never a panic.
    pub fn register<F, A, R>(&self, endpoint: EndpointId, method: &'static str, f: F)
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        A: DeserializeOwned,
        R: Serialize,
    {
        let boxed: Handler = Box::new(move |bytes: &[u8]| -> Result<Vec<u8>> {
            let args: A = rmp_serde::from_slice(bytes)?;
            let reply = f(args);
            Ok(rmp_serde::to_vec(&reply)?)
        });
        self.lock_registry_mut()
            .handlers
            .insert((endpoint, method.to_string()), boxed);
    }

    pub fn set_reliability(&self, reliability: Reliability) {
        *self.lock_reliability() = reliability;
    }

    /// Cuts `endpoint` off from the network entirely: every call that
    /// targets it behaves as an undelivered request, whether the request
    /// or the reply would have been the casualty. Used to model a crashed
    /// worker or an unreachable server.
    pub fn partition(&self, endpoint: EndpointId) {
        self.lock_registry_mut().partitioned.insert(endpoint);
    }

    pub fn heal_partition(&self, endpoint: EndpointId) {
        self.lock_registry_mut().partitioned.remove(&endpoint);
    }

    fn should_drop_request(&self) -> bool {
        match *self.lock_reliability() {
            Reliability::Reliable => false,
            Reliability::Unreliable { drop_request, .. } => self.rng.next_unit() < drop_request,
        }
    }

    fn should_drop_reply(&self) -> bool {
        match *self.lock_reliability() {
            Reliability::Reliable => false,
            Reliability::Unreliable { drop_reply, .. } => self.rng.next_unit() < drop_reply,
        }
    }
}

/// Any shared reference to an `Rpc` is itself an `Rpc`, so a single
/// `LocalNetwork` can back many `Clerk`/`Worker` instances (one per
/// simulated client) without wrapping it in `Arc` at every call site.
impl<T: Rpc + ?Sized> Rpc for &T {
    fn call<A, R>(&self, target: EndpointId, method: &str, args: &A) -> Result<Option<R>>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        (**self).call(target, method, args)
    }
}

impl Rpc for LocalNetwork {
    fn call<A, R>(&self, target: EndpointId, method: &str, args: &A) -> Result<Option<R>>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        if self.lock_registry().partitioned.contains(&target) {
            tracing::debug!(target: "distlab_rpc", endpoint = target.0, method, "endpoint partitioned, dropping request");
            return Ok(None);
        }
        if self.should_drop_request() {
            tracing::debug!(target: "distlab_rpc", endpoint = target.0, method, "dropping request");
            return Ok(None);
        }

        let req_bytes = rmp_serde::to_vec(args)?;
        let resp_bytes = {
            let reg = self.lock_registry();
            let handler = reg
                .handlers
                .get(&(target, method.to_string()))
                .ok_or_else(|| err(format!("no handler for {method} on endpoint {}", target.0)))?;
            handler(&req_bytes)?
        };

        if self.lock_registry().partitioned.contains(&target) || self.should_drop_reply() {
            tracing::debug!(target: "distlab_rpc", endpoint = target.0, method, "dropping reply");
            return Ok(None);
        }

        let reply: R = rmp_serde::from_slice(&resp_bytes)?;
        Ok(Some(reply))
    }
}
