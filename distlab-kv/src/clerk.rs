//! The retrying client (spec §4.2). `Get` retries forever on transport
//! failure and returns only on a delivered reply. `Put` is the subtle one:
//! it turns transport-failure history into the client-visible `MAYBE`
//! outcome so callers never mistake an ambiguous Put for a rejected one.

use std::time::Duration;

use distlab_rpc::{EndpointId, Rpc};

use crate::server::{GetArgs, GetReply, KvStatus, PutArgs, PutReply};

/// Bounded backoff between retries. The spec only requires "must not
/// busy-spin"; 100ms matches the original `time.Sleep(100 * time.Millisecond)`.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Client-visible outcome of a `Put`, extending the wire-level
/// [`KvStatus`] with the client-synthesized `Maybe`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutOutcome {
    Ok,
    NoKey,
    Version,
    /// The server's `VERSION` reply arrived after at least one earlier
    /// attempt went undelivered. The earlier attempt might have succeeded
    /// and bumped the version before this retry observed it, or it might
    /// never have reached the server at all — the Clerk cannot tell which,
    /// so it refuses to guess.
    Maybe,
}

/// The abstract capability the [`Lock`](crate::lock::Lock) is written
/// against, so it works with any Clerk implementation (spec §9,
/// "polymorphism over client types").
pub trait KvClerk {
    fn get(&self, key: &str) -> (String, u64, KvStatus);
    fn put(&self, key: &str, value: &str, version: u64) -> PutOutcome;
}

/// A Clerk bound to one KV server over one [`Rpc`] transport.
pub struct Clerk<R: Rpc> {
    rpc: R,
    server: EndpointId,
    backoff: Duration,
}

impl<R: Rpc> Clerk<R> {
    pub fn new(rpc: R, server: EndpointId) -> Self {
        Self::with_backoff(rpc, server, DEFAULT_BACKOFF)
    }

    /// As [`Clerk::new`], but with an overridden retry backoff — useful in
    /// tests that want to exercise many retries without actually waiting
    /// 100ms each time.
    pub fn with_backoff(rpc: R, server: EndpointId, backoff: Duration) -> Self {
        Self { rpc, server, backoff }
    }
}

impl<R: Rpc> KvClerk for Clerk<R> {
    /// Retries forever on transport failure; returns as soon as a reply is
    /// delivered, whatever its status.
    fn get(&self, key: &str) -> (String, u64, KvStatus) {
        let args = GetArgs { key: key.to_string() };
        loop {
            match self.rpc.call::<GetArgs, GetReply>(self.server, "KvServer.Get", &args) {
                Ok(Some(reply)) => return (reply.value, reply.version, reply.status),
                Ok(None) => {
                    tracing::trace!(key, "get: no reply, retrying");
                    std::thread::sleep(self.backoff);
                }
                Err(e) => {
                    tracing::error!(key, error = ?e, "get: transport error, retrying");
                    std::thread::sleep(self.backoff);
                }
            }
        }
    }

    /// Implements the retry table from spec §4.2: a `VERSION` reply on the
    /// very first delivered attempt proves the server rejected this exact
    /// Put (nothing earlier could have reached it); a `VERSION` reply after
    /// one or more undelivered attempts is ambiguous and surfaces as
    /// `MAYBE`. Never retries past a delivered reply.
    fn put(&self, key: &str, value: &str, version: u64) -> PutOutcome {
        let args = PutArgs {
            key: key.to_string(),
            value: value.to_string(),
            version,
        };
        let mut attempts_failed: u32 = 0;
        loop {
            match self.rpc.call::<PutArgs, PutReply>(self.server, "KvServer.Put", &args) {
                Ok(Some(PutReply { status: KvStatus::Ok })) => return PutOutcome::Ok,
                Ok(Some(PutReply { status: KvStatus::NoKey })) => return PutOutcome::NoKey,
                Ok(Some(PutReply { status: KvStatus::Version })) => {
                    return if attempts_failed == 0 {
                        PutOutcome::Version
                    } else {
                        PutOutcome::Maybe
                    };
                }
                Ok(None) => {
                    attempts_failed += 1;
                    tracing::trace!(key, attempts_failed, "put: no reply, retrying");
                    std::thread::sleep(self.backoff);
                }
                Err(e) => {
                    attempts_failed += 1;
                    tracing::error!(key, error = ?e, "put: transport error, retrying");
                    std::thread::sleep(self.backoff);
                }
            }
        }
    }
}
