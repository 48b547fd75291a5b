//! Explicit-state model of the lock protocol in `lock`, checked with
//! `stateright` the same way its own `paxos.rs` example checks single-decree
//! consensus: a tiny abstract state machine is enough here, no need for
//! stateright's actor framework.
//!
//! The CAS atomicity itself is the KV server's job and is covered by its
//! own unit tests; what this model checks is that the *protocol* — Acquire
//! only transitions into the held state when nobody else holds it, Release
//! only vacates it — can never let two clients believe they hold the lock
//! at once, no matter how their steps interleave.

use stateright::{Checker, Model, Property};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
enum ClientState {
    Unlocked,
    Holding,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct LockState {
    held: bool,
    clients: Vec<ClientState>,
}

#[derive(Clone, Copy, Debug, Hash)]
enum LockAction {
    Acquire(usize),
    Release(usize),
}

struct LockModel {
    client_count: usize,
}

impl Model for LockModel {
    type State = LockState;
    type Action = LockAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![LockState {
            held: false,
            clients: vec![ClientState::Unlocked; self.client_count],
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (i, client) in state.clients.iter().enumerate() {
            match client {
                ClientState::Unlocked => actions.push(LockAction::Acquire(i)),
                ClientState::Holding => actions.push(LockAction::Release(i)),
            }
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        match action {
            LockAction::Acquire(i) => {
                if next.held {
                    // Lost the CAS race this step; the real Clerk loops
                    // and re-reads. Modeled as a self-loop (no state change).
                    return Some(next);
                }
                next.held = true;
                next.clients[i] = ClientState::Holding;
            }
            LockAction::Release(i) => {
                next.held = false;
                next.clients[i] = ClientState::Unlocked;
            }
        }
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("mutual exclusion", |_, state| {
                state
                    .clients
                    .iter()
                    .filter(|c| matches!(c, ClientState::Holding))
                    .count()
                    <= 1
            }),
            Property::sometimes("some client can acquire", |_, state| {
                state.clients.iter().any(|c| matches!(c, ClientState::Holding))
            }),
        ]
    }
}

#[test]
fn lock_protocol_is_mutually_exclusive() {
    LockModel { client_count: 3 }
        .checker()
        .spawn_dfs()
        .join()
        .assert_properties();
}
