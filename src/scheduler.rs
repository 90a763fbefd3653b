//! Count-driven random recall scheduling.
//!
//! Per (group, user), a counter advances on every inbound message and
//! fires once per `pool_size`-message cycle at a uniformly random tick.
//! The tick is re-drawn at every fire, so timing is unpredictable from one
//! cycle to the next, and there is no wall-clock fallback: a quiet user
//! simply never completes a cycle.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

/// Static per-group window length, from config. Read-only at runtime.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecallConfig {
    pub group_id: i64,
    pub pool_size: u32,
}

/// A user's counter hit this cycle's target tick: send a random stored
/// image for `user_id` to `group_id`, suppressing the usual not-found
/// warning (an autonomous fire with nothing stored stays silent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireSignal {
    pub group_id: i64,
    pub user_id: i64,
}

/// Invariants: `counter` and `target_tick` stay in `[0, pool_size)`;
/// `pool_size` is fixed for the life of the process.
#[derive(Debug)]
struct RecallCounter {
    pool_size: u32,
    counter: u32,
    target_tick: u32,
    fired_this_cycle: bool,
}

#[derive(Debug, Default)]
struct GroupState {
    users: HashMap<i64, RecallCounter>,
}

struct SchedulerState {
    groups: HashMap<i64, GroupState>,
    rng: StdRng,
}

/// Owns all per-user counters for the process lifetime.
///
/// One instance per engine, passed by handle to the dispatch layer rather
/// than ambient global state, so tests get a fresh scheduler each run. All
/// state sits behind one mutex: updates for a given user are atomic and
/// applied in the order the lock is taken, which the dispatch layer keeps
/// aligned with event order per user.
pub struct RecallScheduler {
    pool_sizes: HashMap<i64, u32>,
    state: Mutex<SchedulerState>,
}

impl RecallScheduler {
    pub fn new(configs: &[GroupRecallConfig]) -> Self {
        Self::with_rng(configs, StdRng::from_os_rng())
    }

    /// Seedable constructor for deterministic tests.
    pub fn with_rng(configs: &[GroupRecallConfig], rng: StdRng) -> Self {
        let mut pool_sizes = HashMap::new();
        for cfg in configs {
            if cfg.pool_size == 0 {
                tracing::warn!(group_id = cfg.group_id, "pool size 0, random recall disabled");
                continue;
            }
            pool_sizes.insert(cfg.group_id, cfg.pool_size);
        }
        Self {
            pool_sizes,
            state: Mutex::new(SchedulerState {
                groups: HashMap::new(),
                rng,
            }),
        }
    }

    /// Advance the counter for one inbound message.
    ///
    /// Returns a signal at most once per cycle: the counter wraps mod
    /// `pool_size`, a wrap to 0 opens a new cycle, and the fire condition
    /// is `counter == target_tick` while the cycle has not fired yet. On
    /// fire the next cycle's target is drawn immediately.
    pub fn on_message(&self, group_id: i64, user_id: i64) -> Option<FireSignal> {
        let pool_size = *self.pool_sizes.get(&group_id)?;
        let mut state = self.state.lock();
        let SchedulerState { groups, rng } = &mut *state;
        let group = groups.entry(group_id).or_default();
        let rec = group.users.entry(user_id).or_insert_with(|| RecallCounter {
            pool_size,
            counter: 0,
            target_tick: rng.random_range(0..pool_size),
            fired_this_cycle: false,
        });

        rec.counter = (rec.counter + 1) % rec.pool_size;
        if rec.counter == 0 {
            rec.fired_this_cycle = false;
        }
        if rec.counter == rec.target_tick && !rec.fired_this_cycle {
            rec.fired_this_cycle = true;
            rec.target_tick = rng.random_range(0..rec.pool_size);
            tracing::debug!(group_id, user_id, "random recall fired");
            return Some(FireSignal { group_id, user_id });
        }
        None
    }

    /// Whether random recall is configured for the group at all.
    pub fn group_configured(&self, group_id: i64) -> bool {
        self.pool_sizes.contains_key(&group_id)
    }
}
