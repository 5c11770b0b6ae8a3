//! Statistics registry.
//!
//! A per-controller named-counter table. Counter names follow the external
//! statistics surface exactly (`loads`, `load-misses-<state>`,
//! `loads-where-<where>`, `pic_ops_<op>`, `uncore-time-<reason>`, ...) so a
//! downstream report can be built without this engine knowing about any
//! particular output format — matching the donor crate's separation between
//! counting and formatting.

use std::collections::HashMap;
use std::fmt;

use crate::coherence::CState;
use crate::network::HitWhere;

/// A single named counter: either a plain count or an accumulated latency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter(pub u64);

/// Named-counter registry for one controller (master or proxy each own one).
#[derive(Clone, Debug, Default)]
pub struct StatRegistry {
    counters: HashMap<String, u64>,
}

impl StatRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the named counter by `by`, creating it at zero if absent.
    pub fn add(&mut self, name: impl Into<String>, by: u64) {
        *self.counters.entry(name.into()).or_insert(0) += by;
    }

    /// Increments the named counter by one.
    pub fn inc(&mut self, name: impl Into<String>) {
        self.add(name, 1);
    }

    /// Current value of the named counter (zero if never touched).
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Iterates all registered (name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Merges another registry's counters into this one (used to roll a
    /// proxy's per-core counters up into the master's totals).
    pub fn merge(&mut self, other: &StatRegistry) {
        for (name, value) in other.iter() {
            self.add(name.to_string(), value);
        }
    }

    // -- convenience wrappers for the hot named counters --

    /// `loads` / `stores`, split by whether the op is a read or write.
    pub fn record_op(&mut self, is_write: bool) {
        self.inc(if is_write { "stores" } else { "loads" });
    }

    /// `load-misses` / `store-misses`.
    pub fn record_miss(&mut self, is_write: bool) {
        self.inc(if is_write { "store-misses" } else { "load-misses" });
    }

    /// `load-overlapping-misses` / `store-overlapping-misses`.
    pub fn record_overlapping_miss(&mut self, is_write: bool) {
        self.inc(if is_write {
            "store-overlapping-misses"
        } else {
            "load-overlapping-misses"
        });
    }

    /// `loads-<state>` / `stores-<state>`, keyed by the state hit.
    pub fn record_op_in_state(&mut self, is_write: bool, state: CState) {
        let verb = if is_write { "stores" } else { "loads" };
        self.inc(format!("{verb}-{state}"));
    }

    /// `loads-where-<where>` / `stores-where-<where>`.
    pub fn record_where(&mut self, is_write: bool, where_: HitWhere) {
        let verb = if is_write { "stores" } else { "loads" };
        self.inc(format!("{verb}-where-{where_:?}"));
    }

    /// `total-latency`, accumulated cycles.
    pub fn add_latency(&mut self, cycles: u64) {
        self.add("total-latency", cycles);
    }

    /// `snoop-latency`, accumulated cycles.
    pub fn add_snoop_latency(&mut self, cycles: u64) {
        self.add("snoop-latency", cycles);
    }

    /// `mshr-latency`, accumulated cycles stalled on a full MSHR.
    pub fn add_mshr_latency(&mut self, cycles: u64) {
        self.add("mshr-latency", cycles);
    }

    /// `coherency-{downgrades,upgrades,writebacks,invalidates}`.
    pub fn record_coherency(&mut self, kind: &str) {
        self.inc(format!("coherency-{kind}"));
    }

    /// `dirty_evicts` / `writebacks` / `dirty_backinval`.
    pub fn record_eviction(&mut self, dirty: bool, backinval: bool) {
        if dirty {
            self.inc(if backinval { "dirty_backinval" } else { "dirty_evicts" });
            self.inc("writebacks");
        }
    }

    /// `pic_ops_<op>`.
    pub fn record_pic_op(&mut self, op: &str) {
        self.inc(format!("pic_ops_{op}"));
    }

    /// `pic_ops_in_bank_<op>_<policy>`.
    pub fn record_pic_in_bank(&mut self, op: &str, policy: &str) {
        self.inc(format!("pic_ops_in_bank_{op}_{policy}"));
    }

    /// `pic_vops_<op>` (remote / forwarded PIC operations).
    pub fn record_pic_vop(&mut self, op: &str) {
        self.inc(format!("pic_vops_{op}"));
    }

    /// `pic_key_{writes,misses}`.
    pub fn record_pic_key(&mut self, is_miss: bool) {
        self.inc("pic_key_writes");
        if is_miss {
            self.inc("pic_key_misses");
        }
    }

    /// `uncore-time-<reason>` and the aggregate `uncore-{totaltime,requests}`.
    pub fn record_uncore(&mut self, reason: &str, cycles: u64) {
        self.add(format!("uncore-time-{reason}"), cycles);
        self.add("uncore-totaltime", cycles);
        self.inc("uncore-requests");
    }
}

impl fmt::Display for StatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.counters.keys().collect();
        names.sort();
        for name in names {
            writeln!(f, "{name:<40} {}", self.counters[name])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates_and_get_reads_back() {
        let mut s = StatRegistry::new();
        s.add("loads", 3);
        s.add("loads", 2);
        assert_eq!(s.get("loads"), 5);
    }

    #[test]
    fn unknown_counter_reads_as_zero() {
        let s = StatRegistry::new();
        assert_eq!(s.get("nonexistent"), 0);
    }

    #[test]
    fn merge_sums_into_target() {
        let mut a = StatRegistry::new();
        a.add("loads", 1);
        let mut b = StatRegistry::new();
        b.add("loads", 4);
        b.add("stores", 2);
        a.merge(&b);
        assert_eq!(a.get("loads"), 5);
        assert_eq!(a.get("stores"), 2);
    }

    #[test]
    fn record_where_formats_debug_name() {
        let mut s = StatRegistry::new();
        s.record_where(false, HitWhere::Llc);
        assert_eq!(s.get("loads-where-Llc"), 1);
    }
}
