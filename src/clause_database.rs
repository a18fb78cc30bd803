use std::cmp::Reverse;
use std::ops::AddAssign;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use tap::Tap;
use tracing::debug;

use crate::clause::ClauseUsageStats;
use crate::clause_allocator::ClauseAllocator;
use crate::cref::ClauseRef;
use crate::lit::Lit;
use crate::options::Options;
use crate::stamp::{Stamp, StampKind};

/// Which total ordering ranks the learnt population when cleaning.
/// "Better kept" means: small glue, small size, many propagations/conflicts,
/// high activity.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum CleaningType {
    #[default]
    Glue,
    Size,
    PropConfl,
    Activity,
}

impl CleaningType {
    pub fn name(&self) -> &'static str {
        match self {
            CleaningType::Glue => "glue",
            CleaningType::Size => "size",
            CleaningType::PropConfl => "propconfl",
            CleaningType::Activity => "activity",
        }
    }
}

// ==========================================

/// Totals over one sub-population of a cleaning pass.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct CleaningData {
    pub num: u64,
    pub lits: u64,
    pub age: u64,

    pub glue: u64,
    pub num_prop: u64,
    pub num_confl: u64,
    pub num_lit_visited: u64,
    pub num_looked_at: u64,
    pub num_used_uip: u64,
    pub resolutions_bin: u64,
    pub resolutions_tri: u64,
    pub resolutions_long: u64,

    pub act: f64,
}

impl CleaningData {
    pub fn sum_resolutions(&self) -> u64 {
        self.resolutions_bin + self.resolutions_tri + self.resolutions_long
    }

    fn add_clause(&mut self, clause: &crate::clause::Clause, current_conflict: u64) {
        self.num += 1;
        self.lits += clause.size() as u64;
        self.age += current_conflict.saturating_sub(clause.stats.intro_conflict);

        self.glue += clause.stats.glue as u64;
        self.num_prop += clause.stats.num_prop;
        self.num_confl += clause.stats.num_confl;
        self.num_lit_visited += clause.stats.num_lit_visited;
        self.num_looked_at += clause.stats.num_looked_at;
        self.num_used_uip += clause.stats.num_used_uip;
        self.resolutions_bin += clause.stats.resolutions.bin as u64;
        self.resolutions_tri += clause.stats.resolutions.tri as u64;
        self.resolutions_long += clause.stats.resolutions.long as u64;

        self.act += clause.stats.activity;
    }
}

impl AddAssign for CleaningData {
    fn add_assign(&mut self, other: Self) {
        self.num += other.num;
        self.lits += other.lits;
        self.age += other.age;

        self.glue += other.glue;
        self.num_prop += other.num_prop;
        self.num_confl += other.num_confl;
        self.num_lit_visited += other.num_lit_visited;
        self.num_looked_at += other.num_looked_at;
        self.num_used_uip += other.num_used_uip;
        self.resolutions_bin += other.resolutions_bin;
        self.resolutions_tri += other.resolutions_tri;
        self.resolutions_long += other.resolutions_long;

        self.act += other.act;
    }
}

/// Structured report of one cleaning pass. Combining reports from several
/// passes is pointwise addition; rendering them is someone else's job.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct CleaningStats {
    // Before remove:
    pub orig_num_clauses: u64,
    pub orig_num_lits: u64,

    /// Clauses that were already marked removed/freed and got swept out
    /// before ranking.
    pub pre_remove: CleaningData,

    // Type of clean:
    pub clean_type: CleaningType,
    pub glue_based_clean: u64,
    pub size_based_clean: u64,
    pub propconfl_based_clean: u64,
    pub act_based_clean: u64,

    pub removed: CleaningData,
    pub remain: CleaningData,
}

impl AddAssign for CleaningStats {
    fn add_assign(&mut self, other: Self) {
        // Before remove:
        self.orig_num_clauses += other.orig_num_clauses;
        self.orig_num_lits += other.orig_num_lits;

        // Type of clean (the accumulator keeps its own `clean_type`):
        self.glue_based_clean += other.glue_based_clean;
        self.size_based_clean += other.size_based_clean;
        self.propconfl_based_clean += other.propconfl_based_clean;
        self.act_based_clean += other.act_based_clean;

        self.pre_remove += other.pre_remove;
        self.removed += other.removed;
        self.remain += other.remain;
    }
}

// ==========================================

#[derive(Debug)]
pub struct ClauseDatabase {
    /// Irredundant clauses.
    clauses: Vec<ClauseRef>,
    /// Learnt clauses.
    learnts: Vec<ClauseRef>,
    // Clause activity:
    cla_decay: f64,
    cla_inc: f64,
    // Cleaning:
    clean_type: CleaningType,
    remove_ratio: f64,
}

impl ClauseDatabase {
    pub fn new(options: &Options) -> Self {
        Self {
            clauses: Vec::new(),
            learnts: Vec::new(),
            cla_decay: options.cla_decay,
            cla_inc: options.cla_inc,
            clean_type: options.clean_type,
            remove_ratio: options.remove_ratio,
        }
    }
}

impl Default for ClauseDatabase {
    fn default() -> Self {
        Self::new(&Options::default())
    }
}

impl ClauseDatabase {
    pub fn clauses(&self) -> &[ClauseRef] {
        &self.clauses
    }
    pub fn learnts(&self) -> &[ClauseRef] {
        &self.learnts
    }

    pub fn num_clauses(&self) -> usize {
        self.clauses.len()
    }
    pub fn num_learnts(&self) -> usize {
        self.learnts.len()
    }

    pub fn new_clause(&mut self, lits: &[Lit], intro_conflict: u64, ca: &mut ClauseAllocator) -> ClauseRef {
        let cref = ca.alloc(lits, intro_conflict);
        self.clauses.push(cref);
        cref
    }

    pub fn new_learnt(&mut self, lits: &[Lit], glue: u32, intro_conflict: u64, ca: &mut ClauseAllocator) -> ClauseRef {
        let cref = ca.alloc(lits, intro_conflict);
        ca[cref].make_learnt(glue);
        self.learnts.push(cref);
        cref
    }

    pub fn cla_decay_activity(&mut self) {
        self.cla_inc *= 1.0 / self.cla_decay;
    }

    pub fn cla_bump_activity(&mut self, cref: ClauseRef, ca: &mut ClauseAllocator) {
        let clause = &mut ca[cref];

        if !clause.learnt() {
            return;
        }

        // Bump clause activity:
        clause.stats.activity += self.cla_inc;

        // Rescale:
        if clause.stats.activity > 1e20 {
            // Decrease the increment value:
            self.cla_inc *= 1e-20;

            // Decrease all activities:
            for &cref in self.learnts.iter() {
                ca[cref].stats.activity *= 1e-20;
            }
        }
    }

    /// Aggregate usage of the learnt population.
    pub fn usage_stats(&self, ca: &ClauseAllocator) -> ClauseUsageStats {
        let mut stats = ClauseUsageStats::default();
        for &cref in self.learnts.iter() {
            stats.add_clause(&ca[cref]);
        }
        stats
    }

    /// Evict learnt clauses down to the configured fraction, ranked by the
    /// configured ordering.
    pub fn reduce(&mut self, current_conflict: u64, ca: &mut ClauseAllocator) -> CleaningStats {
        let keep = self.learnts.len() - (self.learnts.len() as f64 * self.remove_ratio) as usize;
        self.reduce_with(self.clean_type, keep, current_conflict, ca)
    }

    /// Keep the `keep` best learnt clauses under `clean_type` (ties broken by
    /// original position) and mark the rest removed. A pure partition of the
    /// existing population: nothing is allocated and nothing can fail.
    pub fn reduce_with(
        &mut self,
        clean_type: CleaningType,
        keep: usize,
        current_conflict: u64,
        ca: &mut ClauseAllocator,
    ) -> CleaningStats {
        let mut stats = CleaningStats {
            clean_type,
            ..Default::default()
        };
        stats.orig_num_clauses = self.learnts.len() as u64;
        stats.orig_num_lits = self.learnts.iter().map(|&cref| ca[cref].size() as u64).sum();

        // Sweep out clauses some earlier pass already discarded.
        let pre_remove = &mut stats.pre_remove;
        self.learnts.retain(|&cref| {
            let clause = &ca[cref];
            if clause.removed() || clause.freed() {
                pre_remove.add_clause(clause, current_conflict);
                false
            } else {
                true
            }
        });

        // Rank the survivors, best-kept first. The sorts are stable, so equal
        // keys stay in original position order.
        let by_rank = self.learnts.clone().tap_mut(|v| match clean_type {
            CleaningType::Glue => v.sort_by_key(|&cref| ca[cref].stats.glue),
            CleaningType::Size => v.sort_by_key(|&cref| ca[cref].size()),
            CleaningType::PropConfl => v.sort_by_key(|&cref| Reverse(ca[cref].stats.num_prop_and_confl())),
            CleaningType::Activity => v.sort_by_key(|&cref| Reverse(OrderedFloat(ca[cref].stats.activity))),
        });

        for &cref in by_rank.iter().take(keep) {
            let clause = &mut ca[cref];
            stats.remain.add_clause(clause, current_conflict);
            // Survivors start the next usage window from zero.
            clause.stats.clear_after_reduce();
        }
        for &cref in by_rank.iter().skip(keep) {
            let clause = &mut ca[cref];
            clause.set_removed();
            stats.removed.add_clause(clause, current_conflict);
        }
        self.learnts.retain(|&cref| !ca[cref].removed());

        match clean_type {
            CleaningType::Glue => stats.glue_based_clean += 1,
            CleaningType::Size => stats.size_based_clean += 1,
            CleaningType::PropConfl => stats.propconfl_based_clean += 1,
            CleaningType::Activity => stats.act_based_clean += 1,
        }

        debug!(
            "cleaned {} of {} learnts by {}",
            stats.removed.num,
            stats.orig_num_clauses,
            clean_type.name()
        );
        stats
    }

    /// Run both stamp oracles over every long clause and apply the verdicts:
    /// clauses entailed by the irredundant binary closure are marked removed,
    /// literals made redundant by a binary implication are dropped in place.
    /// Learnt clauses may be strengthened against the full closure.
    ///
    /// Returns `(clauses_removed, lits_removed)`.
    pub fn simplify_with_stamp(&mut self, stamp: &Stamp, ca: &mut ClauseAllocator) -> (usize, usize) {
        let mut clauses_removed = 0;
        let mut lits_removed = 0;

        let crefs = self.clauses.iter().chain(self.learnts.iter()).copied().collect_vec();
        for cref in crefs {
            let clause = &ca[cref];
            if clause.removed() || clause.freed() {
                continue;
            }
            let kind = if clause.learnt() { StampKind::Red } else { StampKind::Irred };

            let mut lits = ca.lits(cref).to_vec();
            if stamp.stamp_based_cl_rem(&lits) {
                ca[cref].set_removed();
                clauses_removed += 1;
                continue;
            }

            let (rem_norm, rem_inv) = stamp.stamp_based_lit_rem(&mut lits, kind);
            let removed = rem_norm + rem_inv;
            if removed == 0 {
                continue;
            }
            if lits.len() < 3 {
                // Would leave the long-clause store; migrating it to the
                // binary/ternary representation is the owner's job.
                debug!("skipping shrink of {:?} below 3 literals", cref);
                continue;
            }
            let mut clause = ca.clause_mut(cref);
            for (i, &lit) in lits.iter().enumerate() {
                clause[i] = lit;
            }
            clause.resize(lits.len());
            lits_removed += removed;
        }

        self.clauses.retain(|&cref| !ca[cref].removed());
        self.learnts.retain(|&cref| !ca[cref].removed());

        debug!("stamp simplification removed {} clauses, {} literals", clauses_removed, lits_removed);
        (clauses_removed, lits_removed)
    }
}
