use std::cmp::Reverse;

use itertools::Itertools;
use tracing::debug;

use crate::idx::LitVec;
use crate::lit::Lit;
use crate::var::Var;

/// The two stamp domains. `Irred` intervals come from irredundant binary
/// clauses only and are safe for permanent simplification; `Red` intervals
/// come from all binary clauses, learnt included.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StampKind {
    Irred = 0,
    Red = 1,
}

impl StampKind {
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Per-literal discovery interval `[start, end]` of the stamping DFS, plus
/// the nearest implying literal (the DFS tree parent), for each domain.
/// A literal `u` transitively implies `v` iff `u`'s interval contains `v`'s.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Timestamp {
    pub start: [u64; 2],
    pub end: [u64; 2],
    pub dominator: [Option<Lit>; 2],
}

/// A binary clause `(a ∨ b)`. In the implication graph it contributes the
/// edges `¬a → b` and `¬b → a`.
#[derive(Debug, Copy, Clone)]
pub struct BinClause {
    pub a: Lit,
    pub b: Lit,
    /// Learnt (redundant) clauses take part in the `Red` domain only.
    pub red: bool,
}

impl BinClause {
    pub const fn new(a: Lit, b: Lit, red: bool) -> Self {
        Self { a, b, red }
    }
}

/// Replacement oracle for equivalent-literal substitution. Must be
/// idempotent and cycle-free.
pub trait VarReplacer {
    fn get_lit_replaced_with(&self, lit: Lit) -> Lit;
}

// ==========================================

/// Timestamp table over the binary-implication graph: one entry per literal,
/// two independent domains per entry. Intervals are only valid until the
/// binary clause set changes; nothing here tracks invalidation — callers
/// re-stamp, or patch the table through the maintenance operations below.
#[derive(Debug, Default)]
pub struct Stamp {
    tstamp: LitVec<Timestamp>,
}

impl Stamp {
    pub fn new() -> Self {
        Self { tstamp: LitVec::new() }
    }

    pub fn with_num_vars(num_vars: usize) -> Self {
        let mut stamp = Self::new();
        for _ in 0..num_vars {
            stamp.new_var();
        }
        stamp
    }

    pub fn num_vars(&self) -> usize {
        self.tstamp.len() / 2
    }

    pub fn new_var(&mut self) {
        self.tstamp.push(Timestamp::default());
        self.tstamp.push(Timestamp::default());
    }

    pub fn timestamp(&self, lit: Lit) -> Timestamp {
        self.tstamp[lit]
    }

    pub fn interval(&self, lit: Lit, kind: StampKind) -> (u64, u64) {
        let ts = &self.tstamp[lit];
        (ts.start[kind.index()], ts.end[kind.index()])
    }

    pub fn dominator(&self, lit: Lit, kind: StampKind) -> Option<Lit> {
        self.tstamp[lit].dominator[kind.index()]
    }

    /// Reset every interval and dominator to the unvisited sentinel.
    pub fn clear_stamps(&mut self) {
        for ts in self.tstamp.iter_mut() {
            *ts = Timestamp::default();
        }
    }

    /// Rebuild both domains from the given binary clause set: one iterative
    /// depth-first pass per domain over the implication graph, trying every
    /// literal as a root in table order. Deterministic — the same clause set
    /// always reproduces the same intervals and dominators.
    pub fn restamp(&mut self, bins: &[BinClause]) {
        self.clear_stamps();
        let n = self.tstamp.len();

        for kind in [StampKind::Irred, StampKind::Red] {
            let d = kind.index();

            let mut out: Vec<Vec<Lit>> = vec![Vec::new(); n];
            for bin in bins {
                if bin.red && kind == StampKind::Irred {
                    continue;
                }
                debug_assert!(bin.a.index() < n && bin.b.index() < n);
                out[(!bin.a).index()].push(bin.b);
                out[(!bin.b).index()].push(bin.a);
            }

            let mut counter: u64 = 0;
            let mut visited = vec![false; n];
            // (literal, next out-edge to try)
            let mut stack: Vec<(Lit, usize)> = Vec::new();

            for root in 0..n {
                if visited[root] {
                    continue;
                }
                let root = Lit::from_index(root);
                visited[root.index()] = true;
                counter += 1;
                self.tstamp[root].start[d] = counter;
                stack.push((root, 0));

                while let Some(top) = stack.last_mut() {
                    let lit = top.0;
                    let i = top.1;
                    top.1 += 1;
                    if let Some(&next) = out[lit.index()].get(i) {
                        if !visited[next.index()] {
                            visited[next.index()] = true;
                            counter += 1;
                            self.tstamp[next].start[d] = counter;
                            self.tstamp[next].dominator[d] = Some(lit);
                            stack.push((next, 0));
                        }
                    } else {
                        counter += 1;
                        self.tstamp[lit].end[d] = counter;
                        stack.pop();
                    }
                }
            }

            debug!("stamped {} literals in domain {:?}", n, kind);
        }
    }

    /// Is the clause already entailed by the irredundant binary closure?
    /// True iff some literal's complement interval strictly contains another
    /// literal's interval — an implication chain that subsumes the clause.
    /// Detected by a two-pointer sweep over the two stamp orderings;
    /// invariant under the input literal order.
    pub fn stamp_based_cl_rem(&self, lits: &[Lit]) -> bool {
        debug_assert!(!lits.is_empty());
        let d = StampKind::Irred.index();

        let stamp_norm = lits.iter().copied().sorted_by_key(|&lit| self.tstamp[lit].start[d]).collect_vec();
        let stamp_inv = lits.iter().copied().sorted_by_key(|&lit| self.tstamp[!lit].start[d]).collect_vec();

        let mut lpos = 0;
        let mut lneg = 0;
        loop {
            let neg = self.tstamp[!stamp_inv[lneg]];
            let pos = self.tstamp[stamp_norm[lpos]];

            if neg.start[d] >= pos.start[d] {
                lpos += 1;
                if lpos == stamp_norm.len() {
                    return false;
                }
            } else if neg.end[d] <= pos.end[d] {
                lneg += 1;
                if lneg == stamp_inv.len() {
                    return false;
                }
            } else {
                return true;
            }
        }
    }

    /// Self-subsuming resolution against the binary closure of `kind`:
    /// drop every literal whose presence is made redundant by another literal
    /// of the clause through a binary implication chain. Two stable-sort +
    /// linear-scan passes; the first literal of each pass is never dropped,
    /// so a non-empty input never comes back empty.
    ///
    /// Returns the number of literals removed by each pass.
    pub fn stamp_based_lit_rem(&self, lits: &mut Vec<Lit>, kind: StampKind) -> (usize, usize) {
        debug_assert!(!lits.is_empty());
        let d = kind.index();

        // Forward pass: descending by start. A literal whose interval still
        // runs past the last kept one implies it and can go.
        lits.sort_by_key(|&lit| Reverse(self.tstamp[lit].start[d]));
        let mut rem_norm = 0;
        let mut last_end = self.tstamp[lits[0]].end[d];
        let mut first = true;
        lits.retain(|&lit| {
            if first {
                first = false;
                return true;
            }
            let end = self.tstamp[lit].end[d];
            if last_end < end {
                rem_norm += 1;
                false
            } else {
                last_end = end;
                true
            }
        });

        // Backward pass: the same scan keyed on the complements' intervals.
        lits.sort_by_key(|&lit| self.tstamp[!lit].start[d]);
        let mut rem_inv = 0;
        let mut last_end = self.tstamp[!lits[0]].end[d];
        let mut first = true;
        lits.retain(|&lit| {
            if first {
                first = false;
                return true;
            }
            let end = self.tstamp[!lit].end[d];
            if last_end > end {
                rem_inv += 1;
                false
            } else {
                last_end = end;
                true
            }
        });

        debug_assert!(!lits.is_empty());
        (rem_norm, rem_inv)
    }

    /// Apply a variable renumbering: rewrite both dominators of every entry
    /// through `outer_to_inner`, then relocate the whole table under the same
    /// permutation. The table can be large, so the relocation walks
    /// permutation cycles with swaps instead of building a second copy.
    /// `seen` is caller scratch of at least table size; it is handed back
    /// cleared.
    pub fn update_vars(&mut self, outer_to_inner: &[Var], inner_to_outer: &[Var], seen: &mut Vec<bool>) {
        debug_assert_eq!(outer_to_inner.len() * 2, self.tstamp.len());
        debug_assert!(outer_to_inner
            .iter()
            .enumerate()
            .all(|(outer, &inner)| inner_to_outer[inner.index()].index() == outer));
        if seen.len() < self.tstamp.len() {
            seen.resize(self.tstamp.len(), false);
        }

        // Update both dominators:
        for ts in self.tstamp.iter_mut() {
            for d in 0..2 {
                if let Some(dom) = ts.dominator[d] {
                    ts.dominator[d] = Some(Lit::new(outer_to_inner[dom.var().index()], dom.negated()));
                }
            }
        }

        // Relocate the table by swapping along each permutation cycle:
        for i in 0..self.tstamp.len() {
            if seen[i] {
                continue;
            }
            let mut backup = self.tstamp[Lit::from_index(i)];
            let mut at = i;
            loop {
                let lit = Lit::from_index(at);
                let to = Lit::new(outer_to_inner[lit.var().index()], lit.negated()).index();
                seen[at] = true;
                std::mem::swap(&mut backup, &mut self.tstamp[Lit::from_index(to)]);
                at = to;
                if seen[at] {
                    break;
                }
            }
        }
        for flag in seen.iter_mut() {
            *flag = false;
        }
    }

    /// Drop every trace of `var` before it is eliminated: its own dominator
    /// slots, and any dominator that names it, in both domains.
    pub fn remove_from_stamps(&mut self, var: Var) {
        for d in 0..2 {
            self.tstamp[Lit::new(var, false)].dominator[d] = None;
            self.tstamp[Lit::new(var, true)].dominator[d] = None;
        }
        for ts in self.tstamp.iter_mut() {
            for d in 0..2 {
                if ts.dominator[d].map_or(false, |dom| dom.var() == var) {
                    ts.dominator[d] = None;
                }
            }
        }
    }

    /// After equivalent-literal substitution: each slot takes over the
    /// timestamp of its replacement literal, and dominators are rewritten
    /// through the same substitution.
    pub fn update_dominators(&mut self, replacer: &impl VarReplacer) {
        for l in 0..self.tstamp.len() {
            let slot = Lit::from_index(l);
            let lit = replacer.get_lit_replaced_with(slot);

            // Variable probably eliminated, decomposed, etc. Skip.
            if lit.index() >= self.tstamp.len() {
                continue;
            }

            self.tstamp[slot] = self.tstamp[lit];
            for d in 0..2 {
                let ts = &mut self.tstamp[slot];
                if let Some(dom) = ts.dominator[d] {
                    ts.dominator[d] = Some(replacer.get_lit_replaced_with(dom));
                }
            }
        }
    }

    /// Shrink the table to `new_num_vars` variables, release spare capacity,
    /// and null any dominator that names a variable out of the new range,
    /// in both domains.
    pub fn save_on_var_memory(&mut self, new_num_vars: usize) {
        self.tstamp.truncate(new_num_vars * 2);
        self.tstamp.shrink_to_fit();

        for ts in self.tstamp.iter_mut() {
            for d in 0..2 {
                if let Some(dom) = ts.dominator[d] {
                    if dom.var().index() >= new_num_vars {
                        ts.dominator[d] = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use super::*;

    fn lit(x: i32) -> Lit {
        Lit::from_external(x)
    }

    fn lits(xs: &[i32]) -> Vec<Lit> {
        xs.iter().map(|&x| lit(x)).collect()
    }

    fn bin(a: i32, b: i32) -> BinClause {
        BinClause::new(lit(a), lit(b), false)
    }

    /// `(¬1∨2), (¬2∨3)`: the chain 1→2→3.
    fn chain_stamp() -> Stamp {
        let mut stamp = Stamp::with_num_vars(3);
        stamp.restamp(&[bin(-1, 2), bin(-2, 3)]);
        stamp
    }

    fn contains(outer: (u64, u64), inner: (u64, u64)) -> bool {
        outer.0 <= inner.0 && inner.1 <= outer.1
    }

    #[test]
    fn chain_intervals_nest() {
        let stamp = chain_stamp();
        let i1 = stamp.interval(lit(1), StampKind::Irred);
        let i2 = stamp.interval(lit(2), StampKind::Irred);
        let i3 = stamp.interval(lit(3), StampKind::Irred);
        assert!(contains(i1, i2));
        assert!(contains(i2, i3));
        assert!(contains(i1, i3));
        assert!(!contains(i3, i1));
    }

    #[test]
    fn chain_dominators_are_parents() {
        let stamp = chain_stamp();
        assert_eq!(stamp.dominator(lit(2), StampKind::Irred), Some(lit(1)));
        assert_eq!(stamp.dominator(lit(3), StampKind::Irred), Some(lit(2)));
        assert_eq!(stamp.dominator(lit(1), StampKind::Irred), None);
    }

    #[test_log::test]
    fn cl_rem_detects_entailed_clause() {
        let stamp = chain_stamp();
        // 1→3, so (¬1 ∨ 3) is forced by the binary closure…
        assert!(stamp.stamp_based_cl_rem(&lits(&[-1, 3])));
        // …and with an extra literal it is still subsumed:
        assert!(stamp.stamp_based_cl_rem(&lits(&[-1, 3, 2])));
        // (1 ∨ 3) is not:
        assert!(!stamp.stamp_based_cl_rem(&lits(&[1, 3])));
        assert!(!stamp.stamp_based_cl_rem(&lits(&[1, -3])));
    }

    #[test]
    fn cl_rem_is_order_invariant() {
        let stamp = chain_stamp();
        let mut rng = StdRng::seed_from_u64(42);
        for base in [lits(&[-1, 3, 2]), lits(&[1, -3, 2])] {
            let expected = stamp.stamp_based_cl_rem(&base);
            let mut shuffled = base.clone();
            for _ in 0..20 {
                shuffled.shuffle(&mut rng);
                assert_eq!(stamp.stamp_based_cl_rem(&shuffled), expected, "order changed the verdict for {:?}", base);
            }
        }
    }

    #[test]
    fn cl_rem_without_stamps_finds_nothing() {
        let stamp = Stamp::with_num_vars(3);
        assert!(!stamp.stamp_based_cl_rem(&lits(&[-1, 3])));
    }

    #[test_log::test]
    fn lit_rem_drops_the_implying_literal() {
        let mut stamp = Stamp::with_num_vars(3);
        stamp.restamp(&[bin(-1, 2)]); // 1→2

        // (1 ∨ 2 ∨ 3) resolves with (¬1 ∨ 2) to (2 ∨ 3): literal 1 goes,
        // the implied literal 2 stays.
        let mut clause = lits(&[1, 2, 3]);
        let (rem_norm, rem_inv) = stamp.stamp_based_lit_rem(&mut clause, StampKind::Irred);
        assert_eq!((rem_norm, rem_inv), (1, 0));
        clause.sort();
        assert_eq!(clause, {
            let mut expected = lits(&[2, 3]);
            expected.sort();
            expected
        });
    }

    #[test]
    fn lit_rem_backward_pass_uses_complements() {
        let mut stamp = Stamp::with_num_vars(3);
        stamp.restamp(&[bin(-1, 2)]); // 1→2

        // (¬1 ∨ ¬2 ∨ 3) resolves with (¬1 ∨ 2) to (¬1 ∨ 3): ¬2 goes.
        let mut clause = lits(&[-1, -2, 3]);
        let (rem_norm, rem_inv) = stamp.stamp_based_lit_rem(&mut clause, StampKind::Irred);
        assert_eq!((rem_norm, rem_inv), (0, 1));
        clause.sort();
        assert_eq!(clause, {
            let mut expected = lits(&[-1, 3]);
            expected.sort();
            expected
        });
    }

    #[test]
    fn lit_rem_never_returns_empty() {
        let mut stamp = Stamp::with_num_vars(2);
        // 1↔2: the two literals subsume each other, only one may go.
        stamp.restamp(&[bin(-1, 2), bin(-2, 1)]);

        let mut clause = lits(&[1, 2]);
        let (rem_norm, rem_inv) = stamp.stamp_based_lit_rem(&mut clause, StampKind::Irred);
        assert_eq!(rem_norm + rem_inv, 1);
        assert_eq!(clause.len(), 1);
    }

    #[test]
    fn lit_rem_untouched_without_implications() {
        let stamp = Stamp::with_num_vars(3);
        let mut clause = lits(&[1, -2, 3]);
        let (rem_norm, rem_inv) = stamp.stamp_based_lit_rem(&mut clause, StampKind::Irred);
        assert_eq!((rem_norm, rem_inv), (0, 0));
        assert_eq!(clause.len(), 3);
    }

    #[test]
    fn red_domain_sees_learnt_binaries() {
        let mut stamp = Stamp::with_num_vars(3);
        stamp.restamp(&[BinClause::new(lit(-1), lit(2), true), bin(-2, 3)]);

        // 1→2 exists only through a learnt clause:
        let i1 = stamp.interval(lit(1), StampKind::Red);
        let i2 = stamp.interval(lit(2), StampKind::Red);
        assert!(contains(i1, i2));

        let j1 = stamp.interval(lit(1), StampKind::Irred);
        let j2 = stamp.interval(lit(2), StampKind::Irred);
        assert!(!contains(j1, j2));
    }

    #[test]
    fn clear_and_restamp_reproduces_everything() {
        let bins = [bin(-1, 2), bin(-2, 3), bin(-1, 4), BinClause::new(lit(-3), lit(4), true)];
        let mut stamp = Stamp::with_num_vars(4);
        stamp.restamp(&bins);
        let before = stamp.tstamp.iter().copied().collect::<Vec<_>>();

        stamp.clear_stamps();
        assert!(stamp.tstamp.iter().all(|ts| *ts == Timestamp::default()));

        stamp.restamp(&bins);
        let after = stamp.tstamp.iter().copied().collect::<Vec<_>>();
        assert_eq!(before, after);
    }

    #[test]
    fn update_vars_relocates_and_remaps() {
        let mut stamp = Stamp::with_num_vars(3);
        stamp.restamp(&[bin(-1, 2), bin(-2, 3)]);
        let before = stamp.tstamp.iter().copied().collect::<Vec<_>>();

        // outer 0→2, 1→0, 2→1
        let outer_to_inner = [Var::new(2), Var::new(0), Var::new(1)];
        let inner_to_outer = [Var::new(1), Var::new(2), Var::new(0)];
        let mut seen = Vec::new();
        stamp.update_vars(&outer_to_inner, &inner_to_outer, &mut seen);
        assert!(seen.iter().all(|&flag| !flag));

        for inner in 0..3 {
            for negated in [false, true] {
                let new_lit = Lit::new(Var::new(inner as u32), negated);
                let old_lit = Lit::new(inner_to_outer[inner], negated);
                let old_ts = before[old_lit.index()];
                let new_ts = stamp.timestamp(new_lit);
                for d in 0..2 {
                    assert_eq!(new_ts.start[d], old_ts.start[d]);
                    assert_eq!(new_ts.end[d], old_ts.end[d]);
                    let expected_dom = old_ts.dominator[d]
                        .map(|dom| Lit::new(outer_to_inner[dom.var().index()], dom.negated()));
                    assert_eq!(new_ts.dominator[d], expected_dom);
                }
            }
        }
    }

    #[test]
    fn remove_from_stamps_clears_every_reference() {
        let mut stamp = Stamp::with_num_vars(3);
        stamp.restamp(&[bin(-1, 2), bin(-2, 3)]);

        let outer_to_inner = [Var::new(1), Var::new(0), Var::new(2)];
        let inner_to_outer = [Var::new(1), Var::new(0), Var::new(2)];
        let mut seen = Vec::new();
        stamp.update_vars(&outer_to_inner, &inner_to_outer, &mut seen);

        let var = Var::new(1);
        stamp.remove_from_stamps(var);
        for ts in stamp.tstamp.iter() {
            for d in 0..2 {
                assert!(ts.dominator[d].map_or(true, |dom| dom.var() != var));
            }
        }
    }

    struct TableReplacer(Vec<Lit>);

    impl VarReplacer for TableReplacer {
        fn get_lit_replaced_with(&self, lit: Lit) -> Lit {
            self.0[lit.index()]
        }
    }

    #[test]
    fn update_dominators_follows_replacements() {
        let mut stamp = Stamp::with_num_vars(3);
        stamp.restamp(&[bin(-1, 2), bin(-2, 3)]);
        let before = stamp.tstamp.iter().copied().collect::<Vec<_>>();

        // var 2 is replaced by var 1 (same polarity), everything else stays.
        let mut table: Vec<Lit> = (0..6).map(Lit::from_index).collect();
        table[lit(2).index()] = lit(1);
        table[lit(-2).index()] = lit(-1);
        let replacer = TableReplacer(table);

        stamp.update_dominators(&replacer);

        // The replaced slots took over their replacement's interval:
        assert_eq!(stamp.interval(lit(2), StampKind::Irred), {
            let ts = before[lit(1).index()];
            (ts.start[0], ts.end[0])
        });
        // Dominators now go through the replacement:
        assert_eq!(stamp.dominator(lit(3), StampKind::Irred), Some(lit(1)));
    }

    #[test]
    fn update_dominators_skips_out_of_table_replacements() {
        let mut stamp = Stamp::with_num_vars(2);
        stamp.restamp(&[bin(-1, 2)]);
        let before = stamp.timestamp(lit(2));

        // var 2's replacement was already eliminated from the table.
        let mut table: Vec<Lit> = (0..4).map(Lit::from_index).collect();
        table[lit(2).index()] = Lit::new(Var::new(9), false);
        let replacer = TableReplacer(table);

        stamp.update_dominators(&replacer);
        assert_eq!(stamp.timestamp(lit(2)), before);
    }

    #[test]
    fn save_on_var_memory_shrinks_and_nulls() {
        let mut stamp = Stamp::with_num_vars(4);
        // 1→4→2 irredundant, 4→3 learnt: literal 4 dominates 2 and 3.
        stamp.restamp(&[bin(-1, 4), bin(-4, 2), BinClause::new(lit(-4), lit(3), true)]);
        assert_eq!(stamp.dominator(lit(2), StampKind::Irred), Some(lit(4)));
        assert_eq!(stamp.dominator(lit(3), StampKind::Red), Some(lit(4)));

        stamp.save_on_var_memory(3);
        assert_eq!(stamp.num_vars(), 3);
        assert_eq!(stamp.dominator(lit(2), StampKind::Irred), None);
        assert_eq!(stamp.dominator(lit(3), StampKind::Red), None);
        for ts in stamp.tstamp.iter() {
            for d in 0..2 {
                assert!(ts.dominator[d].map_or(true, |dom| dom.var().index() < 3));
            }
        }
    }
}
