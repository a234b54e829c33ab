use std::collections::HashMap;

use log::debug;

use crate::mtbdd::Mtbdd;
use crate::reference::{Dd, Ref};

#[derive(Debug, Copy, Clone)]
struct OddNode {
    dd: Ref,
    e: usize,
    t: usize,
    /// Number of reachable states in the else subtree.
    eoff: i64,
    /// Number of reachable states in the then subtree.
    toff: i64,
}

const NONE: usize = usize::MAX;

/// Offset-labelled decision diagram over the reachable-state set.
///
/// Mirrors the reachability diagram's structure level by level and
/// annotates each node with the number of reachable states in its else
/// and then subtrees. The offsets induce a fixed enumeration order over
/// reachable states, which is what ties the symbolic and the dense
/// explicit representation together: position `i` in a dense vector is
/// the `i`-th reachable state in this order.
///
/// Nodes keep bare `Ref`s into the manager; they stay valid because they
/// are sub-diagrams of the externally retained reachability diagram.
pub struct Odd {
    vars: Vec<u32>,
    arena: Vec<OddNode>,
    root: usize,
    num_states: usize,
}

impl Odd {
    /// Build the structure for a 0/1 reachability diagram over the given
    /// encoding variables (ascending level order).
    pub fn new(m: &Mtbdd, reach: &Dd, vars: &[u32]) -> Self {
        let mut arena = Vec::new();
        let mut tables: Vec<HashMap<Ref, usize>> = vec![HashMap::new(); vars.len() + 1];

        let root = build_rec(m, reach.raw(), 0, vars, &mut tables, &mut arena);
        let num_states = add_offsets(m, &mut arena, root, 0, vars.len());

        debug!(
            "Built ODD: {} nodes, {} states",
            arena.len(),
            num_states
        );

        Self {
            vars: vars.to_vec(),
            arena,
            root,
            num_states: num_states as usize,
        }
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    /// Read a diagram into a dense vector, one entry per reachable state
    /// in enumeration order. The diagram must be zero outside the
    /// reachable set.
    pub fn to_vector(&self, m: &Mtbdd, dd: &Dd) -> Vec<f64> {
        let mut vec = vec![0.0; self.num_states];
        self.fill_vector_rec(m, dd.raw(), 0, self.root, 0, &mut vec);
        vec
    }

    fn fill_vector_rec(
        &self,
        m: &Mtbdd,
        dd: Ref,
        level: usize,
        odd: usize,
        offset: usize,
        vec: &mut [f64],
    ) {
        if dd == m.zero_raw() {
            return;
        }
        if level == self.vars.len() {
            vec[offset] = m.terminal_value(dd);
            return;
        }
        let (e, t) = m.cofactors(dd, self.vars[level]);
        let node = self.arena[odd];
        self.fill_vector_rec(m, e, level + 1, node.e, offset, vec);
        self.fill_vector_rec(m, t, level + 1, node.t, offset + node.eoff as usize, vec);
    }

    /// Rebuild a diagram from a dense vector. Inverse of
    /// [`Odd::to_vector`] on the reachable set; zero everywhere else.
    pub fn from_vector(&self, m: &Mtbdd, vec: &[f64]) -> Dd {
        debug_assert_eq!(vec.len(), self.num_states);
        let res = self.from_vector_rec(m, vec, 0, self.root, 0);
        m.retain(res)
    }

    fn from_vector_rec(
        &self,
        m: &Mtbdd,
        vec: &[f64],
        level: usize,
        odd: usize,
        offset: usize,
    ) -> Ref {
        let node = self.arena[odd];
        if node.eoff + node.toff == 0 {
            return m.zero_raw();
        }
        if level == self.vars.len() {
            return m.constant_raw(vec[offset]);
        }
        let e = if node.eoff > 0 {
            self.from_vector_rec(m, vec, level + 1, node.e, offset)
        } else {
            m.zero_raw()
        };
        let t = if node.toff > 0 {
            self.from_vector_rec(m, vec, level + 1, node.t, offset + node.eoff as usize)
        } else {
            m.zero_raw()
        };
        m.mk_node(self.vars[level], e, t)
    }

    /// Enumeration index of the first state where the 0/1 diagram is
    /// true, or `None` if it is empty.
    pub fn first_index_of(&self, m: &Mtbdd, dd: &Dd) -> Option<usize> {
        let mut cur = dd.raw();
        if cur == m.zero_raw() {
            return None;
        }
        let mut odd = self.root;
        let mut index = 0usize;
        for level in 0..self.vars.len() {
            let (e, t) = m.cofactors(cur, self.vars[level]);
            let node = self.arena[odd];
            if e != m.zero_raw() {
                cur = e;
                odd = node.e;
            } else {
                index += node.eoff as usize;
                cur = t;
                odd = node.t;
            }
        }
        Some(index)
    }

    /// 0/1 diagram holding exactly the state at the given enumeration
    /// index.
    pub fn single_index_to_dd(&self, m: &Mtbdd, index: usize) -> Dd {
        debug_assert!(index < self.num_states);

        let mut bits = Vec::with_capacity(self.vars.len());
        let mut odd = self.root;
        let mut rest = index as i64;
        for _ in 0..self.vars.len() {
            let node = self.arena[odd];
            if rest < node.eoff {
                bits.push(false);
                odd = node.e;
            } else {
                rest -= node.eoff;
                bits.push(true);
                odd = node.t;
            }
        }

        let mut cur = m.one_raw();
        for (level, &bit) in bits.iter().enumerate().rev() {
            cur = if bit {
                m.mk_node(self.vars[level], m.zero_raw(), cur)
            } else {
                m.mk_node(self.vars[level], cur, m.zero_raw())
            };
        }
        m.retain(cur)
    }

    /// Value of the diagram at the given enumeration index.
    pub fn value_at(&self, m: &Mtbdd, dd: &Dd, index: usize) -> f64 {
        debug_assert!(index < self.num_states);

        let mut cur = dd.raw();
        let mut odd = self.root;
        let mut rest = index as i64;
        for level in 0..self.vars.len() {
            let (e, t) = m.cofactors(cur, self.vars[level]);
            let node = self.arena[odd];
            if rest < node.eoff {
                cur = e;
                odd = node.e;
            } else {
                rest -= node.eoff;
                cur = t;
                odd = node.t;
            }
        }
        m.terminal_value(cur)
    }

    /// Number of reachable states where the 0/1 diagram is true.
    pub fn count_in(&self, m: &Mtbdd, dd: &Dd) -> usize {
        let mut memo = HashMap::new();
        self.count_rec(m, dd.raw(), 0, self.root, &mut memo) as usize
    }

    fn count_rec(
        &self,
        m: &Mtbdd,
        dd: Ref,
        level: usize,
        odd: usize,
        memo: &mut HashMap<(Ref, usize), i64>,
    ) -> i64 {
        if dd == m.zero_raw() {
            return 0;
        }
        if level == self.vars.len() {
            return 1;
        }
        if let Some(&n) = memo.get(&(dd, odd)) {
            return n;
        }
        let (e, t) = m.cofactors(dd, self.vars[level]);
        let node = self.arena[odd];
        let n = self.count_rec(m, e, level + 1, node.e, memo)
            + self.count_rec(m, t, level + 1, node.t, memo);
        memo.insert((dd, odd), n);
        n
    }

    /// Visit every reachable state with a nonzero diagram value, in
    /// enumeration order, with the state's encoding bits and the value.
    pub fn for_each_nonzero(
        &self,
        m: &Mtbdd,
        dd: &Dd,
        mut f: impl FnMut(usize, &[bool], f64),
    ) {
        let mut bits = vec![false; self.vars.len()];
        self.visit_rec(m, dd.raw(), 0, self.root, 0, &mut bits, &mut f);
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_rec(
        &self,
        m: &Mtbdd,
        dd: Ref,
        level: usize,
        odd: usize,
        offset: usize,
        bits: &mut [bool],
        f: &mut impl FnMut(usize, &[bool], f64),
    ) {
        if dd == m.zero_raw() {
            return;
        }
        if level == self.vars.len() {
            f(offset, bits, m.terminal_value(dd));
            return;
        }
        let (e, t) = m.cofactors(dd, self.vars[level]);
        let node = self.arena[odd];
        bits[level] = false;
        self.visit_rec(m, e, level + 1, node.e, offset, bits, f);
        bits[level] = true;
        self.visit_rec(m, t, level + 1, node.t, offset + node.eoff as usize, bits, f);
    }
}

fn build_rec(
    m: &Mtbdd,
    dd: Ref,
    level: usize,
    vars: &[u32],
    tables: &mut [HashMap<Ref, usize>],
    arena: &mut Vec<OddNode>,
) -> usize {
    if let Some(&i) = tables[level].get(&dd) {
        return i;
    }

    let (e, t) = if level == vars.len() {
        (NONE, NONE)
    } else {
        let (lo, hi) = m.cofactors(dd, vars[level]);
        (
            build_rec(m, lo, level + 1, vars, tables, arena),
            build_rec(m, hi, level + 1, vars, tables, arena),
        )
    };

    arena.push(OddNode {
        dd,
        e,
        t,
        eoff: -1,
        toff: -1,
    });
    let i = arena.len() - 1;
    tables[level].insert(dd, i);
    i
}

fn add_offsets(m: &Mtbdd, arena: &mut [OddNode], odd: usize, level: usize, num_vars: usize) -> i64 {
    if arena[odd].eoff == -1 || arena[odd].toff == -1 {
        if level == num_vars {
            arena[odd].eoff = 0;
            arena[odd].toff = if arena[odd].dd == m.zero_raw() { 0 } else { 1 };
        } else {
            let (e, t) = (arena[odd].e, arena[odd].t);
            let eoff = add_offsets(m, arena, e, level + 1, num_vars);
            let toff = add_offsets(m, arena, t, level + 1, num_vars);
            arena[odd].eoff = eoff;
            arena[odd].toff = toff;
        }
    }
    arena[odd].eoff + arena[odd].toff
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::mtbdd::ApplyOp;

    /// One variable over two encoding bits, all four positions reachable.
    fn full_square() -> (Mtbdd, Odd, Dd) {
        let m = Mtbdd::new(16);
        let reach = m.one();
        let odd = Odd::new(&m, &reach, &[1, 2]);
        (m, odd, reach)
    }

    #[test]
    fn test_num_states() {
        let (m, odd, reach) = full_square();
        assert_eq!(odd.num_states(), 4);
        m.release(reach);
    }

    #[test]
    fn test_vector_round_trip() {
        let (m, odd, reach) = full_square();
        let vec = vec![0.25, -1.0, 0.0, 7.5];
        let dd = odd.from_vector(&m, &vec);
        assert_eq!(odd.to_vector(&m, &dd), vec);
        m.release(dd);
        m.release(reach);
        assert_eq!(m.live_refs(), 0);
    }

    #[test]
    fn test_partial_reach_round_trip() {
        let m = Mtbdd::new(16);
        // Only positions 1 and 3 (bit2 set) are reachable.
        let reach = {
            let a = m.set_vector_element(m.zero(), &[1, 2], 1, 1.0);
            m.set_vector_element(a, &[1, 2], 3, 1.0)
        };
        let odd = Odd::new(&m, &reach, &[1, 2]);
        assert_eq!(odd.num_states(), 2);

        let dd = odd.from_vector(&m, &[4.0, 9.0]);
        assert_eq!(odd.to_vector(&m, &dd), vec![4.0, 9.0]);
        assert_eq!(odd.value_at(&m, &dd, 1), 9.0);
        m.release(dd);
        m.release(reach);
    }

    #[test]
    fn test_first_index_and_single_index() {
        let (m, odd, reach) = full_square();
        let set = {
            let a = m.set_vector_element(m.zero(), &[1, 2], 2, 1.0);
            m.set_vector_element(a, &[1, 2], 3, 1.0)
        };
        assert_eq!(odd.first_index_of(&m, &set), Some(2));

        let single = odd.single_index_to_dd(&m, 2);
        assert_eq!(odd.count_in(&m, &single), 1);
        assert_eq!(odd.first_index_of(&m, &single), Some(2));

        let empty = m.zero();
        assert_eq!(odd.first_index_of(&m, &empty), None);

        m.release(set);
        m.release(single);
        m.release(empty);
        m.release(reach);
    }

    #[test]
    fn test_count_in() {
        let (m, odd, reach) = full_square();
        let set = {
            let a = m.set_vector_element(m.zero(), &[1, 2], 0, 1.0);
            m.set_vector_element(a, &[1, 2], 3, 1.0)
        };
        assert_eq!(odd.count_in(&m, &set), 2);
        let all = m.one();
        assert_eq!(odd.count_in(&m, &all), 4);
        m.release(set);
        m.release(all);
        m.release(reach);
    }

    #[test]
    fn test_for_each_nonzero_order() {
        let (m, odd, reach) = full_square();
        let dd = odd.from_vector(&m, &[0.0, 5.0, 0.0, 2.0]);
        let mut seen = Vec::new();
        odd.for_each_nonzero(&m, &dd, |i, bits, v| {
            seen.push((i, bits.to_vec(), v));
        });
        assert_eq!(
            seen,
            vec![
                (1, vec![false, true], 5.0),
                (3, vec![true, true], 2.0),
            ]
        );
        m.release(dd);
        m.release(reach);
    }

    #[test]
    fn test_enumeration_matches_apply() {
        let (m, odd, reach) = full_square();
        let a = odd.from_vector(&m, &[1.0, 2.0, 3.0, 4.0]);
        let b = odd.from_vector(&m, &[10.0, 20.0, 30.0, 40.0]);
        let sum = m.apply(ApplyOp::Plus, a, b);
        assert_eq!(odd.to_vector(&m, &sum), vec![11.0, 22.0, 33.0, 44.0]);
        m.release(sum);
        m.release(reach);
    }
}
