use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;

use log::debug;

use crate::cache::Cache;
use crate::reference::{Dd, Ref};
use crate::table::Table;
use crate::utils::{pairing2, pairing3, MyHash};

/// A node in the store. Terminals have `variable == 0` and carry their
/// value as raw `f64` bits in `value`; internal nodes have `variable >= 1`
/// and `value == 0`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Node {
    variable: u32,
    low: Ref,
    high: Ref,
    value: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for Node {
    fn default() -> Self {
        Self {
            variable: 0,
            low: Ref::new(0),
            high: Ref::new(0),
            value: 0,
        }
    }
}

impl MyHash for Node {
    fn hash(&self) -> u64 {
        pairing3(
            pairing2(self.variable as u64, self.value),
            self.low.unsigned(),
            self.high.unsigned(),
        )
    }
}

/// Pointwise binary operators over terminal values.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ApplyOp {
    Plus,
    Minus,
    Times,
    Divide,
    Min,
    Max,
    Pow,
    PowInt,
    Mod,
    Log,
    Equals,
    NotEquals,
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

impl ApplyOp {
    /// Apply the operator to a pair of terminal values.
    ///
    /// Domain guards (non-positive modulus, degenerate logarithm base) are
    /// encoded here as NaN so that they poison exactly the affected
    /// states, in both the symbolic and the explicit evaluation route.
    pub fn eval(self, a: f64, b: f64) -> f64 {
        match self {
            ApplyOp::Plus => a + b,
            ApplyOp::Minus => a - b,
            ApplyOp::Times => a * b,
            ApplyOp::Divide => a / b,
            ApplyOp::Min => a.min(b),
            ApplyOp::Max => a.max(b),
            ApplyOp::Pow => a.powf(b),
            ApplyOp::PowInt => {
                // Integer power: negative exponents and results outside
                // the integer range are domain errors.
                if b < 0.0 {
                    f64::NAN
                } else {
                    let r = a.powf(b);
                    if r.abs() > i32::MAX as f64 {
                        f64::NAN
                    } else {
                        r
                    }
                }
            }
            ApplyOp::Mod => {
                let div = b.trunc();
                if div <= 0.0 {
                    f64::NAN
                } else {
                    // True modulo: result carries the sign of the divisor.
                    let d = ((a.trunc() as i64) % (div as i64)) as f64;
                    if d < 0.0 {
                        d + div
                    } else {
                        d
                    }
                }
            }
            ApplyOp::Log => {
                if b <= 0.0 || b == 1.0 || b.is_infinite() || b.is_nan() {
                    f64::NAN
                } else {
                    a.ln() / b.ln()
                }
            }
            ApplyOp::Equals => bool_to_value(a == b),
            ApplyOp::NotEquals => bool_to_value(a != b),
            ApplyOp::Greater => bool_to_value(a > b),
            ApplyOp::GreaterEq => bool_to_value(a >= b),
            ApplyOp::Less => bool_to_value(a < b),
            ApplyOp::LessEq => bool_to_value(a <= b),
        }
    }

    fn code(self) -> u64 {
        self as u64
    }
}

fn bool_to_value(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
enum OpKey {
    Apply(ApplyOp, Ref, Ref),
    Ite(Ref, Ref, Ref),
}

impl MyHash for OpKey {
    fn hash(&self) -> u64 {
        match self {
            OpKey::Apply(op, a, b) => pairing3(op.code() + 16, a.unsigned(), b.unsigned()),
            OpKey::Ite(f, g, h) => pairing3(f.unsigned(), g.unsigned(), h.unsigned()),
        }
    }
}

/// Multi-terminal binary decision diagram manager.
///
/// Manager-centric like its BDD cousins: all diagrams live in one
/// hash-consed store, so structurally equal diagrams share one index and
/// equality is handle comparison. External ownership is tracked per node
/// ([`Mtbdd::retain`] / [`Mtbdd::release`]); operations taking [`Dd`] by
/// value consume the argument's reference and return a fresh one.
pub struct Mtbdd {
    storage: RefCell<Table<Node>>,
    cache: RefCell<Cache<OpKey, Ref>>,
    refs: RefCell<HashMap<usize, usize>>,
    live: Cell<usize>,
    zero: Ref,
    one: Ref,
}

impl Mtbdd {
    pub fn new(storage_bits: usize) -> Self {
        assert!(
            storage_bits <= 31,
            "Storage bits should be in the range 0..=31"
        );

        let cache_bits = storage_bits.min(16);
        let storage = RefCell::new(Table::new(storage_bits));

        let m = Self {
            storage,
            cache: RefCell::new(Cache::new(cache_bits)),
            refs: RefCell::new(HashMap::new()),
            live: Cell::new(0),
            zero: Ref::new(0),
            one: Ref::new(0),
        };

        let zero = m.mk_terminal(0.0);
        let one = m.mk_terminal(1.0);
        Self { zero, one, ..m }
    }
}

impl Default for Mtbdd {
    fn default() -> Self {
        Mtbdd::new(20)
    }
}

impl Debug for Mtbdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.borrow();
        f.debug_struct("Mtbdd")
            .field("capacity", &storage.capacity())
            .field("size", &storage.size())
            .field("real_size", &storage.real_size())
            .field("live_refs", &self.live.get())
            .finish()
    }
}

impl Mtbdd {
    fn node(&self, r: Ref) -> Node {
        *self.storage.borrow().value(r.index())
    }

    pub(crate) fn variable(&self, r: Ref) -> u32 {
        self.node(r).variable
    }

    pub(crate) fn is_terminal_raw(&self, r: Ref) -> bool {
        self.node(r).variable == 0
    }

    pub(crate) fn terminal_value(&self, r: Ref) -> f64 {
        let node = self.node(r);
        debug_assert_eq!(node.variable, 0, "not a terminal: {r}");
        f64::from_bits(node.value)
    }

    pub(crate) fn constant_raw(&self, value: f64) -> Ref {
        self.mk_terminal(value)
    }

    pub(crate) fn zero_raw(&self) -> Ref {
        self.zero
    }

    pub(crate) fn one_raw(&self) -> Ref {
        self.one
    }

    /// Cofactors of `r` with respect to variable `v`, which must not be
    /// below the node's top variable.
    pub(crate) fn cofactors(&self, r: Ref, v: u32) -> (Ref, Ref) {
        debug_assert_ne!(v, 0, "Variable index should not be zero");

        let node = self.node(r);
        if node.variable == 0 || v < node.variable {
            return (r, r);
        }
        debug_assert_eq!(v, node.variable);
        (node.low, node.high)
    }

    fn mk_terminal(&self, value: f64) -> Ref {
        // Canonicalize -0.0 and NaN payloads so consing stays sound.
        let value = if value == 0.0 { 0.0 } else { value };
        let bits = if value.is_nan() {
            f64::NAN.to_bits()
        } else {
            value.to_bits()
        };
        let i = self.storage.borrow_mut().put(Node {
            variable: 0,
            low: Ref::new(0),
            high: Ref::new(0),
            value: bits,
        });
        Ref::new(i as u32)
    }

    pub(crate) fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Ref {
        debug_assert_ne!(v, 0, "Variable index should not be zero");

        // Reduction: redundant test
        if low == high {
            return low;
        }

        let i = self.storage.borrow_mut().put(Node {
            variable: v,
            low,
            high,
            value: 0,
        });
        Ref::new(i as u32)
    }

    /// Top variable among the given nodes (terminals do not count).
    fn top_variable(&self, nodes: &[Ref]) -> u32 {
        let mut m = u32::MAX;
        for &r in nodes {
            let v = self.variable(r);
            if v != 0 {
                m = m.min(v);
            }
        }
        debug_assert_ne!(m, u32::MAX);
        m
    }

    pub(crate) fn apply_raw(&self, op: ApplyOp, a: Ref, b: Ref) -> Ref {
        if self.is_terminal_raw(a) && self.is_terminal_raw(b) {
            return self.mk_terminal(op.eval(self.terminal_value(a), self.terminal_value(b)));
        }

        let key = OpKey::Apply(op, a, b);
        if let Some(&res) = self.cache.borrow().get(&key) {
            return res;
        }

        let m = self.top_variable(&[a, b]);
        let (a0, a1) = self.cofactors(a, m);
        let (b0, b1) = self.cofactors(b, m);

        let low = self.apply_raw(op, a0, b0);
        let high = self.apply_raw(op, a1, b1);
        let res = self.mk_node(m, low, high);

        debug!("apply({op:?}, {a}, {b}) -> {res}");
        self.cache.borrow_mut().insert(&key, res);
        res
    }

    /// `ITE(f, g, h)` where `f` is a 0/1 diagram and `g`/`h` carry
    /// arbitrary terminal values.
    pub(crate) fn ite_raw(&self, f: Ref, g: Ref, h: Ref) -> Ref {
        if f == self.one {
            return g;
        }
        if f == self.zero {
            return h;
        }
        debug_assert!(!self.is_terminal_raw(f), "ITE condition is not 0/1: {f}");
        if g == h {
            return g;
        }

        let key = OpKey::Ite(f, g, h);
        if let Some(&res) = self.cache.borrow().get(&key) {
            return res;
        }

        let m = self.top_variable(&[f, g, h]);
        let (f0, f1) = self.cofactors(f, m);
        let (g0, g1) = self.cofactors(g, m);
        let (h0, h1) = self.cofactors(h, m);

        let low = self.ite_raw(f0, g0, h0);
        let high = self.ite_raw(f1, g1, h1);
        let res = self.mk_node(m, low, high);

        debug!("ite({f}, {g}, {h}) -> {res}");
        self.cache.borrow_mut().insert(&key, res);
        res
    }

    pub(crate) fn not_raw(&self, f: Ref) -> Ref {
        self.ite_raw(f, self.zero, self.one)
    }

    /// Rewrite every terminal of `f` through `func`, preserving structure
    /// up to reduction.
    pub(crate) fn map_terminals_raw(&self, f: Ref, func: &mut dyn FnMut(f64) -> f64) -> Ref {
        let mut memo = HashMap::new();
        self.map_terminals_rec(f, func, &mut memo)
    }

    fn map_terminals_rec(
        &self,
        f: Ref,
        func: &mut dyn FnMut(f64) -> f64,
        memo: &mut HashMap<Ref, Ref>,
    ) -> Ref {
        if self.is_terminal_raw(f) {
            return self.mk_terminal(func(self.terminal_value(f)));
        }
        if let Some(&res) = memo.get(&f) {
            return res;
        }

        let node = self.node(f);
        let low = self.map_terminals_rec(node.low, func, memo);
        let high = self.map_terminals_rec(node.high, func, memo);
        let res = self.mk_node(node.variable, low, high);
        memo.insert(f, res);
        res
    }

    /// Overwrite one encoded position of a variable's encoding with the
    /// given terminal value. `vars` lists the encoding bits, most
    /// significant first; `index` is the position within [0, 2^bits).
    pub(crate) fn set_vector_element_raw(
        &self,
        dd: Ref,
        vars: &[u32],
        index: u64,
        value: f64,
    ) -> Ref {
        debug_assert!(index < (1u64 << vars.len()));

        // Build the 0/1 cube selecting the position, bottom-up.
        let mut cube = self.one;
        for (k, &v) in vars.iter().enumerate().rev() {
            let bit = (index >> (vars.len() - 1 - k)) & 1;
            cube = if bit == 1 {
                self.mk_node(v, self.zero, cube)
            } else {
                self.mk_node(v, cube, self.zero)
            };
        }

        let val = self.mk_terminal(value);
        self.ite_raw(cube, val, dd)
    }

    pub(crate) fn descendants(&self, nodes: impl IntoIterator<Item = Ref>) -> HashSet<usize> {
        let mut visited = HashSet::new();
        visited.insert(self.zero.index());
        visited.insert(self.one.index());
        let mut queue = VecDeque::from_iter(nodes);

        while let Some(r) = queue.pop_front() {
            if visited.insert(r.index()) && !self.is_terminal_raw(r) {
                let node = self.node(r);
                queue.push_back(node.low);
                queue.push_back(node.high);
            }
        }

        visited
    }

    pub(crate) fn to_bracket_string(&self, r: Ref) -> String {
        if self.is_terminal_raw(r) {
            return format!("({})", self.terminal_value(r));
        }
        let node = self.node(r);
        format!(
            "{}:(x{}, {}, {})",
            r,
            node.variable,
            self.to_bracket_string(node.high),
            self.to_bracket_string(node.low)
        )
    }
}

// External ownership and the `Dd`-level operation set.
impl Mtbdd {
    pub(crate) fn retain(&self, r: Ref) -> Dd {
        *self.refs.borrow_mut().entry(r.index()).or_insert(0) += 1;
        self.live.set(self.live.get() + 1);
        Dd::new(r)
    }

    /// Explicitly duplicate a handle (the only way to get a second one).
    pub fn copy(&self, dd: &Dd) -> Dd {
        self.retain(dd.raw())
    }

    /// Give up a handle. Each handle must be released exactly once.
    pub fn release(&self, dd: Dd) {
        let index = dd.raw().index();
        let mut refs = self.refs.borrow_mut();
        match refs.get_mut(&index) {
            Some(c) => {
                *c -= 1;
                if *c == 0 {
                    refs.remove(&index);
                }
            }
            None => debug_assert!(false, "release of unreferenced node {}", dd.raw()),
        }
        self.live.set(self.live.get().saturating_sub(1));
    }

    /// Number of outstanding external references, the leak detector's
    /// baseline.
    pub fn live_refs(&self) -> usize {
        self.live.get()
    }

    pub fn constant(&self, value: f64) -> Dd {
        self.retain(self.mk_terminal(value))
    }

    pub fn zero(&self) -> Dd {
        self.retain(self.zero)
    }

    pub fn one(&self) -> Dd {
        self.retain(self.one)
    }

    pub fn is_zero(&self, dd: &Dd) -> bool {
        dd.raw() == self.zero
    }

    pub fn apply(&self, op: ApplyOp, a: Dd, b: Dd) -> Dd {
        let res = self.apply_raw(op, a.raw(), b.raw());
        self.release(a);
        self.release(b);
        self.retain(res)
    }

    pub fn ite(&self, f: Dd, g: Dd, h: Dd) -> Dd {
        let res = self.ite_raw(f.raw(), g.raw(), h.raw());
        self.release(f);
        self.release(g);
        self.release(h);
        self.retain(res)
    }

    pub fn apply_not(&self, f: Dd) -> Dd {
        let res = self.not_raw(f.raw());
        self.release(f);
        self.retain(res)
    }

    pub fn apply_and(&self, a: Dd, b: Dd) -> Dd {
        let res = self.ite_raw(a.raw(), b.raw(), self.zero);
        self.release(a);
        self.release(b);
        self.retain(res)
    }

    pub fn apply_or(&self, a: Dd, b: Dd) -> Dd {
        let res = self.ite_raw(a.raw(), self.one, b.raw());
        self.release(a);
        self.release(b);
        self.retain(res)
    }

    pub fn apply_xor(&self, a: Dd, b: Dd) -> Dd {
        let nb = self.not_raw(b.raw());
        let res = self.ite_raw(a.raw(), nb, b.raw());
        self.release(a);
        self.release(b);
        self.retain(res)
    }

    pub fn apply_implies(&self, a: Dd, b: Dd) -> Dd {
        let res = self.ite_raw(a.raw(), b.raw(), self.one);
        self.release(a);
        self.release(b);
        self.retain(res)
    }

    pub fn apply_iff(&self, a: Dd, b: Dd) -> Dd {
        let nb = self.not_raw(b.raw());
        let res = self.not_raw(self.ite_raw(a.raw(), nb, b.raw()));
        self.release(a);
        self.release(b);
        self.retain(res)
    }

    pub fn map_terminals(&self, f: Dd, mut func: impl FnMut(f64) -> f64) -> Dd {
        let res = self.map_terminals_raw(f.raw(), &mut func);
        self.release(f);
        self.retain(res)
    }

    pub fn set_vector_element(&self, dd: Dd, vars: &[u32], index: u64, value: f64) -> Dd {
        let res = self.set_vector_element_raw(dd.raw(), vars, index, value);
        self.release(dd);
        self.retain(res)
    }

    /// Number of distinct nodes in the diagram rooted at `dd`.
    pub fn size(&self, dd: &Dd) -> u64 {
        self.descendants([dd.raw()]).len() as u64
    }

    /// Drop every node not reachable from an externally held handle.
    pub fn collect_garbage(&self) {
        debug!("Collecting garbage...");

        self.cache.borrow_mut().clear();

        let roots: Vec<Ref> = self
            .refs
            .borrow()
            .keys()
            .map(|&i| Ref::new(i as u32))
            .collect();
        let alive = self.descendants(roots);
        debug!("Alive nodes: {}", alive.len());

        let n = self.storage.borrow().num_buckets();
        for i in 0..n {
            let mut index = self.storage.borrow().bucket(i);
            if index == 0 {
                continue;
            }

            // Unlink dead nodes from the head of the bucket chain...
            while index != 0 && !alive.contains(&index) {
                let next = self.storage.borrow().next(index);
                self.storage.borrow_mut().drop(index);
                index = next;
            }
            self.storage.borrow_mut().set_bucket(i, index);

            // ...and from the middle.
            let mut prev = index;
            while prev != 0 {
                let mut cur = self.storage.borrow().next(prev);
                while cur != 0 && !alive.contains(&cur) {
                    let next = self.storage.borrow().next(cur);
                    self.storage.borrow_mut().drop(cur);
                    cur = next;
                }
                if self.storage.borrow().next(prev) != cur {
                    self.storage.borrow_mut().set_next(prev, cur);
                }
                prev = cur;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_terminals_consed() {
        let m = Mtbdd::default();
        let a = m.constant(2.5);
        let b = m.constant(2.5);
        assert_eq!(a, b);
        m.release(a);
        m.release(b);
        assert_eq!(m.live_refs(), 0);
    }

    #[test]
    fn test_negative_zero_canonical() {
        let m = Mtbdd::default();
        let a = m.constant(0.0);
        let b = m.constant(-0.0);
        assert_eq!(a, b);
        assert!(m.is_zero(&a));
        m.release(a);
        m.release(b);
    }

    #[test]
    fn test_nan_consed() {
        let m = Mtbdd::default();
        let a = m.constant(f64::NAN);
        let b = m.constant(0.0_f64 / 0.0);
        assert_eq!(a, b);
        m.release(a);
        m.release(b);
    }

    #[test]
    fn test_apply_plus_constants() {
        let m = Mtbdd::default();
        let a = m.constant(2.0);
        let b = m.constant(3.0);
        let c = m.apply(ApplyOp::Plus, a, b);
        assert_eq!(m.terminal_value(c.raw()), 5.0);
        m.release(c);
        assert_eq!(m.live_refs(), 0);
    }

    #[test]
    fn test_apply_is_pointwise() {
        let m = Mtbdd::default();
        // f = if x1 then 3 else 1, g = if x1 then 10 else 20
        let f = m.mk_node(1, m.mk_terminal(1.0), m.mk_terminal(3.0));
        let g = m.mk_node(1, m.mk_terminal(20.0), m.mk_terminal(10.0));
        let sum = m.apply_raw(ApplyOp::Plus, f, g);
        let (low, high) = m.cofactors(sum, 1);
        assert_eq!(m.terminal_value(low), 21.0);
        assert_eq!(m.terminal_value(high), 13.0);
    }

    #[test]
    fn test_ite_boolean_connectives_agree() {
        let m = Mtbdd::default();
        let x = m.mk_node(1, m.zero_raw(), m.one_raw());
        let y = m.mk_node(2, m.zero_raw(), m.one_raw());

        // De Morgan: not(x and y) == (not x) or (not y)
        let and_xy = m.ite_raw(x, y, m.zero_raw());
        let lhs = m.not_raw(and_xy);
        let rhs = m.ite_raw(m.not_raw(x), m.one_raw(), m.not_raw(y));
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn test_mod_true_modulo() {
        assert_eq!(ApplyOp::Mod.eval(7.0, 3.0), 1.0);
        assert_eq!(ApplyOp::Mod.eval(-7.0, 3.0), 2.0);
        assert!(ApplyOp::Mod.eval(7.0, 0.0).is_nan());
        assert!(ApplyOp::Mod.eval(7.0, -3.0).is_nan());
    }

    #[test]
    fn test_log_edge_cases() {
        assert_eq!(ApplyOp::Log.eval(8.0, 2.0), 3.0);
        assert!(ApplyOp::Log.eval(8.0, 1.0).is_nan());
        assert!(ApplyOp::Log.eval(8.0, -2.0).is_nan());
        assert_eq!(ApplyOp::Log.eval(0.0, 2.0), f64::NEG_INFINITY);
    }

    #[test]
    fn test_set_vector_element() {
        let m = Mtbdd::default();
        // One variable encoded with two bits (vars 1 and 2), value 3 at
        // position 2 (binary 10).
        let dd = m.set_vector_element_raw(m.zero_raw(), &[1, 2], 2, 3.0);
        // Position 2: bit1 (MSB) = 1, bit2 = 0.
        let (_, high) = m.cofactors(dd, 1);
        let (low2, high2) = m.cofactors(high, 2);
        assert_eq!(m.terminal_value(low2), 3.0);
        assert_eq!(m.terminal_value(high2), 0.0);
    }

    #[test]
    fn test_map_terminals() {
        let m = Mtbdd::default();
        let f = m.mk_node(1, m.mk_terminal(1.4), m.mk_terminal(2.6));
        let g = m.map_terminals_raw(f, &mut |v| v.floor());
        let (low, high) = m.cofactors(g, 1);
        assert_eq!(m.terminal_value(low), 1.0);
        assert_eq!(m.terminal_value(high), 2.0);
    }

    #[test]
    fn test_collect_garbage_keeps_live() {
        let m = Mtbdd::default();
        let x = m.mk_node(1, m.zero_raw(), m.one_raw());
        let y = m.mk_node(2, m.zero_raw(), m.one_raw());
        let keep = m.retain(m.ite_raw(x, y, m.zero_raw()));
        let _dead = m.apply_raw(ApplyOp::Plus, x, y);

        let before = m.to_bracket_string(keep.raw());
        m.collect_garbage();
        assert_eq!(m.to_bracket_string(keep.raw()), before);
        m.release(keep);
    }

    #[test]
    fn test_copy_and_release_balance() {
        let m = Mtbdd::default();
        let a = m.constant(1.5);
        let b = m.copy(&a);
        assert_eq!(m.live_refs(), 2);
        m.release(a);
        m.release(b);
        assert_eq!(m.live_refs(), 0);
    }
}
