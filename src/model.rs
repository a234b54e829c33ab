use std::collections::HashMap;

use log::debug;

use crate::expr::{Expr, Value};
use crate::mtbdd::Mtbdd;
use crate::odd::Odd;
use crate::reference::Dd;

/// A declared state variable with an integer range and its row encoding.
#[derive(Debug)]
pub struct VarDecl {
    name: String,
    low: i64,
    high: i64,
    /// Encoding bits, most significant first, ascending manager levels.
    dd_vars: Vec<u32>,
    /// Index of the first encoding bit within the model's full bit list.
    level_offset: usize,
}

impl VarDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn range_size(&self) -> u64 {
        (self.high - self.low + 1) as u64
    }

    pub fn dd_vars(&self) -> &[u32] {
        &self.dd_vars
    }

    /// Decode this variable's value from a full encoding-bit path.
    pub fn value_from_bits(&self, bits: &[bool]) -> i64 {
        let mut v = 0i64;
        for k in 0..self.dd_vars.len() {
            v = (v << 1) | (bits[self.level_offset + k] as i64);
        }
        self.low + v
    }
}

/// A named label: either a pre-built satisfaction set or a defining
/// expression resolved on demand.
pub enum LabelDef {
    Diagram(Dd),
    Defined(Expr),
}

/// Read-only model context: variable declarations and encodings, the
/// reachable/initial/deadlock state sets, the enumeration order, and the
/// constant/label/property tables. Outlives all evaluations in a session.
pub struct Model {
    mtbdd: Mtbdd,
    vars: Vec<VarDecl>,
    all_dd_vars: Vec<u32>,
    reach: Dd,
    start: Dd,
    deadlocks: Dd,
    odd: Odd,
    constants: HashMap<String, Value>,
    labels: HashMap<String, LabelDef>,
    properties: HashMap<String, Expr>,
}

impl Model {
    pub fn mtbdd(&self) -> &Mtbdd {
        &self.mtbdd
    }

    pub fn odd(&self) -> &Odd {
        &self.odd
    }

    pub fn reach(&self) -> &Dd {
        &self.reach
    }

    pub fn start(&self) -> &Dd {
        &self.start
    }

    pub fn deadlocks(&self) -> &Dd {
        &self.deadlocks
    }

    pub fn num_states(&self) -> usize {
        self.odd.num_states()
    }

    pub fn num_start_states(&self) -> usize {
        self.odd.count_in(&self.mtbdd, &self.start)
    }

    pub fn all_dd_vars(&self) -> &[u32] {
        &self.all_dd_vars
    }

    pub fn vars(&self) -> &[VarDecl] {
        &self.vars
    }

    pub fn var(&self, name: &str) -> Option<&VarDecl> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn constant(&self, name: &str) -> Option<Value> {
        self.constants.get(name).copied()
    }

    pub fn label(&self, name: &str) -> Option<&LabelDef> {
        self.labels.get(name)
    }

    pub fn property(&self, name: &str) -> Option<&Expr> {
        self.properties.get(name)
    }

    /// The diagram mapping each state to the variable's own value.
    pub fn variable_identity(&self, v: &VarDecl) -> Dd {
        let m = &self.mtbdd;
        let mut dd = m.zero();
        for i in 0..v.range_size() {
            dd = m.set_vector_element(dd, &v.dd_vars, i, (v.low + i as i64) as f64);
        }
        dd
    }

    /// Human-readable state valuation for a full encoding-bit path, e.g.
    /// `(0,2)` for a two-variable model.
    pub fn state_string(&self, bits: &[bool]) -> String {
        let values: Vec<String> = self
            .vars
            .iter()
            .map(|v| v.value_from_bits(bits).to_string())
            .collect();
        format!("({})", values.join(","))
    }
}

/// Assembles a [`Model`] from variable declarations and concrete state
/// tuples. Each variable gets a block of consecutive levels,
/// `ceil(log2(range))` bits, minimum one.
pub struct ModelBuilder {
    mtbdd: Mtbdd,
    vars: Vec<VarDecl>,
    next_level: u32,
    init_states: Vec<Vec<i64>>,
    deadlock_states: Vec<Vec<i64>>,
    constants: HashMap<String, Value>,
    labels: HashMap<String, Expr>,
    properties: HashMap<String, Expr>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            mtbdd: Mtbdd::default(),
            vars: Vec::new(),
            // Level 0 is reserved for terminals.
            next_level: 1,
            init_states: Vec::new(),
            deadlock_states: Vec::new(),
            constants: HashMap::new(),
            labels: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    pub fn var(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        assert!(low <= high);
        let range = (high - low + 1) as u64;
        let bits = (64 - (range - 1).leading_zeros()).max(1) as usize;
        let level_offset = self.vars.iter().map(|v| v.dd_vars.len()).sum();
        let dd_vars: Vec<u32> = (0..bits as u32).map(|k| self.next_level + k).collect();
        self.next_level += bits as u32;
        self.vars.push(VarDecl {
            name: name.into(),
            low,
            high,
            dd_vars,
            level_offset,
        });
        self
    }

    /// Declare an initial state by value tuple, one value per declared
    /// variable in declaration order.
    pub fn init(mut self, values: &[i64]) -> Self {
        self.init_states.push(values.to_vec());
        self
    }

    pub fn deadlock(mut self, values: &[i64]) -> Self {
        self.deadlock_states.push(values.to_vec());
        self
    }

    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    pub fn label(mut self, name: impl Into<String>, def: Expr) -> Self {
        self.labels.insert(name.into(), def);
        self
    }

    pub fn property(mut self, name: impl Into<String>, def: Expr) -> Self {
        self.properties.insert(name.into(), def);
        self
    }

    fn state_cube(&self, values: &[i64]) -> Dd {
        assert_eq!(values.len(), self.vars.len());
        let m = &self.mtbdd;
        let mut cube = m.one();
        for (v, &value) in self.vars.iter().zip(values) {
            assert!(value >= v.low && value <= v.high, "value out of range");
            let pos = (value - v.low) as u64;
            let set = m.set_vector_element(m.zero(), &v.dd_vars, pos, 1.0);
            cube = m.apply_and(cube, set);
        }
        cube
    }

    pub fn build(self) -> Model {
        let m = &self.mtbdd;

        // Reachable set: every in-range encoding of every variable.
        // Padding positions of a non-power-of-two range stay excluded.
        let mut reach = m.one();
        for v in &self.vars {
            let mut in_range = m.zero();
            for i in 0..v.range_size() {
                in_range = m.set_vector_element(in_range, &v.dd_vars, i, 1.0);
            }
            reach = m.apply_and(reach, in_range);
        }

        let mut start = m.zero();
        for values in &self.init_states {
            start = m.apply_or(start, self.state_cube(values));
        }
        let mut deadlocks = m.zero();
        for values in &self.deadlock_states {
            deadlocks = m.apply_or(deadlocks, self.state_cube(values));
        }

        let all_dd_vars: Vec<u32> = self.vars.iter().flat_map(|v| v.dd_vars.clone()).collect();
        let odd = Odd::new(m, &reach, &all_dd_vars);
        debug!(
            "Built model: {} variables, {} states, {} initial",
            self.vars.len(),
            odd.num_states(),
            odd.count_in(m, &start)
        );

        Model {
            vars: self.vars,
            all_dd_vars,
            reach,
            start,
            deadlocks,
            odd,
            constants: self.constants,
            labels: self
                .labels
                .into_iter()
                .map(|(name, def)| (name, LabelDef::Defined(def)))
                .collect(),
            properties: self.properties,
            mtbdd: self.mtbdd,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_single_var_model() {
        let model = ModelBuilder::new().var("x", 0, 3).init(&[0]).build();
        assert_eq!(model.num_states(), 4);
        assert_eq!(model.num_start_states(), 1);
        assert_eq!(model.var("x").map(|v| v.range_size()), Some(4));
    }

    #[test]
    fn test_non_power_of_two_range() {
        // Range of 3 needs 2 bits; the 4th encoding position must not be
        // counted as a state.
        let model = ModelBuilder::new().var("x", 1, 3).init(&[1]).build();
        assert_eq!(model.num_states(), 3);
    }

    #[test]
    fn test_variable_identity_values() {
        let model = ModelBuilder::new().var("x", 2, 5).init(&[2]).build();
        let v = model.var("x").unwrap();
        let id = model.variable_identity(v);
        let vec = model.odd().to_vector(model.mtbdd(), &id);
        assert_eq!(vec, vec![2.0, 3.0, 4.0, 5.0]);
        model.mtbdd().release(id);
    }

    #[test]
    fn test_state_string_two_vars() {
        let model = ModelBuilder::new()
            .var("a", 0, 1)
            .var("b", 0, 2)
            .init(&[0, 0])
            .build();
        assert_eq!(model.num_states(), 6);

        let mut seen = Vec::new();
        let reach = model.mtbdd().copy(model.reach());
        model.odd().for_each_nonzero(model.mtbdd(), &reach, |i, bits, _| {
            seen.push((i, model.state_string(bits)));
        });
        model.mtbdd().release(reach);
        assert_eq!(seen[0], (0, "(0,0)".to_string()));
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[5], (5, "(1,2)".to_string()));
    }

    #[test]
    fn test_multiple_init_states() {
        let model = ModelBuilder::new()
            .var("x", 0, 3)
            .init(&[1])
            .init(&[2])
            .build();
        assert_eq!(model.num_start_states(), 2);
        assert_eq!(
            model.odd().first_index_of(model.mtbdd(), model.start()),
            Some(1)
        );
    }
}
