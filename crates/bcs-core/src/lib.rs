//! # BCSGEN Core
//!
//! Shared types for rule-based biochemical model analysis.
//!
//! A model is a set of rewriting rules over *complexes* (compositions of
//! agents located in a compartment), an initial multiset of complexes, and a
//! mapping of named kinetic parameters. Downstream crates turn a model into
//! a vectorized reaction network and then into either a labeled transition
//! system for probabilistic model checking or numeric trajectories.
//!
//! ## Contents
//!
//! 1. **Agents & Complexes**: structural, totally ordered species descriptions
//! 2. **Ordering**: the fixed coordinate system for state vectors
//! 3. **State**: discrete population vector with a divergence sentinel
//! 4. **Rate expressions**: symbolic kinetic laws compiled to slot references
//! 5. **Rules & Models**: the contract consumed from the parser collaborator

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Common errors
#[derive(Debug, Error)]
pub enum BcsError {
    #[error("rule '{rule}' has no rate; generation and simulation require fully specified rates")]
    RatesNotSpecified { rule: String },

    #[error("model is parametrised ({params:?}); simulation cannot be executed")]
    ParametrisedModel { params: Vec<String> },

    #[error("free parameter '{name}' encountered during numeric rate evaluation")]
    FreeParameter { name: String },

    #[error("complex '{complex}' does not appear in the ordering")]
    UnknownComplex { complex: String },

    #[error("label assignment references state {state}, but the transition system has {count} states")]
    LabelOutOfRange { state: usize, count: usize },

    #[error("label '{label}' is not part of the declared atomic proposition universe")]
    UndeclaredLabel { label: String },

    #[error("ordering must contain at least one complex")]
    EmptyOrdering,

    #[error("seed transition system ordering does not match the model ordering")]
    OrderingMismatch,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BcsError>;

// =============================================================================
// AGENTS & COMPLEXES
// =============================================================================

/// Atomic agent: a named site with its current state, e.g. `S{p}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AtomicAgent {
    pub name: String,
    pub state: String,
}

impl AtomicAgent {
    pub fn new(name: &str, state: &str) -> Self {
        Self {
            name: name.to_string(),
            state: state.to_string(),
        }
    }
}

impl fmt::Display for AtomicAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.name, self.state)
    }
}

/// Structure agent: a named agent with a composition of atomic agents,
/// e.g. `K(S{p},T{i})`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureAgent {
    pub name: String,
    pub composition: BTreeSet<AtomicAgent>,
}

impl StructureAgent {
    pub fn new(name: &str, composition: impl IntoIterator<Item = AtomicAgent>) -> Self {
        Self {
            name: name.to_string(),
            composition: composition.into_iter().collect(),
        }
    }
}

impl fmt::Display for StructureAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner: Vec<String> = self.composition.iter().map(|a| a.to_string()).collect();
        write!(f, "{}({})", self.name, inner.join(","))
    }
}

/// Either kind of agent appearing inside a complex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Agent {
    Atomic(AtomicAgent),
    Structure(StructureAgent),
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Agent::Atomic(a) => a.fmt(f),
            Agent::Structure(s) => s.fmt(f),
        }
    }
}

/// Complex: a composition of agents in a compartment, e.g.
/// `K(S{p},T{i}).B{a}::cyt`.
///
/// Equality, ordering and hashing are structural; agents are sorted on
/// construction so that two complexes built from the same multiset of agents
/// compare equal regardless of input order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Complex {
    agents: Vec<Agent>,
    compartment: String,
}

impl Complex {
    pub fn new(agents: impl IntoIterator<Item = Agent>, compartment: &str) -> Self {
        let mut agents: Vec<Agent> = agents.into_iter().collect();
        agents.sort();
        Self {
            agents,
            compartment: compartment.to_string(),
        }
    }

    /// Convenience constructor for a complex of a single structure agent.
    pub fn structure(name: &str, compartment: &str) -> Self {
        Self::new(
            [Agent::Structure(StructureAgent::new(name, []))],
            compartment,
        )
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn compartment(&self) -> &str {
        &self.compartment
    }
}

impl fmt::Display for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.agents.iter().map(|a| a.to_string()).collect();
        write!(f, "{}::{}", parts.join("."), self.compartment)
    }
}

// =============================================================================
// ORDERING
// =============================================================================

/// The fixed coordinate system of a model run: a deduplicated, totally
/// ordered sequence of complexes. Slot `i` of every state vector refers to
/// `ordering.get(i)` for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Complex>", into = "Vec<Complex>")]
pub struct ComplexOrdering {
    complexes: Vec<Complex>,
    index: HashMap<Complex, usize>,
}

impl ComplexOrdering {
    pub fn new(complexes: impl IntoIterator<Item = Complex>) -> Result<Self> {
        let set: BTreeSet<Complex> = complexes.into_iter().collect();
        if set.is_empty() {
            return Err(BcsError::EmptyOrdering);
        }
        let complexes: Vec<Complex> = set.into_iter().collect();
        let index = complexes
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, c)| (c, i))
            .collect();
        Ok(Self { complexes, index })
    }

    pub fn len(&self) -> usize {
        self.complexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.complexes.is_empty()
    }

    /// Slot index of a complex; resolved once at vectorization time, never
    /// inside exploration or simulation hot loops.
    pub fn index_of(&self, complex: &Complex) -> Result<usize> {
        self.index
            .get(complex)
            .copied()
            .ok_or_else(|| BcsError::UnknownComplex {
                complex: complex.to_string(),
            })
    }

    pub fn get(&self, slot: usize) -> Option<&Complex> {
        self.complexes.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Complex> {
        self.complexes.iter()
    }
}

impl From<Vec<Complex>> for ComplexOrdering {
    fn from(complexes: Vec<Complex>) -> Self {
        // A serialized ordering is non-empty by construction.
        let index = complexes
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, c)| (c, i))
            .collect();
        Self { complexes, index }
    }
}

impl From<ComplexOrdering> for Vec<Complex> {
    fn from(ordering: ComplexOrdering) -> Self {
        ordering.complexes
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Discrete population vector over a fixed ordering, or the absorbing
/// divergence sentinel reached when any slot would exceed the bound.
///
/// States are immutable once registered in a transition system; successors
/// are always produced by [`State::apply`], never by in-place mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Counts(Vec<u64>),
    Unbounded,
}

impl State {
    pub fn new(counts: Vec<u64>) -> Self {
        State::Counts(counts)
    }

    pub fn counts(&self) -> Option<&[u64]> {
        match self {
            State::Counts(c) => Some(c),
            State::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, State::Unbounded)
    }

    /// A reaction is enabled iff every consumed slot holds a positive count.
    /// The sentinel enables nothing; it is absorbing.
    pub fn enables(&self, consumption: &[u64]) -> bool {
        match self {
            State::Counts(c) => consumption
                .iter()
                .zip(c.iter())
                .all(|(&need, &have)| need == 0 || have > 0),
            State::Unbounded => false,
        }
    }

    /// Successor by copy-with-delta: subtract the consumption pattern,
    /// add the production pattern, flooring each slot at zero.
    pub fn apply(&self, consumption: &[u64], production: &[u64]) -> State {
        match self {
            State::Counts(c) => State::Counts(
                c.iter()
                    .zip(consumption.iter().zip(production.iter()))
                    .map(|(&have, (&cons, &prod))| have.saturating_sub(cons) + prod)
                    .collect(),
            ),
            State::Unbounded => State::Unbounded,
        }
    }

    /// True when any single slot exceeds the bound; the caller then collapses
    /// the whole state to the sentinel, never just the offending slot.
    pub fn exceeds(&self, bound: u64) -> bool {
        match self {
            State::Counts(c) => c.iter().any(|&v| v > bound),
            State::Unbounded => true,
        }
    }

    pub fn max_count(&self) -> u64 {
        match self {
            State::Counts(c) => c.iter().copied().max().unwrap_or(0),
            State::Unbounded => u64::MAX,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Counts(c) => {
                let parts: Vec<String> = c.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(","))
            }
            State::Unbounded => write!(f, "(inf)"),
        }
    }
}

// =============================================================================
// RATE EXPRESSIONS
// =============================================================================

/// Binary operator in a rate expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Symbolic kinetic law.
///
/// As delivered by the parser a rate references complex concentrations
/// (`Conc`) and named parameters (`Param`). [`RateExpr::vectorize`] resolves
/// every concentration to a slot index over a fixed ordering and substitutes
/// known parameter values, so evaluation in hot loops touches no names.
/// Parameters without a known value stay symbolic; a model carrying any such
/// parameter is *parametrised* and can only be exported, not simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RateExpr {
    Value(f64),
    Param(String),
    Conc(Complex),
    Slot(usize),
    Bin(RateOp, Box<RateExpr>, Box<RateExpr>),
}

impl RateExpr {
    pub fn bin(op: RateOp, lhs: RateExpr, rhs: RateExpr) -> Self {
        RateExpr::Bin(op, Box::new(lhs), Box::new(rhs))
    }

    /// Compile against a fixed ordering: concentration references become slot
    /// references, parameters with known values become literals. Unknown
    /// parameters are retained symbolically.
    pub fn vectorize(
        &self,
        ordering: &ComplexOrdering,
        params: &BTreeMap<String, f64>,
    ) -> Result<RateExpr> {
        match self {
            RateExpr::Value(v) => Ok(RateExpr::Value(*v)),
            RateExpr::Slot(i) => Ok(RateExpr::Slot(*i)),
            RateExpr::Param(name) => match params.get(name) {
                Some(&v) => Ok(RateExpr::Value(v)),
                None => Ok(RateExpr::Param(name.clone())),
            },
            RateExpr::Conc(complex) => Ok(RateExpr::Slot(ordering.index_of(complex)?)),
            RateExpr::Bin(op, lhs, rhs) => Ok(RateExpr::bin(
                *op,
                lhs.vectorize(ordering, params)?,
                rhs.vectorize(ordering, params)?,
            )),
        }
    }

    /// Numeric evaluation over a vectorized expression. Fails on surviving
    /// free parameters and on concentration references that were never
    /// resolved against an ordering.
    pub fn eval(&self, counts: &[f64]) -> Result<f64> {
        match self {
            RateExpr::Value(v) => Ok(*v),
            RateExpr::Slot(i) => Ok(counts.get(*i).copied().unwrap_or(0.0)),
            RateExpr::Param(name) => Err(BcsError::FreeParameter { name: name.clone() }),
            RateExpr::Conc(complex) => Err(BcsError::UnknownComplex {
                complex: complex.to_string(),
            }),
            RateExpr::Bin(op, lhs, rhs) => {
                let l = lhs.eval(counts)?;
                let r = rhs.eval(counts)?;
                Ok(apply_op(*op, l, r))
            }
        }
    }

    /// Substitute slot references with concrete counts and fold constant
    /// subtrees, leaving free parameters in place. Used when building edges
    /// of a parametrised transition system.
    pub fn partial_eval(&self, counts: &[f64]) -> RateExpr {
        match self {
            RateExpr::Value(v) => RateExpr::Value(*v),
            RateExpr::Param(name) => RateExpr::Param(name.clone()),
            RateExpr::Conc(complex) => RateExpr::Conc(complex.clone()),
            RateExpr::Slot(i) => RateExpr::Value(counts.get(*i).copied().unwrap_or(0.0)),
            RateExpr::Bin(op, lhs, rhs) => {
                let l = lhs.partial_eval(counts);
                let r = rhs.partial_eval(counts);
                if let (RateExpr::Value(a), RateExpr::Value(b)) = (&l, &r) {
                    RateExpr::Value(apply_op(*op, *a, *b))
                } else {
                    RateExpr::bin(*op, l, r)
                }
            }
        }
    }

    /// Names of parameters left symbolic after vectorization.
    pub fn free_parameters(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_free(&mut out);
        out
    }

    fn collect_free(&self, out: &mut BTreeSet<String>) {
        match self {
            RateExpr::Param(name) => {
                out.insert(name.clone());
            }
            RateExpr::Bin(_, lhs, rhs) => {
                lhs.collect_free(out);
                rhs.collect_free(out);
            }
            _ => {}
        }
    }

    /// Render in PRISM expression syntax; binary subexpressions are
    /// parenthesized, exponentiation uses `pow(x,y)`.
    pub fn to_prism_string(&self) -> String {
        match self {
            RateExpr::Value(v) => format_number(*v),
            RateExpr::Param(name) => name.clone(),
            RateExpr::Conc(complex) => format!("[{}]", complex),
            RateExpr::Slot(i) => format!("VAR_{}", i),
            RateExpr::Bin(RateOp::Pow, lhs, rhs) => {
                format!("pow({},{})", lhs.to_prism_string(), rhs.to_prism_string())
            }
            RateExpr::Bin(op, lhs, rhs) => {
                let sym = match op {
                    RateOp::Add => "+",
                    RateOp::Sub => "-",
                    RateOp::Mul => "*",
                    RateOp::Div => "/",
                    RateOp::Pow => unreachable!(),
                };
                format!("({}{}{})", lhs.to_prism_string(), sym, rhs.to_prism_string())
            }
        }
    }
}

fn apply_op(op: RateOp, l: f64, r: f64) -> f64 {
    match op {
        RateOp::Add => l + r,
        RateOp::Sub => l - r,
        RateOp::Mul => l * r,
        RateOp::Div => l / r,
        RateOp::Pow => l.powf(r),
    }
}

/// Minimal decimal rendering: integers lose the trailing `.0`, everything
/// else uses the shortest round-trip form.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

// =============================================================================
// RULES & MODELS
// =============================================================================

/// A rewriting rule: consumed multiset, produced multiset, optional rate.
///
/// A rule without a rate is retained as parsed; any attempt to generate a
/// transition system or run a simulation over it fails fast with
/// [`BcsError::RatesNotSpecified`] before exploration begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub lhs: Vec<(Complex, u64)>,
    pub rhs: Vec<(Complex, u64)>,
    pub rate: Option<RateExpr>,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |side: &[(Complex, u64)]| -> String {
            side.iter()
                .map(|(c, n)| {
                    if *n == 1 {
                        c.to_string()
                    } else {
                        format!("{} {}", n, c)
                    }
                })
                .collect::<Vec<_>>()
                .join(" + ")
        };
        write!(f, "{} => {}", side(&self.lhs), side(&self.rhs))
    }
}

/// Parsed model: the contract consumed from the parser collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub rules: Vec<Rule>,
    pub init: Vec<(Complex, u64)>,
    pub params: BTreeMap<String, f64>,
}

impl Model {
    /// True when every rule carries a rate expression.
    pub fn all_rates(&self) -> bool {
        self.rules.iter().all(|r| r.rate.is_some())
    }

    /// Parameters referenced by some rate but absent from the value map.
    pub fn free_parameters(&self) -> BTreeSet<String> {
        let mut free = BTreeSet::new();
        for rule in &self.rules {
            if let Some(rate) = &rule.rate {
                for name in rate.free_parameters() {
                    if !self.params.contains_key(&name) {
                        free.insert(name);
                    }
                }
            }
        }
        free
    }

    /// Every distinct complex mentioned by the rules or the initial multiset.
    pub fn complexes(&self) -> BTreeSet<Complex> {
        let mut out = BTreeSet::new();
        for rule in &self.rules {
            for (c, _) in rule.lhs.iter().chain(rule.rhs.iter()) {
                out.insert(c.clone());
            }
            if let Some(rate) = &rule.rate {
                collect_conc(rate, &mut out);
            }
        }
        for (c, _) in &self.init {
            out.insert(c.clone());
        }
        out
    }
}

fn collect_conc(expr: &RateExpr, out: &mut BTreeSet<Complex>) {
    match expr {
        RateExpr::Conc(c) => {
            out.insert(c.clone());
        }
        RateExpr::Bin(_, lhs, rhs) => {
            collect_conc(lhs, out);
            collect_conc(rhs, out);
        }
        _ => {}
    }
}

// =============================================================================
// TESTS
// =============================================================================
