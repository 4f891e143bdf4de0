//! # BCSGEN Transition Systems
//!
//! Bounded reachable-state exploration for rule-based biochemical models and
//! export to probabilistic model checker formats.
//!
//! ## Capabilities
//!
//! 1. **Vectorized reactions**: rules compiled to consumption/production
//!    patterns plus a slot-resolved rate over a fixed complex ordering
//! 2. **Generation**: worklist BFS with divergence absorption, cooperative
//!    `max_size`/`max_time` limits, and warm-start from a saved system
//! 3. **Export**: explicit `.tra`/`.lab` pair and symbolic PRISM module
//!    text, DTMC (normalized) or CTMC (raw rate) flavoured
//! 4. **Persistence**: JSON snapshots that keep the unprocessed frontier so
//!    a truncated exploration can be resumed exactly where it stopped

use bcsgen_core::{
    format_number, BcsError, ComplexOrdering, Model, RateExpr, Result, State,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::time::Instant;

// =============================================================================
// VECTORIZED REACTIONS
// =============================================================================

/// A rule compiled against a fixed ordering: per-slot consumption and
/// production patterns and a vectorized rate. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorReaction {
    pub consumption: Vec<u64>,
    pub production: Vec<u64>,
    pub rate: Option<RateExpr>,
    /// Text of the source rule, kept for diagnostics.
    pub rule: String,
}

impl VectorReaction {
    pub fn from_rule(
        rule: &bcsgen_core::Rule,
        ordering: &ComplexOrdering,
        params: &BTreeMap<String, f64>,
    ) -> Result<Self> {
        let mut consumption = vec![0u64; ordering.len()];
        let mut production = vec![0u64; ordering.len()];
        for (complex, count) in &rule.lhs {
            consumption[ordering.index_of(complex)?] += count;
        }
        for (complex, count) in &rule.rhs {
            production[ordering.index_of(complex)?] += count;
        }
        let rate = match &rule.rate {
            Some(expr) => Some(expr.vectorize(ordering, params)?),
            None => None,
        };
        Ok(Self {
            consumption,
            production,
            rate,
            rule: rule.to_string(),
        })
    }
}

/// The vectorized form of a parsed model: reactions, initial state, ordering
/// and an optional explicit per-slot bound. Read-only after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorModel {
    reactions: Vec<VectorReaction>,
    init: State,
    ordering: ComplexOrdering,
    bound: Option<u64>,
}

impl VectorModel {
    pub fn new(
        reactions: Vec<VectorReaction>,
        init: State,
        ordering: ComplexOrdering,
        bound: Option<u64>,
    ) -> Self {
        Self {
            reactions,
            init,
            ordering,
            bound,
        }
    }

    /// Compile a parsed model. Rules keep their order; rules without a rate
    /// are retained and only rejected when generation or simulation starts.
    pub fn from_model(model: &Model, bound: Option<u64>) -> Result<Self> {
        let ordering = ComplexOrdering::new(model.complexes())?;
        let mut init_counts = vec![0u64; ordering.len()];
        for (complex, count) in &model.init {
            init_counts[ordering.index_of(complex)?] += count;
        }
        let reactions = model
            .rules
            .iter()
            .map(|rule| VectorReaction::from_rule(rule, &ordering, &model.params))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            reactions,
            init: State::new(init_counts),
            ordering,
            bound,
        })
    }

    pub fn reactions(&self) -> &[VectorReaction] {
        &self.reactions
    }

    pub fn init(&self) -> &State {
        &self.init
    }

    pub fn ordering(&self) -> &ComplexOrdering {
        &self.ordering
    }

    /// The divergence bound: the explicit one when supplied, otherwise the
    /// largest slot value across the initial state and every reaction
    /// pattern (the smallest bound preserving all non-divergent behavior).
    pub fn bound(&self) -> u64 {
        self.bound.unwrap_or_else(|| self.compute_bound())
    }

    fn compute_bound(&self) -> u64 {
        let mut bound = self.init.max_count();
        for reaction in &self.reactions {
            for &v in reaction.consumption.iter().chain(reaction.production.iter()) {
                bound = bound.max(v);
            }
        }
        bound
    }

    /// Free parameters surviving vectorization across all rates.
    pub fn free_parameters(&self) -> BTreeSet<String> {
        let mut free = BTreeSet::new();
        for reaction in &self.reactions {
            if let Some(rate) = &reaction.rate {
                free.extend(rate.free_parameters());
            }
        }
        free
    }

    /// Fails fast when some rule carries no rate, naming the rule.
    pub fn ensure_rates(&self) -> Result<()> {
        for reaction in &self.reactions {
            if reaction.rate.is_none() {
                return Err(BcsError::RatesNotSpecified {
                    rule: reaction.rule.clone(),
                });
            }
        }
        Ok(())
    }

    /// Fails when the model is parametrised; simulation requires a fully
    /// numeric model.
    pub fn ensure_numeric(&self) -> Result<()> {
        let free = self.free_parameters();
        if !free.is_empty() {
            return Err(BcsError::ParametrisedModel {
                params: free.into_iter().collect(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // GENERATION
    // =========================================================================

    /// Explore the reachable state space by worklist BFS.
    ///
    /// * Enabled = every consumed slot positive; a rate evaluating to exactly
    ///   zero disables the reaction for that state.
    /// * A successor exceeding the bound on any slot collapses wholesale to
    ///   the absorbing sentinel, which carries a single weight-1 self-loop.
    /// * Deadlocked states get a weight-1 self-loop so every state has
    ///   positive outgoing mass.
    /// * `max_size`/`max_time` are cooperative cutoffs checked once per
    ///   popped state; hitting one leaves a valid partial system whose
    ///   frontier holds every not-yet-expanded state.
    /// * A `seed` system keeps its state indices; exploration resumes from
    ///   its frontier only.
    ///
    /// Edge weights are raw rates (or symbolic rate text for parametrised
    /// models); normalization into probabilities is an export concern.
    pub fn generate_transition_system(
        &self,
        seed: Option<TransitionSystem>,
        max_time: f64,
        max_size: usize,
    ) -> Result<TransitionSystem> {
        self.ensure_rates()?;
        let bound = self.bound();

        let mut ts = match seed {
            Some(mut ts) => {
                if ts.ordering != self.ordering {
                    return Err(BcsError::OrderingMismatch);
                }
                ts.rebuild_encoding();
                ts
            }
            None => TransitionSystem::with_initial(self.ordering.clone(), self.init.clone()),
        };

        let timer = Instant::now();
        let mut queue: VecDeque<usize> = ts.frontier.drain(..).collect();

        while let Some(index) = queue.pop_front() {
            if ts.states.len() >= max_size || timer.elapsed().as_secs_f64() >= max_time {
                ts.frontier.push(index);
                ts.frontier.extend(queue);
                break;
            }

            let state = ts.states[index].clone();
            if state.is_unbounded() {
                ts.add_edge(index, index, Weight::Value(1.0));
                continue;
            }
            let counts: Vec<f64> = match state.counts() {
                Some(c) => c.iter().map(|&v| v as f64).collect(),
                None => continue,
            };

            let mut out_degree = 0usize;
            for reaction in &self.reactions {
                if !state.enables(&reaction.consumption) {
                    continue;
                }
                let rate = reaction
                    .rate
                    .as_ref()
                    .ok_or_else(|| BcsError::RatesNotSpecified {
                        rule: reaction.rule.clone(),
                    })?;
                let weight = match rate.partial_eval(&counts) {
                    RateExpr::Value(v) => {
                        if v == 0.0 {
                            continue;
                        }
                        Weight::Value(v)
                    }
                    expr => Weight::Expr(expr.to_prism_string()),
                };

                let mut successor = state.apply(&reaction.consumption, &reaction.production);
                if successor.exceeds(bound) {
                    successor = State::Unbounded;
                }
                let target = match ts.index_of(&successor) {
                    Some(t) => t,
                    None => {
                        let t = ts.insert(successor);
                        queue.push_back(t);
                        t
                    }
                };
                ts.add_edge(index, target, weight);
                out_degree += 1;
            }

            if out_degree == 0 {
                ts.add_edge(index, index, Weight::Value(1.0));
            }
        }

        Ok(ts)
    }
}

// =============================================================================
// TRANSITION SYSTEM
// =============================================================================

/// Export flavour: normalized transition probabilities (DTMC) or raw
/// continuous-time rates (CTMC). A configuration switch, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Dtmc,
    Ctmc,
}

impl ModelKind {
    fn keyword(self) -> &'static str {
        match self {
            ModelKind::Dtmc => "dtmc",
            ModelKind::Ctmc => "ctmc",
        }
    }
}

/// Edge weight: numeric, or symbolic expression text for parametrised models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Weight {
    Value(f64),
    Expr(String),
}

impl Weight {
    fn render(&self) -> String {
        match self {
            Weight::Value(v) => format_number(*v),
            Weight::Expr(e) => e.clone(),
        }
    }

    fn render_precise(&self, precision: usize) -> String {
        match self {
            Weight::Value(v) => format_decimal(*v, precision),
            Weight::Expr(e) => e.clone(),
        }
    }
}

/// Weighted directed edge between encoded states. Multiple edges between the
/// same ordered pair are permitted in memory; they are summed on export when
/// the target format requires it, never merged silently here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: Weight,
}

impl Edge {
    pub fn new(source: usize, target: usize, weight: Weight) -> Self {
        Self {
            source,
            target,
            weight,
        }
    }
}

/// The discovered, encoded, weighted state graph.
///
/// State indices are discovery order; index 0 is the initial state. The
/// `frontier` lists states registered but not yet expanded, so a snapshot of
/// a limit-truncated exploration resumes incrementally instead of
/// re-verifying closed states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSystem {
    pub ordering: ComplexOrdering,
    pub states: Vec<State>,
    pub edges: Vec<Edge>,
    pub frontier: Vec<usize>,
    #[serde(skip)]
    encoding: HashMap<State, usize>,
}

impl TransitionSystem {
    pub fn new(ordering: ComplexOrdering) -> Self {
        Self {
            ordering,
            states: Vec::new(),
            edges: Vec::new(),
            frontier: Vec::new(),
            encoding: HashMap::new(),
        }
    }

    fn with_initial(ordering: ComplexOrdering, init: State) -> Self {
        let mut ts = Self::new(ordering);
        let index = ts.insert(init);
        ts.frontier.push(index);
        ts
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// True when no unexpanded states remain.
    pub fn is_complete(&self) -> bool {
        self.frontier.is_empty()
    }

    /// Register a new state under the next dense index.
    pub fn insert(&mut self, state: State) -> usize {
        let index = self.states.len();
        self.encoding.insert(state.clone(), index);
        self.states.push(state);
        index
    }

    pub fn index_of(&self, state: &State) -> Option<usize> {
        self.encoding.get(state).copied()
    }

    pub fn add_edge(&mut self, source: usize, target: usize, weight: Weight) {
        self.edges.push(Edge::new(source, target, weight));
    }

    /// Rebuild the state-to-index map after deserialization.
    pub fn rebuild_encoding(&mut self) {
        self.encoding = self
            .states
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, s)| (s, i))
            .collect();
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    pub fn save_to_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut ts: TransitionSystem = serde_json::from_str(&json)?;
        ts.rebuild_encoding();
        Ok(ts)
    }

    // =========================================================================
    // EXPORT
    // =========================================================================

    /// Per-state outgoing edge rows as the exporters see them: duplicates to
    /// the same target summed, weights normalized per source for DTMC or left
    /// raw for CTMC, and a weight-1 self-loop synthesized for states without
    /// any outgoing edge (unexpanded frontier states of a truncated system).
    /// Symbolic weights pass through untouched; they carry whatever
    /// convention the parametrised source expressions follow.
    fn outgoing_rows(&self, kind: ModelKind) -> Vec<Vec<(usize, Weight)>> {
        let mut per_source: Vec<Vec<(usize, Weight)>> = vec![Vec::new(); self.states.len()];
        for edge in &self.edges {
            per_source[edge.source].push((edge.target, edge.weight.clone()));
        }

        per_source
            .into_iter()
            .enumerate()
            .map(|(source, outgoing)| {
                if outgoing.is_empty() {
                    return vec![(source, Weight::Value(1.0))];
                }
                let symbolic = outgoing.iter().any(|(_, w)| matches!(w, Weight::Expr(_)));
                if symbolic {
                    let mut merged: BTreeMap<usize, Weight> = BTreeMap::new();
                    for (target, weight) in outgoing {
                        merged
                            .entry(target)
                            .and_modify(|w| {
                                *w = Weight::Expr(format!("({}+{})", w.render(), weight.render()))
                            })
                            .or_insert(weight);
                    }
                    merged.into_iter().collect()
                } else {
                    let total: f64 = outgoing
                        .iter()
                        .map(|(_, w)| match w {
                            Weight::Value(v) => *v,
                            Weight::Expr(_) => 0.0,
                        })
                        .sum();
                    let mut merged: BTreeMap<usize, f64> = BTreeMap::new();
                    for (target, weight) in outgoing {
                        if let Weight::Value(v) = weight {
                            let v = match kind {
                                ModelKind::Dtmc if total > 0.0 => v / total,
                                _ => v,
                            };
                            *merged.entry(target).or_insert(0.0) += v;
                        }
                    }
                    merged
                        .into_iter()
                        .map(|(target, v)| (target, Weight::Value(v)))
                        .collect()
                }
            })
            .collect()
    }

    /// Explicit-state export: the `.tra`/`.lab` text pair.
    ///
    /// The transition text opens with one state-declaration line
    /// `<states> <transitions>` followed by `from to weight` triples sorted
    /// by source then destination. The label text holds a `#DECLARATION`
    /// section with the atomic proposition universe (always including
    /// `init`), an `#END` marker, then per-state assignment lines. The
    /// initial state is labeled `init` implicitly.
    pub fn export_explicit(
        &self,
        labels: &BTreeMap<usize, BTreeSet<String>>,
        ap_names: &[String],
        kind: ModelKind,
    ) -> Result<(String, String)> {
        // universe: init first, then the given order
        let mut universe: Vec<String> = vec!["init".to_string()];
        for name in ap_names {
            if !universe.contains(name) {
                universe.push(name.clone());
            }
        }

        for (&state, set) in labels {
            if state >= self.states.len() {
                return Err(BcsError::LabelOutOfRange {
                    state,
                    count: self.states.len(),
                });
            }
            for label in set {
                if !universe.contains(label) {
                    return Err(BcsError::UndeclaredLabel {
                        label: label.clone(),
                    });
                }
            }
        }

        let rows = self.outgoing_rows(kind);
        let transition_count: usize = rows.iter().map(|r| r.len()).sum();
        let mut tra = format!("{} {}\n", self.states.len(), transition_count);
        for (source, outgoing) in rows.iter().enumerate() {
            for (target, weight) in outgoing {
                tra.push_str(&format!("{} {} {}\n", source, target, weight.render()));
            }
        }

        let mut assignment = labels.clone();
        if !self.states.is_empty() {
            assignment
                .entry(0)
                .or_default()
                .insert("init".to_string());
        }
        let mut lab = String::from("#DECLARATION\n");
        lab.push_str(&universe.join(" "));
        lab.push_str("\n#END\n");
        for (state, set) in &assignment {
            let names: Vec<&str> = universe
                .iter()
                .filter(|u| set.contains(*u))
                .map(|s| s.as_str())
                .collect();
            if names.is_empty() {
                continue;
            }
            lab.push_str(&format!("{} {}\n", state, names.join(" ")));
        }

        Ok((tra, lab))
    }

    /// Write the explicit pair to disk.
    pub fn save_storm_explicit(
        &self,
        transitions_path: impl AsRef<Path>,
        labels_path: impl AsRef<Path>,
        labels: &BTreeMap<usize, BTreeSet<String>>,
        ap_names: &[String],
        kind: ModelKind,
    ) -> Result<()> {
        let (tra, lab) = self.export_explicit(labels, ap_names, kind)?;
        std::fs::write(transitions_path, tra)?;
        std::fs::write(labels_path, lab)?;
        Ok(())
    }

    /// Symbolic export: a PRISM-style module with one guarded command per
    /// reachable state. Free parameters become `const double` declarations;
    /// numeric weights are decimal literals rounded to `precision` digits,
    /// symbolic weights keep their expression text. `extra_clauses` are
    /// appended verbatim after the module.
    pub fn export_prism(
        &self,
        kind: ModelKind,
        precision: usize,
        free_params: &BTreeSet<String>,
        extra_clauses: &[String],
    ) -> String {
        let mut out = String::new();
        out.push_str(kind.keyword());
        out.push_str("\n\n");
        for param in free_params {
            out.push_str(&format!("const double {};\n", param));
        }
        if !free_params.is_empty() {
            out.push('\n');
        }

        out.push_str("module TS\n");
        out.push_str(&format!(
            "    state : [0..{}] init 0;\n\n",
            self.states.len().saturating_sub(1)
        ));
        for (source, outgoing) in self.outgoing_rows(kind).iter().enumerate() {
            let updates: Vec<String> = outgoing
                .iter()
                .map(|(target, weight)| {
                    format!("{}: (state'={})", weight.render_precise(precision), target)
                })
                .collect();
            out.push_str(&format!(
                "    [] state={} -> {};\n",
                source,
                updates.join(" + ")
            ));
        }
        out.push_str("endmodule\n");
        for clause in extra_clauses {
            out.push_str(clause);
            out.push('\n');
        }
        out
    }

    pub fn save_to_prism(
        &self,
        path: impl AsRef<Path>,
        kind: ModelKind,
        precision: usize,
        free_params: &BTreeSet<String>,
        extra_clauses: &[String],
    ) -> Result<()> {
        let text = self.export_prism(kind, precision, free_params, extra_clauses);
        std::fs::write(path, text)?;
        Ok(())
    }
}

impl PartialEq for TransitionSystem {
    fn eq(&self, other: &Self) -> bool {
        self.ordering == other.ordering
            && self.states == other.states
            && self.edges == other.edges
            && self.frontier == other.frontier
    }
}

/// Round to `precision` decimal digits and drop trailing zeros, so `0.5`
/// stays `0.5` and `1.0` becomes `1` regardless of precision.
fn format_decimal(v: f64, precision: usize) -> String {
    let s = format!("{:.*}", precision, v);
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.');
        trimmed.to_string()
    } else {
        s
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bcsgen_core::{Complex, RateOp, Rule};

    fn complex(name: &str) -> Complex {
        Complex::structure(name, "rep")
    }

    /// Saturating X -> Y plus mass-action Y -> X, initial state (2,1,1).
    fn xyz_model() -> Model {
        let x = complex("X");
        let y = complex("Y");
        let z = complex("Z");
        let saturating = RateExpr::bin(
            RateOp::Div,
            RateExpr::Value(1.0),
            RateExpr::bin(
                RateOp::Add,
                RateExpr::Value(1.0),
                RateExpr::bin(RateOp::Pow, RateExpr::Conc(x.clone()), RateExpr::Value(2.0)),
            ),
        );
        let mass_action = RateExpr::bin(
            RateOp::Mul,
            RateExpr::Param("k1".into()),
            RateExpr::Conc(y.clone()),
        );
        Model {
            rules: vec![
                Rule {
                    lhs: vec![(x.clone(), 1)],
                    rhs: vec![(y.clone(), 1)],
                    rate: Some(saturating),
                },
                Rule {
                    lhs: vec![(y.clone(), 1)],
                    rhs: vec![(x.clone(), 1)],
                    rate: Some(mass_action),
                },
            ],
            init: vec![(x, 2), (y, 1), (z, 1)],
            params: BTreeMap::from([("k1".to_string(), 0.05)]),
        }
    }

    #[test]
    fn test_compute_bound() {
        let vm = VectorModel::from_model(&xyz_model(), None).unwrap();
        assert_eq!(vm.bound(), 2);
    }

    #[test]
    fn test_generate_initial_state_is_index_zero() {
        let vm = VectorModel::from_model(&xyz_model(), Some(2)).unwrap();
        let ts = vm
            .generate_transition_system(None, f64::INFINITY, usize::MAX)
            .unwrap();
        assert_eq!(vm.bound(), 2);
        assert_eq!(ts.index_of(&State::new(vec![2, 1, 1])), Some(0));
        assert!(ts.is_complete());
        // every state has outgoing mass
        for state in 0..ts.len() {
            assert!(
                ts.edges.iter().any(|e| e.source == state),
                "state {} has no outgoing edge",
                state
            );
        }
    }

    #[test]
    fn test_rates_not_specified_aborts_before_exploration() {
        let mut model = xyz_model();
        model.rules[1].rate = None;
        let vm = VectorModel::from_model(&model, None).unwrap();
        let err = vm
            .generate_transition_system(None, f64::INFINITY, usize::MAX)
            .unwrap_err();
        match err {
            BcsError::RatesNotSpecified { rule } => {
                assert_eq!(rule, "Y()::rep => X()::rep");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Production-only rule with a small bound: every path exceeding the
    /// bound converges into one absorbing sentinel.
    #[test]
    fn test_divergence_collapses_to_single_sentinel() {
        let x = complex("X");
        let model = Model {
            rules: vec![Rule {
                lhs: vec![],
                rhs: vec![(x.clone(), 1)],
                rate: Some(RateExpr::Value(1.0)),
            }],
            init: vec![(x, 1)],
            params: BTreeMap::new(),
        };
        let vm = VectorModel::from_model(&model, Some(2)).unwrap();
        let ts = vm
            .generate_transition_system(None, f64::INFINITY, usize::MAX)
            .unwrap();

        // (1) -> (2) -> sentinel
        assert_eq!(ts.len(), 3);
        let sentinel = ts.index_of(&State::Unbounded).expect("sentinel reachable");
        let loops: Vec<&Edge> = ts.edges.iter().filter(|e| e.source == sentinel).collect();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].target, sentinel);
        assert_eq!(loops[0].weight, Weight::Value(1.0));
    }

    #[test]
    fn test_deadlock_gets_self_loop() {
        let x = complex("X");
        let y = complex("Y");
        let model = Model {
            rules: vec![Rule {
                lhs: vec![(x.clone(), 1)],
                rhs: vec![(y.clone(), 1)],
                rate: Some(RateExpr::Value(1.0)),
            }],
            init: vec![(x, 1), (y, 0)],
            params: BTreeMap::new(),
        };
        let vm = VectorModel::from_model(&model, None).unwrap();
        let ts = vm
            .generate_transition_system(None, f64::INFINITY, usize::MAX)
            .unwrap();

        // (1,0) -> (0,1), then deadlock
        assert_eq!(ts.len(), 2);
        let dead = ts.index_of(&State::new(vec![0, 1])).unwrap();
        let loops: Vec<&Edge> = ts.edges.iter().filter(|e| e.source == dead).collect();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].target, dead);
        assert_eq!(loops[0].weight, Weight::Value(1.0));
    }

    #[test]
    fn test_zero_rate_reaction_is_disabled() {
        let x = complex("X");
        let y = complex("Y");
        let model = Model {
            rules: vec![
                Rule {
                    lhs: vec![(x.clone(), 1)],
                    rhs: vec![(y.clone(), 1)],
                    rate: Some(RateExpr::Value(0.0)),
                },
                Rule {
                    lhs: vec![(x.clone(), 1)],
                    rhs: vec![],
                    rate: Some(RateExpr::Value(1.0)),
                },
            ],
            init: vec![(x, 1), (y, 0)],
            params: BTreeMap::new(),
        };
        let vm = VectorModel::from_model(&model, None).unwrap();
        let ts = vm
            .generate_transition_system(None, f64::INFINITY, usize::MAX)
            .unwrap();
        // only the degradation edge exists from the initial state
        let from_init: Vec<&Edge> = ts.edges.iter().filter(|e| e.source == 0).collect();
        assert_eq!(from_init.len(), 1);
        assert_eq!(from_init[0].target, ts.index_of(&State::new(vec![0, 0])).unwrap());
    }

    #[test]
    fn test_warm_start_resumes_and_is_idempotent() {
        let vm = VectorModel::from_model(&xyz_model(), Some(2)).unwrap();
        let full = vm
            .generate_transition_system(None, f64::INFINITY, usize::MAX)
            .unwrap();

        // truncated run keeps a frontier
        let truncated = vm
            .generate_transition_system(None, f64::INFINITY, 2)
            .unwrap();
        assert!(!truncated.is_complete());
        assert!(truncated.len() >= 2);

        // identical limits reproduce the identical truncated system
        let again = vm
            .generate_transition_system(Some(truncated.clone()), f64::INFINITY, 2)
            .unwrap();
        assert_eq!(again, truncated);

        // lifting the limit completes to the same system as a cold run
        let resumed = vm
            .generate_transition_system(Some(truncated), f64::INFINITY, usize::MAX)
            .unwrap();
        assert_eq!(resumed, full);

        // re-running a complete system is a no-op
        let re_run = vm
            .generate_transition_system(Some(full.clone()), f64::INFINITY, usize::MAX)
            .unwrap();
        assert_eq!(re_run, full);
    }

    #[test]
    fn test_outgoing_probabilities_sum_to_one() {
        let vm = VectorModel::from_model(&xyz_model(), Some(2)).unwrap();
        let ts = vm
            .generate_transition_system(None, f64::INFINITY, usize::MAX)
            .unwrap();
        for outgoing in ts.outgoing_rows(ModelKind::Dtmc) {
            let total: f64 = outgoing
                .iter()
                .map(|(_, w)| match w {
                    Weight::Value(v) => *v,
                    Weight::Expr(_) => panic!("numeric model produced symbolic weight"),
                })
                .sum();
            assert!((total - 1.0).abs() < 1e-12, "mass {} != 1", total);
        }
        for outgoing in ts.outgoing_rows(ModelKind::Ctmc) {
            for (_, w) in outgoing {
                match w {
                    Weight::Value(v) => assert!(v >= 0.0),
                    Weight::Expr(_) => panic!("numeric model produced symbolic weight"),
                }
            }
        }
    }

    // =========================================================================
    // DIE MODEL FIXTURES (Knuth-Yao die, two-outcome branching)
    // =========================================================================

    fn die_states() -> Vec<State> {
        [
            (0, 0),
            (1, 0),
            (2, 0),
            (3, 0),
            (4, 0),
            (5, 0),
            (6, 0),
            (7, 1),
            (7, 2),
            (7, 3),
            (7, 4),
            (7, 5),
            (7, 6),
        ]
        .iter()
        .map(|&(s, d)| State::new(vec![s, d]))
        .collect()
    }

    fn die_edges(half: Weight, other_half: Weight) -> Vec<Edge> {
        let mut edges = vec![
            Edge::new(0, 1, half.clone()),
            Edge::new(0, 2, other_half.clone()),
            Edge::new(1, 3, half.clone()),
            Edge::new(1, 4, other_half.clone()),
            Edge::new(2, 5, half.clone()),
            Edge::new(2, 6, other_half.clone()),
            Edge::new(3, 1, half.clone()),
            Edge::new(3, 7, other_half.clone()),
            Edge::new(4, 8, half.clone()),
            Edge::new(4, 9, other_half.clone()),
            Edge::new(5, 10, half.clone()),
            Edge::new(5, 11, other_half.clone()),
            Edge::new(6, 2, half),
            Edge::new(6, 12, other_half),
        ];
        for s in 7..=12 {
            edges.push(Edge::new(s, s, Weight::Value(1.0)));
        }
        edges
    }

    fn die_ts(half: Weight, other_half: Weight) -> TransitionSystem {
        let ordering = ComplexOrdering::new([complex("D"), complex("S")]).unwrap();
        let mut ts = TransitionSystem::new(ordering);
        for state in die_states() {
            ts.insert(state);
        }
        ts.edges = die_edges(half, other_half);
        ts
    }

    fn die_labels() -> BTreeMap<usize, BTreeSet<String>> {
        let mut labels = BTreeMap::new();
        labels.insert(0, BTreeSet::from(["init".to_string()]));
        labels.insert(
            7,
            BTreeSet::from(["one".to_string(), "done".to_string()]),
        );
        for s in 8..=12 {
            labels.insert(s, BTreeSet::from(["done".to_string()]));
        }
        labels
    }

    #[test]
    fn test_die_explicit_export_matches_reference() {
        let ts = die_ts(Weight::Value(0.5), Weight::Value(0.5));
        let (tra, lab) = ts
            .export_explicit(
                &die_labels(),
                &["one".to_string(), "done".to_string()],
                ModelKind::Dtmc,
            )
            .unwrap();

        let expected_tra = "\
13 20
0 1 0.5
0 2 0.5
1 3 0.5
1 4 0.5
2 5 0.5
2 6 0.5
3 1 0.5
3 7 0.5
4 8 0.5
4 9 0.5
5 10 0.5
5 11 0.5
6 2 0.5
6 12 0.5
7 7 1
8 8 1
9 9 1
10 10 1
11 11 1
12 12 1
";
        assert_eq!(tra, expected_tra);

        let expected_lab = "\
#DECLARATION
init one done
#END
0 init
7 one done
8 done
9 done
10 done
11 done
12 done
";
        assert_eq!(lab, expected_lab);
    }

    #[test]
    fn test_explicit_round_trip() {
        let ts = die_ts(Weight::Value(0.5), Weight::Value(0.5));
        let (tra, _) = ts
            .export_explicit(&die_labels(), &["one".into(), "done".into()], ModelKind::Dtmc)
            .unwrap();

        let mut lines = tra.lines();
        let header: Vec<usize> = lines
            .next()
            .unwrap()
            .split_whitespace()
            .map(|t| t.parse().unwrap())
            .collect();
        assert_eq!(header, vec![13, 20]);

        let mut parsed = Vec::new();
        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            parsed.push(Edge::new(
                fields[0].parse().unwrap(),
                fields[1].parse().unwrap(),
                Weight::Value(fields[2].parse().unwrap()),
            ));
        }
        assert_eq!(parsed.len(), 20);
        assert_eq!(parsed, ts.outgoing_rows(ModelKind::Dtmc)
            .iter()
            .enumerate()
            .flat_map(|(s, row)| row.iter().map(move |(t, w)| Edge::new(s, *t, w.clone())))
            .collect::<Vec<_>>());
    }

    #[test]
    fn test_label_validation() {
        let ts = die_ts(Weight::Value(0.5), Weight::Value(0.5));
        let mut labels = die_labels();
        labels.insert(99, BTreeSet::from(["done".to_string()]));
        assert!(matches!(
            ts.export_explicit(&labels, &["one".into(), "done".into()], ModelKind::Dtmc),
            Err(BcsError::LabelOutOfRange { state: 99, count: 13 })
        ));

        let mut labels = die_labels();
        labels.insert(3, BTreeSet::from(["mystery".to_string()]));
        assert!(matches!(
            ts.export_explicit(&labels, &["one".into(), "done".into()], ModelKind::Dtmc),
            Err(BcsError::UndeclaredLabel { .. })
        ));
    }

    #[test]
    fn test_die_prism_export() {
        let ts = die_ts(Weight::Value(0.5), Weight::Value(0.5));
        let text = ts.export_prism(ModelKind::Dtmc, 6, &BTreeSet::new(), &[]);
        assert!(text.starts_with("dtmc\n\nmodule TS\n"));
        assert!(text.contains("state : [0..12] init 0;"));
        assert!(text.contains("[] state=0 -> 0.5: (state'=1) + 0.5: (state'=2);"));
        assert!(text.contains("[] state=7 -> 1: (state'=7);"));
        assert!(text.trim_end().ends_with("endmodule"));
    }

    #[test]
    fn test_die_prism_parametric_export() {
        let ts = die_ts(
            Weight::Expr("p".to_string()),
            Weight::Expr("(1-p)".to_string()),
        );
        let free = BTreeSet::from(["p".to_string()]);
        let text = ts.export_prism(ModelKind::Dtmc, 6, &free, &[]);
        assert!(text.contains("const double p;"));
        assert!(text.contains("[] state=0 -> p: (state'=1) + (1-p): (state'=2);"));
        assert!(text.contains("[] state=12 -> 1: (state'=12);"));
    }

    #[test]
    fn test_prism_extra_clauses_appended() {
        let ts = die_ts(Weight::Value(0.5), Weight::Value(0.5));
        let text = ts.export_prism(
            ModelKind::Dtmc,
            6,
            &BTreeSet::new(),
            &["label \"done\" = state>6;".to_string()],
        );
        assert!(text.ends_with("label \"done\" = state>6;\n"));
    }

    #[test]
    fn test_parallel_edges_summed_on_export_only() {
        let ordering = ComplexOrdering::new([complex("X")]).unwrap();
        let mut ts = TransitionSystem::new(ordering);
        ts.insert(State::new(vec![1]));
        ts.insert(State::new(vec![0]));
        ts.add_edge(0, 1, Weight::Value(2.0));
        ts.add_edge(0, 1, Weight::Value(3.0));
        ts.add_edge(1, 1, Weight::Value(1.0));

        // raw edges stay distinct in memory
        assert_eq!(ts.edges.len(), 3);

        let rows = ts.outgoing_rows(ModelKind::Ctmc);
        assert_eq!(rows[0], vec![(1, Weight::Value(5.0))]);
        let rows = ts.outgoing_rows(ModelKind::Dtmc);
        assert_eq!(rows[0], vec![(1, Weight::Value(1.0))]);
    }

    #[test]
    fn test_json_round_trip() {
        let vm = VectorModel::from_model(&xyz_model(), Some(2)).unwrap();
        let ts = vm
            .generate_transition_system(None, f64::INFINITY, 3)
            .unwrap();

        let dir = std::env::temp_dir().join("bcsgen-ts-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ts.json");
        ts.save_to_json(&path).unwrap();
        let loaded = TransitionSystem::load_from_json(&path).unwrap();
        assert_eq!(loaded, ts);

        // the reloaded system resumes exactly like the in-memory one
        let resumed = vm
            .generate_transition_system(Some(loaded), f64::INFINITY, usize::MAX)
            .unwrap();
        let full = vm
            .generate_transition_system(None, f64::INFINITY, usize::MAX)
            .unwrap();
        assert_eq!(resumed, full);
    }

    #[test]
    fn test_parametric_generation_emits_symbolic_weights() {
        let x = complex("X");
        let y = complex("Y");
        let model = Model {
            rules: vec![
                Rule {
                    lhs: vec![(x.clone(), 1)],
                    rhs: vec![(y.clone(), 1)],
                    rate: Some(RateExpr::Param("p".into())),
                },
            ],
            init: vec![(x, 1), (y, 0)],
            params: BTreeMap::new(),
        };
        let vm = VectorModel::from_model(&model, None).unwrap();
        assert_eq!(vm.free_parameters(), BTreeSet::from(["p".to_string()]));
        let ts = vm
            .generate_transition_system(None, f64::INFINITY, usize::MAX)
            .unwrap();
        assert!(ts
            .edges
            .iter()
            .any(|e| e.weight == Weight::Expr("p".to_string())));
    }
}
