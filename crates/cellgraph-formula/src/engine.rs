use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use cellgraph_core::{
    parse_literal, CellPosition, CellRange, CellStore, EvalResult, FormulaError,
};

use crate::config::{EngineConfig, RecalcMode};
use crate::dependency::{CircularReference, DependencyGraph};
use crate::error::EngineError;
use crate::evaluator::{CellResolver, EvalGuard, Evaluator};
use crate::parser::ParsedFormula;

/// Recalculation state of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CellState {
    #[default]
    Clean,
    /// Scheduled for evaluation in the running cascade
    Dirty,
    Evaluating,
    /// Holds an error value
    Errored,
}

/// Cells touched by one cascade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalcReport {
    /// Formula cells evaluated, in evaluation order
    pub evaluated: Vec<CellPosition>,
    /// Cells assigned `#CIRCULAR!` without evaluation
    pub circular: Vec<CellPosition>,
    /// Evaluated cells whose result is an error
    pub errored: Vec<CellPosition>,
}

impl RecalcReport {
    /// Every cell whose stored value may have changed, sorted
    pub fn changed(&self) -> Vec<CellPosition> {
        let cells: BTreeSet<CellPosition> = self
            .evaluated
            .iter()
            .chain(&self.circular)
            .copied()
            .collect();
        cells.into_iter().collect()
    }
}

/// Recalculation orchestrator owning a cell store and its dependency graph
///
/// Every edit goes through [`Engine::on_cell_edited`], which updates the
/// graph, assigns `#CIRCULAR!` to cells on a cycle, and re-evaluates the
/// affected formula cells in topological order before returning.
pub struct Engine<S: CellStore> {
    store: S,
    graph: DependencyGraph,
    formulas: HashMap<CellPosition, Result<ParsedFormula, FormulaError>>,
    states: HashMap<CellPosition, CellState>,
    config: EngineConfig,
}

impl<S: CellStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Build an engine configured from `CELLGRAPH_*` environment variables
    pub fn from_env(store: S) -> Result<Self, EngineError> {
        let config = EngineConfig::from_env()?;
        Ok(Self::with_config(store, config))
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        let graph = DependencyGraph::new(store.row_count(), store.column_count());
        Engine {
            store,
            graph,
            formulas: HashMap::new(),
            states: HashMap::new(),
            config,
        }
    }

    /// Apply a raw edit and run the recalculation cascade to completion
    ///
    /// Input starting with `=` is a formula; anything else is a literal.
    pub fn on_cell_edited(
        &mut self,
        position: CellPosition,
        raw_value: &str,
    ) -> Result<RecalcReport, EngineError> {
        let previously_circular: Vec<CellPosition> = self
            .graph
            .nodes()
            .filter(|node| node.is_circular())
            .map(|node| node.position())
            .collect();

        if raw_value.starts_with('=') {
            let parsed = self.graph.upsert_formula_cell(position, raw_value)?;
            self.formulas.insert(position, parsed);
            self.store.set_raw_value(position, raw_value);
        } else {
            self.graph.upsert_value_cell(position)?;
            self.formulas.remove(&position);
            self.states.remove(&position);
            self.store.set_raw_value(position, raw_value);
            self.store
                .set_computed_value(position, Ok(parse_literal(raw_value)));
        }

        if cfg!(debug_assertions) {
            self.graph.verify()?;
        }

        let targets = match self.config.recalc_mode {
            RecalcMode::Affected => {
                let mut targets = self.graph.affected_by(position);
                targets.extend(previously_circular);
                targets
            }
            RecalcMode::Full => self.formulas.keys().copied().collect(),
        };

        Ok(self.cascade(position.to_a1(), targets))
    }

    /// Rebuild the graph from every raw value in the store and recalculate
    ///
    /// Use after the store was populated outside the engine.
    pub fn rebuild_from_store(&mut self) -> Result<RecalcReport, EngineError> {
        self.graph.clear();
        self.formulas.clear();
        self.states.clear();

        for position in self.store.positions() {
            let raw = self.store.raw_value(position);
            if raw.starts_with('=') {
                let parsed = self.graph.attach_formula(position, &raw)?;
                self.formulas.insert(position, parsed);
            } else {
                self.graph.attach_value(position)?;
                self.store.set_computed_value(position, Ok(parse_literal(&raw)));
            }
        }
        self.graph.rebuild();
        self.graph.verify()?;

        Ok(self.recalculate_all())
    }

    /// Re-evaluate every formula cell
    pub fn recalculate_all(&mut self) -> RecalcReport {
        let targets = self.formulas.keys().copied().collect();
        self.cascade("all".to_string(), targets)
    }

    fn cascade(&mut self, origin: String, targets: BTreeSet<CellPosition>) -> RecalcReport {
        let mut report = RecalcReport::default();

        // Cells on a cycle get an error directly and are never evaluated
        for reference in self.graph.circular_references() {
            let error = FormulaError::circular(format!(
                "circular reference: {}",
                reference.describe()
            ));
            for &position in &reference.cycle {
                if report.circular.contains(&position) {
                    continue;
                }
                self.store.set_computed_value(position, Err(error.clone()));
                self.states.insert(position, CellState::Errored);
                report.circular.push(position);
            }
        }

        let scheduled: Vec<CellPosition> = self
            .graph
            .calculation_order()
            .iter()
            .chain(self.graph.stranded_cells().iter())
            .copied()
            .filter(|position| targets.contains(position) && self.formulas.contains_key(position))
            .collect();

        debug!(
            origin = %origin,
            scheduled = scheduled.len(),
            circular = report.circular.len(),
            "recalculation started"
        );

        for &position in &scheduled {
            self.states.insert(position, CellState::Dirty);
        }

        let mut cascade = Cascade {
            store: &mut self.store,
            formulas: &self.formulas,
            states: &mut self.states,
            evaluated: &mut report.evaluated,
        };
        let mut guard = EvalGuard::new(self.config.max_calculation_depth);

        for &position in &scheduled {
            if cascade.states.get(&position) == Some(&CellState::Dirty) {
                cascade.evaluate(position, &mut guard);
            }
        }

        report.errored = report
            .evaluated
            .iter()
            .copied()
            .filter(|position| self.states.get(position) == Some(&CellState::Errored))
            .collect();

        debug!(
            origin = %origin,
            evaluated = report.evaluated.len(),
            errored = report.errored.len(),
            "recalculation finished"
        );

        report
    }

    /// Cells reading `position` directly or through a range
    pub fn dependents(&self, position: CellPosition) -> Vec<CellPosition> {
        self.graph.dependents(position)
    }

    /// Single cells read by the formula at `position`
    pub fn dependencies(&self, position: CellPosition) -> Vec<CellPosition> {
        self.graph.dependencies(position)
    }

    /// Ranges read by the formula at `position`
    pub fn range_dependencies(&self, position: CellPosition) -> Vec<CellRange> {
        self.graph.range_dependencies(position)
    }

    pub fn circular_references(&self) -> &[CircularReference] {
        self.graph.circular_references()
    }

    pub fn calculation_order(&self) -> &[CellPosition] {
        self.graph.calculation_order()
    }

    pub fn cell_state(&self, position: CellPosition) -> CellState {
        self.states.get(&position).copied().unwrap_or_default()
    }

    /// Stored value or error of a cell
    pub fn value(&self, position: CellPosition) -> EvalResult {
        self.store.cached_value(position)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Resolver used during a cascade
///
/// Dirty cells are evaluated on demand when read, so a reader never sees a
/// stale value even outside topological order.
struct Cascade<'e, S: CellStore> {
    store: &'e mut S,
    formulas: &'e HashMap<CellPosition, Result<ParsedFormula, FormulaError>>,
    states: &'e mut HashMap<CellPosition, CellState>,
    evaluated: &'e mut Vec<CellPosition>,
}

impl<S: CellStore> Cascade<'_, S> {
    fn evaluate(&mut self, position: CellPosition, guard: &mut EvalGuard) -> EvalResult {
        // Re-entry or depth overflow is reported to the reader; the cell
        // itself is left for its own frame or a later pass.
        guard.enter(position)?;
        self.states.insert(position, CellState::Evaluating);

        let formulas = self.formulas;
        let result = match formulas.get(&position) {
            Some(Ok(parsed)) => Evaluator::new(self, guard).evaluate(parsed),
            Some(Err(error)) => Err(error.clone()),
            None => self.store.cached_value(position),
        };
        guard.exit(position);

        trace!(cell = %position, result = ?result, "cell evaluated");

        let state = if result.is_ok() {
            CellState::Clean
        } else {
            CellState::Errored
        };
        self.states.insert(position, state);
        self.store.set_computed_value(position, result.clone());
        self.evaluated.push(position);
        result
    }
}

impl<S: CellStore> CellResolver for Cascade<'_, S> {
    fn resolve(&mut self, position: CellPosition, guard: &mut EvalGuard) -> EvalResult {
        match self.states.get(&position) {
            Some(CellState::Dirty) => self.evaluate(position, guard),
            Some(CellState::Evaluating) => Err(FormulaError::circular(format!(
                "{} is read while it is being evaluated",
                position
            ))),
            _ => self.store.cached_value(position),
        }
    }

    fn row_count(&self) -> u32 {
        self.store.row_count()
    }

    fn column_count(&self) -> u32 {
        self.store.column_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgraph_core::{CellValue, ErrorKind, Sheet};
    use pretty_assertions::assert_eq;

    fn pos(a1: &str) -> CellPosition {
        CellPosition::from_a1(a1).unwrap()
    }

    fn engine() -> Engine<Sheet> {
        Engine::new(Sheet::new(100, 26))
    }

    fn edit(engine: &mut Engine<Sheet>, a1: &str, raw: &str) -> RecalcReport {
        engine.on_cell_edited(pos(a1), raw).unwrap()
    }

    fn kind(engine: &Engine<Sheet>, a1: &str) -> ErrorKind {
        engine.value(pos(a1)).unwrap_err().kind
    }

    #[test]
    fn test_literal_edit() {
        let mut engine = engine();
        let report = edit(&mut engine, "A1", "42");

        assert_eq!(engine.value(pos("A1")), Ok(CellValue::Number(42.0)));
        assert_eq!(engine.store().raw_value(pos("A1")), "42");
        assert!(report.evaluated.is_empty());
        assert_eq!(engine.cell_state(pos("A1")), CellState::Clean);
    }

    #[test]
    fn test_formula_cascade_order() {
        let mut engine = engine();
        edit(&mut engine, "A1", "1");
        edit(&mut engine, "B1", "=A1*2");
        edit(&mut engine, "C1", "=B1+A1");
        edit(&mut engine, "D1", "=C1&\"!\"");

        let report = edit(&mut engine, "A1", "5");
        assert_eq!(report.evaluated, vec![pos("B1"), pos("C1"), pos("D1")]);
        assert_eq!(engine.value(pos("C1")), Ok(CellValue::Number(15.0)));
        assert_eq!(engine.value(pos("D1")), Ok(CellValue::Text("15!".to_string())));
    }

    #[test]
    fn test_affected_mode_skips_unrelated_cells() {
        let mut engine = engine();
        edit(&mut engine, "A1", "1");
        edit(&mut engine, "B1", "=A1+1");
        edit(&mut engine, "X1", "=10");

        let report = edit(&mut engine, "A1", "2");
        assert_eq!(report.evaluated, vec![pos("B1")]);
    }

    #[test]
    fn test_full_mode_recomputes_every_formula() {
        let config = EngineConfig {
            recalc_mode: RecalcMode::Full,
            ..EngineConfig::default()
        };
        let mut engine = Engine::with_config(Sheet::new(100, 26), config);
        edit(&mut engine, "A1", "1");
        edit(&mut engine, "B1", "=A1+1");
        edit(&mut engine, "X1", "=10");

        let report = edit(&mut engine, "A1", "2");
        assert_eq!(report.evaluated, vec![pos("B1"), pos("X1")]);
    }

    #[test]
    fn test_circular_cells_are_errored() {
        let mut engine = engine();
        edit(&mut engine, "C1", "=C2+10");
        edit(&mut engine, "C2", "=C3+5");
        let report = edit(&mut engine, "C3", "=C1+1");

        assert_eq!(report.circular, vec![pos("C1"), pos("C2"), pos("C3")]);
        for cell in ["C1", "C2", "C3"] {
            assert_eq!(kind(&engine, cell), ErrorKind::Circular);
            assert_eq!(engine.cell_state(pos(cell)), CellState::Errored);
        }
    }

    #[test]
    fn test_cells_downstream_of_a_cycle_receive_the_error() {
        let mut engine = engine();
        edit(&mut engine, "B1", "=B1+1");
        let report = edit(&mut engine, "D1", "=B1*2");

        assert_eq!(report.evaluated, vec![pos("D1")]);
        assert_eq!(report.errored, vec![pos("D1")]);
        assert_eq!(kind(&engine, "D1"), ErrorKind::Circular);
    }

    #[test]
    fn test_breaking_a_cycle_recomputes_former_members() {
        let mut engine = engine();
        edit(&mut engine, "A1", "=B1");
        edit(&mut engine, "B1", "=A1");
        assert_eq!(kind(&engine, "A1"), ErrorKind::Circular);

        edit(&mut engine, "B1", "7");
        assert_eq!(engine.value(pos("A1")), Ok(CellValue::Number(7.0)));
        assert!(engine.circular_references().is_empty());
        assert_eq!(engine.cell_state(pos("A1")), CellState::Clean);
    }

    #[test]
    fn test_syntax_error_is_stored() {
        let mut engine = engine();
        let report = edit(&mut engine, "A1", "=1+");
        assert_eq!(report.errored, vec![pos("A1")]);
        assert_eq!(kind(&engine, "A1"), ErrorKind::Syntax);

        edit(&mut engine, "B1", "=A1*2");
        assert_eq!(kind(&engine, "B1"), ErrorKind::Syntax);
    }

    #[test]
    fn test_out_of_bounds_edit_is_a_hard_error() {
        let mut engine = engine();
        let err = engine
            .on_cell_edited(CellPosition::new(100, 0), "1")
            .unwrap_err();
        assert!(matches!(err, EngineError::OutOfBounds { .. }));
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_out_of_bounds_reference_is_ref() {
        let mut engine = engine();
        edit(&mut engine, "A1", "=AA1+1");
        assert_eq!(kind(&engine, "A1"), ErrorKind::Ref);
    }

    #[test]
    fn test_clearing_a_formula_keeps_dependents_linked() {
        let mut engine = engine();
        edit(&mut engine, "A1", "=2+3");
        edit(&mut engine, "B1", "=A1*10");
        assert_eq!(engine.value(pos("B1")), Ok(CellValue::Number(50.0)));

        edit(&mut engine, "A1", "");
        assert_eq!(engine.value(pos("B1")), Ok(CellValue::Number(0.0)));
        assert_eq!(engine.dependents(pos("A1")), vec![pos("B1")]);
        assert!(engine.dependencies(pos("A1")).is_empty());
    }

    #[test]
    fn test_range_edit_triggers_aggregate() {
        let mut engine = engine();
        edit(&mut engine, "E4", "=SUM(E1:E3)");
        edit(&mut engine, "E2", "5");
        assert_eq!(engine.value(pos("E4")), Ok(CellValue::Number(5.0)));
        assert_eq!(
            engine.range_dependencies(pos("E4")),
            vec![CellRange::from_a1("E1:E3").unwrap()]
        );
        assert_eq!(engine.dependents(pos("E1")), vec![pos("E4")]);
    }

    #[test]
    fn test_chain_off_a_cycle_evaluates_in_dependency_order() {
        let config = EngineConfig {
            max_calculation_depth: 3,
            ..EngineConfig::default()
        };
        let mut engine = Engine::with_config(Sheet::new(100, 26), config);
        edit(&mut engine, "A1", "=A2");
        edit(&mut engine, "A2", "=A3");
        edit(&mut engine, "A3", "=A4");
        edit(&mut engine, "A4", "=A5");
        edit(&mut engine, "A5", "=Z1");
        let report = edit(&mut engine, "Z1", "=Z1");

        assert_eq!(report.circular, vec![pos("Z1")]);
        assert_eq!(
            report.evaluated,
            vec![pos("A5"), pos("A4"), pos("A3"), pos("A2"), pos("A1")]
        );
        for cell in ["A1", "A2", "A3", "A4", "A5"] {
            assert_eq!(kind(&engine, cell), ErrorKind::Circular, "{}", cell);
        }
    }

    #[test]
    fn test_long_chain_off_a_cycle_is_circular() {
        let mut engine = Engine::new(Sheet::new(200, 26));
        edit(&mut engine, "B1", "=B1");
        for row in 1..150 {
            edit(&mut engine, &format!("A{}", row), &format!("=A{}", row + 1));
        }
        edit(&mut engine, "A150", "=B1");

        let report = engine.recalculate_all();

        assert_eq!(report.evaluated.len(), 150);
        assert_eq!(report.evaluated.first(), Some(&pos("A150")));
        for row in 1..=150 {
            assert_eq!(kind(&engine, &format!("A{}", row)), ErrorKind::Circular, "A{}", row);
        }
    }

    #[test]
    fn test_depth_limit_reaches_the_reader() {
        let config = EngineConfig {
            max_calculation_depth: 1,
            ..EngineConfig::default()
        };
        let mut engine = Engine::with_config(Sheet::new(100, 26), config);
        edit(&mut engine, "A1", "=1");
        edit(&mut engine, "A2", "=A1+1");
        engine.states.insert(pos("A1"), CellState::Dirty);
        engine.states.insert(pos("A2"), CellState::Dirty);

        let mut guard = EvalGuard::new(1);
        let mut evaluated = Vec::new();
        let mut cascade = Cascade {
            store: &mut engine.store,
            formulas: &engine.formulas,
            states: &mut engine.states,
            evaluated: &mut evaluated,
        };
        let value = cascade.resolve(pos("A2"), &mut guard);

        assert_eq!(value.unwrap_err().kind, ErrorKind::DepthExceeded);
        assert_eq!(engine.cell_state(pos("A1")), CellState::Dirty);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("CELLGRAPH_MAX_DEPTH", "0");
        let err = Engine::from_env(Sheet::new(10, 10)).err();
        assert!(matches!(err, Some(EngineError::Config(_))));

        std::env::set_var("CELLGRAPH_MAX_DEPTH", "7");
        let engine = Engine::from_env(Sheet::new(10, 10)).unwrap();
        assert_eq!(engine.config().max_calculation_depth, 7);
        std::env::remove_var("CELLGRAPH_MAX_DEPTH");
    }

    #[test]
    fn test_rebuild_from_store() {
        let mut sheet = Sheet::new(100, 26);
        sheet.set_raw_value(pos("A1"), "10");
        sheet.set_raw_value(pos("A2"), "20");
        sheet.set_raw_value(pos("A3"), "=A1+A2");
        sheet.set_raw_value(pos("B1"), "=B1");

        let mut engine = Engine::new(sheet);
        let report = engine.rebuild_from_store().unwrap();

        assert_eq!(engine.value(pos("A3")), Ok(CellValue::Number(30.0)));
        assert_eq!(report.evaluated, vec![pos("A3")]);
        assert_eq!(report.circular, vec![pos("B1")]);
        assert_eq!(engine.calculation_order(), &[pos("A1"), pos("A2"), pos("A3")]);
    }

    #[test]
    fn test_report_changed() {
        let report = RecalcReport {
            evaluated: vec![pos("B2"), pos("A1")],
            circular: vec![pos("A1"), pos("C3")],
            errored: vec![],
        };
        assert_eq!(report.changed(), vec![pos("A1"), pos("B2"), pos("C3")]);
    }
}
