use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::mem;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cellgraph_core::{CellPosition, CellRange, FormulaError};

use crate::error::EngineError;
use crate::parser::{parse, ParsedFormula};

/// Index of a node in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One cell that holds a formula or is read by one
#[derive(Debug, Clone)]
pub struct DependencyNode {
    position: CellPosition,
    formula: Option<String>,
    /// Cells that read this one
    dependents: BTreeSet<NodeId>,
    /// Cells this one reads directly
    dependencies: BTreeSet<NodeId>,
    level: u32,
    is_circular: bool,
}

impl DependencyNode {
    fn new(position: CellPosition) -> Self {
        DependencyNode {
            position,
            formula: None,
            dependents: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            level: 0,
            is_circular: false,
        }
    }

    pub fn position(&self) -> CellPosition {
        self.position
    }

    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }

    /// Topological depth: 0 without dependencies, else 1 + deepest dependency
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_circular(&self) -> bool {
        self.is_circular
    }
}

/// A detected reference cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularReference {
    /// Cells on the cycle, starting at the cell where it was closed
    pub cycle: Vec<CellPosition>,
    /// Hint for UI messaging: two-cell cycles are usually a single bad edit
    pub can_resolve: bool,
}

impl CircularReference {
    fn new(cycle: Vec<CellPosition>) -> Self {
        let can_resolve = cycle.len() == 2;
        CircularReference { cycle, can_resolve }
    }

    /// Cycle in A1 notation, e.g. `C1 -> C2 -> C3 -> C1`
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self.cycle.iter().map(CellPosition::to_a1).collect();
        if let Some(first) = self.cycle.first() {
            parts.push(first.to_a1());
        }
        parts.join(" -> ")
    }
}

/// Range-typed edge: `from` reads every cell in `range`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeEdge {
    from: NodeId,
    range: CellRange,
}

/// Direct and range edges resolved to node lists, sorted by position
struct Adjacency {
    precedents: Vec<Vec<NodeId>>,
    dependents: Vec<Vec<NodeId>>,
}

/// Directed graph of cell dependencies
///
/// Nodes live in an arena and refer to each other by id. Single-cell
/// references are stored as mutual `dependents`/`dependencies` sets; range
/// references are kept as range-typed edges and resolved against existing
/// nodes when the graph is rebuilt, so wide ranges never expand into
/// per-cell edges.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    index: HashMap<CellPosition, NodeId>,
    range_edges: Vec<RangeEdge>,
    circular_references: Vec<CircularReference>,
    calculation_order: Vec<CellPosition>,
    rows: u32,
    columns: u32,
}

impl DependencyGraph {
    pub fn new(rows: u32, columns: u32) -> Self {
        DependencyGraph {
            nodes: Vec::new(),
            index: HashMap::new(),
            range_edges: Vec::new(),
            circular_references: Vec::new(),
            calculation_order: Vec::new(),
            rows,
            columns,
        }
    }

    fn check_bounds(&self, position: CellPosition) -> Result<(), EngineError> {
        if position.is_valid(self.rows, self.columns) {
            Ok(())
        } else {
            Err(EngineError::OutOfBounds {
                position,
                rows: self.rows,
                columns: self.columns,
            })
        }
    }

    fn node_id(&mut self, position: CellPosition) -> NodeId {
        if let Some(&id) = self.index.get(&position) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(DependencyNode::new(position));
        self.index.insert(position, id);
        id
    }

    fn position_of(&self, id: NodeId) -> CellPosition {
        self.nodes[id.index()].position
    }

    /// Drop every edge leaving `id`, keeping the cells that read it
    fn detach_outgoing(&mut self, id: NodeId) {
        let old = mem::take(&mut self.nodes[id.index()].dependencies);
        for dependency in old {
            self.nodes[dependency.index()].dependents.remove(&id);
        }
        self.range_edges.retain(|edge| edge.from != id);
    }

    /// Set the formula of a cell and rebuild cycles and ordering
    ///
    /// The outer error is a contract violation (position outside the grid).
    /// The inner result is the parse outcome: a formula that fails to parse
    /// stays in the graph as a formula cell with no edges.
    pub fn upsert_formula_cell(
        &mut self,
        position: CellPosition,
        formula: &str,
    ) -> Result<Result<ParsedFormula, FormulaError>, EngineError> {
        let parsed = self.attach_formula(position, formula)?;
        self.rebuild();
        Ok(parsed)
    }

    /// Make a cell a value leaf and rebuild cycles and ordering
    pub fn upsert_value_cell(&mut self, position: CellPosition) -> Result<(), EngineError> {
        self.attach_value(position)?;
        self.rebuild();
        Ok(())
    }

    /// Attach a formula without rebuilding; callers batch edits and rebuild once
    pub(crate) fn attach_formula(
        &mut self,
        position: CellPosition,
        formula: &str,
    ) -> Result<Result<ParsedFormula, FormulaError>, EngineError> {
        self.check_bounds(position)?;
        let id = self.node_id(position);
        self.detach_outgoing(id);
        self.nodes[id.index()].formula = Some(formula.to_string());

        let parsed = parse(formula);
        if let Ok(parsed) = &parsed {
            for &target in &parsed.dependencies {
                // Out-of-grid targets evaluate to #REF! and carry no edge
                if !target.is_valid(self.rows, self.columns) {
                    continue;
                }
                let target_id = self.node_id(target);
                self.nodes[id.index()].dependencies.insert(target_id);
                self.nodes[target_id.index()].dependents.insert(id);
            }
            for &range in &parsed.cell_ranges {
                self.range_edges.push(RangeEdge { from: id, range });
            }
        }

        Ok(parsed)
    }

    pub(crate) fn attach_value(&mut self, position: CellPosition) -> Result<(), EngineError> {
        self.check_bounds(position)?;
        let id = self.node_id(position);
        self.detach_outgoing(id);
        self.nodes[id.index()].formula = None;
        Ok(())
    }

    /// Detach a cell from every edge in both directions
    ///
    /// The node is kept as an empty leaf. Cells whose formulas still mention
    /// the position lose their edge to it until they are upserted again.
    pub fn remove_cell(&mut self, position: CellPosition) -> Result<(), EngineError> {
        self.check_bounds(position)?;
        let Some(&id) = self.index.get(&position) else {
            return Ok(());
        };

        self.detach_outgoing(id);
        let dependents = mem::take(&mut self.nodes[id.index()].dependents);
        for dependent in dependents {
            self.nodes[dependent.index()].dependencies.remove(&id);
        }

        let node = &mut self.nodes[id.index()];
        node.formula = None;
        node.is_circular = false;
        node.level = 0;

        self.rebuild();
        Ok(())
    }

    /// Nodes covered by a range; iterates whichever side is smaller
    fn nodes_in_range(&self, range: CellRange) -> Vec<NodeId> {
        if range.cell_count() <= self.nodes.len() as u64 {
            range
                .positions()
                .filter_map(|position| self.index.get(&position).copied())
                .collect()
        } else {
            self.nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| range.contains(node.position))
                .map(|(index, _)| NodeId(index as u32))
                .collect()
        }
    }

    fn adjacency(&self) -> Adjacency {
        let mut precedents: Vec<Vec<NodeId>> = self
            .nodes
            .iter()
            .map(|node| node.dependencies.iter().copied().collect())
            .collect();

        for edge in &self.range_edges {
            let covered = self.nodes_in_range(edge.range);
            precedents[edge.from.index()].extend(covered);
        }

        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (index, list) in precedents.iter_mut().enumerate() {
            list.sort_by_key(|id| self.position_of(*id));
            list.dedup();
            for precedent in list.iter() {
                dependents[precedent.index()].push(NodeId(index as u32));
            }
        }
        for list in &mut dependents {
            list.sort_by_key(|id| self.position_of(*id));
        }

        Adjacency {
            precedents,
            dependents,
        }
    }

    fn ids_by_position(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = (0..self.nodes.len() as u32).map(NodeId).collect();
        ids.sort_by_key(|id| self.position_of(*id));
        ids
    }

    /// Find reference cycles and flag every cell on one as circular
    pub fn detect_cycles(&mut self) -> Vec<CircularReference> {
        let adjacency = self.adjacency();
        self.detect_cycles_with(&adjacency);
        self.circular_references.clone()
    }

    /// Depth-first search from every unvisited node in position order
    ///
    /// A precedent found on the active path closes a cycle; the path slice
    /// from that precedent to the current node is reported.
    fn detect_cycles_with(&mut self, adjacency: &Adjacency) {
        let count = self.nodes.len();
        let mut visited = vec![false; count];
        let mut on_stack = vec![false; count];
        let mut cycles: Vec<Vec<NodeId>> = Vec::new();

        for root in self.ids_by_position() {
            if visited[root.index()] {
                continue;
            }

            // (node, index of the next precedent to explore)
            let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
            visited[root.index()] = true;
            on_stack[root.index()] = true;

            while let Some(frame) = stack.last_mut() {
                let id = frame.0;
                let Some(&next) = adjacency.precedents[id.index()].get(frame.1) else {
                    on_stack[id.index()] = false;
                    stack.pop();
                    continue;
                };
                frame.1 += 1;

                if on_stack[next.index()] {
                    let start = stack
                        .iter()
                        .position(|(node, _)| *node == next)
                        .unwrap_or(0);
                    cycles.push(stack[start..].iter().map(|(node, _)| *node).collect());
                } else if !visited[next.index()] {
                    visited[next.index()] = true;
                    on_stack[next.index()] = true;
                    stack.push((next, 0));
                }
            }
        }

        for node in &mut self.nodes {
            node.is_circular = false;
        }
        for cycle in &cycles {
            for id in cycle {
                self.nodes[id.index()].is_circular = true;
            }
        }

        self.circular_references = cycles
            .into_iter()
            .map(|cycle| {
                CircularReference::new(cycle.into_iter().map(|id| self.position_of(id)).collect())
            })
            .collect();

        for reference in &self.circular_references {
            warn!(cycle = %reference.describe(), "circular reference detected");
        }
    }

    /// Kahn ordering of all non-circular nodes
    ///
    /// Ready nodes are taken in ascending (row, column) order, so the result
    /// is reproducible. Circular nodes, and nodes that can only be reached
    /// through them, are left out.
    pub fn topological_order(&mut self) -> Vec<CellPosition> {
        let adjacency = self.adjacency();
        self.order_with(&adjacency);
        self.calculation_order.clone()
    }

    fn order_with(&mut self, adjacency: &Adjacency) -> Vec<NodeId> {
        let mut in_degree: Vec<usize> = adjacency.precedents.iter().map(Vec::len).collect();
        let mut ready = BinaryHeap::new();

        for (index, node) in self.nodes.iter().enumerate() {
            if in_degree[index] == 0 && !node.is_circular {
                ready.push(Reverse((node.position, NodeId(index as u32))));
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for &dependent in &adjacency.dependents[id.index()] {
                let node = &self.nodes[dependent.index()];
                if node.is_circular {
                    continue;
                }
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    ready.push(Reverse((node.position, dependent)));
                }
            }
        }

        self.calculation_order = order.iter().map(|id| self.position_of(*id)).collect();
        order
    }

    /// Recompute every node's level from the current calculation order
    pub fn assign_levels(&mut self) {
        let adjacency = self.adjacency();
        let order: Vec<NodeId> = self
            .calculation_order
            .iter()
            .filter_map(|position| self.index.get(position).copied())
            .collect();
        self.assign_levels_with(&adjacency, &order);
    }

    fn assign_levels_with(&mut self, adjacency: &Adjacency, order: &[NodeId]) {
        for node in &mut self.nodes {
            node.level = 0;
        }
        for &id in order {
            let level = adjacency.precedents[id.index()]
                .iter()
                .map(|precedent| self.nodes[precedent.index()].level + 1)
                .max()
                .unwrap_or(0);
            self.nodes[id.index()].level = level;
        }
    }

    /// Re-run cycle detection, ordering and levels for the whole graph
    pub fn rebuild(&mut self) {
        let adjacency = self.adjacency();
        self.detect_cycles_with(&adjacency);
        let order = self.order_with(&adjacency);
        self.assign_levels_with(&adjacency, &order);

        debug!(
            nodes = self.nodes.len(),
            ordered = order.len(),
            cycles = self.circular_references.len(),
            "dependency graph rebuilt"
        );
    }

    /// Topological order of non-circular cells from the last rebuild
    pub fn calculation_order(&self) -> &[CellPosition] {
        &self.calculation_order
    }

    pub fn circular_references(&self) -> &[CircularReference] {
        &self.circular_references
    }

    pub fn node(&self, position: CellPosition) -> Option<&DependencyNode> {
        self.index.get(&position).map(|id| &self.nodes[id.index()])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_circular(&self, position: CellPosition) -> bool {
        self.node(position).is_some_and(DependencyNode::is_circular)
    }

    /// Cells `position` reads through single-cell references, sorted
    pub fn dependencies(&self, position: CellPosition) -> Vec<CellPosition> {
        let Some(node) = self.node(position) else {
            return Vec::new();
        };
        let mut positions: Vec<CellPosition> = node
            .dependencies
            .iter()
            .map(|id| self.position_of(*id))
            .collect();
        positions.sort();
        positions
    }

    /// Ranges `position` reads, in formula order
    pub fn range_dependencies(&self, position: CellPosition) -> Vec<CellRange> {
        let Some(&id) = self.index.get(&position) else {
            return Vec::new();
        };
        self.range_edges
            .iter()
            .filter(|edge| edge.from == id)
            .map(|edge| edge.range)
            .collect()
    }

    /// Cells reading `position` directly or through a range, sorted
    pub fn dependents(&self, position: CellPosition) -> Vec<CellPosition> {
        let mut positions = BTreeSet::new();

        if let Some(node) = self.node(position) {
            positions.extend(node.dependents.iter().map(|id| self.position_of(*id)));
        }
        for edge in &self.range_edges {
            if edge.range.contains(position) {
                positions.insert(self.position_of(edge.from));
            }
        }

        positions.into_iter().collect()
    }

    /// `position` and every cell reachable forward from it, sorted
    pub fn affected_by(&self, position: CellPosition) -> BTreeSet<CellPosition> {
        let mut affected = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(position);

        while let Some(current) = queue.pop_front() {
            if !affected.insert(current) {
                continue;
            }
            queue.extend(self.dependents(current));
        }

        affected
    }

    /// Formula cells that are neither ordered nor on a cycle
    ///
    /// These read a circular cell through some path. They are returned in
    /// dependency order, with circular and ordered cells counted as already
    /// resolved, so each one finds its inputs settled when evaluated.
    pub fn stranded_cells(&self) -> Vec<CellPosition> {
        let ordered: BTreeSet<&CellPosition> = self.calculation_order.iter().collect();
        let is_stranded: Vec<bool> = self
            .nodes
            .iter()
            .map(|node| !node.is_circular && !ordered.contains(&node.position))
            .collect();
        let adjacency = self.adjacency();

        let mut in_degree: Vec<usize> = adjacency
            .precedents
            .iter()
            .map(|list| list.iter().filter(|id| is_stranded[id.index()]).count())
            .collect();
        let mut ready = BinaryHeap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if is_stranded[index] && in_degree[index] == 0 {
                ready.push(Reverse((node.position, NodeId(index as u32))));
            }
        }

        // Every cycle has a flagged member, so the stranded subgraph is acyclic
        let mut stranded = Vec::new();
        while let Some(Reverse((position, id))) = ready.pop() {
            if self.nodes[id.index()].is_formula() {
                stranded.push(position);
            }
            for &dependent in &adjacency.dependents[id.index()] {
                if !is_stranded[dependent.index()] {
                    continue;
                }
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    ready.push(Reverse((self.nodes[dependent.index()].position, dependent)));
                }
            }
        }
        stranded
    }

    /// Check that `dependents` and `dependencies` mirror each other
    pub fn verify(&self) -> Result<(), EngineError> {
        for (index, node) in self.nodes.iter().enumerate() {
            let id = NodeId(index as u32);
            let broken = |detail: String| EngineError::BrokenInvariant {
                position: node.position,
                detail,
            };

            if self.index.get(&node.position) != Some(&id) {
                return Err(broken("node is missing from the position index".to_string()));
            }
            for dependency in &node.dependencies {
                match self.nodes.get(dependency.index()) {
                    Some(target) if target.dependents.contains(&id) => {}
                    Some(target) => {
                        return Err(broken(format!(
                            "reads {} which does not list it as a dependent",
                            target.position
                        )))
                    }
                    None => return Err(broken("reads a node that does not exist".to_string())),
                }
            }
            for dependent in &node.dependents {
                match self.nodes.get(dependent.index()) {
                    Some(source) if source.dependencies.contains(&id) => {}
                    Some(source) => {
                        return Err(broken(format!(
                            "lists {} as a dependent but is not one of its dependencies",
                            source.position
                        )))
                    }
                    None => return Err(broken("is read by a node that does not exist".to_string())),
                }
            }
        }
        Ok(())
    }

    /// Drop every node and edge
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.range_edges.clear();
        self.circular_references.clear();
        self.calculation_order.clear();
    }
}
