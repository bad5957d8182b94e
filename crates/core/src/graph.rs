//! Derivation dependency graph.
//!
//! Nodes are the derived fields of one form version, stored in an arena in
//! declaration order; an edge `u -> v` means derived field `v` reads derived
//! field `u`. Dependencies on ordinary (entered) fields are inputs and carry
//! no edge. The graph is built once per form version and never mutated.
//!
//! Topological order is computed with Kahn's algorithm. Nodes Kahn cannot
//! schedule are either cycle members or downstream of a cycle; strongly
//! connected components (Tarjan) separate the two so that cycle errors name
//! only the fields that actually form the loop.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ast::Expression;
use crate::error::DerivationCycleError;
use crate::metadata::FieldMetadata;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedNode {
    pub field_id: String,
    pub formula: String,
    /// Every field the formula depends on: declared dependencies first, then
    /// any further references found in the formula text.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationGraph {
    nodes: Vec<DerivedNode>,
    /// `edges[u]` lists the nodes that read node `u`.
    edges: Vec<Vec<usize>>,
    order: Vec<usize>,
    cycles: Vec<DerivationCycleError>,
    blocked: Vec<usize>,
}

impl DerivationGraph {
    pub fn build(fields: &[FieldMetadata]) -> DerivationGraph {
        let mut nodes = Vec::new();
        for field in fields {
            let Some(spec) = &field.derivation else {
                continue;
            };
            let mut dependencies = spec.dependencies.clone();
            // Unparsable formulas keep their declared edges; the resolver
            // reports the parse failure when it tries to evaluate them.
            if let Ok(expr) = Expression::parse(&spec.formula) {
                for r in expr.referenced_fields() {
                    if !dependencies.iter().any(|d| d == r) {
                        dependencies.push(r.to_owned());
                    }
                }
            }
            nodes.push(DerivedNode {
                field_id: field.id.clone(),
                formula: spec.formula.clone(),
                dependencies,
            });
        }

        let index: BTreeMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.field_id.as_str(), i))
            .collect();

        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (v, node) in nodes.iter().enumerate() {
            for dep in &node.dependencies {
                if let Some(&u) = index.get(dep.as_str()) {
                    if !edges[u].contains(&v) {
                        edges[u].push(v);
                    }
                }
            }
        }

        let order = kahn_order(&edges);
        let scheduled: BTreeSet<usize> = order.iter().copied().collect();
        let remaining: Vec<usize> = (0..nodes.len())
            .filter(|i| !scheduled.contains(i))
            .collect();

        let mut cycles = Vec::new();
        let mut in_cycle = BTreeSet::new();
        for component in strongly_connected(&edges, &remaining) {
            let is_cycle =
                component.len() > 1 || edges[component[0]].contains(&component[0]);
            if is_cycle {
                in_cycle.extend(component.iter().copied());
                cycles.push(DerivationCycleError::new(
                    component
                        .iter()
                        .map(|&i| nodes[i].field_id.clone())
                        .collect(),
                ));
            }
        }
        cycles.sort_by(|a, b| a.fields.cmp(&b.fields));
        let blocked = remaining
            .into_iter()
            .filter(|i| !in_cycle.contains(i))
            .collect();

        DerivationGraph {
            nodes,
            edges,
            order,
            cycles,
            blocked,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[DerivedNode] {
        &self.nodes
    }

    pub fn node(&self, field_id: &str) -> Option<&DerivedNode> {
        self.nodes.iter().find(|n| n.field_id == field_id)
    }

    /// Derived fields that can be computed, in dependency order.
    pub fn topological_order(&self) -> impl Iterator<Item = &DerivedNode> {
        self.order.iter().map(move |&i| &self.nodes[i])
    }

    pub fn cycles(&self) -> &[DerivationCycleError] {
        &self.cycles
    }

    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Derived fields that are not in a cycle but read (directly or
    /// transitively) from one, and so cannot be computed either.
    pub fn blocked_fields(&self) -> impl Iterator<Item = &str> {
        self.blocked.iter().map(move |&i| self.nodes[i].field_id.as_str())
    }

    /// Derived fields that read `field_id` directly.
    pub fn dependents_of(&self, field_id: &str) -> Vec<&str> {
        match self.nodes.iter().position(|n| n.field_id == field_id) {
            Some(u) => self.edges[u]
                .iter()
                .map(|&v| self.nodes[v].field_id.as_str())
                .collect(),
            None => self
                .nodes
                .iter()
                .filter(|n| n.dependencies.iter().any(|d| d == field_id))
                .map(|n| n.field_id.as_str())
                .collect(),
        }
    }
}

/// Kahn's algorithm. Ties are broken by declaration order so the schedule is
/// deterministic.
fn kahn_order(edges: &[Vec<usize>]) -> Vec<usize> {
    let mut in_degree = vec![0usize; edges.len()];
    for targets in edges {
        for &v in targets {
            in_degree[v] += 1;
        }
    }
    let mut queue: VecDeque<usize> = (0..edges.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(edges.len());
    while let Some(u) = queue.pop_front() {
        order.push(u);
        for &v in &edges[u] {
            in_degree[v] -= 1;
            if in_degree[v] == 0 {
                queue.push_back(v);
            }
        }
    }
    order
}

/// Tarjan's strongly connected components, restricted to `subset`.
fn strongly_connected(edges: &[Vec<usize>], subset: &[usize]) -> Vec<Vec<usize>> {
    struct State<'a> {
        edges: &'a [Vec<usize>],
        member: Vec<bool>,
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        out: Vec<Vec<usize>>,
    }

    fn visit(s: &mut State<'_>, v: usize) {
        s.index[v] = Some(s.next);
        s.lowlink[v] = s.next;
        s.next += 1;
        s.stack.push(v);
        s.on_stack[v] = true;

        for i in 0..s.edges[v].len() {
            let w = s.edges[v][i];
            if !s.member[w] {
                continue;
            }
            match s.index[w] {
                None => {
                    visit(s, w);
                    s.lowlink[v] = s.lowlink[v].min(s.lowlink[w]);
                }
                Some(wi) if s.on_stack[w] => {
                    s.lowlink[v] = s.lowlink[v].min(wi);
                }
                Some(_) => {}
            }
        }

        if Some(s.lowlink[v]) == s.index[v] {
            let mut component = Vec::new();
            while let Some(w) = s.stack.pop() {
                s.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            s.out.push(component);
        }
    }

    let n = edges.len();
    let mut member = vec![false; n];
    for &i in subset {
        member[i] = true;
    }
    let mut state = State {
        edges,
        member,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next: 0,
        out: Vec::new(),
    };
    for &v in subset {
        if state.index[v].is_none() {
            visit(&mut state, v);
        }
    }
    state.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::*;

    fn derived(id: &str, formula: &str, deps: &[&str]) -> FieldMetadata {
        let mut f = plain(id);
        f.derivation = Some(DerivationSpec {
            formula: formula.into(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        });
        f
    }

    fn plain(id: &str) -> FieldMetadata {
        FieldMetadata {
            id: id.into(),
            label: None,
            kind: FieldKind::Number,
            validation: ValidationSpec::default(),
            display: DisplaySpec::default(),
            derivation: None,
            clinical: ClinicalFlags::default(),
            data_quality: DataQualitySpec::default(),
            query: QueryConfig::default(),
            data_entry: DataEntrySpec::default(),
        }
    }

    fn order(graph: &DerivationGraph) -> Vec<&str> {
        graph
            .topological_order()
            .map(|n| n.field_id.as_str())
            .collect()
    }

    #[test]
    fn orders_chained_derivations() {
        // total reads subtotal which is declared after it
        let fields = vec![
            plain("a"),
            derived("total", "subtotal * 2", &["subtotal"]),
            derived("subtotal", "a + 1", &["a"]),
        ];
        let graph = DerivationGraph::build(&fields);
        assert!(graph.is_acyclic());
        assert_eq!(order(&graph), vec!["subtotal", "total"]);
        assert_eq!(graph.dependents_of("subtotal"), vec!["total"]);
        assert_eq!(graph.dependents_of("a"), vec!["subtotal"]);
    }

    #[test]
    fn formula_references_add_edges() {
        // "c" does not declare "b" but reads it
        let fields = vec![
            derived("c", "b + 1", &[]),
            derived("b", "a * 2", &["a"]),
        ];
        let graph = DerivationGraph::build(&fields);
        assert_eq!(order(&graph), vec!["b", "c"]);
        assert_eq!(graph.node("c").unwrap().dependencies, vec!["b"]);
    }

    #[test]
    fn two_node_cycle_is_named() {
        let fields = vec![
            plain("a"),
            derived("c", "d + 1", &["d"]),
            derived("d", "c + 1", &["c"]),
            derived("e", "a + 1", &["a"]),
        ];
        let graph = DerivationGraph::build(&fields);
        assert!(!graph.is_acyclic());
        assert_eq!(graph.cycles().len(), 1);
        assert_eq!(graph.cycles()[0].fields, vec!["c", "d"]);
        assert_eq!(order(&graph), vec!["e"]);
        assert_eq!(graph.blocked_fields().count(), 0);
    }

    #[test]
    fn downstream_of_cycle_is_blocked_not_cyclic() {
        let fields = vec![
            derived("x", "y", &["y"]),
            derived("y", "x", &["x"]),
            derived("z", "x + 1", &["x"]),
        ];
        let graph = DerivationGraph::build(&fields);
        assert_eq!(graph.cycles()[0].fields, vec!["x", "y"]);
        assert_eq!(graph.blocked_fields().collect::<Vec<_>>(), vec!["z"]);
        assert!(order(&graph).is_empty());
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let graph = DerivationGraph::build(&[derived("n", "n + 1", &["n"])]);
        assert_eq!(graph.cycles()[0].fields, vec!["n"]);
    }

    #[test]
    fn independent_cycles_reported_separately() {
        let fields = vec![
            derived("a", "b", &["b"]),
            derived("b", "a", &["a"]),
            derived("p", "q", &["q"]),
            derived("q", "p", &["p"]),
        ];
        let graph = DerivationGraph::build(&fields);
        let cycles: Vec<_> = graph.cycles().iter().map(|c| c.fields.clone()).collect();
        assert_eq!(cycles, vec![vec!["a", "b"], vec!["p", "q"]]);
    }
}
