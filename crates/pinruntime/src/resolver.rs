use pincore::graph::DependencyGraph;
use pincore::{ConnectionKind, Flow, FlowError, NodeId, NodeRunState, ParameterMode};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Computes which nodes an execution request needs, and in what order.
///
/// Data dependencies are followed backwards from a target; control edges
/// only matter for deciding what a Run-Flow walk can reach.
pub struct Resolver<'a> {
    flow: &'a Flow,
    data: DependencyGraph,
    positions: HashMap<NodeId, usize>,
}

impl<'a> Resolver<'a> {
    pub fn new(flow: &'a Flow) -> Self {
        let positions = flow
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect();
        Self {
            flow,
            data: DependencyGraph::data(flow),
            positions,
        }
    }

    pub fn flow(&self) -> &'a Flow {
        self.flow
    }

    /// Backward data closure of `target`, producers first, insertion order
    /// breaking ties, `target` last. Nodes already settled in the current
    /// request (succeeded, failed or skipped) are not resolved again.
    pub fn resolve_node(
        &self,
        target: NodeId,
        settled: &HashMap<NodeId, NodeRunState>,
    ) -> Result<Vec<NodeId>, FlowError> {
        self.flow.require_node(target)?;
        let closure = self.data_closure(target, settled);
        self.linearize(&closure)
    }

    /// Run-Node plan: the full closure, checked for missing required inputs
    pub fn plan_node(&self, target: NodeId) -> Result<Vec<NodeId>, FlowError> {
        let order = self.resolve_node(target, &HashMap::new())?;
        self.check_required_inputs(&order)?;
        tracing::debug!(target = %target, steps = order.len(), "Resolved run-node plan");
        Ok(order)
    }

    /// Every node a Run-Flow from `start` could run: the control-reachable
    /// nodes plus their data closures, in insertion order. Fails before
    /// anything runs if one of them can never be satisfied.
    pub fn flow_scope(&self, start: NodeId) -> Result<Vec<NodeId>, FlowError> {
        let empty = HashMap::new();
        let mut scope = HashSet::new();
        for node in self.control_reachable(start) {
            scope.extend(self.resolve_node(node, &empty)?);
        }

        let mut scope: Vec<NodeId> = scope.into_iter().collect();
        scope.sort_by_key(|n| self.position(*n));
        self.check_required_inputs(&scope)?;
        Ok(scope)
    }

    /// Nodes reachable from `start` along control edges, any port, breadth-first
    pub fn control_reachable(&self, start: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::from([start]);
        let mut order = vec![start];
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            let next = self
                .flow
                .connections()
                .iter()
                .filter(|c| c.kind == ConnectionKind::Control && c.from.node == node)
                .map(|c| c.to.node);
            for target in next {
                if seen.insert(target) {
                    order.push(target);
                    queue.push_back(target);
                }
            }
        }

        order
    }

    /// Nodes control-reachable from a loop-start without passing through its
    /// loop-end or any back-edge; one pass of the loop walks only these
    pub fn loop_body(&self, start: NodeId, end: NodeId) -> HashSet<NodeId> {
        let mut body = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            let next = self.flow.connections().iter().filter(|c| {
                c.kind == ConnectionKind::Control
                    && c.from.node == node
                    && !self.flow.is_back_edge(c.from.node, &c.from.port, c.to.node)
            });
            for conn in next {
                let target = conn.to.node;
                if target != start && target != end && body.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        body
    }

    pub fn data_producers(&self, node: NodeId) -> Vec<NodeId> {
        self.data.predecessors(node)
    }

    /// Required inputs and properties need a connection, a value or a default
    pub fn check_required_inputs(&self, nodes: &[NodeId]) -> Result<(), FlowError> {
        for &id in nodes {
            let node = self.flow.require_node(id)?;
            let missing = node.parameters.iter().find(|p| {
                p.mode() != ParameterMode::Output
                    && p.spec.required
                    && p.current_value().is_none()
                    && self.flow.data_source(id, p.name()).is_none()
            });
            if let Some(param) = missing {
                return Err(FlowError::MissingRequiredInput {
                    node: node.name.clone(),
                    parameter: param.name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn data_closure(
        &self,
        target: NodeId,
        settled: &HashMap<NodeId, NodeRunState>,
    ) -> HashSet<NodeId> {
        let mut closure = HashSet::from([target]);
        let mut queue = VecDeque::from([target]);

        while let Some(node) = queue.pop_front() {
            for producer in self.data.predecessors(node) {
                if settled.get(&producer).is_some_and(|s| s.is_terminal()) {
                    continue;
                }
                if closure.insert(producer) {
                    queue.push_back(producer);
                }
            }
        }

        closure
    }

    /// Kahn's algorithm restricted to `closure`, always releasing the
    /// earliest-inserted ready node first
    fn linearize(&self, closure: &HashSet<NodeId>) -> Result<Vec<NodeId>, FlowError> {
        let mut indegree: HashMap<NodeId, usize> = closure
            .iter()
            .map(|&node| {
                let inside = self
                    .data
                    .predecessors(node)
                    .into_iter()
                    .filter(|p| closure.contains(p))
                    .count();
                (node, inside)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, NodeId)>> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&node, _)| Reverse((self.position(node), node)))
            .collect();

        let mut order = Vec::with_capacity(closure.len());
        while let Some(Reverse((_, node))) = ready.pop() {
            order.push(node);
            for consumer in self.data.successors(node) {
                if let Some(degree) = indegree.get_mut(&consumer) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.position(consumer), consumer)));
                    }
                }
            }
        }

        if order.len() != closure.len() {
            let placed: HashSet<NodeId> = order.iter().copied().collect();
            let mut stuck: Vec<String> = closure
                .iter()
                .filter(|n| !placed.contains(n))
                .map(|n| self.name(*n))
                .collect();
            stuck.sort();
            tracing::error!(nodes = ?stuck, "Data closure cannot be linearized");
            return Err(FlowError::UnresolvableCycle(stuck));
        }

        Ok(order)
    }

    fn position(&self, node: NodeId) -> usize {
        self.positions.get(&node).copied().unwrap_or(usize::MAX)
    }

    fn name(&self, node: NodeId) -> String {
        self.flow
            .node(node)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| node.to_string())
    }
}
