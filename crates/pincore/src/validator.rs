//! Admission rules for new connections. Checks run in a fixed order
//! (modes, cardinality, types, acyclicity) and never mutate the flow.

use crate::graph::DependencyGraph;
use crate::{ConnectionKind, Endpoint, Flow, FlowNode, GraphError, ParameterSpec};

pub fn validate_connection(
    flow: &Flow,
    kind: ConnectionKind,
    from: &Endpoint,
    to: &Endpoint,
) -> Result<(), GraphError> {
    let source = flow.require_node(from.node)?;
    let target = flow.require_node(to.node)?;

    match kind {
        ConnectionKind::Data => validate_data(flow, source, from, target, to),
        ConnectionKind::Control => validate_control(flow, source, from, target, to),
    }
}

/// Source type must be within the target's accepted set, unless the target accepts anything
pub fn types_compatible(output: &ParameterSpec, input: &ParameterSpec) -> bool {
    if input.accept_any {
        return true;
    }
    !output.accept_any
        && !output.types.is_empty()
        && output.types.iter().all(|ty| input.types.contains(ty))
}

fn validate_data(
    flow: &Flow,
    source: &FlowNode,
    from: &Endpoint,
    target: &FlowNode,
    to: &Endpoint,
) -> Result<(), GraphError> {
    let output = source
        .parameter(&from.port)
        .ok_or_else(|| parameter_error(source, &from.port))?;
    let input = target
        .parameter(&to.port)
        .ok_or_else(|| parameter_error(target, &to.port))?;

    if !output.mode().produces_output() {
        return Err(GraphError::IncompatibleModes(format!(
            "'{}.{}' is not an output",
            source.name, from.port
        )));
    }
    if !input.mode().accepts_connection() {
        return Err(GraphError::IncompatibleModes(format!(
            "'{}.{}' does not accept connections",
            target.name, to.port
        )));
    }

    if flow.data_source(to.node, &to.port).is_some() {
        return Err(GraphError::MultipleWritersNotAllowed {
            target: format!("{}.{}", target.name, to.port),
        });
    }

    if !types_compatible(&output.spec, &input.spec) {
        return Err(GraphError::IncompatibleTypes {
            from_type: output.spec.describe_types(),
            target: format!("{}.{}", target.name, to.port),
            accepted: input.spec.describe_types(),
        });
    }

    let mut graph = DependencyGraph::data(flow);
    graph.add_edge(from.node, to.node);
    if !graph.is_acyclic() {
        return Err(GraphError::CyclicDependency {
            from: format!("{}.{}", source.name, from.port),
            to: format!("{}.{}", target.name, to.port),
        });
    }

    Ok(())
}

fn validate_control(
    flow: &Flow,
    source: &FlowNode,
    from: &Endpoint,
    target: &FlowNode,
    to: &Endpoint,
) -> Result<(), GraphError> {
    if !source.has_exec_out(&from.port) {
        return Err(port_error(source, &from.port, "exec-out"));
    }
    if !target.has_exec_in(&to.port) {
        return Err(port_error(target, &to.port, "exec-in"));
    }

    let duplicate = flow.connections().iter().any(|c| {
        c.kind == ConnectionKind::Control && &c.from == from && &c.to == to
    });
    if duplicate {
        return Err(GraphError::Invalid(format!(
            "control connection {}.{} -> {}.{} already exists",
            source.name, from.port, target.name, to.port
        )));
    }

    // The only legal way to close a control cycle
    if flow.is_back_edge(from.node, &from.port, to.node) {
        return Ok(());
    }

    let mut graph = DependencyGraph::control(flow);
    graph.add_edge(from.node, to.node);
    if !graph.is_acyclic() {
        return Err(GraphError::CyclicDependency {
            from: format!("{}.{}", source.name, from.port),
            to: format!("{}.{}", target.name, to.port),
        });
    }

    Ok(())
}

fn port_error(node: &FlowNode, port: &str, expected: &str) -> GraphError {
    if node.parameter(port).is_some() {
        GraphError::IncompatibleModes(format!(
            "'{}.{}' is a data parameter, not an {} port",
            node.name, port, expected
        ))
    } else {
        GraphError::PortNotFound {
            node: node.name.clone(),
            port: port.to_string(),
        }
    }
}

fn parameter_error(node: &FlowNode, name: &str) -> GraphError {
    if node.has_exec_in(name) || node.has_exec_out(name) {
        GraphError::IncompatibleModes(format!(
            "'{}.{}' is a control port, not a data parameter",
            node.name, name
        ))
    } else {
        GraphError::ParameterNotFound {
            node: node.name.clone(),
            parameter: name.to_string(),
        }
    }
}
