// crates/pincore/tests/acyclicity_props_test.rs

use pincore::graph::DependencyGraph;
use pincore::{ConnectionKind, DataType, Endpoint, ErrorKind, Flow, NodeSchema, ParameterSpec};
use proptest::prelude::*;

const NODES: usize = 6;
const SLOTS: usize = 3;

fn relay_schema() -> NodeSchema {
    let mut schema = NodeSchema::new("test.relay")
        .with_parameter(ParameterSpec::output("out", DataType::Number));
    for slot in 0..SLOTS {
        schema = schema.with_parameter(ParameterSpec::input(format!("in{}", slot), DataType::Number));
    }
    schema
}

proptest! {
    /// Property: no sequence of connects leaves a cycle in the data graph,
    /// and a connect is refused as cyclic exactly when it would close one
    #[test]
    fn test_connects_never_create_data_cycles(
        attempts in prop::collection::vec((0..NODES, 0..NODES, 0..SLOTS), 1..40)
    ) {
        let mut flow = Flow::new("prop");
        let schema = relay_schema();
        let ids: Vec<_> = (0..NODES).map(|i| flow.add_node(Some(&format!("n{}", i)), &schema)).collect();

        for (from, to, slot) in attempts {
            let before = DependencyGraph::data(&flow);
            let closes_cycle = from == to || before.has_path(ids[to], ids[from]);
            let edges_before = flow.connections().len();

            let result = flow.connect(
                ConnectionKind::Data,
                Endpoint::new(ids[from], "out"),
                Endpoint::new(ids[to], format!("in{}", slot)),
            );

            match result {
                Ok(_) => prop_assert!(!closes_cycle),
                Err(err) => {
                    prop_assert_eq!(flow.connections().len(), edges_before);
                    if err.kind() == ErrorKind::CyclicDependency {
                        prop_assert!(closes_cycle);
                    } else {
                        prop_assert_eq!(err.kind(), ErrorKind::MultipleWritersNotAllowed);
                    }
                }
            }

            prop_assert!(DependencyGraph::data(&flow).is_acyclic());
        }
    }
}
