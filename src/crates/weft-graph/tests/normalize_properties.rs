//! Property checks for the normalizer and diff
//!
//! The two laws the rest of the platform leans on: normalization is
//! idempotent over its own serialized output, and the diff's node/edge set
//! arithmetic is symmetric.

use proptest::prelude::*;
use serde_json::{json, Value};
use weft_graph::{diff_graphs, normalize_draft, NoCapabilities};

/// A loose draft node as an editor might emit it
fn arb_raw_node() -> impl Strategy<Value = Value> {
    let ids = prop_oneof![
        Just(Value::Null),
        "[a-z]{1,6}".prop_map(Value::from),
        (0u32..100).prop_map(Value::from),
    ];
    let types = prop_oneof![
        Just(Value::Null),
        Just(json!("trigger.core.manual")),
        Just(json!("action.http.request")),
        Just(json!("condition:core:branch")),
        "[a-z]{1,8}".prop_map(Value::from),
    ];
    let params = prop_oneof![
        Just(Value::Null),
        Just(json!({})),
        Just(json!({ "url": "https://e.com", "method": "GET" })),
        Just(json!({ "body": { "ref": { "node": "t", "path": "payload.x" } } })),
        Just(json!({ "connectionId": "conn-1" })),
    ];

    (ids, types, params).prop_map(|(id, node_type, params)| {
        let mut obj = serde_json::Map::new();
        if !id.is_null() {
            obj.insert("id".into(), id);
        }
        if !node_type.is_null() {
            obj.insert("type".into(), node_type);
        }
        if !params.is_null() {
            obj.insert("params".into(), params);
        }
        Value::Object(obj)
    })
}

fn arb_draft() -> impl Strategy<Value = Value> {
    (
        prop::collection::vec(arb_raw_node(), 0..6),
        prop::collection::vec(("[a-z]{1,3}", "[a-z]{1,3}"), 0..6),
    )
        .prop_map(|(nodes, edge_pairs)| {
            let edges: Vec<Value> = edge_pairs
                .into_iter()
                .map(|(s, t)| json!({ "source": s, "target": t }))
                .collect();
            json!({ "nodes": nodes, "edges": edges })
        })
}

proptest! {
    #[test]
    fn normalize_is_idempotent_over_serialization(draft in arb_draft()) {
        let once = normalize_draft(&draft);
        let serialized = serde_json::to_value(&once).unwrap();
        let twice = normalize_draft(&serialized);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn diff_node_sets_are_symmetric(a in arb_draft(), b in arb_draft()) {
        let ga = normalize_draft(&a);
        let gb = normalize_draft(&b);
        let forward = diff_graphs(&ga, &gb, &NoCapabilities);
        let backward = diff_graphs(&gb, &ga, &NoCapabilities);
        prop_assert_eq!(&forward.added_nodes, &backward.removed_nodes);
        prop_assert_eq!(&forward.removed_nodes, &backward.added_nodes);
        prop_assert_eq!(&forward.added_edges, &backward.removed_edges);
    }
}
