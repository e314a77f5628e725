//! Graph topology: cycle detection and topological order
//!
//! Cycle detection is an iterative Tarjan SCC pass, O(V+E); every strongly
//! connected component with more than one member (or a self-loop) is reported
//! as one cycle. Topological order comes from Kahn's algorithm with ties
//! broken by node id ascending so the dispatcher's schedule is deterministic.

use crate::graph::WorkflowGraph;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Strongly connected components with more than one member, plus self-loops
///
/// Each returned component is sorted by node id. An acyclic graph returns an
/// empty vec.
pub fn cycles(graph: &WorkflowGraph) -> Vec<Vec<String>> {
    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let index_of: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    let mut self_loops: HashSet<usize> = HashSet::new();
    for edge in &graph.edges {
        let (Some(&s), Some(&t)) = (
            index_of.get(edge.source.as_str()),
            index_of.get(edge.target.as_str()),
        ) else {
            continue;
        };
        if s == t {
            self_loops.insert(s);
        }
        successors[s].push(t);
    }

    // Iterative Tarjan: an explicit frame stack replaces recursion.
    struct Frame {
        v: usize,
        next_child: usize,
    }

    let n = ids.len();
    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![usize::MAX; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut counter = 0usize;
    let mut components: Vec<Vec<String>> = Vec::new();

    for root in 0..n {
        if index[root] != usize::MAX {
            continue;
        }
        let mut frames = vec![Frame {
            v: root,
            next_child: 0,
        }];
        index[root] = counter;
        lowlink[root] = counter;
        counter += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(frame) = frames.last_mut() {
            let v = frame.v;
            if frame.next_child < successors[v].len() {
                let w = successors[v][frame.next_child];
                frame.next_child += 1;
                if index[w] == usize::MAX {
                    index[w] = counter;
                    lowlink[w] = counter;
                    counter += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    frames.push(Frame {
                        v: w,
                        next_child: 0,
                    });
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                frames.pop();
                if let Some(parent) = frames.last() {
                    lowlink[parent.v] = lowlink[parent.v].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    if component.len() > 1 || self_loops.contains(&v) {
                        let mut names: Vec<String> =
                            component.iter().map(|&i| ids[i].to_string()).collect();
                        names.sort();
                        components.push(names);
                    }
                }
            }
        }
    }

    components.sort();
    components
}

/// Kahn topological order with deterministic ties (node id ascending)
///
/// Returns `None` when the graph has a cycle. Edges referencing unknown nodes
/// are ignored; the validator reports those separately.
pub fn topological_order(graph: &WorkflowGraph) -> Option<Vec<String>> {
    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let index_of: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    let mut in_degree = vec![0usize; ids.len()];
    for edge in &graph.edges {
        let (Some(&s), Some(&t)) = (
            index_of.get(edge.source.as_str()),
            index_of.get(edge.target.as_str()),
        ) else {
            continue;
        };
        successors[s].push(t);
        in_degree[t] += 1;
    }

    // Min-heap on node id keeps the ready set ordered deterministically.
    let mut ready: BinaryHeap<std::cmp::Reverse<(&str, usize)>> = BinaryHeap::new();
    for (i, degree) in in_degree.iter().enumerate() {
        if *degree == 0 {
            ready.push(std::cmp::Reverse((ids[i], i)));
        }
    }

    let mut order = Vec::with_capacity(ids.len());
    while let Some(std::cmp::Reverse((_, i))) = ready.pop() {
        order.push(ids[i].to_string());
        for &succ in &successors[i] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push(std::cmp::Reverse((ids[succ], succ)));
            }
        }
    }

    if order.len() == ids.len() {
        Some(order)
    } else {
        None
    }
}

/// All ancestors of each node, keyed by node id
///
/// Computed in one pass over a topological order; the validator uses this to
/// check that every `ref` target is a proper ancestor of the referring node.
/// Returns `None` on cyclic graphs.
pub fn ancestor_sets(graph: &WorkflowGraph) -> Option<HashMap<String, HashSet<String>>> {
    let order = topological_order(graph)?;
    let preds = graph.predecessors();

    let mut ancestors: HashMap<String, HashSet<String>> = HashMap::new();
    for id in &order {
        let mut set = HashSet::new();
        if let Some(incoming) = preds.get(id.as_str()) {
            for edge in incoming {
                set.insert(edge.source.clone());
                if let Some(upstream) = ancestors.get(edge.source.as_str()) {
                    set.extend(upstream.iter().cloned());
                }
            }
        }
        ancestors.insert(id.clone(), set);
    }
    Some(ancestors)
}
