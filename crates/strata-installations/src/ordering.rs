//! Dependency ordering of siblings
//!
//! Subinstallations depend on the siblings whose exports they import, deploy
//! items on the items named in `dependsOn`. Both are ordered topologically;
//! among nodes that are ready at the same time the declaration order wins.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use strata_components::blueprint::InstallationTemplate;
use strata_core::types::DeployItemTemplate;
use strata_core::{Error, Result};

/// Scope keys read by a subinstallation template
pub fn template_imports(template: &InstallationTemplate) -> Vec<&str> {
    let mut keys: Vec<&str> = template
        .imports
        .data
        .iter()
        .map(|d| d.data_ref.as_str())
        .collect();
    for t in &template.imports.targets {
        keys.extend(t.scope_keys());
    }
    keys
}

/// Scope keys written by a subinstallation template
pub fn template_exports(template: &InstallationTemplate) -> Vec<&str> {
    template
        .exports
        .data
        .iter()
        .map(|d| d.data_ref.as_str())
        .chain(template.exports.targets.iter().map(|t| t.target.as_str()))
        .collect()
}

/// Order subinstallation templates so that exporters precede importers
pub fn order_subinstallations(templates: &[InstallationTemplate]) -> Result<Vec<usize>> {
    let mut edges = Vec::new();
    for (importer, template) in templates.iter().enumerate() {
        let imports: BTreeSet<&str> = template_imports(template).into_iter().collect();
        for (exporter, other) in templates.iter().enumerate() {
            if exporter == importer {
                continue;
            }
            if template_exports(other).iter().any(|k| imports.contains(k)) {
                edges.push((exporter, importer));
            }
        }
    }
    let names: Vec<&str> = templates.iter().map(|t| t.name.as_str()).collect();
    topological_order(&names, &edges)
}

/// Order deploy item templates by `dependsOn`
pub fn order_deploy_items(items: &[DeployItemTemplate]) -> Result<Vec<usize>> {
    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    let mut edges = Vec::new();
    for (dependent, item) in items.iter().enumerate() {
        for dependency in &item.depends_on {
            let Some(index) = names.iter().position(|n| n == dependency) else {
                return Err(Error::invalid_blueprint(format!(
                    "deploy item {} depends on unknown deploy item {}",
                    item.name, dependency
                )));
            };
            edges.push((index, dependent));
        }
    }
    topological_order(&names, &edges)
}

/// Kahn's algorithm with the lowest ready index first
pub fn topological_order(names: &[&str], edges: &[(usize, usize)]) -> Result<Vec<usize>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(names.len(), edges.len());
    let nodes: Vec<NodeIndex> = (0..names.len()).map(|i| graph.add_node(i)).collect();
    for &(from, to) in edges {
        graph.update_edge(nodes[from], nodes[to], ());
    }

    let mut in_degree: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(names.len());
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for next in graph.neighbors_directed(nodes[index], Direction::Outgoing) {
            let i = graph[next];
            in_degree[i] -= 1;
            if in_degree[i] == 0 {
                ready.push(Reverse(i));
            }
        }
    }

    if order.len() == names.len() {
        return Ok(order);
    }

    let cycle = petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .find(|scc| scc.len() > 1)
        .map(|mut scc| {
            scc.sort_by_key(|n| graph[*n]);
            scc.iter().map(|n| names[graph[*n]]).collect::<Vec<_>>().join(" -> ")
        })
        .unwrap_or_default();
    Err(Error::circular_dependency(cycle))
}
