use std::collections::HashMap;

use lp_core::DbError;

/// A seeder's ordering-relevant declarations, independent of how it's
/// actually executed: optional static order, dependencies, version.
#[derive(Debug, Clone)]
pub struct SeedNode {
    pub name: String,
    pub order: i64,
    pub dependencies: Vec<String>,
}

/// Kahn's-algorithm topological sort over seeder dependency declarations.
///
/// Among nodes with no outstanding dependency, the one with the smallest
/// `order` runs next; ties are broken by name, which for file-discovered
/// seeders is filename lexical order.
/// Returns indices into `nodes` in run order.
pub fn topological_order(nodes: &[SeedNode]) -> Result<Vec<usize>, DbError> {
    let index_of: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();

    for node in nodes {
        for dep in &node.dependencies {
            if !index_of.contains_key(dep.as_str()) {
                return Err(DbError::UnknownDependency(dep.clone()));
            }
        }
    }

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        let mut seen = std::collections::HashSet::new();
        for dep in &node.dependencies {
            if !seen.insert(dep.as_str()) {
                continue;
            }
            let dep_idx = index_of[dep.as_str()];
            in_degree[i] += 1;
            dependents[dep_idx].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    let mut done = vec![false; nodes.len()];

    while !ready.is_empty() {
        ready.sort_by(|&a, &b| {
            nodes[a]
                .order
                .cmp(&nodes[b].order)
                .then_with(|| nodes[a].name.cmp(&nodes[b].name))
        });
        let next = ready.remove(0);
        done[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() != nodes.len() {
        let mut remaining: Vec<String> = (0..nodes.len())
            .filter(|&i| !done[i])
            .map(|i| nodes[i].name.clone())
            .collect();
        remaining.sort();
        return Err(DbError::CircularDependency(remaining));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, order: i64, deps: &[&str]) -> SeedNode {
        SeedNode {
            name: name.to_string(),
            order,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn chain_resolves_in_dependency_order() {
        let nodes = vec![
            node("A", 1, &[]),
            node("B", 2, &["A"]),
            node("C", 3, &["B"]),
        ];
        let order = topological_order(&nodes).unwrap();
        let names: Vec<&str> = order.iter().map(|&i| nodes[i].name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn independent_nodes_use_order_then_name() {
        let nodes = vec![node("b", 1, &[]), node("a", 1, &[]), node("c", 0, &[])];
        let order = topological_order(&nodes).unwrap();
        let names: Vec<&str> = order.iter().map(|&i| nodes[i].name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let nodes = vec![node("A", 1, &["ghost"])];
        let err = topological_order(&nodes).unwrap_err();
        assert!(matches!(err, DbError::UnknownDependency(d) if d == "ghost"));
    }

    #[test]
    fn cycle_is_detected() {
        let nodes = vec![node("A", 1, &["C"]), node("B", 2, &["A"]), node("C", 3, &["B"])];
        let err = topological_order(&nodes).unwrap_err();
        match err {
            DbError::CircularDependency(mut remaining) => {
                remaining.sort();
                assert_eq!(remaining, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }
}
