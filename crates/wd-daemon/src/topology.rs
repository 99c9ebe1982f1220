//! Dependency-ordered startup queue.

use std::collections::HashMap;

use wd_core::types::DaemonSpec;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("daemon '{daemon}' depends on unknown daemon '{dependency}'")]
    UnknownDependency { daemon: String, dependency: String },
    #[error("daemon '{0}' is defined more than once")]
    Duplicate(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Resolving,
    Done,
}

/// Order `specs` so every daemon comes after all of its transitive
/// dependencies. Among daemons free to go, lower priority values go first,
/// then names in lexical order.
pub fn startup_order(specs: &[DaemonSpec]) -> Result<Vec<String>, TopologyError> {
    let mut by_name: HashMap<&str, &DaemonSpec> = HashMap::with_capacity(specs.len());
    for spec in specs {
        if by_name.insert(spec.name.as_str(), spec).is_some() {
            return Err(TopologyError::Duplicate(spec.name.clone()));
        }
    }
    for spec in specs {
        if let Some(missing) = spec
            .dependencies
            .iter()
            .find(|dep| !by_name.contains_key(dep.as_str()))
        {
            return Err(TopologyError::UnknownDependency {
                daemon: spec.name.clone(),
                dependency: missing.clone(),
            });
        }
    }

    let mut roots: Vec<&DaemonSpec> = specs.iter().collect();
    roots.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));

    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(specs.len());
    let mut path = Vec::new();
    let mut order = Vec::with_capacity(specs.len());
    for spec in roots {
        visit(spec, &by_name, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    spec: &'a DaemonSpec,
    by_name: &HashMap<&'a str, &'a DaemonSpec>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<(), TopologyError> {
    match marks.get(spec.name.as_str()) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Resolving) => {
            let start = path
                .iter()
                .position(|n| *n == spec.name)
                .unwrap_or_default();
            let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(spec.name.clone());
            return Err(TopologyError::Cycle(cycle));
        }
        None => {}
    }

    marks.insert(spec.name.as_str(), Mark::Resolving);
    path.push(spec.name.as_str());

    let mut deps: Vec<&DaemonSpec> = spec
        .dependencies
        .iter()
        .filter_map(|d| by_name.get(d.as_str()).copied())
        .collect();
    deps.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
    for dep in deps {
        visit(dep, by_name, marks, path, order)?;
    }

    path.pop();
    marks.insert(spec.name.as_str(), Mark::Done);
    order.push(spec.name.clone());
    Ok(())
}
