//! Dependency graph construction and validation

use crate::core::{error::DefinitionError, job::JobDefinition};
use std::collections::HashMap;

/// Validated DAG over job ids
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    /// Job ids in declaration order
    declared: Vec<String>,

    /// Declaration position of each job
    positions: HashMap<String, usize>,

    /// Direct dependencies of each job
    dependencies: HashMap<String, Vec<String>>,

    /// Direct dependents of each job
    dependents: HashMap<String, Vec<String>>,

    /// Topological order, dependencies first
    order: Vec<String>,

    /// Longest dependency chain below each job (roots are 0)
    ranks: HashMap<String, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl JobGraph {
    /// Validate definitions and build the graph.
    ///
    /// Checks duplicate ids, unknown dependencies and cycles, in that order.
    pub fn build(definitions: &[JobDefinition]) -> Result<Self, DefinitionError> {
        let mut positions = HashMap::new();
        for (i, def) in definitions.iter().enumerate() {
            if positions.insert(def.id.clone(), i).is_some() {
                return Err(DefinitionError::DuplicateJob(def.id.clone()));
            }
        }

        for def in definitions {
            if let Some(dep) = def.dependencies.iter().find(|d| !positions.contains_key(*d)) {
                return Err(DefinitionError::UnknownDependency {
                    job: def.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        let mut graph = JobGraph {
            declared: definitions.iter().map(|d| d.id.clone()).collect(),
            positions,
            ..JobGraph::default()
        };

        for def in definitions {
            let mut deps = Vec::new();
            for dep in &def.dependencies {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
            for dep in &deps {
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(def.id.clone());
            }
            graph.dependencies.insert(def.id.clone(), deps);
        }

        graph.order = graph.topological_sort()?;

        for id in &graph.order {
            let rank = graph.dependencies[id]
                .iter()
                .map(|dep| graph.ranks[dep] + 1)
                .max()
                .unwrap_or(0);
            graph.ranks.insert(id.clone(), rank);
        }

        Ok(graph)
    }

    /// Depth-first traversal with three-colour marking; meeting an
    /// in-progress node closes a cycle.
    fn topological_sort(&self) -> Result<Vec<String>, DefinitionError> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut order = Vec::with_capacity(self.declared.len());
        let mut path = Vec::new();

        for id in &self.declared {
            if !marks.contains_key(id.as_str()) {
                self.visit(id, &mut marks, &mut path, &mut order)?;
            }
        }

        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), DefinitionError> {
        marks.insert(id, Mark::InProgress);
        path.push(id);

        for dep in &self.dependencies[id] {
            match marks.get(dep.as_str()) {
                Some(Mark::InProgress) => {
                    let start = path.iter().position(|p| *p == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.clone());
                    return Err(DefinitionError::Cycle { path: cycle });
                }
                Some(Mark::Done) => {}
                None => self.visit(dep, marks, path, order)?,
            }
        }

        path.pop();
        marks.insert(id, Mark::Done);
        order.push(id.to_string());
        Ok(())
    }

    /// Topological order, dependencies before dependents
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Job ids in declaration order
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn dependencies(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Length of the longest dependency chain below `id`
    pub fn rank(&self, id: &str) -> usize {
        self.ranks.get(id).copied().unwrap_or(0)
    }

    /// Declaration position of `id`
    pub fn position(&self, id: &str) -> usize {
        self.positions.get(id).copied().unwrap_or(usize::MAX)
    }
}
