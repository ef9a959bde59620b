//! Graph builder with up-front validation.

use super::{StageGraph, StageSpec};
use crate::core::StageKind;
use crate::errors::ConfigurationError;
use crate::stages::Stage;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Collects stage declarations and validates them into a [`StageGraph`].
///
/// Declarations may reference stages declared later; every reference is
/// checked in [`PipelineBuilder::build`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds an ordinary stage.
    #[must_use]
    pub fn stage(self, name: impl Into<String>, runner: Arc<dyn Stage>, dependencies: &[&str]) -> Self {
        self.add(StageSpec::new(name, runner).with_dependencies(dependencies.iter().copied()))
    }

    /// Adds a setup stage.
    #[must_use]
    pub fn setup(self, name: impl Into<String>, runner: Arc<dyn Stage>, dependencies: &[&str]) -> Self {
        self.add(StageSpec::setup(name, runner).with_dependencies(dependencies.iter().copied()))
    }

    /// Adds a teardown stage for `setup`.
    #[must_use]
    pub fn teardown(self, name: impl Into<String>, runner: Arc<dyn Stage>, setup: &str) -> Self {
        self.add(StageSpec::teardown_of(name, runner, setup))
    }

    /// Adds a fully specified stage.
    #[must_use]
    pub fn add(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of declared stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the declarations and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] for an empty graph, duplicate names,
    /// unknown dependencies, invalid teardown pairings or cycles.
    pub fn build(self) -> Result<StageGraph, ConfigurationError> {
        if self.stages.is_empty() {
            return Err(ConfigurationError::empty_graph());
        }

        let mut stages = self.stages;
        let mut index = HashMap::with_capacity(stages.len());
        for (i, spec) in stages.iter().enumerate() {
            spec.validate()?;
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(ConfigurationError::duplicate_stage(&spec.name));
            }
        }

        resolve_setup_side_pairings(&mut stages, &index)?;
        check_references(&stages, &index)?;

        let prerequisites = prerequisites(&stages, &index);
        if let Some(cycle) = find_cycle(&stages, &prerequisites) {
            return Err(ConfigurationError::cycle(cycle));
        }

        Ok(StageGraph::new(self.name, stages, index, prerequisites))
    }
}

/// Applies `StageSpec::with_teardown` declarations to the named teardown stages.
fn resolve_setup_side_pairings(
    stages: &mut [StageSpec],
    index: &HashMap<String, usize>,
) -> Result<(), ConfigurationError> {
    for setup_idx in 0..stages.len() {
        let Some(teardown_name) = stages[setup_idx].teardown.clone() else {
            continue;
        };
        let setup_name = stages[setup_idx].name.clone();

        let Some(&teardown_idx) = index.get(&teardown_name) else {
            return Err(ConfigurationError::teardown_target(
                &teardown_name,
                &setup_name,
                "teardown stage is not declared",
            ));
        };
        if stages[setup_idx].kind == StageKind::Teardown {
            return Err(ConfigurationError::teardown_target(
                &teardown_name,
                &setup_name,
                "a teardown stage cannot have its own teardown",
            ));
        }

        let teardown = &mut stages[teardown_idx];
        match teardown.teardown_of.as_deref() {
            Some(existing) if existing != setup_name => {
                return Err(ConfigurationError::teardown_target(
                    &teardown_name,
                    &setup_name,
                    &format!("stage already tears down '{existing}'"),
                ));
            }
            _ => {}
        }
        if teardown.kind == StageKind::Setup {
            return Err(ConfigurationError::teardown_target(
                &teardown_name,
                &setup_name,
                "a setup stage cannot be used as a teardown",
            ));
        }
        teardown.kind = StageKind::Teardown;
        teardown.teardown_of = Some(setup_name);
        stages[setup_idx].kind = StageKind::Setup;
    }
    Ok(())
}

fn check_references(stages: &[StageSpec], index: &HashMap<String, usize>) -> Result<(), ConfigurationError> {
    let mut teardown_of_setup: HashMap<&str, &str> = HashMap::new();

    for spec in stages {
        for dep in &spec.dependencies {
            if !index.contains_key(dep) {
                return Err(ConfigurationError::missing_dependency(&spec.name, dep));
            }
        }

        if spec.kind != StageKind::Teardown {
            continue;
        }
        let Some(target) = spec.teardown_of.as_deref() else {
            return Err(ConfigurationError::teardown_target(
                &spec.name,
                "",
                "teardown stage has no setup target",
            ));
        };
        let Some(&target_idx) = index.get(target) else {
            return Err(ConfigurationError::teardown_target(
                &spec.name,
                target,
                "target stage is not declared",
            ));
        };
        if stages[target_idx].kind != StageKind::Setup {
            return Err(ConfigurationError::teardown_target(
                &spec.name,
                target,
                "target stage is not a setup stage",
            ));
        }
        if let Some(existing) = teardown_of_setup.insert(target, &spec.name) {
            return Err(ConfigurationError::teardown_target(
                &spec.name,
                target,
                &format!("setup already has teardown '{existing}'"),
            ));
        }
    }
    Ok(())
}

/// Computes, per stage, the stages that must be terminal before it is released.
///
/// Ordinary edges come from declared dependencies. A teardown additionally
/// waits on its setup and on every stage that transitively follows the setup.
fn prerequisites(stages: &[StageSpec], index: &HashMap<String, usize>) -> Vec<Vec<usize>> {
    let mut prereqs: Vec<BTreeSet<usize>> = stages
        .iter()
        .map(|spec| spec.dependencies.iter().filter_map(|dep| index.get(dep).copied()).collect())
        .collect();

    // Forward edges: prerequisite -> stages that wait on it.
    let mut followers: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    for (i, deps) in prereqs.iter().enumerate() {
        for &dep in deps {
            followers[dep].push(i);
        }
    }
    let teardown_pairs: Vec<(usize, usize)> = stages
        .iter()
        .enumerate()
        .filter(|(_, spec)| spec.kind == StageKind::Teardown)
        .filter_map(|(i, spec)| {
            let setup = index.get(spec.teardown_of.as_deref()?)?;
            Some((i, *setup))
        })
        .collect();
    for &(teardown, setup) in &teardown_pairs {
        followers[setup].push(teardown);
    }

    for &(teardown, setup) in &teardown_pairs {
        prereqs[teardown].insert(setup);

        let mut seen = vec![false; stages.len()];
        seen[setup] = true;
        seen[teardown] = true;
        let mut queue: VecDeque<usize> = followers[setup].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if std::mem::replace(&mut seen[next], true) {
                continue;
            }
            prereqs[teardown].insert(next);
            queue.extend(followers[next].iter().copied());
        }
    }

    prereqs.into_iter().map(|set| set.into_iter().collect()).collect()
}

/// Depth-first search for a cycle, returned as the closing path of names.
fn find_cycle(stages: &[StageSpec], prerequisites: &[Vec<usize>]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    fn visit(
        node: usize,
        prerequisites: &[Vec<usize>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::Active;
        path.push(node);
        for &next in &prerequisites[node] {
            match marks[next] {
                Mark::New => {
                    if let Some(cycle) = visit(next, prerequisites, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Active => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::New; stages.len()];
    let mut path = Vec::new();
    for node in 0..stages.len() {
        if marks[node] == Mark::New {
            if let Some(cycle) = visit(node, prerequisites, &mut marks, &mut path) {
                return Some(cycle.into_iter().map(|i| stages[i].name.clone()).collect());
            }
        }
    }
    None
}
