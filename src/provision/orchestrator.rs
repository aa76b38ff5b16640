//! Dependency graph orchestrator.
//!
//! Libraries are provisioned in topological order of their `requires`
//! edges. Each library moves through
//! `Pending -> Fetching -> Patching -> Building -> Verified`, or settles
//! early as `GatedOut`, `Verified` (supplied or already installed) or
//! `Failed`. A failure is never retried and forces every transitive
//! dependent to `Failed` without attempting any of its steps.
//!
//! Libraries whose prerequisites have all settled form a wave; a wave runs
//! on a local rayon pool sized by the context's job count.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rayon::prelude::*;

use crate::core::context::BuildContext;
use crate::core::library::{env_name, LibrarySpec};
use crate::provision::errors::ProvisionError;
use crate::provision::events::ProvisionEvent;
use crate::provision::locator;
use crate::provision::result::{LibraryOutcome, Origin, ProvisionResult, ProvisionState, RunReport};
use crate::provision::steps::ProvisionSteps;
use crate::provision::verifier::verify;

/// Validated, acyclic library graph. Edges point from a prerequisite to
/// its dependent.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<LibrarySpec, ()>,
    index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph, rejecting duplicate names, unknown prerequisites,
    /// markers claimed by two libraries, and cycles.
    pub fn new(specs: Vec<LibrarySpec>) -> Result<Self, ProvisionError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for spec in specs {
            if index.contains_key(&spec.name) {
                return Err(ProvisionError::DuplicateLibrary { library: spec.name });
            }
            let name = spec.name.clone();
            let node = graph.add_node(spec);
            index.insert(name, node);
        }

        let mut stems: HashMap<String, &str> = HashMap::new();
        for spec in graph.node_weights() {
            if let Some(other) = stems.insert(spec.env_name(), &spec.name) {
                return Err(ProvisionError::Configuration {
                    library: spec.name.clone(),
                    message: format!(
                        "`{}` and `{}` share the variable stem {}",
                        other,
                        spec.name,
                        spec.env_name()
                    ),
                });
            }
        }
        for spec in graph.node_weights() {
            for feature in &spec.gate {
                if let Some(other) = stems.get(&env_name(feature)) {
                    return Err(ProvisionError::Configuration {
                        library: other.to_string(),
                        message: format!(
                            "library `{}` and feature `{}` share ENABLE_{}",
                            other,
                            feature,
                            env_name(feature)
                        ),
                    });
                }
            }
        }

        let mut owners: HashMap<PathBuf, String> = HashMap::new();
        for node in graph.node_indices() {
            let spec = &graph[node];
            for marker in &spec.markers {
                let normalized: PathBuf = marker.components().collect();
                if let Some(other) = owners.insert(normalized, spec.name.clone()) {
                    if other != spec.name {
                        return Err(ProvisionError::OverlappingMarkers {
                            library: spec.name.clone(),
                            other,
                            marker: marker.clone(),
                        });
                    }
                }
            }
        }

        let mut edges = Vec::new();
        for node in graph.node_indices() {
            let spec = &graph[node];
            for prerequisite in &spec.requires {
                let Some(&from) = index.get(prerequisite) else {
                    return Err(ProvisionError::UnknownPrerequisite {
                        library: spec.name.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                };
                edges.push((from, node));
            }
        }
        for (from, to) in edges {
            graph.update_edge(from, to, ());
        }

        let order = toposort(&graph, None).map_err(|cycle| ProvisionError::Cycle {
            libraries: cycle_members(&graph, cycle.node_id()),
        })?;

        Ok(DependencyGraph {
            graph,
            index,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn get(&self, name: &str) -> Option<&LibrarySpec> {
        self.index.get(name).map(|&node| &self.graph[node])
    }

    /// Libraries with every prerequisite before its dependents.
    pub fn order(&self) -> Vec<&LibrarySpec> {
        self.order.iter().map(|&node| &self.graph[node]).collect()
    }

    /// Direct prerequisites of a library.
    pub fn prerequisites(&self, name: &str) -> Vec<&LibrarySpec> {
        match self.index.get(name) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|n| &self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// The sub-graph of `names` and everything they transitively require.
    pub fn restrict(&self, names: &[String]) -> Result<Self, ProvisionError> {
        let mut keep = HashSet::new();
        let mut stack = Vec::new();
        for name in names {
            let node = self.index.get(name).ok_or_else(|| ProvisionError::Configuration {
                library: name.clone(),
                message: "no such library in the manifest".to_string(),
            })?;
            stack.push(*node);
        }
        while let Some(node) = stack.pop() {
            if keep.insert(node) {
                stack.extend(self.graph.neighbors_directed(node, Direction::Incoming));
            }
        }

        let specs = self
            .order
            .iter()
            .filter(|node| keep.contains(*node))
            .map(|&node| self.graph[node].clone())
            .collect();
        DependencyGraph::new(specs)
    }
}

/// Names of the strongly connected component containing `node`, sorted,
/// with the first repeated to close the cycle.
fn cycle_members(graph: &DiGraph<LibrarySpec, ()>, node: NodeIndex) -> Vec<String> {
    let component = tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&node))
        .unwrap_or_else(|| vec![node]);
    let mut names: Vec<String> = component.iter().map(|&n| graph[n].name.clone()).collect();
    names.sort();
    if let Some(first) = names.first().cloned() {
        names.push(first);
    }
    names
}

/// Outcome of evaluating a library's feature gate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Gate {
    Open,
    Closed(String),
    Conflict(String),
}

fn evaluate_gate(spec: &LibrarySpec, ctx: &BuildContext) -> Gate {
    let toggle = ctx.library_toggle(spec);
    if toggle == Some(false) {
        return Gate::Closed(format!("{} is off", spec.enable_var()));
    }

    let disabled: Vec<&str> = spec
        .gate
        .iter()
        .filter(|feature| !ctx.feature_enabled(feature))
        .map(String::as_str)
        .collect();
    if disabled.is_empty() {
        return Gate::Open;
    }

    let features = disabled
        .iter()
        .map(|f| format!("`{}`", f))
        .collect::<Vec<_>>()
        .join(", ");
    if toggle == Some(true) {
        Gate::Conflict(format!(
            "{} is on but required feature {} is disabled",
            spec.enable_var(),
            features
        ))
    } else {
        Gate::Closed(format!("feature {} is disabled", features))
    }
}

/// Drives the provisioning of a whole graph.
pub struct Orchestrator<'a, S: ProvisionSteps> {
    ctx: &'a BuildContext,
    steps: &'a S,
    observer: Option<&'a (dyn Fn(&ProvisionEvent) + Sync)>,
}

impl<'a, S: ProvisionSteps> Orchestrator<'a, S> {
    pub fn new(ctx: &'a BuildContext, steps: &'a S) -> Self {
        Orchestrator {
            ctx,
            steps,
            observer: None,
        }
    }

    /// Receive every state transition as it happens.
    pub fn with_observer(mut self, observer: &'a (dyn Fn(&ProvisionEvent) + Sync)) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Provision every library of the graph. Each library is settled
    /// exactly once.
    pub fn run(&self, graph: &DependencyGraph) -> RunReport {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.ctx.jobs.max(1))
            .build()
            .map_err(|e| tracing::debug!("running sequentially: {}", e))
            .ok();

        let mut settled: HashMap<String, ProvisionState> = HashMap::new();
        let mut remaining = graph.order();

        while !remaining.is_empty() {
            let (wave, blocked): (Vec<&LibrarySpec>, Vec<&LibrarySpec>) = remaining
                .into_iter()
                .partition(|spec| spec.requires.iter().all(|r| settled.contains_key(r)));

            let results: Vec<(String, ProvisionState)> = match pool {
                Some(ref pool) if wave.len() > 1 => pool.install(|| {
                    wave.par_iter()
                        .map(|spec| (spec.name.clone(), self.provision(spec, &settled)))
                        .collect()
                }),
                _ => wave
                    .iter()
                    .map(|spec| (spec.name.clone(), self.provision(spec, &settled)))
                    .collect(),
            };

            settled.extend(results);
            remaining = blocked;
        }

        let outcomes = graph
            .order()
            .into_iter()
            .map(|spec| LibraryOutcome {
                library: spec.name.clone(),
                optional: spec.optional,
                state: settled
                    .remove(&spec.name)
                    .unwrap_or(ProvisionState::Pending),
            })
            .collect();

        RunReport { outcomes }
    }

    fn emit(&self, library: &str, state: &ProvisionState) {
        if let Some(observer) = self.observer {
            observer(&ProvisionEvent::state(library, state));
        }
    }

    /// Settle one library whose prerequisites have all settled.
    fn provision(&self, spec: &LibrarySpec, settled: &HashMap<String, ProvisionState>) -> ProvisionState {
        let state = self.decide(spec, settled);
        match state {
            ProvisionState::GatedOut { ref reason } => {
                tracing::info!("skipping `{}`: {}", spec.name, reason)
            }
            ProvisionState::Verified(ref result) => {
                tracing::info!("`{}` found at {} ({})", spec.name, result.root.display(), result.origin)
            }
            ProvisionState::Failed(ref err) if err.is_propagated() => {
                tracing::warn!("{}", err)
            }
            ProvisionState::Failed(ref err) => tracing::error!("{}", err),
            _ => {}
        }
        self.emit(&spec.name, &state);
        state
    }

    fn decide(&self, spec: &LibrarySpec, settled: &HashMap<String, ProvisionState>) -> ProvisionState {
        match evaluate_gate(spec, self.ctx) {
            Gate::Open => {}
            Gate::Closed(reason) => return ProvisionState::GatedOut { reason },
            Gate::Conflict(message) => {
                return ProvisionState::Failed(ProvisionError::Configuration {
                    library: spec.name.clone(),
                    message,
                })
            }
        }

        if let Some(failed) = spec
            .requires
            .iter()
            .find(|r| !matches!(settled.get(*r), Some(ProvisionState::Verified(_)) | Some(ProvisionState::GatedOut { .. })))
        {
            return ProvisionState::Failed(ProvisionError::PrerequisiteFailed {
                library: spec.name.clone(),
                prerequisite: failed.clone(),
            });
        }
        if let Some(gated) = spec
            .requires
            .iter()
            .find(|r| matches!(settled.get(*r), Some(ProvisionState::GatedOut { .. })))
        {
            return ProvisionState::GatedOut {
                reason: format!("prerequisite `{}` is gated out", gated),
            };
        }

        let prerequisites: BTreeMap<String, PathBuf> = spec
            .requires
            .iter()
            .filter_map(|r| settled.get(r)?.result().map(|res| (r.clone(), res.root.clone())))
            .collect();

        match self.acquire(spec, &prerequisites) {
            Ok(result) => ProvisionState::Verified(result),
            Err(err) => ProvisionState::Failed(err),
        }
    }

    fn acquire(
        &self,
        spec: &LibrarySpec,
        prerequisites: &BTreeMap<String, PathBuf>,
    ) -> Result<ProvisionResult, ProvisionError> {
        if let Some(root) = self.ctx.supplied_path(spec) {
            return verify(spec, root, Origin::Supplied);
        }

        let install_root = self.ctx.install_root.as_path();
        if locator::check(spec, install_root).is_found() {
            return verify(spec, install_root, Origin::Installed);
        }

        self.emit(&spec.name, &ProvisionState::Fetching);
        let source = self.steps.fetch(spec, self.ctx)?;

        self.emit(&spec.name, &ProvisionState::Patching);
        if !spec.patches.is_empty() {
            self.steps.patch(spec, &source)?;
        }

        self.emit(&spec.name, &ProvisionState::Building);
        self.steps.build(spec, self.ctx, &source, prerequisites)?;

        verify(spec, install_root, Origin::Built)
    }
}

/// What a run would do for one library, computed without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    GatedOut { reason: String },
    Invalid { message: String },
    UseSupplied { root: PathBuf, found: bool },
    AlreadyInstalled { root: PathBuf },
    Build { source: String, patches: usize, recipe: &'static str },
    Blocked { prerequisite: String },
}

impl PlannedAction {
    /// Whether this library would be available to its dependents.
    fn available(&self) -> bool {
        matches!(
            self,
            PlannedAction::UseSupplied { found: true, .. }
                | PlannedAction::AlreadyInstalled { .. }
                | PlannedAction::Build { .. }
        )
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedAction::GatedOut { reason } => write!(f, "gated out ({})", reason),
            PlannedAction::Invalid { message } => write!(f, "invalid ({})", message),
            PlannedAction::UseSupplied { root, found: true } => {
                write!(f, "use supplied {}", root.display())
            }
            PlannedAction::UseSupplied { root, found: false } => {
                write!(f, "supplied {} is missing markers", root.display())
            }
            PlannedAction::AlreadyInstalled { root } => {
                write!(f, "already installed in {}", root.display())
            }
            PlannedAction::Build {
                source,
                patches,
                recipe,
            } => {
                write!(f, "fetch {}", source)?;
                if *patches > 0 {
                    write!(f, ", apply {} patch(es)", patches)?;
                }
                write!(f, ", build ({})", recipe)
            }
            PlannedAction::Blocked { prerequisite } => {
                write!(f, "blocked by `{}`", prerequisite)
            }
        }
    }
}

/// One line of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub library: String,
    pub requires: Vec<String>,
    pub action: PlannedAction,
}

/// Predict what [`Orchestrator::run`] would do, touching nothing.
pub fn preview(graph: &DependencyGraph, ctx: &BuildContext) -> Vec<PlanEntry> {
    let mut planned: HashMap<&str, PlannedAction> = HashMap::new();
    let mut entries = Vec::new();

    for spec in graph.order() {
        let action = preview_one(spec, ctx, &planned);
        planned.insert(spec.name.as_str(), action.clone());
        entries.push(PlanEntry {
            library: spec.name.clone(),
            requires: spec.requires.clone(),
            action,
        });
    }

    entries
}

fn preview_one(spec: &LibrarySpec, ctx: &BuildContext, planned: &HashMap<&str, PlannedAction>) -> PlannedAction {
    match evaluate_gate(spec, ctx) {
        Gate::Open => {}
        Gate::Closed(reason) => return PlannedAction::GatedOut { reason },
        Gate::Conflict(message) => return PlannedAction::Invalid { message },
    }

    for prerequisite in &spec.requires {
        match planned.get(prerequisite.as_str()) {
            Some(action) if action.available() => {}
            Some(PlannedAction::GatedOut { .. }) => {
                return PlannedAction::GatedOut {
                    reason: format!("prerequisite `{}` is gated out", prerequisite),
                }
            }
            _ => {
                return PlannedAction::Blocked {
                    prerequisite: prerequisite.clone(),
                }
            }
        }
    }

    if let Some(root) = ctx.supplied_path(spec) {
        return PlannedAction::UseSupplied {
            root: root.to_path_buf(),
            found: locator::check(spec, root).is_found(),
        };
    }
    if locator::check(spec, &ctx.install_root).is_found() {
        return PlannedAction::AlreadyInstalled {
            root: ctx.install_root.clone(),
        };
    }
    PlannedAction::Build {
        source: spec.source.location(),
        patches: spec.patches.len(),
        recipe: spec.recipe.kind(),
    }
}

/// Roots to report in `status` for a library: the supplied path if any,
/// otherwise the shared install root.
pub fn candidate_roots<'c>(spec: &LibrarySpec, ctx: &'c BuildContext) -> Vec<&'c Path> {
    match ctx.supplied_path(spec) {
        Some(root) => vec![root],
        None => vec![ctx.install_root.as_path()],
    }
}
