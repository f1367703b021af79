//! The DAG model — run this before scheduling or executing a workflow.
//!
//! Invariants enforced on every successful mutation:
//! (I1) no self-edge; (I2) no directed cycle; (I3) adjacency is kept
//! bidirectionally consistent; (I4) every referenced dependency id exists;
//! (I5) node ids are unique within a graph.
//!
//! Topological order and layering are cached; any structural mutation
//! (`add_node`, `add_edge`, `remove_node`) invalidates both caches.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::EngineError;

/// A boxed nullary async operation returning success or error. `None` is
/// treated as success without being invoked.
pub type Runner = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>> + Send + Sync>;

/// How the scheduler fans a node out against its same-layer peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// The scheduler waits for this node to finish before dispatching any
    /// further node in the same topological layer.
    Serial,
    /// No same-layer barrier.
    Parallel,
    /// Scheduled like `Parallel`; kept as a distinct value because the
    /// source system named a third mode without defining behavior beyond
    /// "not serial, not plain parallel" — see DESIGN.md.
    Mixed,
}

/// What the scheduler does when a node's runner returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failure propagates; the scheduler cancels in-flight work.
    Abort,
    /// Failure is swallowed; downstream dependents proceed as if succeeded.
    Skip,
    /// As `Skip`, but the run ends with a synthetic "skipped failures" error.
    SkipButReport,
    /// Delegated to the task executor's retry loop; after exhaustion,
    /// behaves like `Abort`.
    Retry,
}

#[derive(Debug, Clone)]
pub struct NodePolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub on_failure: FailurePolicy,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::from_millis(500),
            on_failure: FailurePolicy::Abort,
        }
    }
}

/// Run-time node state. Monotonically advances except when explicitly
/// reset by a resume-set / snapshot load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    fn to_u8(self) -> u8 {
        match self {
            NodeState::Pending => 0,
            NodeState::Running => 1,
            NodeState::Succeeded => 2,
            NodeState::Failed => 3,
            NodeState::Skipped => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => NodeState::Running,
            2 => NodeState::Succeeded,
            3 => NodeState::Failed,
            4 => NodeState::Skipped,
            _ => NodeState::Pending,
        }
    }
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new(s: NodeState) -> Self {
        Self(AtomicU8::new(s.to_u8()))
    }

    fn load(&self) -> NodeState {
        NodeState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, s: NodeState) {
        self.0.store(s.to_u8(), Ordering::SeqCst);
    }
}

/// A single-shot broadcast primitive: many waiters, one closer, safe under
/// repeated close attempts (the "once" primitive required by the design).
#[derive(Default)]
pub struct DoneSignal {
    closed: AtomicBool,
    notify: Notify,
}

impl DoneSignal {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Close the signal. Idempotent — only the first call actually wakes
    /// waiters.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until closed. Race-free: the `notified()` future is created
    /// before the re-check, so a `close()` landing between the first check
    /// and the `.await` is never missed.
    pub async fn wait(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// The run-time unit. Construct via [`NodeDescriptor`] + [`Graph::build`].
pub struct NodeInner {
    pub id: String,
    pub mode: RunMode,
    pub policy: NodePolicy,
    pub runner: Option<Runner>,
    predecessors: RwLock<HashSet<String>>,
    successors: RwLock<HashSet<String>>,
    state: StateCell,
    pub done: DoneSignal,
}

impl NodeInner {
    pub fn state(&self) -> NodeState {
        self.state.load()
    }

    pub fn set_state(&self, s: NodeState) {
        self.state.store(s);
    }

    pub fn predecessors(&self) -> Vec<String> {
        self.predecessors.read().unwrap().iter().cloned().collect()
    }

    pub fn successors(&self) -> Vec<String> {
        self.successors.read().unwrap().iter().cloned().collect()
    }

    /// Mark a resumed node as already-succeeded with its done-signal
    /// already closed, per the scheduler's resume-set semantics.
    pub fn mark_resumed(&self) {
        self.state.store(NodeState::Succeeded);
        self.done.close();
    }
}

/// Construction input for one node.
pub struct NodeDescriptor {
    pub id: String,
    pub mode: RunMode,
    pub deps: Vec<String>,
    pub runner: Option<Runner>,
    pub policy: NodePolicy,
}

impl NodeDescriptor {
    pub fn new(id: impl Into<String>, mode: RunMode) -> Self {
        Self {
            id: id.into(),
            mode,
            deps: Vec::new(),
            runner: None,
            policy: NodePolicy::default(),
        }
    }

    pub fn with_deps(mut self, deps: Vec<String>) -> Self {
        self.deps = deps;
        self
    }

    pub fn with_runner(mut self, runner: Runner) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_policy(mut self, policy: NodePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// A node's structural shape, used for the canonical snapshot / hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StructuralTuple {
    id: String,
    sorted_deps: Vec<String>,
    mode: &'static str,
}

fn mode_tag(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Serial => "serial",
        RunMode::Parallel => "parallel",
        RunMode::Mixed => "mixed",
    }
}

/// The DAG container.
pub struct Graph {
    nodes: RwLock<HashMap<String, Arc<NodeInner>>>,
    topo_cache: RwLock<Option<Arc<Vec<String>>>>,
    layer_cache: RwLock<Option<Arc<Vec<Vec<String>>>>>,
    aborted: AtomicBool,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("node_ids", &self.nodes.read().unwrap().keys().collect::<Vec<_>>())
            .field("aborted", &self.aborted.load(Ordering::SeqCst))
            .finish()
    }
}

impl Graph {
    /// Build a graph from node descriptors. No partial graph is observable
    /// on failure.
    pub fn build(descriptors: Vec<NodeDescriptor>) -> Result<Self, EngineError> {
        let mut seen = HashSet::new();
        for d in &descriptors {
            if !seen.insert(d.id.clone()) {
                return Err(EngineError::DuplicateNodeId(d.id.clone()));
            }
        }

        let ids: HashSet<&str> = descriptors.iter().map(|d| d.id.as_str()).collect();

        // Self-edges and unknown dependencies are rejected up front;
        // whitespace-only dependency ids are silently dropped.
        let mut clean: Vec<(String, Vec<String>)> = Vec::with_capacity(descriptors.len());
        for d in &descriptors {
            let mut deps = Vec::new();
            for dep in &d.deps {
                if dep.trim().is_empty() {
                    continue;
                }
                if dep == &d.id {
                    return Err(EngineError::SelfLoop(d.id.clone()));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(EngineError::UnknownDependency {
                        node_id: d.id.clone(),
                        dep: dep.clone(),
                    });
                }
                deps.push(dep.clone());
            }
            clean.push((d.id.clone(), deps));
        }

        detect_cycle(&clean)?;

        let mut successors: HashMap<String, HashSet<String>> =
            clean.iter().map(|(id, _)| (id.clone(), HashSet::new())).collect();
        for (id, deps) in &clean {
            for dep in deps {
                successors.get_mut(dep).unwrap().insert(id.clone());
            }
        }

        let mut nodes = HashMap::new();
        for d in descriptors {
            let (_, deps) = clean.iter().find(|(id, _)| id == &d.id).unwrap();
            let node = NodeInner {
                predecessors: RwLock::new(deps.iter().cloned().collect()),
                successors: RwLock::new(successors.remove(&d.id).unwrap_or_default()),
                state: StateCell::new(NodeState::Pending),
                done: DoneSignal::new(),
                id: d.id.clone(),
                mode: d.mode,
                runner: d.runner,
                policy: d.policy,
            };
            nodes.insert(d.id, Arc::new(node));
        }

        Ok(Self {
            nodes: RwLock::new(nodes),
            topo_cache: RwLock::new(None),
            layer_cache: RwLock::new(None),
            aborted: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, id: &str) -> Result<Arc<NodeInner>, EngineError> {
        self.nodes
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.read().unwrap().keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Global failure atom
    // ------------------------------------------------------------------

    pub fn trigger_abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    pub fn add_node(&self, descriptor: NodeDescriptor) -> Result<(), EngineError> {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.contains_key(&descriptor.id) {
            return Err(EngineError::DuplicateNodeId(descriptor.id));
        }

        let mut deps = Vec::new();
        for dep in &descriptor.deps {
            if dep.trim().is_empty() {
                continue;
            }
            if dep == &descriptor.id {
                return Err(EngineError::SelfLoop(descriptor.id));
            }
            if !nodes.contains_key(dep) {
                return Err(EngineError::UnknownDependency {
                    node_id: descriptor.id.clone(),
                    dep: dep.clone(),
                });
            }
            deps.push(dep.clone());
        }

        // Tentatively link, re-check acyclicity, roll back on failure.
        for dep in &deps {
            nodes.get(dep).unwrap().successors.write().unwrap().insert(descriptor.id.clone());
        }

        let node = Arc::new(NodeInner {
            predecessors: RwLock::new(deps.iter().cloned().collect()),
            successors: RwLock::new(HashSet::new()),
            state: StateCell::new(NodeState::Pending),
            done: DoneSignal::new(),
            id: descriptor.id.clone(),
            mode: descriptor.mode,
            runner: descriptor.runner,
            policy: descriptor.policy,
        });
        nodes.insert(descriptor.id.clone(), node);

        if let Err(e) = check_acyclic_locked(&nodes) {
            // Roll back.
            nodes.remove(&descriptor.id);
            for dep in &deps {
                nodes.get(dep).unwrap().successors.write().unwrap().remove(&descriptor.id);
            }
            return Err(e);
        }

        drop(nodes);
        self.invalidate_caches();
        Ok(())
    }

    pub fn add_edge(&self, u: &str, v: &str) -> Result<(), EngineError> {
        if u == v {
            return Err(EngineError::SelfLoop(u.to_string()));
        }
        let nodes = self.nodes.write().unwrap();
        let u_node = nodes.get(u).ok_or_else(|| EngineError::NodeNotFound(u.to_string()))?;
        let v_node = nodes.get(v).ok_or_else(|| EngineError::NodeNotFound(v.to_string()))?;

        if reaches(&nodes, v, u) {
            return Err(EngineError::Cycle { path: vec![u.to_string(), v.to_string()] });
        }

        u_node.successors.write().unwrap().insert(v.to_string());
        v_node.predecessors.write().unwrap().insert(u.to_string());
        drop(nodes);
        self.invalidate_caches();
        Ok(())
    }

    pub fn remove_node(&self, id: &str) -> Result<(), EngineError> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes.get(id).ok_or_else(|| EngineError::NodeNotFound(id.to_string()))?.clone();

        for pred in node.predecessors.read().unwrap().iter() {
            if let Some(p) = nodes.get(pred) {
                p.successors.write().unwrap().remove(id);
            }
        }
        for succ in node.successors.read().unwrap().iter() {
            if let Some(s) = nodes.get(succ) {
                s.predecessors.write().unwrap().remove(id);
            }
        }
        nodes.remove(id);

        if check_acyclic_locked(&nodes).is_err() {
            return Err(EngineError::Internal(
                "cycle detected after RemoveNode — invariant violation".into(),
            ));
        }

        drop(nodes);
        self.invalidate_caches();
        Ok(())
    }

    fn invalidate_caches(&self) {
        *self.topo_cache.write().unwrap() = None;
        *self.layer_cache.write().unwrap() = None;
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    /// Kahn's-algorithm topological order. Cached; double-checked
    /// invalidation keeps concurrent readers from ever observing a torn
    /// read.
    pub fn topo_sort(&self) -> Result<Arc<Vec<String>>, EngineError> {
        if let Some(cached) = self.topo_cache.read().unwrap().clone() {
            return Ok(cached);
        }
        let mut cache = self.topo_cache.write().unwrap();
        if let Some(cached) = cache.clone() {
            return Ok(cached);
        }

        let nodes = self.nodes.read().unwrap();
        let order = kahn_order(&nodes)?;
        let order = Arc::new(order);
        *cache = Some(order.clone());
        Ok(order)
    }

    /// Layered topology: layer k holds every node whose longest incoming
    /// path has length k. Cached the same way as `topo_sort`.
    pub fn topo_layers(&self) -> Result<Arc<Vec<Vec<String>>>, EngineError> {
        if let Some(cached) = self.layer_cache.read().unwrap().clone() {
            return Ok(cached);
        }
        let mut cache = self.layer_cache.write().unwrap();
        if let Some(cached) = cache.clone() {
            return Ok(cached);
        }

        let nodes = self.nodes.read().unwrap();
        let layers = layered_order(&nodes)?;
        let layers = Arc::new(layers);
        *cache = Some(layers.clone());
        Ok(layers)
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// DOT-like directed-graph text.
    pub fn to_dot(&self) -> String {
        let nodes = self.nodes.read().unwrap();
        let mut out = String::from("digraph workflow {\n");
        let mut ids: Vec<&String> = nodes.keys().collect();
        ids.sort();
        for id in &ids {
            out.push_str(&format!("  \"{id}\";\n"));
        }
        for id in &ids {
            let node = &nodes[*id];
            let mut succs: Vec<String> = node.successors.read().unwrap().iter().cloned().collect();
            succs.sort();
            for succ in succs {
                out.push_str(&format!("  \"{id}\" -> \"{succ}\";\n"));
            }
        }
        out.push_str("}\n");
        out
    }

    /// Top-down flow-chart text with edges `u --> v;`.
    pub fn to_flowchart(&self) -> String {
        let nodes = self.nodes.read().unwrap();
        let mut out = String::from("flowchart TD\n");
        let mut ids: Vec<&String> = nodes.keys().collect();
        ids.sort();
        for id in &ids {
            let node = &nodes[*id];
            let mut succs: Vec<String> = node.successors.read().unwrap().iter().cloned().collect();
            succs.sort();
            for succ in succs {
                out.push_str(&format!("  {id} --> {succ};\n"));
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    /// `map<id, state>`, used to persist/resume progress.
    pub fn state_snapshot(&self) -> HashMap<String, NodeState> {
        self.nodes
            .read()
            .unwrap()
            .iter()
            .map(|(id, n)| (id.clone(), n.state()))
            .collect()
    }

    /// Canonical `(id, sorted_deps, mode)` tuples ordered by id.
    fn structural_tuples(&self) -> Vec<StructuralTuple> {
        let nodes = self.nodes.read().unwrap();
        let mut tuples: Vec<StructuralTuple> = nodes
            .values()
            .map(|n| {
                let mut deps = n.predecessors();
                deps.sort();
                StructuralTuple {
                    id: n.id.clone(),
                    sorted_deps: deps,
                    mode: mode_tag(n.mode),
                }
            })
            .collect();
        tuples.sort();
        tuples
    }

    /// Canonical structural snapshot string. Equal strings imply equal
    /// graphs up to node/dependency ordering.
    pub fn structural_snapshot(&self) -> String {
        let tuples = self.structural_tuples();
        let mut out = String::new();
        for t in tuples {
            out.push_str(&format!("{}|{}|{}\n", t.id, t.sorted_deps.join(","), t.mode));
        }
        out
    }

    /// MD5 content hash of the structural snapshot — the graph's
    /// structural version tag.
    pub fn structural_hash(&self) -> String {
        use md5::{Digest, Md5};
        let mut hasher = Md5::new();
        hasher.update(self.structural_snapshot().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn kahn_order(nodes: &HashMap<String, Arc<NodeInner>>) -> Result<Vec<String>, EngineError> {
    let mut in_degree: HashMap<&str, usize> = nodes
        .keys()
        .map(|id| (id.as_str(), nodes[id].predecessors.read().unwrap().len()))
        .collect();

    let mut initial: Vec<&str> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(&id, _)| id).collect();
    initial.sort();
    let mut queue: VecDeque<&str> = initial.into();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        let mut newly_free: Vec<&str> = Vec::new();
        for succ in nodes[id].successors.read().unwrap().iter() {
            let deg = in_degree.get_mut(succ.as_str()).unwrap();
            *deg -= 1;
            if *deg == 0 {
                newly_free.push(nodes.get_key_value(succ).unwrap().0.as_str());
            }
        }
        newly_free.sort();
        for id in newly_free {
            queue.push_back(id);
        }
    }

    if order.len() != nodes.len() {
        let path = reconstruct_cycle(nodes);
        return Err(EngineError::Cycle { path });
    }
    Ok(order)
}

fn layered_order(nodes: &HashMap<String, Arc<NodeInner>>) -> Result<Vec<Vec<String>>, EngineError> {
    let mut in_degree: HashMap<&str, usize> = nodes
        .keys()
        .map(|id| (id.as_str(), nodes[id].predecessors.read().unwrap().len()))
        .collect();

    let mut frontier: Vec<&str> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(&id, _)| id).collect();
    frontier.sort();

    let mut layers = Vec::new();
    let mut visited = 0usize;

    while !frontier.is_empty() {
        let mut next_frontier: Vec<&str> = Vec::new();
        for &id in &frontier {
            for succ in nodes[id].successors.read().unwrap().iter() {
                let deg = in_degree.get_mut(succ.as_str()).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    next_frontier.push(nodes.get_key_value(succ).unwrap().0.as_str());
                }
            }
        }
        visited += frontier.len();
        layers.push(frontier.iter().map(|s| s.to_string()).collect());
        next_frontier.sort();
        frontier = next_frontier;
    }

    if visited != nodes.len() {
        let path = reconstruct_cycle(nodes);
        return Err(EngineError::Cycle { path });
    }
    Ok(layers)
}

/// DFS reconstruction of an offending cycle, truncated at the first
/// revisited on-stack vertex. Purely diagnostic.
fn reconstruct_cycle(nodes: &HashMap<String, Arc<NodeInner>>) -> Vec<String> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: Vec<&str> = Vec::new();
    let mut in_on_stack: HashSet<&str> = HashSet::new();

    let mut ids: Vec<&str> = nodes.keys().map(|s| s.as_str()).collect();
    ids.sort();

    for start in ids {
        if visited.contains(start) {
            continue;
        }
        if let Some(cycle) = dfs_find_cycle(nodes, start, &mut visited, &mut on_stack, &mut in_on_stack) {
            return cycle;
        }
    }
    Vec::new()
}

fn dfs_find_cycle<'a>(
    nodes: &'a HashMap<String, Arc<NodeInner>>,
    node: &'a str,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut Vec<&'a str>,
    in_on_stack: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    on_stack.push(node);
    in_on_stack.insert(node);

    if let Some(n) = nodes.get(node) {
        let mut succs: Vec<String> = n.successors.read().unwrap().iter().cloned().collect();
        succs.sort();
        for succ in succs {
            let succ_ref = nodes.get_key_value(&succ).unwrap().0.as_str();
            if in_on_stack.contains(succ_ref) {
                let start = on_stack.iter().position(|&x| x == succ_ref).unwrap();
                return Some(on_stack[start..].iter().map(|s| s.to_string()).collect());
            }
            if !visited.contains(succ_ref) {
                if let Some(cycle) = dfs_find_cycle(nodes, succ_ref, visited, on_stack, in_on_stack) {
                    return Some(cycle);
                }
            }
        }
    }

    on_stack.pop();
    in_on_stack.remove(node);
    None
}

/// Whether `from` can reach `to` by following successor edges.
fn reaches(nodes: &HashMap<String, Arc<NodeInner>>, from: &str, to: &str) -> bool {
    let mut stack = vec![from.to_string()];
    let mut seen = HashSet::new();
    while let Some(cur) = stack.pop() {
        if cur == to {
            return true;
        }
        if !seen.insert(cur.clone()) {
            continue;
        }
        if let Some(n) = nodes.get(&cur) {
            for succ in n.successors.read().unwrap().iter() {
                stack.push(succ.clone());
            }
        }
    }
    false
}

fn check_acyclic_locked(nodes: &HashMap<String, Arc<NodeInner>>) -> Result<(), EngineError> {
    kahn_order(nodes).map(|_| ())
}

/// Cycle detection over a not-yet-built descriptor list (construction time).
fn detect_cycle(clean: &[(String, Vec<String>)]) -> Result<(), EngineError> {
    let mut in_degree: HashMap<&str, usize> =
        clean.iter().map(|(id, deps)| (id.as_str(), deps.len())).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = clean.iter().map(|(id, _)| (id.as_str(), Vec::new())).collect();
    for (id, deps) in clean {
        for dep in deps {
            adjacency.get_mut(dep.as_str()).unwrap().push(id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(&id, _)| id).collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for &succ in &adjacency[id] {
            let deg = in_degree.get_mut(succ).unwrap();
            *deg -= 1;
            if *deg == 0 {
                queue.push_back(succ);
            }
        }
    }

    if visited != clean.len() {
        let path = clean
            .iter()
            .filter(|(id, _)| in_degree[id.as_str()] > 0)
            .map(|(id, _)| id.clone())
            .collect();
        return Err(EngineError::Cycle { path });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, deps: &[&str]) -> NodeDescriptor {
        NodeDescriptor::new(id, RunMode::Parallel).with_deps(deps.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn linear_graph_sorts_in_order() {
        let g = Graph::build(vec![node("a", &[]), node("b", &["a"]), node("c", &["b"])]).unwrap();
        let order = g.topo_sort().unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order.iter().position(|x| x == "a"), Some(0));
        assert_eq!(order.iter().position(|x| x == "c"), Some(2));
    }

    #[test]
    fn empty_dep_ids_are_ignored() {
        let g = Graph::build(vec![node("a", &["", "   "])]).unwrap();
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn self_loop_is_rejected() {
        let err = Graph::build(vec![node("a", &["a"])]).unwrap_err();
        assert!(matches!(err, EngineError::SelfLoop(id) if id == "a"));
    }

    #[test]
    fn cycle_is_rejected_with_diagnostic_path() {
        let err = Graph::build(vec![node("a", &["c"]), node("b", &["a"]), node("c", &["b"])]).unwrap_err();
        match err {
            EngineError::Cycle { path } => {
                assert_eq!(path.len(), 3);
                for id in ["a", "b", "c"] {
                    assert!(path.contains(&id.to_string()));
                }
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = Graph::build(vec![node("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownDependency { dep, .. } if dep == "ghost"));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let err = Graph::build(vec![node("a", &[]), node("a", &[])]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateNodeId(id) if id == "a"));
    }

    #[test]
    fn diamond_layers_leaf_first() {
        let g = Graph::build(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &["b", "c"]),
        ])
        .unwrap();
        let layers = g.topo_layers().unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec!["a".to_string()]);
        assert_eq!(layers[2], vec!["d".to_string()]);
        let mut mid = layers[1].clone();
        mid.sort();
        assert_eq!(mid, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn topo_sort_is_cached_across_calls() {
        let g = Graph::build(vec![node("a", &[]), node("b", &["a"])]).unwrap();
        let first = g.topo_sort().unwrap();
        let second = g.topo_sort().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn mutation_invalidates_cache() {
        let g = Graph::build(vec![node("a", &[])]).unwrap();
        let first = g.topo_sort().unwrap();
        g.add_node(node("b", &["a"])).unwrap();
        let second = g.topo_sort().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn add_edge_rejects_introduced_cycle_and_leaves_graph_untouched() {
        let g = Graph::build(vec![node("a", &[]), node("b", &["a"])]).unwrap();
        let before = g.structural_snapshot();
        let err = g.add_edge("b", "a").unwrap_err();
        assert!(matches!(err, EngineError::Cycle { .. }));
        assert_eq!(before, g.structural_snapshot());
    }

    #[test]
    fn add_edge_self_loop_rejected() {
        let g = Graph::build(vec![node("a", &[])]).unwrap();
        assert!(matches!(g.add_edge("a", "a"), Err(EngineError::SelfLoop(_))));
    }

    #[test]
    fn remove_node_updates_neighbor_adjacency() {
        let g = Graph::build(vec![node("a", &[]), node("b", &["a"]), node("c", &["b"])]).unwrap();
        g.remove_node("b").unwrap();
        assert_eq!(g.len(), 2);
        // 'c' no longer depends on a removed node, so it's free to run.
        let layers = g.topo_layers().unwrap();
        assert_eq!(layers.len(), 2);
    }

    #[test]
    fn structural_hash_is_stable_and_order_independent() {
        let g1 = Graph::build(vec![node("a", &[]), node("b", &["a"])]).unwrap();
        let g2 = Graph::build(vec![node("b", &["a"]), node("a", &[])]).unwrap();
        assert_eq!(g1.structural_hash(), g2.structural_hash());
    }

    #[test]
    fn done_signal_wait_returns_immediately_once_closed() {
        let signal = DoneSignal::new();
        signal.close();
        signal.close(); // idempotent
        assert!(signal.is_closed());
    }

    #[test]
    fn export_renderers_produce_readable_text() {
        let g = Graph::build(vec![node("a", &[]), node("b", &["a"])]).unwrap();
        assert!(g.to_dot().contains("\"a\" -> \"b\";"));
        assert!(g.to_flowchart().contains("a --> b;"));
    }
}
