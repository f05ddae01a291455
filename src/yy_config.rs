// Node and scenario configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::yy_error::{Error, Result};
use crate::yy_graph::{draw_ids, validate, Topology};
use crate::yy_interface::{Graph, NodeId};

// ============================================================================
// Node Configuration
// ============================================================================

/// Per-node runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// How long the steady-state loop waits for a local command before polling
    /// the transport again (milliseconds)
    pub poll_interval_ms: u64,

    /// Directory served to file requests. `None` serves the in-memory store.
    pub files_dir: Option<PathBuf>,

    /// Report protocol milestones through the logging event sink
    pub enable_event_logging: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            files_dir: None,
            enable_event_logging: true,
        }
    }
}

impl NodeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Scenario-level overrides, applied on top of `NodeConfig::default()`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeConfigOverrides {
    pub poll_interval_ms: Option<u64>,
    pub files_dir: Option<PathBuf>,
    pub enable_event_logging: Option<bool>,
}

impl NodeConfigOverrides {
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(v) = self.poll_interval_ms {
            config.poll_interval_ms = v;
        }
        if let Some(ref v) = self.files_dir {
            config.files_dir = Some(v.clone());
        }
        if let Some(v) = self.enable_event_logging {
            config.enable_event_logging = v;
        }
    }
}

// ============================================================================
// Scenario Files
// ============================================================================

fn default_max_id() -> NodeId {
    1000
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScenarioMeta {
    pub name: Option<String>,
    pub description: Option<String>,
    pub hypothesis: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKeyword {
    /// The node the election is expected to pick (the smallest id)
    Leader,
}

/// How actions and file lists name a node: a literal id, a position in the
/// topology's id order, or a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Id(NodeId),
    Index { index: usize },
    Keyword(NodeKeyword),
}

impl NodeRef {
    pub fn resolve(&self, ids: &[NodeId]) -> Result<NodeId> {
        match self {
            NodeRef::Id(id) if ids.contains(id) => Ok(*id),
            NodeRef::Id(id) => Err(Error::Config(format!("node {} is not in the topology", id))),
            NodeRef::Index { index } => ids.get(*index).copied().ok_or_else(|| {
                Error::Config(format!("index {} out of {} nodes", index, ids.len()))
            }),
            NodeRef::Keyword(NodeKeyword::Leader) => ids
                .iter()
                .min()
                .copied()
                .ok_or_else(|| Error::Config("empty topology has no leader".into())),
        }
    }
}

/// Files one node serves
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeFiles {
    pub node: NodeRef,
    pub files: BTreeMap<String, String>,
}

/// Steady-state traffic, issued in order once setup is done
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Text that must arrive at `to` unmodified
    Send {
        from: NodeRef,
        to: NodeRef,
        body: String,
    },

    /// File request. `expect_contents: None` expects the peer to have no such file.
    RequestFile {
        from: NodeRef,
        to: NodeRef,
        filename: String,
        #[serde(default)]
        expect_contents: Option<String>,
    },
}

/// Scenario file format
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioFile {
    #[serde(default)]
    pub meta: ScenarioMeta,

    pub topology: Topology,

    /// Ids for shaped topologies, in placement order. Drawn at random when absent.
    #[serde(default)]
    pub ids: Option<Vec<NodeId>>,

    /// Seed for id drawing
    #[serde(default)]
    pub seed: Option<u64>,

    /// Drawn ids fall in `1..=max_id`
    #[serde(default = "default_max_id")]
    pub max_id: NodeId,

    #[serde(default)]
    pub node_config: NodeConfigOverrides,

    #[serde(default)]
    pub files: Vec<NodeFiles>,

    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
}

impl ScenarioFile {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn node_config(&self) -> NodeConfig {
        let mut config = NodeConfig::default();
        self.node_config.apply(&mut config);
        config
    }

    /// Node ids in topology order, and the graph they form
    pub fn build_graph(&self, rng: &mut StdRng) -> Result<(Vec<NodeId>, Graph)> {
        let ids = match (&self.topology, &self.ids) {
            (Topology::Edges { .. }, Some(_)) => {
                return Err(Error::Config(
                    "ids only apply to shaped topologies, an edge list names its own".into(),
                ))
            }
            (Topology::Edges { .. }, None) => Vec::new(),
            (_, Some(ids)) => ids.clone(),
            (topology, None) => draw_ids(topology.node_count(), self.max_id, rng)?,
        };

        let graph = self.topology.build(&ids)?;
        if graph.len() != self.topology.node_count() {
            return Err(Error::Config(format!(
                "{} distinct ids for {} nodes",
                graph.len(),
                self.topology.node_count()
            )));
        }
        validate(&graph)?;

        let ids = if ids.is_empty() {
            graph.keys().copied().collect()
        } else {
            ids
        };
        Ok((ids, graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const CYCLE: &str = r#"
meta:
  name: "Four node cycle"
  description: "The ring walks the cycle itself"
topology:
  kind: edges
  edges: [[1, 3], [3, 5], [5, 9], [9, 1]]
node_config:
  poll_interval_ms: 20
files:
  - node: 9
    files:
      map.txt: "1-3-5-9"
actions:
  - action: send
    from: 1
    to: 5
    body: "hello"
  - action: request_file
    from: leader
    to: { index: 3 }
    filename: map.txt
    expect_contents: "1-3-5-9"
  - action: request_file
    from: 3
    to: 9
    filename: nothing.txt
"#;

    #[test]
    fn test_parse_cycle_scenario() {
        let scenario = ScenarioFile::from_yaml_str(CYCLE).unwrap();
        assert_eq!(scenario.meta.name.as_deref(), Some("Four node cycle"));
        assert_eq!(scenario.node_config().poll_interval_ms, 20);
        assert!(scenario.node_config().enable_event_logging);
        assert_eq!(scenario.files[0].node, NodeRef::Id(9));
        assert_eq!(scenario.actions.len(), 3);

        match &scenario.actions[1] {
            ScenarioAction::RequestFile {
                from,
                to,
                expect_contents,
                ..
            } => {
                assert_eq!(*from, NodeRef::Keyword(NodeKeyword::Leader));
                assert_eq!(*to, NodeRef::Index { index: 3 });
                assert_eq!(expect_contents.as_deref(), Some("1-3-5-9"));
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert!(matches!(
            scenario.actions[2],
            ScenarioAction::RequestFile {
                expect_contents: None,
                ..
            }
        ));

        let mut rng = StdRng::seed_from_u64(1);
        let (ids, graph) = scenario.build_graph(&mut rng).unwrap();
        assert_eq!(ids, vec![1, 3, 5, 9]);
        assert_eq!(graph.len(), 4);
        assert_eq!(NodeRef::Keyword(NodeKeyword::Leader).resolve(&ids).unwrap(), 1);
        assert_eq!(NodeRef::Index { index: 3 }.resolve(&ids).unwrap(), 9);
        assert!(NodeRef::Id(4).resolve(&ids).is_err());
    }

    #[test]
    fn test_shaped_topology_draws_seeded_ids() {
        let yaml = r#"
topology:
  kind: cycle
  nodes: 6
seed: 42
max_id: 50
"#;
        let scenario = ScenarioFile::from_yaml_str(yaml).unwrap();
        let seed = scenario.seed.unwrap();
        let (a, graph) = scenario.build_graph(&mut StdRng::seed_from_u64(seed)).unwrap();
        let (b, _) = scenario.build_graph(&mut StdRng::seed_from_u64(seed)).unwrap();
        assert_eq!(a, b);
        assert_eq!(graph.len(), 6);
        assert!(a.iter().all(|id| (1..=50).contains(id)));
    }

    #[test]
    fn test_explicit_ids_for_shape() {
        let yaml = r#"
topology: { kind: star, nodes: 3 }
ids: [7, 2, 9]
"#;
        let scenario = ScenarioFile::from_yaml_str(yaml).unwrap();
        let (ids, graph) = scenario.build_graph(&mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(ids, vec![7, 2, 9]);
        assert_eq!(graph[&7].len(), 2);

        let dup = ScenarioFile::from_yaml_str("topology: { kind: line, nodes: 3 }\nids: [4, 4, 5]\n")
            .unwrap();
        assert!(dup.build_graph(&mut StdRng::seed_from_u64(0)).is_err());
    }

    #[test]
    fn test_disconnected_edges_rejected() {
        let yaml = "topology: { kind: edges, edges: [[1, 2], [3, 4]] }\n";
        let scenario = ScenarioFile::from_yaml_str(yaml).unwrap();
        let err = scenario.build_graph(&mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_ids_with_edge_list_rejected() {
        let yaml = "topology: { kind: edges, edges: [[1, 2]] }\nids: [1, 2]\n";
        let scenario = ScenarioFile::from_yaml_str(yaml).unwrap();
        let err = scenario.build_graph(&mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_huge_max_id_draws_lazily() {
        let yaml = "topology: { kind: line, nodes: 4 }\nseed: 3\nmax_id: 1000000000000\n";
        let scenario = ScenarioFile::from_yaml_str(yaml).unwrap();
        let (ids, graph) = scenario.build_graph(&mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_bad_yaml_is_config_error() {
        let err = ScenarioFile::from_yaml_str("topology: [nope").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_node_config_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert!(config.files_dir.is_none());
    }
}
