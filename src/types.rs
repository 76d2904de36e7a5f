use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Progress of a single roadmap node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    #[default]
    #[serde(alias = "not_started")]
    NotStarted,
    #[serde(alias = "in_progress")]
    InProgress,
    Completed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::NotStarted => "not-started",
            NodeStatus::InProgress => "in-progress",
            NodeStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not-started" | "not_started" => Ok(NodeStatus::NotStarted),
            "in-progress" | "in_progress" => Ok(NodeStatus::InProgress),
            "completed" => Ok(NodeStatus::Completed),
            _ => Err(format!("Unknown node status: {s}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapNode {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub status: NodeStatus,
}

/// Node content as submitted by a client or a generated draft. Any status the
/// caller sends is ignored; fresh nodes always start at `not-started`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInput {
    #[serde(default, deserialize_with = "id_text")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub resources: Vec<String>,
    #[serde(default)]
    pub task: Option<String>,
}

/// Generated drafts sometimes number their nodes (`"id": 1`).
fn id_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(text) => text,
        Id::Number(n) => n.to_string(),
    }))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roadmap {
    pub id: String,
    pub user: String,
    pub interest: String,
    pub nodes: Vec<RoadmapNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user `node id -> status` view, projected from the roadmap's nodes.
pub type ProgressMirror = BTreeMap<String, NodeStatus>;

impl Roadmap {
    pub fn node(&self, node_id: &str) -> Option<&RoadmapNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn progress(&self) -> ProgressMirror {
        self.nodes
            .iter()
            .map(|n| (n.id.clone(), n.status))
            .collect()
    }

    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary::from_nodes(&self.nodes)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub total: usize,
    pub not_started: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub percent_complete: u8,
}

impl ProgressSummary {
    pub fn from_nodes(nodes: &[RoadmapNode]) -> Self {
        let mut summary = Self {
            total: nodes.len(),
            ..Self::default()
        };
        for node in nodes {
            match node.status {
                NodeStatus::NotStarted => summary.not_started += 1,
                NodeStatus::InProgress => summary.in_progress += 1,
                NodeStatus::Completed => summary.completed += 1,
            }
        }
        if summary.total > 0 {
            summary.percent_complete = (summary.completed * 100 / summary.total) as u8;
        }
        summary
    }
}

/// What `GET /api/roadmap` hands back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapView {
    pub roadmap: Roadmap,
    pub progress: ProgressMirror,
    pub summary: ProgressSummary,
}

impl From<Roadmap> for RoadmapView {
    fn from(roadmap: Roadmap) -> Self {
        Self {
            progress: roadmap.progress(),
            summary: roadmap.summary(),
            roadmap,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
}

/// On-disk document: roadmaps keyed by owning user, sessions keyed by token.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct StorageData {
    #[serde(default)]
    pub roadmaps: HashMap<String, Roadmap>,
    #[serde(default)]
    pub sessions: HashMap<String, Session>,
}
