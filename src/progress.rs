//! Roadmap lifecycle and per-node progress tracking.
//!
//! Node status lives only on the roadmap's nodes; the per-user progress map
//! returned by [`ProgressService::fetch`] is projected from them on read, so
//! the two can never disagree.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use ulid::Ulid;

use crate::error::{ServiceError, ServiceResult};
use crate::storage::{RoadmapEdit, RoadmapStore, StorageError};
use crate::types::{NodeInput, NodeStatus, Roadmap, RoadmapNode, RoadmapView};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    Created,
    Replaced,
}

#[derive(Clone)]
pub struct ProgressService {
    store: Arc<dyn RoadmapStore>,
}

impl ProgressService {
    pub fn new(store: Arc<dyn RoadmapStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RoadmapStore> {
        &self.store
    }

    /// Create the user's first roadmap with every node at `not-started`.
    pub async fn create(
        &self,
        user: &str,
        interest: &str,
        nodes: Vec<NodeInput>,
    ) -> ServiceResult<Roadmap> {
        let interest = require_interest(interest)?;
        let nodes = fresh_nodes(nodes)?;
        let now = Utc::now();
        let roadmap = Roadmap {
            id: Ulid::new().to_string(),
            user: user.to_string(),
            interest,
            nodes,
            created_at: now,
            updated_at: now,
        };

        let saved = self.store.insert_roadmap(roadmap).await?;
        tracing::info!(
            user,
            roadmap = %saved.id,
            interest = %saved.interest,
            nodes = saved.nodes.len(),
            "Roadmap created"
        );
        Ok(saved)
    }

    /// Swap interest and nodes wholesale; all progress is reset.
    pub async fn replace(
        &self,
        user: &str,
        interest: &str,
        nodes: Vec<NodeInput>,
    ) -> ServiceResult<Roadmap> {
        let interest = require_interest(interest)?;
        let nodes = fresh_nodes(nodes)?;
        let saved = match self
            .store
            .update_roadmap(user, RoadmapEdit::Replace { interest, nodes })
            .await
        {
            Ok(saved) => saved,
            Err(StorageError::RoadmapNotFound(_)) => {
                return Err(ServiceError::NotFound("No roadmap to update".into()));
            }
            Err(err) => return Err(err.into()),
        };
        tracing::info!(
            user,
            roadmap = %saved.id,
            interest = %saved.interest,
            nodes = saved.nodes.len(),
            "Roadmap replaced"
        );
        Ok(saved)
    }

    pub async fn set_node_status(
        &self,
        user: &str,
        node_id: &str,
        status: &str,
    ) -> ServiceResult<RoadmapNode> {
        let status: NodeStatus = status
            .parse()
            .map_err(|_| ServiceError::InvalidInput("Invalid nodeId or status".into()))?;
        if node_id.trim().is_empty() {
            return Err(ServiceError::InvalidInput("Invalid nodeId or status".into()));
        }

        let saved = self
            .store
            .update_roadmap(
                user,
                RoadmapEdit::SetNodeStatus {
                    node_id: node_id.to_string(),
                    status,
                },
            )
            .await?;
        let node = saved
            .node(node_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound("Node not found".into()))?;
        tracing::info!(user, node = node_id, %status, "Node progress updated");
        Ok(node)
    }

    pub async fn fetch(&self, user: &str) -> ServiceResult<RoadmapView> {
        let roadmap = self.store.find_roadmap(user).await?.ok_or_else(|| {
            ServiceError::NotFound("No roadmap found. Please generate a roadmap first.".into())
        })?;
        Ok(RoadmapView::from(roadmap))
    }

    /// Create the roadmap, or replace it when the user already has one.
    pub async fn import(
        &self,
        user: &str,
        interest: &str,
        nodes: Vec<NodeInput>,
    ) -> ServiceResult<(Roadmap, ImportOutcome)> {
        match self.create(user, interest, nodes.clone()).await {
            Ok(roadmap) => Ok((roadmap, ImportOutcome::Created)),
            Err(ServiceError::AlreadyExists(_)) => {
                let roadmap = self.replace(user, interest, nodes).await?;
                Ok((roadmap, ImportOutcome::Replaced))
            }
            Err(e) => Err(e),
        }
    }
}

fn require_interest(interest: &str) -> ServiceResult<String> {
    let interest = interest.trim();
    if interest.is_empty() {
        return Err(ServiceError::InvalidInput(
            "Interest and nodes are required".into(),
        ));
    }
    Ok(interest.to_string())
}

fn fresh_nodes(inputs: Vec<NodeInput>) -> ServiceResult<Vec<RoadmapNode>> {
    let mut seen = HashSet::new();
    let mut nodes = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.into_iter().enumerate() {
        let id = non_blank(input.id)
            .ok_or_else(|| ServiceError::InvalidInput(format!("Node {index} is missing an id")))?;
        let title = non_blank(input.title).ok_or_else(|| {
            ServiceError::InvalidInput(format!("Node '{id}' is missing a title"))
        })?;
        if !seen.insert(id.clone()) {
            return Err(ServiceError::InvalidInput(format!("Duplicate node id '{id}'")));
        }
        nodes.push(RoadmapNode {
            id,
            title,
            description: input.description,
            resources: input.resources,
            task: input.task,
            status: NodeStatus::NotStarted,
        });
    }
    Ok(nodes)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
