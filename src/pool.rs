use crate::error::{NodelinkError, Result};
use crate::node::{Node, NodeConfig};
use crate::types::GuildId;
use std::sync::{Arc, Mutex};

/// Owned set of registered nodes with load-based routing
///
/// The pool is created by the [`Client`](crate::Client) and passed by
/// reference to the components that need it; there is no process-wide
/// registry.
pub struct NodePool {
    /// Registration order is preserved; selection ties break toward the
    /// earliest-registered node
    nodes: Mutex<Vec<Arc<Node>>>,
}

impl NodePool {
    pub(crate) fn new() -> Self {
        Self { nodes: Mutex::new(Vec::new()) }
    }

    /// Register a node and spawn its connection
    pub(crate) fn register(&self, config: NodeConfig) -> Result<Arc<Node>> {
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.iter().any(|node| node.identifier() == config.identifier) {
            return Err(NodelinkError::NodeAlreadyExists { identifier: config.identifier });
        }

        let node = Node::new(config);
        nodes.push(node.clone());
        Ok(node)
    }

    /// Drop a node from the pool; the caller closes its connection
    pub(crate) fn remove(&self, identifier: &str) -> Result<Arc<Node>> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.iter().position(|node| node.identifier() == identifier) {
            Some(index) => Ok(nodes.remove(index)),
            None => Err(NodelinkError::NodeNotFound { identifier: identifier.to_string() }),
        }
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<Node>> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|node| node.identifier() == identifier)
            .cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.lock().unwrap().clone()
    }

    /// Pick the connected node with the lowest penalty for a new player
    /// and record the guild on it
    pub fn assign(&self, guild_id: GuildId) -> Result<Arc<Node>> {
        let node = self.best(None)?;
        node.register_guild(guild_id);
        tracing::debug!(guild_id, node = node.identifier(), "assigned guild to node");
        Ok(node)
    }

    /// Re-run selection for a guild whose node went down, excluding it
    pub fn reassign(&self, guild_id: GuildId, exclude: &str) -> Result<Arc<Node>> {
        let node = self.best(Some(exclude))?;
        node.register_guild(guild_id);
        tracing::info!(guild_id, node = node.identifier(), "reassigned guild after node loss");
        Ok(node)
    }

    pub(crate) fn drain(&self) -> Vec<Arc<Node>> {
        std::mem::take(&mut *self.nodes.lock().unwrap())
    }

    fn best(&self, exclude: Option<&str>) -> Result<Arc<Node>> {
        let nodes = self.nodes.lock().unwrap();

        let candidates: Vec<&Arc<Node>> = nodes
            .iter()
            .filter(|node| node.is_connected())
            .filter(|node| exclude != Some(node.identifier()))
            .collect();

        let penalties: Vec<i32> = candidates.iter().map(|node| node.penalty()).collect();

        match best_of(&penalties) {
            Some(index) => Ok(candidates[index].clone()),
            None => Err(NodelinkError::NoAvailableNode),
        }
    }
}

/// Index of the strictly lowest penalty; the candidate slice is in node
/// registration order, so the earliest-registered node wins ties
fn best_of(penalties: &[i32]) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for (index, &penalty) in penalties.iter().enumerate() {
        match best {
            Some((_, record)) if penalty >= record => {}
            _ => best = Some((index, penalty)),
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_penalty_wins() {
        assert_eq!(best_of(&[40, 10, 25]), Some(1));
    }

    #[test]
    fn ties_break_by_registration_order() {
        assert_eq!(best_of(&[10, 10, 10]), Some(0));
        assert_eq!(best_of(&[30, 10, 10]), Some(1));
    }

    #[test]
    fn empty_candidate_set_selects_nothing() {
        assert_eq!(best_of(&[]), None);
    }

    #[tokio::test]
    async fn duplicate_identifier_is_rejected() {
        let pool = NodePool::new();
        let config = NodeConfig {
            identifier: "main".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            password: "pass".to_string(),
            user_id: 1,
        };

        pool.register(config.clone()).unwrap();
        match pool.register(config) {
            Err(NodelinkError::NodeAlreadyExists { identifier }) => assert_eq!(identifier, "main"),
            other => panic!("expected NodeAlreadyExists, got {other:?}"),
        }

        for node in pool.drain() {
            node.close().await;
        }
    }

    #[tokio::test]
    async fn assignment_with_no_connected_node_fails() {
        let pool = NodePool::new();
        assert!(matches!(pool.assign(123), Err(NodelinkError::NoAvailableNode)));

        // A registered but unreachable node is not a candidate either.
        pool.register(NodeConfig {
            identifier: "offline".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            password: "pass".to_string(),
            user_id: 1,
        })
        .unwrap();
        assert!(matches!(pool.assign(123), Err(NodelinkError::NoAvailableNode)));

        for node in pool.drain() {
            node.close().await;
        }
    }
}
