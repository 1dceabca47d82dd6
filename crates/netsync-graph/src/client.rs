//! Neo4j connection management and shared graph client.

use neo4rs::{query, ConfigBuilder, Graph, Query};
use serde::Deserialize;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Failed to decode {label} row: {message}")]
    Decode { label: String, message: String },

    #[error("{label} {id} does not exist")]
    MissingParent { label: String, id: String },

    #[error("VLAN {0} must not be persisted")]
    ExcludedVlan(u16),
}

impl From<GraphError> for netsync_core::NetsyncError {
    fn from(err: GraphError) -> Self {
        use netsync_core::NetsyncError;
        match err {
            GraphError::MissingParent { .. } => NetsyncError::MissingParent(err.to_string()),
            GraphError::ExcludedVlan(_) => NetsyncError::PolicyViolation(err.to_string()),
            other => NetsyncError::Store(other.to_string()),
        }
    }
}

/// Configuration for connecting to Neo4j, read from the `[neo4j]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "netsync-dev".to_string(),
            max_connections: 16,
            fetch_size: 256,
        }
    }
}

/// Uniqueness constraints backing the natural keys.
const SCHEMA: &[&str] = &[
    "CREATE CONSTRAINT network_node_ip IF NOT EXISTS
     FOR (n:NetworkNode) REQUIRE n.ip IS UNIQUE",
    "CREATE CONSTRAINT interface_key IF NOT EXISTS
     FOR (i:Interface) REQUIRE (i.node_id, i.if_index) IS UNIQUE",
    "CREATE CONSTRAINT vlan_membership_key IF NOT EXISTS
     FOR (m:VlanMembership) REQUIRE (m.node_id, m.vlan_id, m.interface_id) IS UNIQUE",
];

/// Pooled Neo4j client. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Create the uniqueness constraints if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), GraphError> {
        for statement in SCHEMA {
            self.run(query(statement)).await?;
        }
        tracing::debug!(constraints = SCHEMA.len(), "Graph schema ensured");
        Ok(())
    }

    /// Execute a write-only query (CREATE, MERGE, DELETE, SET).
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a read query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    /// Read the graph node bound to `column` in every row and decode it.
    ///
    /// The first row that fails to decode aborts the whole read.
    pub(crate) async fn query_nodes<T>(
        &self,
        query: Query,
        column: &str,
        label: &str,
        decode: impl Fn(&neo4rs::Node) -> Result<T, GraphError>,
    ) -> Result<Vec<T>, GraphError> {
        let rows = self.query_rows(query).await?;
        rows.iter()
            .map(|row| {
                let node: neo4rs::Node = row.get(column).map_err(|e| decode_err(label, e))?;
                decode(&node)
            })
            .collect()
    }
}

pub(crate) fn decode_err(label: &str, err: impl std::fmt::Display) -> GraphError {
    GraphError::Decode {
        label: label.to_string(),
        message: err.to_string(),
    }
}
