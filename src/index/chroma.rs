//! HTTP client for the vector store
//!
//! Speaks the collection API: get-or-create, batch add, filtered nearest
//! neighbour query, and delete-by-metadata. Distances are cosine; callers
//! convert to similarity.

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

/// Typed handle to one collection
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    pub id: String,
    pub name: String,
}

/// One record to add to a collection
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: Value,
}

/// One nearest-neighbour hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub distance: f32,
    pub document: String,
    pub metadata: Value,
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    metadata: Value,
    get_or_create: bool,
}

#[derive(Debug, Deserialize)]
struct CreateCollectionResponse {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct AddRequest {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct QueryRequest {
    query_embeddings: Vec<Vec<f32>>,
    n_results: usize,
    #[serde(rename = "where")]
    where_filter: Value,
    include: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Vec<Vec<f32>>,
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Vec<Vec<Option<Value>>>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest {
    #[serde(rename = "where")]
    where_filter: Value,
}

/// Vector store HTTP client
#[derive(Clone)]
pub struct ChromaClient {
    client: reqwest::Client,
    base_url: String,
}

impl ChromaClient {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| IndexError::NotInitialized(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    /// Get or create a collection using cosine distance
    pub async fn get_or_create_collection(&self, name: &str) -> Result<CollectionHandle> {
        let request = CreateCollectionRequest {
            name,
            metadata: json!({"hnsw:space": "cosine"}),
            get_or_create: true,
        };

        let response = self
            .client
            .post(self.api_url("collections"))
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::NotInitialized(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Collection create failed for {}: {}", name, text);
            return Err(IndexError::NotInitialized(text).into());
        }

        let body: CreateCollectionResponse = response
            .json()
            .await
            .map_err(|e| IndexError::NotInitialized(e.to_string()))?;

        debug!("Collection {} ready ({})", body.name, body.id);
        Ok(CollectionHandle {
            id: body.id,
            name: body.name,
        })
    }

    /// Batch add records to a collection
    pub async fn add(&self, collection: &CollectionHandle, records: Vec<VectorRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let count = records.len();
        let mut request = AddRequest {
            ids: Vec::with_capacity(count),
            embeddings: Vec::with_capacity(count),
            documents: Vec::with_capacity(count),
            metadatas: Vec::with_capacity(count),
        };
        for record in records {
            request.ids.push(record.id);
            request.embeddings.push(record.embedding);
            request.documents.push(record.document);
            request.metadatas.push(record.metadata);
        }

        let response = self
            .client
            .post(self.api_url(&format!("collections/{}/add", collection.id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::AddFailed(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IndexError::AddFailed(text).into());
        }

        debug!("Added {} records to {}", count, collection.name);
        Ok(count)
    }

    /// Nearest-neighbour query with a metadata filter
    pub async fn query(
        &self,
        collection: &CollectionHandle,
        embedding: Vec<f32>,
        n_results: usize,
        where_filter: Value,
    ) -> Result<Vec<VectorHit>> {
        let request = QueryRequest {
            query_embeddings: vec![embedding],
            n_results,
            where_filter,
            include: vec!["metadatas", "documents", "distances"],
        };

        let response = self
            .client
            .post(self.api_url(&format!("collections/{}/query", collection.id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::SearchFailed(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IndexError::SearchFailed(text).into());
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| IndexError::SearchFailed(e.to_string()))?;

        let ids = body.ids.into_iter().next().unwrap_or_default();
        let distances = body.distances.into_iter().next().unwrap_or_default();
        let documents = body.documents.into_iter().next().unwrap_or_default();
        let metadatas = body.metadatas.into_iter().next().unwrap_or_default();

        let hits = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| VectorHit {
                id,
                distance: distances.get(i).copied().unwrap_or(1.0),
                document: documents
                    .get(i)
                    .and_then(|d| d.clone())
                    .unwrap_or_default(),
                metadata: metadatas
                    .get(i)
                    .and_then(|m| m.clone())
                    .unwrap_or(Value::Null),
            })
            .collect();

        Ok(hits)
    }

    /// Delete every record matching the metadata filter
    pub async fn delete(&self, collection: &CollectionHandle, where_filter: Value) -> Result<()> {
        let request = DeleteRequest { where_filter };

        let response = self
            .client
            .post(self.api_url(&format!("collections/{}/delete", collection.id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::DeleteFailed(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IndexError::DeleteFailed(text).into());
        }

        Ok(())
    }
}

/// Build the metadata filter for a user, optionally restricted to files
pub fn where_filter(user_id: &str, file_ids: Option<&[String]>, chunk_type: Option<&str>) -> Value {
    let mut conditions = vec![json!({"user_id": user_id})];

    if let Some(chunk_type) = chunk_type {
        conditions.push(json!({"chunk_type": chunk_type}));
    }
    if let Some(file_ids) = file_ids {
        conditions.push(json!({"file_id": {"$in": file_ids}}));
    }

    if conditions.len() == 1 {
        conditions.remove(0)
    } else {
        json!({"$and": conditions})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_filter_single_condition() {
        let filter = where_filter("u1", None, None);
        assert_eq!(filter, json!({"user_id": "u1"}));
    }

    #[test]
    fn test_where_filter_combined() {
        let files = vec!["f1".to_string(), "f2".to_string()];
        let filter = where_filter("u1", Some(&files), Some("image"));
        assert_eq!(
            filter,
            json!({"$and": [
                {"user_id": "u1"},
                {"chunk_type": "image"},
                {"file_id": {"$in": ["f1", "f2"]}}
            ]})
        );
    }

    #[test]
    fn test_query_response_shape() {
        let raw = r#"{
            "ids": [["c1", "c2"]],
            "distances": [[0.1, 0.4]],
            "documents": [["first", null]],
            "metadatas": [[{"user_id": "u1"}, null]]
        }"#;
        let parsed: QueryResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.ids[0].len(), 2);
        assert_eq!(parsed.documents[0][1], None);
    }
}
