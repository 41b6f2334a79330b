//! A [`VectorSink`] backed by a single Qdrant collection, grounded on
//! `QdrantVectorStore`'s point-struct construction, filter translation and
//! scroll/get/delete calls.

use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeletePointsBuilder, Distance, FieldType as QdrantFieldType, GetPointsBuilder,
    PointsIdsList, QueryPointsBuilder, ScrollPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;

use cascade_core::PointId;

use crate::filter::SinkFilter;
use crate::point::{id_from_str, id_to_qdrant, record_from_retrieved, scored_from_qdrant, PointRecord};
use crate::sink::{IndexKind, ScrollPage, SinkError, VectorSink};

/// Backs [`VectorSink`] with a single named Qdrant collection.
pub struct QdrantSink {
    client: Qdrant,
    collection_name: String,
}

impl QdrantSink {
    /// Connects to `url` and targets `collection_name`. Does not create the
    /// collection; call [`Self::ensure_collection`] once at startup.
    pub fn connect(url: &str, collection_name: impl Into<String>) -> Result<Self, SinkError> {
        let client = Qdrant::from_url(url).build().map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(Self { client, collection_name: collection_name.into() })
    }

    /// Wraps an already-configured client (custom TLS, API key, timeouts).
    #[must_use]
    pub fn from_client(client: Qdrant, collection_name: impl Into<String>) -> Self {
        Self { client, collection_name: collection_name.into() }
    }

    /// Creates the collection with the given vector dimensionality and
    /// cosine distance if it does not already exist.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), SinkError> {
        let exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;
        if exists {
            return Ok(());
        }
        let vector_params = VectorParamsBuilder::new(vector_size, Distance::Cosine).build();
        self.client
            .create_collection(CreateCollectionBuilder::new(&self.collection_name).vectors_config(vector_params))
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;
        tracing::info!(collection = %self.collection_name, vector_size, "collection created");
        Ok(())
    }
}

#[async_trait]
impl VectorSink for QdrantSink {
    async fn upsert(&self, points: Vec<PointRecord>) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }
        let count = points.len();
        let point_structs = points.into_iter().map(PointRecord::into_point_struct).collect::<Vec<_>>();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, point_structs).wait(true))
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;
        tracing::debug!(count, collection = %self.collection_name, "upserted points");
        Ok(())
    }

    async fn scroll(&self, filter: Option<&SinkFilter>, cursor: Option<PointId>, limit: u32) -> Result<ScrollPage, SinkError> {
        let mut builder = ScrollPointsBuilder::new(&self.collection_name).limit(limit).with_payload(true).with_vectors(true);
        if let Some(filter) = filter.and_then(SinkFilter::to_qdrant) {
            builder = builder.filter(filter);
        }
        if let Some(cursor) = cursor {
            builder = builder.offset(id_to_qdrant(cursor));
        }
        let response = self.client.scroll(builder).await.map_err(|e| SinkError::Request(e.to_string()))?;
        let next_offset = response.next_page_offset.and_then(|id| point_id_to_our(&id));
        let records = response.result.into_iter().filter_map(record_from_retrieved).collect();
        Ok(ScrollPage { records, next_offset })
    }

    async fn retrieve(&self, ids: &[PointId]) -> Result<Vec<PointRecord>, SinkError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let point_ids = ids.iter().map(|id| id_to_qdrant(*id)).collect::<Vec<_>>();
        let response = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection_name, point_ids).with_payload(true).with_vectors(true))
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(response.result.into_iter().filter_map(record_from_retrieved).collect())
    }

    async fn delete_by_ids(&self, ids: &[PointId]) -> Result<(), SinkError> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids = ids.iter().map(|id| id_to_qdrant(*id)).collect::<Vec<_>>();
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name).points(PointsIdsList { ids: point_ids }).wait(true),
            )
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(())
    }

    async fn delete_by_filter(&self, filter: &SinkFilter) -> Result<(), SinkError> {
        let Some(qfilter) = filter.to_qdrant() else {
            return Err(SinkError::Malformed("refusing to delete the whole collection with an empty filter".into()));
        };
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection_name).points(qfilter).wait(true))
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(())
    }

    async fn create_payload_index(&self, field: &str, kind: IndexKind) -> Result<(), SinkError> {
        let field_type = match kind {
            IndexKind::Keyword => QdrantFieldType::Keyword,
            IndexKind::Integer => QdrantFieldType::Integer,
            IndexKind::Bool => QdrantFieldType::Bool,
        };
        self.client
            .create_field_index(qdrant_client::qdrant::CreateFieldIndexCollectionBuilder::new(
                &self.collection_name,
                field,
                field_type,
            ))
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(())
    }

    async fn count(&self, filter: Option<&SinkFilter>) -> Result<u64, SinkError> {
        let mut builder = qdrant_client::qdrant::CountPointsBuilder::new(&self.collection_name);
        if let Some(filter) = filter.and_then(SinkFilter::to_qdrant) {
            builder = builder.filter(filter);
        }
        let response = self.client.count(builder).await.map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    async fn search(&self, vector: &[f32], filter: Option<&SinkFilter>, k: u64) -> Result<Vec<(PointRecord, f32)>, SinkError> {
        let mut builder =
            QueryPointsBuilder::new(&self.collection_name).query(vector.to_vec()).limit(k).with_payload(true).with_vectors(true);
        if let Some(filter) = filter.and_then(SinkFilter::to_qdrant) {
            builder = builder.filter(filter);
        }
        let response = self.client.query(builder).await.map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(response.result.into_iter().filter_map(scored_from_qdrant).collect())
    }
}

fn point_id_to_our(id: &qdrant_client::qdrant::PointId) -> Option<PointId> {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    let s = match &id.point_id_options {
        Some(PointIdOptions::Num(n)) => n.to_string(),
        Some(PointIdOptions::Uuid(s)) => s.clone(),
        None => return None,
    };
    id_from_str(&s).ok()
}
