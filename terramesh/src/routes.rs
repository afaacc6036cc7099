use crate::coordinator::{ChunkCoordinator, ChunkRequestError, ChunkResponse};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;

const IMMUTABLE: &str = "public, max-age=31536000, immutable";

pub fn router(coordinator: Arc<ChunkCoordinator>) -> Router {
    Router::new()
        .route("/world/:version/terrain/:resolution/:chunk_x/:chunk_z", get(terrain_chunk))
        .route("/healthz", get(healthz))
        .with_state(coordinator)
}

async fn healthz() -> &'static str {
    "ok"
}

pub async fn terrain_chunk(
    State(coordinator): State<Arc<ChunkCoordinator>>,
    Path((version, resolution, chunk_x, chunk_z)): Path<(String, u16, i32, i32)>,
) -> Response {
    match coordinator.request(&version, resolution, chunk_x, chunk_z).await {
        Ok(ChunkResponse::Ready { bytes, checksum }) => {
            let mut response = (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream"),
                    (header::CACHE_CONTROL, IMMUTABLE),
                ],
                bytes,
            )
                .into_response();
            if let Some(etag) = checksum.and_then(|sum| HeaderValue::from_str(&format!("\"{}\"", sum)).ok()) {
                response.headers_mut().insert(header::ETAG, etag);
            }
            response
        }
        Ok(ChunkResponse::Accepted) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(err: ChunkRequestError) -> Response {
    let status = match &err {
        ChunkRequestError::UnknownVersion(_) => StatusCode::NOT_FOUND,
        ChunkRequestError::InactiveVersion(_) => StatusCode::GONE,
        ChunkRequestError::InvalidResolution(_) => StatusCode::BAD_REQUEST,
        ChunkRequestError::Unavailable(e) => {
            log::warn!("Chunk request failed: {:#}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use terramesh_gen::{ChunkGenerator, GenerateError, Heightfield, sample_count};
    use terramesh_metrics::TerrainMetrics;
    use terramesh_storage::memory::{MemoryMetadataStore, MemoryObjectStore};
    use terramesh_storage::{ChunkKey, WorldVersion, WorldVersions, WriteGate};

    struct FlatGenerator;

    #[async_trait]
    impl ChunkGenerator for FlatGenerator {
        async fn generate(&self, key: &ChunkKey, _world: &WorldVersion) -> Result<Heightfield, GenerateError> {
            Ok(Heightfield::from_heights(key.resolution, vec![0.0; sample_count(key.resolution)]))
        }
    }

    fn coordinator() -> Arc<ChunkCoordinator> {
        let worlds = ["live", "retired"].map(|v| WorldVersion {
            version: v.to_string(),
            id: 1,
            active: v == "live",
            origin_lat: 0.5,
            origin_lon: 0.5,
            chunk_size_m: 256.0,
        });
        Arc::new(ChunkCoordinator::new(
            WorldVersions::new(worlds),
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryObjectStore::new()),
            Arc::new(FlatGenerator),
            WriteGate::default(),
            Arc::new(TerrainMetrics::default()),
            Duration::from_secs(300),
        ))
    }

    async fn get_chunk(c: &Arc<ChunkCoordinator>, version: &str, resolution: u16) -> Response {
        terrain_chunk(State(c.clone()), Path((version.to_string(), resolution, 0, 0))).await
    }

    #[tokio::test]
    async fn test_status_codes() {
        let c = coordinator();
        assert_eq!(get_chunk(&c, "missing", 64).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get_chunk(&c, "retired", 64).await.status(), StatusCode::GONE);
        assert_eq!(get_chunk(&c, "live", 0).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(get_chunk(&c, "live", 2000).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_accepted_then_ok() {
        let c = coordinator();
        let accepted = get_chunk(&c, "live", 64).await;
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
        let body = axum::body::to_bytes(accepted.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());

        let key = ChunkKey::terrain("live", 64, 0, 0);
        tokio::time::timeout(Duration::from_secs(5), async {
            while c.is_generating(&key) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let ok = get_chunk(&c, "live", 64).await;
        assert_eq!(ok.status(), StatusCode::OK);
        let headers = ok.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(headers[header::CACHE_CONTROL], IMMUTABLE);
        let etag = headers[header::ETAG].to_str().unwrap().to_string();

        let body = axum::body::to_bytes(ok.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 16919);
        assert_eq!(etag, format!("\"{}\"", crate::coordinator::checksum(&body)));
    }
}
