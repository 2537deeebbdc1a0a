mod api;

pub use api::{EmbeddingRequest, EmbeddingResponse, HealthResponse, VerifyRequest};
