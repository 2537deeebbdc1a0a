//! OpenAPI description of the service.
//!
//! # Endpoints
//!
//! - `GET /openapi.json` - OpenAPI 3 document
//! - `GET /docs` - Same document, for clients that expect the shorter path

use std::sync::LazyLock;

use axum::Json;
use serde_json::{Value, json};

use crate::config::SERVICE_NAME;

static OPENAPI: LazyLock<Value> = LazyLock::new(build_openapi);

/// Serve the OpenAPI document.
pub async fn openapi() -> Json<Value> {
    Json(OPENAPI.clone())
}

fn error_response(description: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": { "schema": { "$ref": "#/components/schemas/Error" } }
        }
    })
}

fn build_openapi() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Face embedding extraction and verification"
        },
        "components": {
            "securitySchemes": {
                "ApiKeyHeader": { "type": "apiKey", "in": "header", "name": "X-API-Key" },
                "Bearer": { "type": "http", "scheme": "bearer" }
            },
            "schemas": {
                "Error": {
                    "type": "object",
                    "required": ["error", "detail"],
                    "properties": {
                        "error": { "type": "string", "example": "no_face_detected" },
                        "detail": { "type": "string" }
                    }
                },
                "EmbeddingRequest": {
                    "type": "object",
                    "required": ["image_data"],
                    "properties": {
                        "image_data": {
                            "type": "string",
                            "description": "Base64 JPEG, PNG, GIF or WEBP; a data URL prefix is allowed"
                        }
                    }
                },
                "EmbeddingResponse": {
                    "type": "object",
                    "required": ["embedding", "dim"],
                    "properties": {
                        "embedding": { "type": "array", "items": { "type": "number" } },
                        "dim": { "type": "integer" }
                    }
                },
                "VerifyRequest": {
                    "type": "object",
                    "required": ["embedding_a", "embedding_b"],
                    "properties": {
                        "embedding_a": { "type": "array", "items": { "type": "number" } },
                        "embedding_b": { "type": "array", "items": { "type": "number" } },
                        "threshold": { "type": "number", "minimum": 0, "maximum": 1 }
                    }
                },
                "VerifyResponse": {
                    "type": "object",
                    "required": ["match", "confidence"],
                    "properties": {
                        "match": { "type": "boolean" },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                    }
                },
                "HealthResponse": {
                    "type": "object",
                    "properties": {
                        "status": { "type": "string" },
                        "service": { "type": "string" },
                        "version": { "type": "string" },
                        "timestamp": { "type": "string", "format": "date-time" }
                    }
                }
            }
        },
        "security": [ { "ApiKeyHeader": [] }, { "Bearer": [] } ],
        "paths": {
            "/embedding": {
                "post": {
                    "summary": "Extract the embedding of the single face in an image",
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/EmbeddingRequest" } } }
                    },
                    "responses": {
                        "200": {
                            "description": "Embedding extracted",
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/EmbeddingResponse" } } }
                        },
                        "400": error_response("Invalid image, no face, or too many faces"),
                        "401": error_response("Missing or invalid API key"),
                        "413": error_response("Payload too large"),
                        "429": error_response("Rate limit exceeded"),
                        "500": error_response("Detector failure")
                    }
                }
            },
            "/verify": {
                "post": {
                    "summary": "Compare two embeddings",
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/VerifyRequest" } } }
                    },
                    "responses": {
                        "200": {
                            "description": "Comparison result",
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/VerifyResponse" } } }
                        },
                        "400": error_response("Length mismatch, zero vector, or invalid threshold"),
                        "401": error_response("Missing or invalid API key"),
                        "429": error_response("Rate limit exceeded")
                    }
                }
            },
            "/health": {
                "get": {
                    "summary": "Liveness check",
                    "security": [],
                    "responses": {
                        "200": {
                            "description": "Service is up",
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/HealthResponse" } } }
                        }
                    }
                }
            }
        }
    })
}
