//! HTTP client for the face detection model server.
//!
//! The model runs out of process. Each call POSTs the normalized image as a
//! base64 PNG to `{DETECTOR_URL}/detect`:
//!
//! ```text
//! → { "image": "<base64 png>", "width": 640, "height": 480 }
//! ← { "faces": [ { "bbox": { "top", "right", "bottom", "left" }, "embedding": [..] } ] }
//! ```

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::embedding::{DetectedFace, DetectionError, FaceDetector};
use crate::validation::DecodedImage;

/// Time allowed to establish a connection. The request itself is unbounded.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct DetectRequest {
    image: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    faces: Vec<DetectedFace>,
}

/// [`FaceDetector`] backed by a remote model server.
#[derive(Debug, Clone)]
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDetector {
    /// Create a detector for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `DetectionError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| DetectionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/detect", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FaceDetector for HttpDetector {
    #[instrument(skip(self, image), fields(endpoint = %self.endpoint))]
    async fn detect(&self, image: &DecodedImage) -> Result<Vec<DetectedFace>, DetectionError> {
        let request = DetectRequest {
            image: encode_png(image)?,
            width: image.width(),
            height: image.height(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| DetectionError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| DetectionError::Transport(e.to_string()))?;

        let body: DetectResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::InvalidResponse(e.to_string()))?;

        debug!(faces = body.faces.len(), "Detector responded");
        Ok(body.faces)
    }
}

fn encode_png(image: &DecodedImage) -> Result<String, DetectionError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .pixels
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| DetectionError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(buf.into_inner()))
}
