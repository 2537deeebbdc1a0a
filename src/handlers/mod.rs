mod docs;
mod embedding;
mod health;
mod util;
mod verify;

pub use docs::openapi;
pub use embedding::create_embedding;
pub use health::health_check;
pub use util::JsonBody;
pub use verify::verify_embeddings;
