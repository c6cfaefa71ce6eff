//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document of the quiz REST API to disk.
//!
//! Usage: `openapi [OUTPUT_PATH]` (defaults to `openapi.json`).

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi.json";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_OUTPUT.to_string());

    let doc = ApiDoc::openapi();
    let path_count = doc.paths.paths.len();
    std::fs::write(&path, doc.to_pretty_json()?)?;

    println!("✅ OpenAPI document with {} path(s) written to {}", path_count, path);
    Ok(())
}
