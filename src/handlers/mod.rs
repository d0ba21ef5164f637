pub mod config;

pub use config::*;

use crate::error::{AppError, AppResult};
use actix_web::HttpResponse;

/// Fallback for routes no handler claims.
pub async fn not_found() -> AppResult<HttpResponse> {
    Err(AppError::NotFound("Resource not found".to_string()))
}
