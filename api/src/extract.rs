//! Extractors that reject with [`ApiError`] instead of axum's plain-text bodies

use crate::error::ApiError;
use axum::extract::{FromRequest, FromRequestParts};

/// JSON body
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);
