use std::{sync::Arc, time::Duration};

use poem::{
    Endpoint, EndpointExt, Request, Route,
    error::{NotFoundError, ResponseError},
    middleware::{Cors, NormalizePath, TrailingSlash},
};
use poem_openapi::{OpenApiService, error::ParseRequestPayloadError};
use sea_orm::DatabaseConnection;

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod feed;
pub mod follow;
pub mod forms;
pub mod migration;
pub mod store;

use crate::{
    auth::{RequestedPath, TokenKeys},
    config::Config,
    error::{AppError, NON_FIELD_ERRORS, not_found_page},
    feed::FeedCache,
};

pub struct AppState {
    pub db: DatabaseConnection,
    pub tokens: TokenKeys,
    pub cache: FeedCache,
    pub fallback_author_id: i32,
}

impl AppState {
    pub fn new(db: DatabaseConnection, config: &Config) -> Self {
        AppState {
            db,
            tokens: TokenKeys::new(config.jwt_secret.as_bytes(), config.token_ttl_secs),
            cache: FeedCache::new(
                config.page_cache_capacity,
                Duration::from_secs(config.page_cache_ttl_secs),
            ),
            fallback_author_id: config.fallback_author_id,
        }
    }
}

/// Routes answer with or without the trailing slash; redirects always carry it.
pub fn app(state: Arc<AppState>) -> impl Endpoint {
    let api = OpenApiService::new(api::Api::new(state.clone()), "Feed API", env!("CARGO_PKG_VERSION"));
    let ui = api.swagger_ui();

    Route::new()
        .nest("/docs", ui)
        .nest("/", api)
        .data(state)
        .catch_error(|_: NotFoundError| async move { not_found_page("page not found") })
        .catch_error(|err: ParseRequestPayloadError| async move {
            AppError::invalid(NON_FIELD_ERRORS, err.reason).as_response()
        })
        .with(NormalizePath::new(TrailingSlash::Trim))
        .before(|mut req: Request| async move {
            let requested = RequestedPath::of(&req);
            req.set_data(requested);
            Ok(req)
        })
        .with(Cors::new())
}
