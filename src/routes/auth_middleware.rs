use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};

use crate::config;
use crate::services::auth_service::{api_key_matches, get_api_key, get_auth_token, get_client_id};

/// Identity of an authenticated conference client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientId(pub String);

pub async fn auth_middleware(
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {

    // 1. Get the auth token from the request
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(e) => {
            debug!("No auth token: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 2. Validate Token
    let config = config::get_config();
    let secret = match &config.auth_jwt_secret {
        Some(secret) => secret,
        None => {
            error!("Auth JWT secret not configured");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let client_id = match get_client_id(&token, secret) {
        Ok(client_id) => client_id,
        Err(e) => {
            error!("{}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 3. Hand the client to downstream handlers
    req.extensions_mut().insert(ClientId(client_id));
    Ok(next.run(req).await)
}

/// Guard for routes called by execution workers and operators
pub async fn api_key_middleware(
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let config = config::get_config();
    let expected = match &config.api_key {
        Some(key) => key,
        None => {
            error!("API key not configured");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    match get_api_key(&req) {
        Some(provided) if api_key_matches(&provided, expected) => Ok(next.run(req).await),
        Some(_) => {
            warn!("Invalid API key for {}", req.uri().path());
            Err(StatusCode::UNAUTHORIZED)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
