use crate::dao;
use crate::error::AppError;
use crate::utils::{api_key_hash, get_header};
use crate::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct AuthedBusiness {
    pub business_id: Uuid,
}

/// Resolves an owner API key to its business. Keys are stored as SHA3-256
/// digests, so the lookup never touches plaintext.
pub async fn authenticate(state: &AppState, api_key: &str) -> Result<AuthedBusiness, AppError> {
    let business =
        dao::find_business_by_api_key(state.db_connection_pool.clone(), &api_key_hash(api_key))
            .await?
            .ok_or(AppError::Unauthenticated)?;
    Ok(AuthedBusiness {
        business_id: business.id,
    })
}

pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key =
        get_header("x-api-key", request.headers()).ok_or(AppError::Unauthenticated)?;
    let authed = authenticate(&state, &api_key).await?;
    request.extensions_mut().insert(authed);
    Ok(next.run(request).await)
}
