use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use farmgate_core::{Actor, Role};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Bearer token claims. Tokens are issued by the marketplace's identity
/// service; this service only verifies them.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// `buyer`, `vendor`, `admin` or `system`
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn actor(&self) -> Result<Actor, AppError> {
        let id = Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::AuthenticationError("token subject is not a user id".to_string()))?;
        let role: Role = self.role
            .parse()
            .map_err(|e: String| AppError::AuthenticationError(e))?;
        Ok(Actor::new(id, role))
    }
}

/// Resolve the calling actor from `Authorization: Bearer <jwt>` and put it in
/// the request extensions for handlers.
pub async fn actor_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthenticationError("missing bearer token".to_string()))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::AuthenticationError(format!("invalid token: {}", e)))?;

    let actor = token_data.claims.actor()?;
    tracing::debug!("Request from {} {}", actor.role.as_str(), actor.id);
    req.extensions_mut().insert(actor);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_map_to_actor() {
        let id = Uuid::new_v4();
        let claims = Claims { sub: id.to_string(), role: "VENDOR".to_string(), exp: 0 };
        assert_eq!(claims.actor().unwrap(), Actor::vendor(id));

        let claims = Claims { sub: "guest-1".to_string(), role: "buyer".to_string(), exp: 0 };
        assert!(claims.actor().is_err());
    }
}
