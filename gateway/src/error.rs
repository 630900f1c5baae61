//! Error taxonomy surfaced by the gateway core

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error kinds surfaced by the gateway core
///
/// The HTTP surface is an external collaborator; it maps each kind onto a
/// status code via [`GatewayError::status_code`]. Plugin RPC errors are
/// wrapped into `Forbidden` on the way up, matching the scoping rules of
/// the request surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Missing required field or unparseable payload
    #[error("{0}")]
    BadRequest(String),

    /// Unknown entity, command or domain
    #[error("{0}")]
    NotFound(String),

    /// Duplicate virtual entity
    #[error("{0}")]
    Conflict(String),

    /// Action not permitted, plugin-reported error, or ownership mismatch
    #[error("{0}")]
    Forbidden(String),

    /// Plugin unreachable or bus timeout
    #[error("{0}")]
    Unavailable(String),

    /// Invalid process configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// HTTP status code the external request surface should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::BadRequest(_) => 400,
            GatewayError::NotFound(_) => 404,
            GatewayError::Conflict(_) => 409,
            GatewayError::Forbidden(_) => 403,
            GatewayError::Unavailable(_) => 503,
            GatewayError::Config(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(GatewayError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(GatewayError::NotFound("x".into()).status_code(), 404);
        assert_eq!(GatewayError::Conflict("x".into()).status_code(), 409);
        assert_eq!(GatewayError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(GatewayError::Unavailable("x".into()).status_code(), 503);
    }

    #[test]
    fn display_is_the_bare_message() {
        let err = GatewayError::Forbidden("action \"set_rgb\" not supported".into());
        assert_eq!(err.to_string(), "action \"set_rgb\" not supported");
    }
}
