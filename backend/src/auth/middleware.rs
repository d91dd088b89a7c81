use super::jwt::{JwtError, JwtService};
use actix_web::{
    Error, HttpMessage, HttpResponse,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use actix_web::{FromRequest, HttpRequest};
use futures::future::{Ready, ok};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Opaque caller identity attached to a request by `AuthMiddleware`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity(String);

/// Attaches the caller identity from a bearer token. With `required` set,
/// requests without a valid token are answered with 401; otherwise they
/// proceed anonymously.
#[derive(Clone)]
pub struct AuthMiddleware {
    jwt_service: Option<Arc<JwtService>>,
    required: bool,
}

impl AuthMiddleware {
    pub fn new(jwt_service: Option<JwtService>, required: bool) -> Self {
        Self {
            jwt_service: jwt_service.map(Arc::new),
            required,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Arc::new(service),
            jwt_service: self.jwt_service.clone(),
            required: self.required,
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Arc<S>,
    jwt_service: Option<Arc<JwtService>>,
    required: bool,
}

#[derive(Debug)]
enum AuthError {
    NoAuthHeader,
    InvalidHeaderFormat,
    NotBearerToken,
    NotConfigured,
    VerificationFailed(JwtError),
}

impl AuthError {
    fn log_message(&self, path: &str) -> String {
        match self {
            AuthError::NoAuthHeader => format!("No Authorization header found for path: {}", path),
            AuthError::InvalidHeaderFormat => format!(
                "Invalid Authorization header format (non-UTF-8) for path: {}",
                path
            ),
            AuthError::NotBearerToken => format!(
                "Authorization header for path {} doesn't start with 'Bearer '",
                path
            ),
            AuthError::NotConfigured => {
                format!("Bearer token sent to {} but no JWT secret is configured", path)
            }
            AuthError::VerificationFailed(e) => {
                format!("JWT token verification failed for path {}: {}", path, e)
            }
        }
    }

    fn client_error_json(&self) -> serde_json::Value {
        let error_message = match self {
            AuthError::VerificationFailed(JwtError::TokenExpired) => "Token expired",
            AuthError::VerificationFailed(_) => "Invalid token",
            _ => "No token",
        };
        serde_json::json!({ "error": error_message })
    }
}

fn validate_request_token(
    req: &ServiceRequest,
    jwt_service: Option<&JwtService>,
) -> Result<String, AuthError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .ok_or(AuthError::NoAuthHeader)?;
    let auth_str = auth_header
        .to_str()
        .map_err(|_| AuthError::InvalidHeaderFormat)?;
    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or(AuthError::NotBearerToken)?;
    let jwt_service = jwt_service.ok_or(AuthError::NotConfigured)?;

    jwt_service
        .caller_identity(token.trim())
        .map_err(AuthError::VerificationFailed)
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let jwt_service = self.jwt_service.clone();
        let required = self.required;

        Box::pin(async move {
            let path_str = req.path().to_string();

            if path_str.starts_with("/uploads/") {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            match validate_request_token(&req, jwt_service.as_deref()) {
                Ok(user_id) => {
                    log::debug!("Authenticated caller {} for {}", user_id, path_str);
                    req.extensions_mut().insert(Identity(user_id));
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(auth_error) if required => {
                    log::warn!("{}", auth_error.log_message(&path_str));

                    let (http_req, _payload) = req.into_parts();
                    let response = HttpResponse::Unauthorized()
                        .json(auth_error.client_error_json())
                        .map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
                Err(auth_error) => {
                    if !matches!(auth_error, AuthError::NoAuthHeader) {
                        log::warn!("{}", auth_error.log_message(&path_str));
                    }
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
            }
        })
    }
}

/// Caller identity if the request was authenticated. Never rejects.
pub struct CallerIdentity(pub Option<String>);

impl FromRequest for CallerIdentity {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let identity = req
            .extensions()
            .get::<Identity>()
            .map(|identity| identity.0.clone());
        ok(CallerIdentity(identity))
    }
}
