/// Access Guard Middleware
///
/// Verifies the caller's access token and injects the claims into request
/// extensions for route handlers (`web::ReqData<Claims>`).
///
/// The token is taken from `Authorization: Bearer <token>` first. Without
/// one, a JSON body field `access_token` is accepted; the body is buffered
/// and handed back to the handler untouched.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    web::{Bytes, BytesMut},
    Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use futures::StreamExt;
use std::rc::Rc;

use crate::auth::{bearer_token, AccessGuard};
use crate::error::{AppError, AuthError, ErrorHandler};

const ACCESS_TOKEN_FIELD: &str = "access_token";
const MAX_BODY_BYTES: usize = 64 * 1024;

pub struct AccessGuardMiddleware {
    guard: AccessGuard,
}

impl AccessGuardMiddleware {
    pub fn new(guard: AccessGuard) -> Self {
        Self { guard }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessGuardMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AccessGuardService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AccessGuardService {
            service: Rc::new(service),
            guard: self.guard.clone(),
        }))
    }
}

pub struct AccessGuardService<S> {
    service: Rc<S>,
    guard: AccessGuard,
}

impl<S, B> Service<ServiceRequest> for AccessGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let guard = self.guard.clone();

        Box::pin(async move {
            let authorization = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string);

            let body_token = if authorization.as_deref().and_then(bearer_token).is_some() {
                None
            } else {
                read_body_token(&mut req).await?
            };

            match guard.authorize(authorization.as_deref(), body_token.as_deref()) {
                Ok(claims) => {
                    tracing::debug!(user_id = %claims.sub, "Access token accepted");
                    req.extensions_mut().insert(claims);
                    service.call(req).await
                }
                Err(e) => Err(reject(e)),
            }
        })
    }
}

/// Buffers the body, picks `access_token` out of it if it is a JSON object,
/// and puts the same bytes back as the request payload.
async fn read_body_token(req: &mut ServiceRequest) -> Result<Option<String>, Error> {
    let mut payload = req.take_payload();
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(actix_web::error::ErrorPayloadTooLarge("request body too large"));
        }
        body.extend_from_slice(&chunk);
    }
    let body: Bytes = body.freeze();

    let token = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .get(ACCESS_TOKEN_FIELD)
                .and_then(|t| t.as_str())
                .map(str::to_string)
        });

    let (_, mut restored) = actix_http::h1::Payload::create(true);
    restored.unread_data(body);
    req.set_payload(restored.into());

    Ok(token)
}

fn reject(err: AuthError) -> Error {
    let err = AppError::Auth(err);
    let error_id = uuid::Uuid::new_v4().to_string();
    err.log_error(&error_id);

    let (status, body) = <AppError as ErrorHandler>::error_response(&err, &error_id);
    let response = HttpResponse::build(status).json(body);
    actix_web::error::InternalError::from_response(err, response).into()
}
