use actix_web::dev::{HttpServiceFactory, Server};
use actix_web::error::JsonPayloadError;
use actix_web::{middleware::Logger, web, App, HttpRequest, HttpServer, Route};
use std::net::TcpListener;
use std::sync::Arc;

use crate::accounts::{AccountService, GoogleIdTokenVerifier, UserService};
use crate::auth::{AccessGuard, Clock, TokenService};
use crate::configuration::JwtSettings;
use crate::error::{AppError, ValidationError};
use crate::logger::RequestLogger;
use crate::middleware::AccessGuardMiddleware;
use crate::repository::{AccountStore, AuthProviderRepository, RefreshTokenRepository, UserRepository};
use crate::routes::{
    create_account, deactivate_account, health_check, link_google, login, logout, refresh_token,
    user_data,
};

/// Services shared by every worker
#[derive(Clone)]
pub struct AppServices {
    pub tokens: Arc<TokenService>,
    pub accounts: Arc<AccountService>,
    pub users: Arc<UserService>,
    pub google: Arc<dyn GoogleIdTokenVerifier>,
}

impl AppServices {
    /// Wires every service over a single backing store.
    pub fn new<S>(
        store: S,
        jwt: JwtSettings,
        google: Arc<dyn GoogleIdTokenVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        S: UserRepository + AuthProviderRepository + RefreshTokenRepository + AccountStore + 'static,
    {
        let store = Arc::new(store);

        let tokens = Arc::new(TokenService::new(
            jwt,
            store.clone(),
            store.clone(),
            clock.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            clock,
        ));
        let users = Arc::new(UserService::new(store));

        Self {
            tokens,
            accounts,
            users,
            google,
        }
    }
}

/// Resource that only runs `route` for callers with a valid access token
fn guarded(path: &str, guard: &AccessGuard, route: Route) -> impl HttpServiceFactory {
    web::resource(path)
        .route(route)
        .wrap(AccessGuardMiddleware::new(guard.clone()))
}

/// Bodies that fail JSON extraction get the regular failure envelope
fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    tracing::debug!(error = %err, "Rejected request body");
    AppError::from(ValidationError::InvalidJson).into()
}

pub fn run(listener: TcpListener, services: AppServices) -> Result<Server, std::io::Error> {
    let guard = AccessGuard::new(services.tokens.clone());

    let tokens = web::Data::from(services.tokens);
    let accounts = web::Data::from(services.accounts);
    let users = web::Data::from(services.users);
    let google: web::Data<dyn GoogleIdTokenVerifier> = web::Data::from(services.google);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(RequestLogger)

            // Shared state
            .app_data(tokens.clone())
            .app_data(accounts.clone())
            .app_data(users.clone())
            .app_data(google.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/create-account", web::post().to(create_account))
            .route("/refresh-token", web::post().to(refresh_token))

            // Routes that require an access token
            .service(guarded("/login", &guard, web::post().to(login)))
            .service(guarded("/self-data", &guard, web::post().to(login)))
            .service(guarded("/user-data", &guard, web::post().to(user_data)))
            .service(guarded("/logout", &guard, web::post().to(logout)))
            .service(guarded("/deactivate-account", &guard, web::post().to(deactivate_account)))
            .service(guarded("/link-google", &guard, web::post().to(link_google)))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
