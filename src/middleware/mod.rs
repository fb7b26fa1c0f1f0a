/// Middleware module
///
/// Access token guard for the authenticated routes.

mod access_guard;

pub use access_guard::AccessGuardMiddleware;
