/// Router Module Index
///
/// Splits the API by who may call it. Access control is enforced by the
/// extractors each handler takes (`AuthUser`, `AdminUser`, `Principal`);
/// the router layers in `lib.rs` add the session check and the
/// maintenance guard on top.

/// Anonymous routes. Content reads and comment submission sit behind the
/// maintenance guard.
pub mod public;

/// Routes for a logged-in session.
pub mod authenticated;

/// Routes open to a session or an API key, each handler checking the
/// resource permission it needs.
pub mod principal;

/// Routes nested under `/admin`.
pub mod admin;
