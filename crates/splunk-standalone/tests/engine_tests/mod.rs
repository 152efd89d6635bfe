//! Engine scenario tests

mod app_sources;
mod credentials;
mod helpers;
mod lifecycle;
mod ownership;
