//! Stanza lets a web application expose human-editable text snippets
//! ("content items") embedded in server-rendered views. Items are addressed
//! by a `(location, key)` pair, persisted in a JSON file or a Postgres table,
//! optionally fronted by an invalidation-driven overlay cache, and edited in
//! the browser through a small widget served by [`infra::http`].

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
