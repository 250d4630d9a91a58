//! Kira core: an event-driven pipeline turning natural-language requests
//! into validated mutations on a file-backed Markdown vault, mediated by an
//! LLM-driven agent graph.
//!
//! Components, leaves first: the vault store ([`vault`]), the single-writer
//! Host API ([`host`]), the event bus and scheduler ([`bus`]), the LLM
//! router and adapters ([`providers`]), the agent graph with session state
//! ([`agent`]), the message-handler ingress ([`ingress`]), the tool catalog
//! ([`tools`]), and the optional HTTP surface ([`http`]).

pub mod agent;
pub mod bus;
pub mod config;
pub mod host;
pub mod http;
pub mod ingress;
pub mod logging;
pub mod providers;
pub mod timeutil;
pub mod tools;
pub mod vault;
