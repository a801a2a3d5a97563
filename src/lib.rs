#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! wardend library — a POSIX process supervision kernel.
//!
//! This library exposes the building blocks `wardend`'s binary composes:
//! - `config` — TOML configuration, env-var overrides, validation
//! - `process` — per-child finite state machines and process groups
//! - `capture` — child stdout/stderr draining into log files and tail rings
//! - `logger` — the supervisor's own leveled log, independent of children
//! - `signals` — SIGTERM/SIGINT/SIGQUIT/SIGHUP/SIGUSR2 delivery into the loop
//! - `control` — the HTTP control surface (`/status`, `/processes/...`)
//! - `event_loop` — the single task owning all mutable supervision state
//! - `supervisor` — top-level orchestration across startup and SIGHUP reload

pub mod capture;
pub mod clock;
pub mod config;
pub mod control;
pub mod daemonize;
pub mod error;
pub mod event_loop;
pub mod logger;
pub mod pidfile;
pub mod privilege;
pub mod process;
pub mod rlimits;
pub mod signals;
pub mod supervisor;

pub use config::Config;
