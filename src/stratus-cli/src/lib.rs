//! Stratus CLI library module.
//!
//! - `cli` - argument parsing and command dispatch
//! - `config` - locating and loading the auth configuration
//! - `auth_cmd` - login, logout, whoami, env, identities and validate
//! - `styled_output` - themed terminal messages

pub mod auth_cmd;
pub mod cli;
pub mod config;
pub mod styled_output;
