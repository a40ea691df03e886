//! ============================================================================
//! Access Module - Module-gated room access
//! ============================================================================
//! Turns completed-module progress into room access and scanned card tokens
//! into the color a reader shows.
//!
//! ## Pieces
//! - **expr**: parser and evaluator for the Modules sheet gating rules
//! - **rules**: applies every rule to one student's access columns
//! - **resolver**: maps a card token to a reader grant
//!
//! ## Usage
//! ```rust,ignore
//! use roomgate_core::access::{evaluate_grants, resolve};
//!
//! evaluate_grants(cache.people_mut(), &rules, &completed, PersonKey::Identity("alove"))?;
//! let resolved = resolve(cache.people(), cache.grants(), "04A1B2C3");
//! ```
//! ============================================================================

mod expr;
mod resolver;
mod rules;

pub use expr::{evaluate, Expr, ExprError};
pub use resolver::{resolve, GrantLabel, Holder, Resolution, Resolved};
pub use rules::{evaluate_grants, ModuleRule};
