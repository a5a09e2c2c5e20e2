// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Strata
//!
//! A declarative, idempotent orchestrator for multi-region infrastructure.
//!
//! ## Overview
//!
//! Strata reads a document of resource descriptors, groups them into
//! deployment units, and applies the units in dependency order:
//!
//! - Describe clusters, add-ons, keys, vaults and backup plans in YAML
//! - Derive dependencies from the `references` of each descriptor
//! - Apply independent units concurrently with bounded parallelism
//! - Skip units whose content is unchanged since the last run
//!
//! ## Architecture
//!
//! 1. **Descriptors**: Defined in `strata.yaml` and validated once
//! 2. **Graph**: Units keyed by stack, checked for cycles
//! 3. **Plan**: Batches compiled with Kahn's algorithm, ties broken by id
//! 4. **Engine**: Applies batches, retries transient failures, blocks
//!    dependents of failed units
//! 5. **State**: The last applied hash of every unit, keyed by region
//!
//! ## Modules
//!
//! - [`config`]: Document parsing, validation and content hashing
//! - [`planner`]: Dependency graph, plan compiler and orchestration engine
//! - [`provider`]: Resource provider interface and implementations
//! - [`state`]: State storage backends (local, S3, memory)
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! region: us-west-1
//! account: "123456789012"
//!
//! resources:
//!   - id: vaultPrimary
//!     kind: vault
//!     properties:
//!       vaultName: primary
//!   - id: keyReplica
//!     kind: key
//!     region: us-east-2
//!     properties:
//!       keyPolicy: {}
//!     references: [vaultPrimary]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ContentHasher, DeployConfig, DescriptorValidator};
pub use error::{Result, StrataError};
pub use planner::{ApplyReport, DependencyGraph, Orchestrator, Plan, PlanCompiler};
pub use provider::{DryRunProvider, HttpProvider, ResourceProvider};
pub use state::{LocalStateStore, MemoryStateStore, S3StateStore, StateStore};
