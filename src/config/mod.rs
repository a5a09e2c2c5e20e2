//! Configuration module for the Strata orchestrator.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `strata.yaml`
//! - Validation of resource descriptors
//! - Computing content hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    DeployConfig, EngineConfig, ProviderConfig, ProviderKind, ResourceDescriptor, ResourceKind,
    StateBackend, StateConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR, find_config_file};
pub use validator::{DescriptorValidator, ValidationReport};
pub use hash::ContentHasher;
