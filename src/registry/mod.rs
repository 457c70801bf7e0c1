//! # Registry Infrastructure
//!
//! Name-keyed lookup of live activation units.
//!
//! ## Usage
//!
//! ```rust
//! use unit_bootstrap::registry::UnitRegistry;
//!
//! let registry = UnitRegistry::new();
//! assert!(registry.lookup("orders-db").is_none());
//! assert_eq!(registry.stats().total_units, 0);
//! ```

pub mod unit_registry;

pub use unit_registry::{RegistryStats, UnitRegistry};
