//! Callgate Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - The service trait the gateway binary implements
//! - Call and session identifiers shared by the protocol and gateway crates
//! - Error handling utilities
//! - Configuration management

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{CallgateError, Result};
pub use service::{DependencyStatus, GatewayService, HealthStatus, ReadinessStatus, ServiceRuntime};
