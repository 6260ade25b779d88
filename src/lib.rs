#![deny(missing_docs)]

//! Core library for docstack: declares the document question-answering
//! stack as plain data and synthesizes it into a CloudFormation template.

/// Function code assets: fingerprinting and zip packaging.
pub mod asset;
/// Environment-driven configuration management.
pub mod config;
/// Text rendering of a declared stack.
pub mod describe;
/// Structured logging and tracing setup.
pub mod logging;
/// Resource records, wiring records, and the stack builder.
pub mod model;
/// Physical bucket naming rules.
pub mod naming;
/// Declaration of the document pipeline stack.
pub mod pipeline;
/// CloudFormation template synthesis and dependency checks.
pub mod synth;
/// Template audits against the pipeline topology.
pub mod verify;
