//! Wire-contract conformance checks.
//!
//! The schemas live in `contracts/` at the repository root; this crate only
//! hosts the integration tests that validate fixtures and serialized
//! contract values against them.
