//! Common test utilities for drpg end-to-end tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod storefront;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use storefront::*;
