//! Built-in metric and check definitions, grouped by scope.

pub mod instance;
pub mod project;
