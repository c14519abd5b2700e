//! Value sanitizing, JSON encoding and output sinks.

pub mod encode;
pub mod sanitize;
pub mod sink;
