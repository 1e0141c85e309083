// Public HTTP API

pub mod common;
pub mod workflows;

pub use common::ErrorResponse;
