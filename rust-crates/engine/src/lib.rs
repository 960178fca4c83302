pub mod config;

pub mod coordinator;

pub mod effects;

pub mod error;

pub mod layout;

pub mod physics;

pub mod processor;

pub mod queue;

pub mod replay;

pub mod resolver;

pub mod settlement;

pub mod symbols;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{
    EngineError,
    Result,
};
