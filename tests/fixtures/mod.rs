//! Test fixtures for natprobe integration tests

pub mod reflector;

pub use reflector::{
    ALTERNATE, Filtering, LOCAL, Mapping, PRIMARY, Scenario, SentRequest, SimulatedReflector,
    external,
};
