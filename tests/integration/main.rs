//! Integration tests: the engine driven end to end against in-memory
//! collaborators.

mod engine_scenarios;
mod mock_platform;
