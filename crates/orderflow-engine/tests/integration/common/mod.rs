//! Mock servers shared by integration tests.

pub mod mock_rest;
pub mod mock_ws;
