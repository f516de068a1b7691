//! Infrastructure layer: event storage, command dispatch, read models and the
//! fulfillment service that ties the stock ledger, carts and orders together.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod external;
pub mod fulfillment;
pub mod projections;
pub mod read_model;

mod integration_tests;
