//! Constructs of the fraud-detection stack, one per concern.
//!
//! Each construct declares its resources into a [`Stack`](crate::stack::Stack)
//! under its own scope and hands back typed handles for later constructs.

pub mod api;
pub mod app;
pub mod auth;
pub mod database;
pub mod environment;
pub mod location;
pub mod network;
pub mod parameters;
pub mod search;
pub mod storage;

pub use api::{ApiProps, FraudDetectionApi};
pub use app::{AppConstruct, AppProps};
pub use auth::{AuthConstruct, AuthProps};
pub use database::DatabaseConstruct;
pub use environment::{EnvironmentMap, RuntimeEnvironment};
pub use location::LocationConstruct;
pub use network::NetworkConstruct;
pub use parameters::ParametersConstruct;
pub use search::{SearchConstruct, SearchProps};
pub use storage::StorageConstruct;
