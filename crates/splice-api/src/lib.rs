// splice-api: wire-level clients for splice integrations

pub mod error;
pub mod openapi;
pub mod probe;
pub mod service;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use openapi::{OpenApiClient, OpenApiDocument, Operation, Parameter, ParameterLocation};
pub use probe::HealthProbe;
pub use service::ServiceClient;
pub use transport::{TlsMode, TransportConfig, headers_from_json};
pub use websocket::{EventStreamHandle, ReconnectConfig, ServiceEvent};
