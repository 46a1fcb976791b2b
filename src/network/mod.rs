//! HTTP plumbing: transport trait, reqwest client, connectivity state and
//! route-to-entity mapping.

mod client;
mod connectivity;
mod routes;
mod transport;

pub use client::ApiClient;
pub use connectivity::{ConnectivityProbe, OnlineFlag};
pub use routes::{RouteConfig, RouteTable};
pub use transport::{
  HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError, TransportErrorKind,
};
