//! # vigil-transport
//!
//! Broker connectivity for the Vigil sensor monitor.
//!
//! - **Transport** - Opens broker connections (`mqtt`, `loopback`)
//! - **Session** - Connection lifecycle, subscriptions and inbound dispatch
//! - **Dispatcher** - Outbound LED commands on `led/control`
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil_core::Router;
//! use vigil_transport::{MqttConfig, MqttTransport, Session};
//!
//! let transport = MqttTransport::new(MqttConfig::default())?;
//! let session = Session::new(Arc::new(transport), Arc::new(Router::new()));
//! session.start().await?;
//! session.toggle_device(true).await?;
//! session.stop().await;
//! ```

pub mod dispatcher;
pub mod loopback;
pub mod session;
pub mod traits;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use dispatcher::{CommandDispatcher, DispatchError};
pub use session::{Session, SessionError, SessionState};
pub use traits::{ClientHandle, ClientId, Connection, Transport, TransportError, TransportEvent};

#[cfg(feature = "mqtt")]
pub use mqtt::{BrokerEndpoint, MqttConfig, MqttTransport, DEFAULT_BROKER_URL};
