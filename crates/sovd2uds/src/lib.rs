//! sovd2uds - SOVD to UDS translation engine
//!
//! Turns symbolic SOVD operations (`read_data vin on engine`) into UDS
//! request/response exchanges with vehicle ECUs reached through a
//! byte-oriented client library.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TranslationEngine                         │
//! │  Implements SovdExecutor                                    │
//! │                                                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Catalog     │  │ Plan        │  │ ConnectionPool      │  │
//! │  │ (per target)│  │ (resolve)   │  │ (FIFO per target)   │  │
//! │  └─────────────┘  └─────────────┘  └──────────┬──────────┘  │
//! │                                               │             │
//! │                                     ┌─────────┴─────────┐   │
//! │                                     │ SessionManager    │   │
//! │                                     │ (session/security)│   │
//! │                                     └─────────┬─────────┘   │
//! │                                               │             │
//! │                                     ┌─────────┴─────────┐   │
//! │                                     │ ConnectionHandle  │   │
//! │                                     │ (native | sim)    │   │
//! │                                     └───────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `uds` module holds the pure codecs (frames, NRCs, values, DTCs) and
//! never touches a connection.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod session;
pub mod target;
pub mod transport;
pub mod uds;

pub use catalog::{Catalog, CatalogError, DataType, DidMapping};
pub use config::{BridgeConfig, ConfigError, EcuTargetConfig};
pub use engine::{EngineBuilder, TranslationEngine};
pub use error::{DiagError, SecurityDenial};
pub use pool::ConnectionPool;
pub use session::{KeyDerivation, SecurityState, SessionState, SessionType};
pub use target::EcuTarget;
pub use transport::{sim::SimulatedNetwork, LinkConnector, TransportError, UdsLink};
pub use uds::{NegativeResponseCode, UdsRequest, UdsResponse};

pub use sovd2uds_core::{
    ErrorDetail, ErrorKind, OperationKind, SovdExecutor, SovdRequest, SovdResponse, SovdValue,
};
