//! NLDS: Near-Line Data Store
//!
//! NLDS is a bus-driven workflow engine that stages and archives files
//! across POSIX disk, an S3-compatible object store, and tape. A PUT or
//! GET request arrives as a single message on an AMQP topic exchange and
//! is carried forward by a chain of independent consumers, each
//! subscribed to one routing key family and re-publishing to the next,
//! with every step's progress recorded against a per-transaction state
//! machine in the monitor store.
//!
//! # Architecture
//!
//! 1. **Router**: accepts inbound API requests, opens a transaction and
//!    sub-transaction in the [`monitor`] store, and emits the first
//!    workflow message.
//! 2. **Indexer**: walks the requested paths, classifying each one and
//!    splitting oversized filelists into sub-transactions ([`indexer`]).
//! 3. **Transfer**: streams file bytes between disk and the object
//!    store, checksumming as it goes ([`transfer`]).
//! 4. **Catalog**: records holdings, transactions, files, and locations
//!    ([`catalog`]), and resolves per-group tape quotas ([`auth`]).
//! 5. **Aggregator / Archive**: bins files by size into tape-sized
//!    aggregations ([`aggregator`]) and writes/reads them as tar
//!    streams against the tape client ([`archive`]).
//!
//! Every consumer communicates over the [`bus`] using the
//! [`protocol`]'s envelope format and routing-key algebra, and applies
//! the [`retry`] policy to transient transport failures.
//!
//! # Quick Start
//!
//! ```rust
//! use nlds::config::ConfigBuilder;
//!
//! // Defaults are already valid: non-empty rabbit_mq credentials and a
//! // configured authenticator backend.
//! let config = ConfigBuilder::new().build();
//! assert!(config.is_ok());
//! ```

pub mod aggregator;
pub mod archive;
pub mod auth;
pub mod bootstrap;
pub mod bus;
pub mod catalog;
pub mod config;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod monitor;
pub mod protocol;
pub mod retry;
pub mod router;
pub mod transfer;

pub use config::{ConfigBuilder, NldsConfig};
pub use error::{ErrorContext, NldsError, NldsResult};
pub use protocol::{Details, Envelope, MessageType, PathDetails, PathType, RoutingKey, Workflow};
