//! Message envelope and routing-key algebra: the alphabet that wires every
//! NLDS consumer together. See [`envelope`] for the JSON message shape and
//! [`routing`] for the `<root>.<workflow>.<action>` key grammar.

pub mod envelope;
pub mod routing;

pub use envelope::{Details, Envelope, MessageType, PathDetails, PathType};
pub use routing::{Action, RoutingKey, Workflow, ROOT, WILD};
