//! Origin-pinned HTTP capability for suspendable guests.
//!
//! # Overview
//! A guest sends call packets describing HTTP requests; the service forwards
//! them to a single configured origin and sends back a response packet. The
//! host may cancel an instance at any await point and later resume it from a
//! single opaque state buffer without losing the call or its reply.
//!
//! # Design
//! - `packet` is the fixed-header envelope the host speaks.
//! - `codec` encodes and decodes call and response tables.
//! - `bridge` turns a call into an outbound request against the origin and
//!   maps the result, or the failure, onto a response.
//! - `instance` owns the single pending packet and decides on every call and
//!   every delivery attempt whether to reply, restart or checkpoint.
//! - `service` validates configuration and creates or restores instances.
//! - `host` defines the traits a host runtime drives them through.

pub mod bridge;
pub mod codec;
pub mod error;
pub mod host;
pub mod instance;
pub mod packet;
pub mod service;

pub use bridge::{BridgeOutcome, HttpBridge, INLINE_BODY_LIMIT, PENDING_STREAM};
pub use codec::{Call, Function, FunctionType, HttpRequest, HttpResponse, NO_STREAM};
pub use error::{BridgeError, CodecError, ServiceError};
pub use host::{Instance, InstanceConfig, MapRegistry, Registry, ReplySender, Service};
pub use instance::{InstanceState, LocalhostInstance};
pub use packet::{Code, Domain, Packet, SuspendMarker, HEADER_SIZE};
pub use service::{init_services, Config, LocalhostService, SERVICE_NAME, URL_ENV};
