//! Per-instance call handling with suspend/resume checkpointing.
//!
//! # Design
//! An instance holds at most one pending packet, and the whole of its
//! transient state is that packet. Its length field is overwritten with a
//! `SuspendMarker` that tells `resume` what to do next:
//!
//! - `Incoming`: the call was interrupted before a response existed. It is
//!   handled again from scratch; the bridge only asks for this on GET and
//!   HEAD.
//! - `Outgoing`: the reply was built but the host stopped accepting packets.
//!   The same reply is offered again.
//!
//! Every call ends in exactly one of three ways: a reply is sent, the call is
//! parked as `Incoming`, or the reply is parked as `Outgoing`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bridge::{BridgeOutcome, HttpBridge};
use crate::codec::{Call, Function, HttpResponse};
use crate::error::ServiceError;
use crate::host::{Instance, ReplySender};
use crate::packet::{Code, Domain, Packet, SuspendMarker};

/// What an instance will do on its next `resume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Idle,
    SuspendedIncoming,
    SuspendedOutgoing,
}

#[derive(Debug)]
pub struct LocalhostInstance {
    bridge: Arc<HttpBridge>,
    code: Code,
    suspended: Option<Packet>,
}

impl LocalhostInstance {
    pub fn new(bridge: Arc<HttpBridge>, code: Code) -> Self {
        Self {
            bridge,
            code,
            suspended: None,
        }
    }

    /// Rebuild an instance around a state buffer, taking ownership of it.
    pub fn from_state(
        bridge: Arc<HttpBridge>,
        code: Code,
        state: Vec<u8>,
    ) -> Result<Self, ServiceError> {
        let suspended = if state.is_empty() {
            None
        } else {
            let packet = Packet::from_bytes(state)?;
            if packet.suspend_marker().is_none() {
                return Err(ServiceError::UnknownMarker(packet.length_field()));
            }
            Some(packet)
        };
        Ok(Self {
            bridge,
            code,
            suspended,
        })
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn state(&self) -> InstanceState {
        match self.suspended.as_ref().and_then(Packet::suspend_marker) {
            None => InstanceState::Idle,
            Some(SuspendMarker::Incoming) => InstanceState::SuspendedIncoming,
            Some(SuspendMarker::Outgoing) => InstanceState::SuspendedOutgoing,
        }
    }

    async fn dispatch(
        &mut self,
        ctx: &CancellationToken,
        replies: &ReplySender,
        mut packet: Packet,
    ) {
        if packet.domain() != Some(Domain::Call) {
            tracing::debug!(
                domain = packet.raw_domain(),
                "ignoring packet outside the call domain"
            );
            return;
        }

        let outcome = match Call::decode(packet.content()) {
            Ok(Call {
                function: Some(Function::HttpRequest(req)),
            }) => self.bridge.execute(ctx, &req).await,
            Ok(Call { function: None }) => BridgeOutcome::Respond(HttpResponse::default()),
            Err(e) => {
                tracing::warn!(code = self.code.0, error = %e, "malformed call content");
                BridgeOutcome::Respond(HttpResponse::default())
            }
        };

        match outcome {
            BridgeOutcome::Restart => {
                packet.mark_suspended(SuspendMarker::Incoming);
                self.suspended = Some(packet);
                tracing::info!(code = self.code.0, "call suspended before completion");
            }
            BridgeOutcome::Respond(res) => {
                let reply = Packet::build(self.code, Domain::Call, |buf| res.encode_into(buf));
                self.deliver(ctx, replies, reply).await;
            }
        }
    }

    async fn deliver(&mut self, ctx: &CancellationToken, replies: &ReplySender, mut reply: Packet) {
        let permit = tokio::select! {
            biased;
            permit = replies.reserve() => permit.ok(),
            _ = ctx.cancelled() => None,
        };

        match permit {
            Some(permit) => permit.send(reply),
            None => {
                reply.mark_suspended(SuspendMarker::Outgoing);
                self.suspended = Some(reply);
                tracing::info!(
                    code = self.code.0,
                    closed = replies.is_closed(),
                    "reply suspended before delivery"
                );
            }
        }
    }
}

#[async_trait]
impl Instance for LocalhostInstance {
    async fn handle(&mut self, ctx: &CancellationToken, replies: &ReplySender, packet: Packet) {
        self.dispatch(ctx, replies, packet).await;
    }

    async fn resume(&mut self, ctx: &CancellationToken, replies: &ReplySender) {
        let Some(mut packet) = self.suspended.take() else {
            return;
        };

        let marker = packet.suspend_marker();
        packet.restore_length();
        match marker {
            Some(SuspendMarker::Incoming) => {
                tracing::info!(code = self.code.0, "resuming suspended call");
                self.dispatch(ctx, replies, packet).await;
            }
            Some(SuspendMarker::Outgoing) => {
                tracing::info!(code = self.code.0, "resuming suspended reply");
                self.deliver(ctx, replies, packet).await;
            }
            None => {
                tracing::warn!(
                    code = self.code.0,
                    "discarding suspended packet with unknown marker"
                );
            }
        }
    }

    fn extract_state(&self) -> &[u8] {
        self.suspended.as_ref().map_or(&[][..], Packet::as_bytes)
    }

    fn close(self: Box<Self>) -> Result<(), ServiceError> {
        Ok(())
    }
}
