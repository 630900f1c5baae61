//! Registry protocol tasks
//!
//! Three long-lived tasks keep the registry alive without any handshake:
//! the listener folds announcements into the registry, the probe loop
//! solicits re-announcements every 2 seconds, and the self-registration
//! responder lets the gateway answer the same protocol it runs. Bus and
//! deserialization errors are swallowed; these loops must never unwind.

use crate::context::GatewayContext;
use bytes::Bytes;
use serde_json::Value;
use silta_core::rpc::ERR_METHOD_NOT_FOUND;
use silta_core::{methods, subjects, Manifest, Registration, Request, Response};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Cadence of the discovery probe
pub const PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Fold registration announcements into the registry
pub(crate) fn spawn_registry_listener(ctx: GatewayContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = match ctx.bus().subscribe(subjects::REGISTRATION).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Registry listener failed to subscribe");
                return;
            }
        };
        while let Some(msg) = sub.next().await {
            match serde_json::from_slice::<Registration>(&msg.payload) {
                Ok(reg) => ctx.registry().announce(reg),
                Err(e) => trace!(error = %e, "Ignoring malformed registration"),
            }
        }
    })
}

/// Publish a probe every [`PROBE_INTERVAL`], soliciting re-announcements
///
/// Plugins subscribe to the probe subject and reply by re-publishing
/// their registration, which recovers the registry after a bus reconnect
/// or a gateway restart.
pub(crate) fn spawn_discovery_probe(ctx: GatewayContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = ctx
                .bus()
                .publish(subjects::DISCOVERY_PROBE, Bytes::from_static(b"probe"))
                .await
            {
                debug!(error = %e, "Discovery probe publish failed");
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    })
}

/// Register the gateway itself and answer health probes on its subject
///
/// Returns `None` when no RPC subject is configured; the gateway then
/// stays silent in the registry protocol.
pub(crate) fn spawn_self_registration(ctx: GatewayContext) -> Option<JoinHandle<()>> {
    let subject = ctx.rpc_subject()?.to_string();
    let registration = Registration {
        manifest: Manifest {
            id: ctx.gateway_id().to_string(),
            name: "Silta Gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: None,
        },
        rpc_subject: subject.clone(),
    };

    Some(tokio::spawn(async move {
        let reg_data = match serde_json::to_vec(&registration) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!(error = %e, "Failed to encode self-registration");
                return;
            }
        };

        let mut rpc_sub = match ctx.bus().subscribe(&subject).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Self-registration failed to subscribe");
                return;
            }
        };
        let mut probe_sub = match ctx.bus().subscribe(subjects::DISCOVERY_PROBE).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Self-registration failed to subscribe to probes");
                return;
            }
        };

        let _ = ctx.bus().publish(subjects::REGISTRATION, reg_data.clone()).await;
        info!(gateway_id = %ctx.gateway_id(), subject = %subject, "Gateway self-registered");

        loop {
            tokio::select! {
                msg = rpc_sub.next() => {
                    let Some(msg) = msg else { return };
                    let Some(reply_to) = msg.reply_to else { continue };
                    let resp = answer_rpc(&msg.payload);
                    if let Ok(data) = serde_json::to_vec(&resp) {
                        let _ = ctx.bus().publish(&reply_to, Bytes::from(data)).await;
                    }
                }
                msg = probe_sub.next() => {
                    if msg.is_none() {
                        return;
                    }
                    let _ = ctx.bus().publish(subjects::REGISTRATION, reg_data.clone()).await;
                }
            }
        }
    }))
}

/// The gateway answers exactly one RPC method, its health probe
fn answer_rpc(payload: &[u8]) -> Response {
    let req: Request = match serde_json::from_slice(payload) {
        Ok(req) => req,
        Err(_) => {
            return Response::error(Value::Null, ERR_METHOD_NOT_FOUND, "method not found");
        }
    };
    let id = req.id.unwrap_or(Value::Null);
    if req.method == methods::HEALTH {
        Response::success(
            id,
            serde_json::json!({"status": "perfect", "service": "gateway"}),
        )
    } else {
        Response::error(id, ERR_METHOD_NOT_FOUND, "method not found")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn health_probe_answers_perfect() {
        let req = Request::new(json!(7), methods::HEALTH, Value::Null);
        let resp = answer_rpc(&serde_json::to_vec(&req).unwrap());
        assert_eq!(resp.id, json!(7));
        let result = resp.result.unwrap();
        assert_eq!(result["status"], "perfect");
        assert_eq!(result["service"], "gateway");
    }

    #[test]
    fn unknown_method_gets_standard_error() {
        let req = Request::new(json!(1), "entities/list", Value::Null);
        let resp = answer_rpc(&serde_json::to_vec(&req).unwrap());
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "method not found");
    }

    #[test]
    fn garbage_payload_gets_standard_error() {
        let resp = answer_rpc(b"{nope");
        assert_eq!(resp.error.unwrap().code, -32601);
    }
}
