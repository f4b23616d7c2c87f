//! Outgoing call flow against the gateway. Media is handed off to the peer
//! connection library once the callee's peer id is known, so the flow here
//! ends at `Calling`.

use peercall_common::{generate_peer_id, CallSession, Result};
use tracing::{info, warn};

use crate::client::GatewayClient;

/// Walk a call to `target` as `caller`, reporting every status change to
/// `observe`. Gateway errors during lookup end the session in `Error`
/// rather than failing the function.
pub async fn place_call<F>(
    client: &GatewayClient,
    caller: &str,
    target: &str,
    mut observe: F,
) -> Result<CallSession>
where
    F: FnMut(&CallSession),
{
    let mut session = CallSession::new(target)?;
    observe(&session);

    let peer_id = generate_peer_id(caller);
    // An unannounced caller can still dial out; only inbound calls need it.
    if let Err(err) = client.announce(caller, &peer_id).await {
        warn!("failed to register peer id {}: {}", peer_id, err);
    }
    session.opened(peer_id)?;
    observe(&session);

    session.begin_lookup()?;
    observe(&session);

    let lookup = client.lookup(session.target()).await;
    match lookup {
        Ok(Some(remote)) => {
            info!(target_user = session.target(), remote = %remote, "dialing peer");
            session.dial(remote)?;
        }
        Ok(None) => {
            warn!("User {} is not online or not found", session.target());
            session.lookup_failed();
        }
        Err(err) => {
            session.fail(format!("Error looking up peer ID: {err}"));
        }
    }
    observe(&session);

    Ok(session)
}
