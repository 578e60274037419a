//! Connection lifecycle task.
//!
//! Connecting → Authenticating → Resubscribing → Ready, then wait for the
//! session to end, tear it down and back off before the next attempt. Only
//! this task changes the connection state outside of `disconnect`.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::client::credentials::Credentials;
use crate::client::events::ClientEvent;
use crate::connection::session::Session;
use crate::connection::{ConnectReply, ConnectionState, Ready, Shared};
use crate::correlation::RequestKind;
use crate::transport::message::Envelope;
use crate::utils::error::{
    AuthError, ConnectError, DisconnectReason, RequestError, TransportError,
};

/// Why an attempt did not reach Ready.
enum AttemptError {
    /// Worth retrying after a backoff.
    Retry(DisconnectReason),
    /// The broker refused our identity.
    Fatal(AuthError),
    Shutdown,
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    credentials: Credentials,
    mut shutdown: watch::Receiver<bool>,
    reply: ConnectReply,
) {
    let mut reply = Some(reply);
    let mut failures: u32 = 0;
    let headers = request_headers(&shared, &credentials);
    shared.set_credentials(credentials.clone());

    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.set_state(ConnectionState::Connecting);
        let attempt = tokio::select! {
            attempt = establish(&shared, &credentials, &headers) => attempt,
            _ = shutdown.changed() => Err(AttemptError::Shutdown),
        };

        match attempt {
            Ok((mut session, ready)) => {
                failures = 0;
                if let Some(reply) = reply.take() {
                    let _ = reply.send(Ok(ready));
                }

                let reason = tokio::select! {
                    reason = session.ended() => reason,
                    _ = shutdown.changed() => DisconnectReason::Shutdown,
                };
                let retry = reason != DisconnectReason::Shutdown && shared.config.auto_reconnect;
                teardown(&shared, session, &reason, retry).await;
                if !retry {
                    break;
                }
            }
            Err(AttemptError::Shutdown) => break,
            Err(AttemptError::Fatal(err)) => {
                error!("Broker rejected the handshake: {}", err);
                shared.set_state(ConnectionState::Disconnected);
                shared.events.emit(ClientEvent::Disconnected {
                    reason: DisconnectReason::AuthRejected(err.clone()),
                    will_retry: false,
                });
                if let Some(reply) = reply.take() {
                    let _ = reply.send(Err(ConnectError::Auth(err)));
                }
                return;
            }
            Err(AttemptError::Retry(reason)) => {
                failures += 1;
                warn!("Connection attempt {} failed: {}", failures, reason);
                shared.set_state(ConnectionState::Disconnected);

                if !shared.config.backoff.allows(failures) {
                    error!("Giving up after {} failed attempts", failures);
                    shared.events.emit(ClientEvent::Disconnected {
                        reason: reason.clone(),
                        will_retry: false,
                    });
                    if let Some(reply) = reply.take() {
                        let _ = reply.send(Err(ConnectError::RetriesExhausted {
                            attempts: failures,
                            last: reason,
                        }));
                    }
                    return;
                }
            }
        }

        let delay = shared.config.backoff.delay(failures);
        info!("Reconnecting in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    if let Some(reply) = reply.take() {
        let _ = reply.send(Err(ConnectError::Cancelled));
    }
}

fn request_headers(shared: &Shared, credentials: &Credentials) -> Vec<(String, String)> {
    let mut headers = shared.config.headers.clone();
    headers.extend(credentials.headers());
    headers
}

/// One attempt: open, handshake, resubscribe, Ready.
async fn establish(
    shared: &Arc<Shared>,
    credentials: &Credentials,
    headers: &[(String, String)],
) -> Result<(Session, Ready), AttemptError> {
    let connection = shared
        .transport
        .open(&shared.config.url, headers)
        .await
        .map_err(|e| AttemptError::Retry(DisconnectReason::Transport(e)))?;

    let mut session = Session::start(
        connection,
        Arc::clone(&shared.correlation),
        Arc::clone(&shared.registry),
        shared.session_options(),
    );
    shared.install_session(session.handle().clone());

    match handshake_and_resubscribe(shared, credentials, &mut session).await {
        Ok(ready) => Ok((session, ready)),
        Err(err) => {
            shared.clear_session(session.handle().id());
            session.close().await;
            // SUBSCRIBEs sent on this session will never be acked; queue them
            // again for the next attempt
            let interrupted = shared.registry.on_connection_lost();
            if let AttemptError::Retry(reason) = &err {
                for slot in interrupted {
                    slot.interrupt(reason);
                }
            }
            Err(err)
        }
    }
}

async fn handshake_and_resubscribe(
    shared: &Arc<Shared>,
    credentials: &Credentials,
    session: &mut Session,
) -> Result<Ready, AttemptError> {
    shared.set_state(ConnectionState::Authenticating);

    let id = shared.correlation.next_id();
    let in_flight = shared
        .correlation
        .register(id.clone(), RequestKind::Handshake)
        .map_err(|e| AttemptError::Retry(lost(e)))?;
    session
        .handle()
        .send(Envelope::whoami(id, credentials.whoami_payload()))
        .map_err(|e| AttemptError::Retry(DisconnectReason::Transport(e)))?;

    let reply = until_ended(session, in_flight.wait(Some(shared.config.handshake_timeout)))
        .await
        .map_err(AttemptError::Retry)?;
    let connection_id = match reply {
        Ok(envelope) => envelope
            .payload
            .as_ref()
            .and_then(|payload| payload.get("connectionID"))
            .and_then(|value| value.as_str())
            .map(str::to_string),
        Err(RequestError::Server { code, message }) => {
            return Err(AttemptError::Fatal(AuthError::Rejected { code, message }));
        }
        Err(RequestError::Timeout) => {
            return Err(AttemptError::Retry(DisconnectReason::HandshakeTimeout));
        }
        Err(other) => return Err(AttemptError::Retry(lost(other))),
    };
    info!("Handshake accepted (connection id {:?})", connection_id);

    shared.set_state(ConnectionState::Resubscribing);
    let acks: Vec<_> = shared
        .registry
        .take_unsent()
        .into_iter()
        .map(|pending| shared.send_subscribe(session.handle(), pending))
        .collect();
    if !acks.is_empty() {
        info!("Resubscribing {} topics", acks.len());
    }
    until_ended(session, join_all(acks))
        .await
        .map_err(AttemptError::Retry)?;

    shared.set_state(ConnectionState::Ready);
    session.handle().start_keepalive();
    // topics subscribed while Resubscribing
    shared.flush_subscriptions();
    shared.events.emit(ClientEvent::Connected {
        connection_id: connection_id.clone(),
    });

    Ok(Ready { connection_id })
}

/// Run `work` unless the session ends first.
async fn until_ended<F: Future>(session: &mut Session, work: F) -> Result<F::Output, DisconnectReason> {
    tokio::select! {
        output = work => Ok(output),
        reason = session.ended() => Err(reason),
    }
}

fn lost(err: RequestError) -> DisconnectReason {
    DisconnectReason::Transport(TransportError::Closed(err.to_string()))
}

/// Tear a Ready session down after it ended for `reason`.
async fn teardown(shared: &Arc<Shared>, session: Session, reason: &DisconnectReason, will_retry: bool) {
    shared.clear_session(session.handle().id());
    session.close().await;

    if *reason == DisconnectReason::Shutdown {
        shared.correlation.fail_all(RequestError::Cancelled);
    } else {
        shared
            .correlation
            .fail_all(RequestError::ConnectionLost(reason.to_string()));
        for slot in shared.registry.on_connection_lost() {
            slot.interrupt(reason);
        }
        shared.set_state(ConnectionState::Disconnected);
    }

    shared.events.emit(ClientEvent::Disconnected {
        reason: reason.clone(),
        will_retry,
    });
}
