//! The per-connection I/O task and request state machine.
//!
//! One task owns the transport for the life of the connection. It sits in
//! one of two modes: idle (waiting for a submission, watching for a peer
//! close) or serving (driving one request to completion). A request drives
//!
//! ```text
//! Ready --send--> AwaitingResponse --final DONE--> Ready
//! AwaitingResponse --cancel--> DrainingAfterAttention --attn-ack DONE--> Ready
//! AwaitingResponse --fatal error / framing error--> Broken
//! ```

use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tds_wire::token::{EnvChange, Token, TokenReader};
use tds_wire::{encode_batch, PacketType, RpcRequest, TmRequest};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{SharedState, Transport};
use crate::assembler::Assembler;
use crate::error::{Error, Result};
use crate::result::ExecutionResult;

/// A request the connection task knows how to send.
pub(crate) enum Request {
    Batch(String),
    Rpc(RpcRequest),
    Tm(TmRequest),
}

/// One submitted request with its completion and cancellation channels.
pub(crate) struct Submission {
    pub(crate) request: Request,
    pub(crate) reply: oneshot::Sender<Result<ExecutionResult>>,
    pub(crate) cancel: CancellationToken,
}

/// Run the connection's I/O loop until close or breakage.
pub(crate) async fn run(
    mut transport: Transport,
    shared: Arc<SharedState>,
    mut commands: mpsc::Receiver<Submission>,
    cancel_grace: Duration,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(submission) => {
                    if serve(&mut transport, &shared, submission, cancel_grace)
                        .await
                        .is_break()
                    {
                        shared.broken.store(true, Ordering::Release);
                        break;
                    }
                }
                None => {
                    tracing::debug!("connection handle dropped, closing");
                    break;
                }
            },
            inbound = transport.recv() => {
                // Nothing is outstanding; any inbound activity means the
                // peer closed or broke protocol.
                match inbound {
                    Ok(None) => tracing::debug!("server closed an idle connection"),
                    Ok(Some(message)) => {
                        tracing::warn!(ty = ?message.ty, "unsolicited message on idle connection");
                    }
                    Err(error) => tracing::warn!(%error, "transport error on idle connection"),
                }
                shared.broken.store(true, Ordering::Release);
                break;
            }
        }
    }
}

/// Drive one request to resolution.
///
/// `Break` means the connection is no longer usable.
async fn serve(
    transport: &mut Transport,
    shared: &SharedState,
    submission: Submission,
    cancel_grace: Duration,
) -> ControlFlow<()> {
    let Submission {
        request,
        reply,
        cancel,
    } = submission;

    // Cancelled before anything was sent: resolve without touching the
    // socket.
    if cancel.is_cancelled() {
        let _ = reply.send(Err(Error::Cancelled));
        return ControlFlow::Continue(());
    }

    let descriptor = shared.txn_descriptor.load(Ordering::Acquire);
    let (ty, body) = match encode_request(&request, descriptor) {
        Ok(encoded) => encoded,
        Err(error) => {
            let _ = reply.send(Err(error));
            return ControlFlow::Continue(());
        }
    };

    if let Err(error) = transport.send(ty, body).await {
        let _ = reply.send(Err(Error::from_framing(error)));
        return ControlFlow::Break(());
    }

    let mut assembler = Assembler::new();
    let mut attention_sent = false;
    let mut drain_deadline = None;

    loop {
        // While draining after an attention, the ack must arrive within the
        // grace period or the connection is written off.
        let inbound = if let Some(deadline) = drain_deadline {
            match tokio::time::timeout_at(deadline, transport.recv()).await {
                Ok(inbound) => inbound,
                Err(_) => {
                    tracing::warn!("no attention acknowledgement within {cancel_grace:?}");
                    let _ = reply.send(Err(Error::Cancelled));
                    return ControlFlow::Break(());
                }
            }
        } else {
            tokio::select! {
                _ = cancel.cancelled(), if !attention_sent => {
                    tracing::debug!("cancelling in-flight request");
                    if let Err(error) = transport.send_attention().await {
                        let _ = reply.send(Err(Error::from_framing(error)));
                        return ControlFlow::Break(());
                    }
                    attention_sent = true;
                    drain_deadline =
                        Some(tokio::time::Instant::now() + cancel_grace);
                    continue;
                }
                inbound = transport.recv() => inbound,
            }
        };

        let message = match inbound {
            Ok(Some(message)) => message,
            Ok(None) => {
                let _ = reply.send(Err(Error::ConnectionClosed));
                return ControlFlow::Break(());
            }
            Err(error) => {
                let _ = reply.send(Err(Error::from_framing(error)));
                return ControlFlow::Break(());
            }
        };

        let mut reader = TokenReader::new(message.payload);
        let mut attention_acked = false;
        let mut finished = false;
        loop {
            match reader.next() {
                Ok(Some(token)) => {
                    if let Token::EnvChange(change) = &token {
                        apply_env_change(transport, shared, change);
                    }
                    if let Token::Done(done) | Token::DoneProc(done) = &token {
                        if done.is_attention_ack() {
                            attention_acked = true;
                        }
                        if done.is_final() {
                            finished = true;
                        }
                    }
                    assembler.push(token);
                }
                Ok(None) => break,
                Err(error) => {
                    if attention_sent {
                        // A server honouring an attention may cut the token
                        // stream mid-token; that must not abort the drain.
                        // Scan the rest of the payload for the ack instead.
                        tracing::debug!(%error, "token error while draining after attention");
                        if contains_attention_ack(&reader.remainder()) {
                            attention_acked = true;
                        }
                        break;
                    }
                    let _ = reply.send(Err(error.into()));
                    return ControlFlow::Break(());
                }
            }
        }

        if attention_acked {
            tracing::debug!("attention acknowledged, request cancelled");
            let _ = reply.send(Err(Error::Cancelled));
            return ControlFlow::Continue(());
        }

        if finished {
            if attention_sent {
                // The response completed before the attention landed; the
                // acknowledgement follows in its own message. Keep draining.
                continue;
            }
            let fatal = assembler.is_fatal();
            let _ = reply.send(assembler.finish());
            return if fatal {
                tracing::warn!("fatal server error, closing connection");
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            };
        }
    }
}

/// Look for a DONE token whose status carries the attention bit.
///
/// Only used on payloads that failed strict parsing, where token boundaries
/// can no longer be trusted.
fn contains_attention_ack(payload: &[u8]) -> bool {
    payload
        .windows(3)
        .any(|w| w[0] == 0xFD && u16::from_le_bytes([w[1], w[2]]) & 0x0020 != 0)
}

fn encode_request(request: &Request, descriptor: u64) -> Result<(PacketType, bytes::Bytes)> {
    match request {
        Request::Batch(sql) => Ok((PacketType::SqlBatch, encode_batch(sql, descriptor))),
        Request::Rpc(rpc) => Ok((PacketType::Rpc, rpc.encode(descriptor)?)),
        Request::Tm(tm) => Ok((PacketType::TransactionManager, tm.encode(descriptor))),
    }
}

fn apply_env_change(transport: &mut Transport, shared: &SharedState, change: &EnvChange) {
    match change {
        EnvChange::Database { new, old } => {
            tracing::debug!(from = %old, to = %new, "database changed");
            *shared.database.lock() = Some(new.clone());
        }
        EnvChange::PacketSize(size) => {
            tracing::debug!(size, "packet size renegotiated");
            transport.set_packet_size(*size as usize);
        }
        EnvChange::BeginTransaction(descriptor) => {
            tracing::debug!(descriptor, "transaction began");
            shared.txn_descriptor.store(*descriptor, Ordering::Release);
        }
        EnvChange::CommitTransaction | EnvChange::RollbackTransaction => {
            tracing::debug!("transaction ended");
            shared.txn_descriptor.store(0, Ordering::Release);
        }
        EnvChange::Collation(raw) => {
            tracing::debug!(bytes = raw.len(), "collation changed");
        }
        EnvChange::Routing { host, port } => {
            // Mid-session routing cannot be honoured; the pool will open
            // fresh connections at the new target on its own.
            tracing::warn!(%host, port, "ignoring mid-session routing notification");
        }
        _ => {}
    }
}
