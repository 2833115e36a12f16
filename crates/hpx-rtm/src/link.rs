//! Per-connection tasks: reader, writer, liveness prober and their supervisor.
//!
//! One supervisor runs per connection epoch. It owns the wire, spawns the
//! three loops and, when any of them fails or the stop token fires, drives
//! the teardown to completion: all loops stopped, probes discarded, session
//! cleared, `Disconnected` published, then the link is marked done.

use std::{sync::Arc, time::Instant};

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinSet,
    time::{MissedTickBehavior, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::Shared,
    decoder::EventDecoder,
    envelope::{Routed, route},
    error::{RtmError, RtmResult},
    events::{EventSink, RtmEvent},
    message::{QueuedMessage, ping_frame},
    session::SessionInfo,
    types::ConnectionEpoch,
    wire::{BoxWire, Frame},
};

/// Everything `connect` hands to a new link.
pub(crate) struct LinkParts {
    pub(crate) epoch: ConnectionEpoch,
    pub(crate) stop: CancellationToken,
    pub(crate) outgoing: mpsc::Receiver<QueuedMessage>,
    pub(crate) done: watch::Sender<bool>,
    pub(crate) hello: oneshot::Sender<()>,
    pub(crate) session: SessionInfo,
}

pub(crate) async fn supervise<D: EventDecoder>(
    shared: Arc<Shared<D>>,
    wire: BoxWire,
    parts: LinkParts,
) {
    let LinkParts {
        epoch,
        stop,
        outgoing,
        done,
        hello,
        session,
    } = parts;

    let (sink, stream) = wire.split();
    let (control_tx, control_rx) = mpsc::channel(shared.config.control_capacity);
    let events = shared.event_sink();

    let mut tasks = JoinSet::new();
    tasks.spawn(read_loop(
        Arc::clone(&shared),
        epoch,
        stop.clone(),
        stream,
        control_tx.clone(),
        events.clone(),
        hello,
        session,
    ));
    tasks.spawn(write_loop(
        Arc::clone(&shared),
        epoch,
        stop.clone(),
        sink,
        control_rx,
        outgoing,
        events.clone(),
    ));
    tasks.spawn(probe_loop(
        Arc::clone(&shared),
        epoch,
        stop.clone(),
        control_tx,
    ));

    let failure = tokio::select! {
        biased;
        _ = stop.cancelled() => None,
        joined = tasks.join_next() => Some(match joined {
            Some(Ok(Err(err))) => err,
            Some(Ok(Ok(()))) | None => RtmError::connection_closed(None),
            Some(Err(join_err)) => RtmError::internal(format!("link task failed: {join_err}")),
        }),
    };

    if let Some(err) = &failure {
        warn!(%epoch, error = %err, "Connection lost");
    }
    // A stop without a prior teardown comes from the client being dropped.
    if shared
        .state
        .begin_teardown(Some(epoch), failure.is_none())
        .is_ok()
    {
        debug!(%epoch, "Link taken down by supervisor");
    }
    stop.cancel();

    while let Some(joined) = tasks.join_next().await {
        if let Ok(Err(err)) = joined {
            debug!(%epoch, error = %err, "Link task ended with error during teardown");
        }
    }

    let discarded = shared.probes.clear_all();
    shared.state.clear_session();
    let intentional = shared.state.snapshot().was_intentional;
    events.publish_final(RtmEvent::Disconnected {
        epoch,
        intentional,
        reason: failure.map(|err| err.to_string()),
    });
    shared.state.finish_teardown();
    done.send_replace(true);

    info!(%epoch, intentional, discarded_probes = discarded, "Connection closed");
}

#[allow(clippy::too_many_arguments)]
async fn read_loop<D: EventDecoder>(
    shared: Arc<Shared<D>>,
    epoch: ConnectionEpoch,
    stop: CancellationToken,
    mut stream: SplitStream<BoxWire>,
    control: mpsc::Sender<Frame>,
    events: EventSink<D::Event>,
    hello: oneshot::Sender<()>,
    session: SessionInfo,
) -> RtmResult<()> {
    let mut hello = Some(hello);
    let max_frame_size = shared.config.max_frame_size;

    // The previous link's final events go out before this one announces itself.
    if !events.flush_backlog(&stop).await
        || !events.publish(RtmEvent::Connected { epoch }, &stop).await
    {
        return Ok(());
    }

    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            frame = stream.next() => frame,
        };

        let text = match frame {
            None => {
                return Err(RtmError::connection_closed(Some(
                    "end of stream".to_string(),
                )));
            }
            Some(Err(err)) => {
                warn!(%epoch, error = %err, "Read error");
                return Err(err);
            }
            Some(Ok(frame)) if max_frame_size > 0 && frame.len() > max_frame_size => {
                warn!(
                    %epoch,
                    size = frame.len(),
                    max = max_frame_size,
                    "Dropping oversized frame"
                );
                continue;
            }
            Some(Ok(Frame::Text(text))) => text,
            Some(Ok(Frame::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(err) => {
                    let event = RtmEvent::DecodeError {
                        type_tag: None,
                        raw: String::from_utf8_lossy(&data).into_owned(),
                        error: RtmError::decode(err.to_string()),
                    };
                    if !events.publish(event, &stop).await {
                        return Ok(());
                    }
                    continue;
                }
            },
            Some(Ok(Frame::Ping(data))) => {
                if control.try_send(Frame::Pong(data)).is_err() {
                    debug!(%epoch, "Control channel full, skipping pong");
                }
                continue;
            }
            Some(Ok(Frame::Pong(_))) => continue,
            Some(Ok(Frame::Close)) => {
                return Err(RtmError::connection_closed(Some(
                    "remote sent close".to_string(),
                )));
            }
        };

        let event = match route(&text, &shared.probes, &shared.decoder) {
            Routed::Hello => {
                shared.state.publish_session(epoch, session.clone());
                if let Some(tx) = hello.take() {
                    let _ = tx.send(());
                }
                info!(%epoch, "Handshake complete");
                RtmEvent::Hello {
                    info: session.clone(),
                }
            }
            Routed::Publish(event) => event,
            Routed::Ignore => continue,
        };

        if !events.publish(event, &stop).await {
            return Ok(());
        }
    }
}

async fn write_loop<D: EventDecoder>(
    shared: Arc<Shared<D>>,
    epoch: ConnectionEpoch,
    stop: CancellationToken,
    mut sink: SplitSink<BoxWire, Frame>,
    mut control: mpsc::Receiver<Frame>,
    mut outgoing: mpsc::Receiver<QueuedMessage>,
    events: EventSink<D::Event>,
) -> RtmResult<()> {
    let result = loop {
        let (frame, id) = tokio::select! {
            biased;
            _ = stop.cancelled() => break Ok(()),
            Some(frame) = control.recv() => (frame, None),
            Some(message) = outgoing.recv() => (Frame::Text(message.payload), Some(message.id)),
            else => break Ok(()),
        };

        let sent = tokio::select! {
            biased;
            _ = stop.cancelled() => break Ok(()),
            sent = sink.send(frame) => sent,
        };

        if let Err(err) = sent {
            warn!(%epoch, error = %err, "Write failed");
            match id {
                Some(id) => {
                    let reason = format!("write of message {id} failed: {err}");
                    events.publish_final(RtmEvent::OutgoingError { id, error: err });
                    break Err(RtmError::websocket(reason));
                }
                None => break Err(err),
            }
        }
    };

    match timeout(shared.config.close_timeout, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(%epoch, error = %err, "Close handshake failed"),
        Err(_) => debug!(%epoch, "Close handshake timed out"),
    }

    result
}

async fn probe_loop<D: EventDecoder>(
    shared: Arc<Shared<D>>,
    epoch: ConnectionEpoch,
    stop: CancellationToken,
    control: mpsc::Sender<Frame>,
) -> RtmResult<()> {
    let window = shared.config.probe_timeout;
    let mut ticker = tokio::time::interval(shared.config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let expired = shared.probes.expire_older_than(window);
        if let Some(&id) = expired.first() {
            warn!(%epoch, %id, unanswered = expired.len(), "Liveness probe timed out");
            return Err(RtmError::ProbeTimeout {
                id,
                timeout: window,
            });
        }

        let id = shared.sequencer.next_id();
        let payload = ping_frame(id)?;
        if let Err(err) = shared.probes.record(id, Instant::now()) {
            error!(%epoch, error = %err, "Probe identifier already outstanding");
            continue;
        }
        debug!(%epoch, %id, "Sending liveness probe");

        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            sent = control.send(Frame::Text(payload)) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
