use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use oekaki_adapters::incoming::ws_client::connection::TransportEvent;
use oekaki_application::error::AppResult;
use oekaki_application::ports::incoming::session::SessionInboundUseCase;

use crate::bootstrap::state::ClientState;

const TICK_INTERVAL_MS: u64 = 100;

/// Drives the synchronous session controller from the socket's event
/// stream: frames, the quiet-timer tick, and the shutdown signal are
/// serialized here, which is what keeps the core single-threaded.
pub async fn run(state: ClientState, mut shutdown: mpsc::Receiver<()>) -> AppResult<()> {
    let ClientState {
        mut controller,
        mut session,
        events,
        surface: _surface,
    } = state;

    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            debug!("session event: {event:?}");
        }
    });

    let mut tick = interval(Duration::from_millis(TICK_INTERVAL_MS));
    loop {
        tokio::select! {
            transport_event = session.events.recv() => {
                match transport_event {
                    Some(TransportEvent::Opened) => {
                        controller.handle_open(now_ms())?;
                    }
                    Some(TransportEvent::Frames(frames)) => {
                        let now = now_ms();
                        for frame in frames {
                            if let Err(err) = controller.handle_frame(frame, now) {
                                warn!("frame handling failed: {err}");
                            }
                        }
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        controller.handle_close(&reason)?;
                        break;
                    }
                    None => {
                        controller.handle_close("transport tasks ended")?;
                        break;
                    }
                }
            }
            _ = tick.tick() => {
                controller.handle_quiet_tick(now_ms())?;
            }
            _ = shutdown.recv() => {
                info!("shutting down session");
                controller.handle_close("shutdown requested")?;
                break;
            }
        }
    }
    Ok(())
}

fn now_ms() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or(0)
}
