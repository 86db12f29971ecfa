use std::sync::Arc;

use domain::participant::UserId;
use oekaki_adapters::incoming::ws_client::connection::{self, ConnectionError, WsSession};
use oekaki_adapters::outgoing::events_broadcast::tokio_broadcast::TokioBroadcastEventsAdapter;
use oekaki_adapters::outgoing::image_rs::png_codec_image::ImagePngAdapter;
use oekaki_adapters::outgoing::surface_memory::MemorySurfaceAdapter;
use oekaki_adapters::outgoing::transport_ws::WsTransportAdapter;
use oekaki_application::config::SessionSettings;
use oekaki_application::infrastructure_config::Config;
use oekaki_application::ports::outgoing::{
    events::DynEventsPort, image_codec::DynImageCodecPort, surface::DynSurfacePort,
    transport::DynTransportPort,
};
use oekaki_application::session::service::{SessionController, SessionDeps};

/// Everything the run loop needs: the connected socket, the wired-up
/// session controller, and handles onto the local adapters.
pub struct ClientState {
    pub controller: SessionController,
    pub session: WsSession,
    pub events: Arc<TokioBroadcastEventsAdapter>,
    pub surface: Arc<MemorySurfaceAdapter>,
}

impl ClientState {
    pub async fn new(config: Config) -> Result<Self, ConnectionError> {
        let session = connection::connect(&config.session_url()).await?;

        let transport: DynTransportPort =
            Arc::new(WsTransportAdapter::new(session.outbound.clone(), 0));
        let codec: DynImageCodecPort = Arc::new(ImagePngAdapter::new());
        let surface = Arc::new(MemorySurfaceAdapter::new());
        let events = Arc::new(TokioBroadcastEventsAdapter::new(64));

        let surface_port: DynSurfacePort = Arc::clone(&surface) as DynSurfacePort;
        let events_port: DynEventsPort = Arc::clone(&events) as DynEventsPort;

        let user_id = config
            .client
            .user_id
            .clone()
            .map_or_else(UserId::generate, UserId::new);

        let controller = SessionController::new(
            SessionSettings::new(config.canvas_size()),
            user_id,
            config.client.username.clone(),
            config.client.flip_horizontal,
            SessionDeps {
                transport,
                codec,
                surface: surface_port,
                events: events_port,
            },
        );

        Ok(Self {
            controller,
            session,
            events,
            surface,
        })
    }
}
