use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use domain::brush::BrushTable;
use domain::coords::CanvasSize;
use domain::events::{ConnectionState, SessionEvent};
use domain::layer::{Layer, LayerBufferPool, LayerKind};
use domain::op::{OpPayload, Operation};
use domain::participant::{Participant, UserId};

use crate::compositor::service::LayerCompositor;
use crate::config::SessionSettings;
use crate::contracts::input::{ContainerRect, PointerEvent, ToolState};
use crate::contracts::wire::{InboundFrame, WireMessage};
use crate::engine::service::DrawingEngine;
use crate::engine::stroke::StrokeBuffer;
use crate::error::{AppError, AppResult};
use crate::history::service::{HistoryEngine, ModifiedLayer};
use crate::input::service::{InputRouter, RouterAction};
use crate::ports::incoming::canvas::{CanvasInputUseCase, ChatUseCase};
use crate::ports::incoming::session::SessionInboundUseCase;
use crate::ports::outgoing::events::DynEventsPort;
use crate::ports::outgoing::image_codec::DynImageCodecPort;
use crate::ports::outgoing::surface::DynSurfacePort;
use crate::ports::outgoing::transport::DynTransportPort;
use crate::reconcile::service::{ReconcileCtx, Reconciler};

const CATCHUP_STUCK_MS: u64 = 10_000;
const CATCHUP_PROGRESS_EVERY: usize = 25;

/// Outgoing ports the controller drives.
pub struct SessionDeps {
    pub transport: DynTransportPort,
    pub codec: DynImageCodecPort,
    pub surface: DynSurfacePort,
    pub events: DynEventsPort,
}

struct CatchupState {
    active: bool,
    queue: VecDeque<InboundFrame>,
    started_ms: u64,
    last_arrival_ms: u64,
    applied: usize,
    stuck_reported: bool,
}

impl CatchupState {
    fn idle() -> Self {
        Self {
            active: false,
            queue: VecDeque::new(),
            started_ms: 0,
            last_arrival_ms: 0,
            applied: 0,
            stuck_reported: false,
        }
    }
}

/// Owns one client's view of a drawing session: the per-participant engine
/// map, the local stroke buffer and history, the reconciler, and the
/// catch-up state machine. Strictly single-threaded; the embedding run
/// loop serializes frames, ticks, and pointer input.
pub struct SessionController {
    settings: SessionSettings,
    local_user: UserId,
    username: String,
    state: ConnectionState,
    participants: Vec<Participant>,
    engines: HashMap<UserId, DrawingEngine>,
    remote_drawing: HashSet<UserId>,
    brush: Arc<BrushTable>,
    stroke: StrokeBuffer,
    tool: ToolState,
    router: InputRouter,
    history: HistoryEngine,
    compositor: LayerCompositor,
    reconciler: Reconciler,
    deps: SessionDeps,
    catchup: CatchupState,
    local_drawing: bool,
    last_undo: bool,
    last_now_ms: u64,
}

impl SessionController {
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        local_user: UserId,
        username: String,
        flip_horizontal: bool,
        deps: SessionDeps,
    ) -> Self {
        let canvas = settings.canvas;
        let brush = Arc::new(BrushTable::new());
        let pool = Arc::new(LayerBufferPool::new(canvas, settings.buffer_pool_max));
        let history = HistoryEngine::new(canvas, settings.history_capacity, pool);
        let reconciler = Reconciler::new(settings.clone(), Arc::clone(&deps.events));
        let router = InputRouter::new(&settings, flip_horizontal);
        let mut engines = HashMap::new();
        engines.insert(
            local_user.clone(),
            DrawingEngine::new(canvas, Arc::clone(&brush)),
        );
        Self {
            compositor: LayerCompositor::new(canvas),
            stroke: StrokeBuffer::new(canvas),
            settings,
            local_user,
            username,
            state: ConnectionState::Disconnected,
            participants: Vec::new(),
            engines,
            remote_drawing: HashSet::new(),
            brush,
            tool: ToolState::default(),
            router,
            history,
            reconciler,
            deps,
            catchup: CatchupState::idle(),
            local_drawing: false,
            last_undo: false,
            last_now_ms: 0,
        }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn canvas(&self) -> CanvasSize {
        self.settings.canvas
    }

    #[must_use]
    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn local_layer(&self, kind: LayerKind) -> Option<&Layer> {
        self.engines.get(&self.local_user).map(|e| e.layer(kind))
    }

    #[must_use]
    pub fn layer_of(&self, user: &UserId, kind: LayerKind) -> Option<&Layer> {
        self.engines.get(user).map(|e| e.layer(kind))
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    #[must_use]
    pub fn pending_ops(&self) -> usize {
        self.reconciler.fork_len()
    }

    // --- participants ----------------------------------------------------

    fn ensure_engine(&mut self, user: &UserId) {
        if !self.engines.contains_key(user) {
            self.engines.insert(
                user.clone(),
                DrawingEngine::new(self.settings.canvas, Arc::clone(&self.brush)),
            );
        }
    }

    fn restack_surfaces(&self) {
        let order = LayerCompositor::stack_order(&self.participants);
        self.deps.surface.set_stack_order(&order).ok();
    }

    fn rebuild_participants(&mut self, mut incoming: Vec<Participant>) {
        incoming.sort_by_key(|p| p.joined_at_ms);
        let retained: HashSet<UserId> = incoming.iter().map(|p| p.user_id.clone()).collect();

        let departed: Vec<UserId> = self
            .engines
            .keys()
            .filter(|user| **user != self.local_user && !retained.contains(user))
            .cloned()
            .collect();
        for user in departed {
            self.engines.remove(&user);
            self.remote_drawing.remove(&user);
            self.deps.surface.drop_participant(&user).ok();
            debug!("dropped participant cluster {user}");
        }

        for participant in &incoming {
            self.ensure_engine(&participant.user_id);
        }
        self.participants = incoming;
        self.restack_surfaces();
        info!("participant list rebuilt: {} members", self.participants.len());
    }

    // --- presentation ----------------------------------------------------

    fn present_dirty(&mut self) {
        if self.catchup.active {
            return;
        }
        for (user, engine) in &mut self.engines {
            engine.present_dirty(&self.deps.surface, user).ok();
        }
    }

    fn present_all(&mut self) {
        for (user, engine) in &mut self.engines {
            engine.present_all(&self.deps.surface, user).ok();
        }
    }

    // --- outbound --------------------------------------------------------

    fn send_message(&self, message: &WireMessage) {
        if let Err(err) = self.deps.transport.send(message) {
            // a failed send never stops drawing; the op stays in the fork
            warn!("send failed for {}: {err}", message.kind_name());
        }
    }

    fn send_ops(&mut self, ops: &[Operation]) {
        let messages: Vec<WireMessage> = ops
            .iter()
            .filter_map(WireMessage::from_operation)
            .collect();
        match messages.len() {
            0 => {}
            1 => {
                if let Some(message) = messages.first() {
                    self.send_message(message);
                }
            }
            _ => {
                if let Err(err) = self.deps.transport.send_batch(&messages) {
                    warn!("batch send failed: {err}");
                }
            }
        }
    }

    fn record_and_queue(&mut self, op: &Operation, buffered: bool, now_ms: u64) {
        self.reconciler.record_local_op(op, buffered, self.last_undo);
        self.last_undo = false;
        if let Some(batch) = self.reconciler.queue_outbound(op.clone(), now_ms) {
            self.send_ops(&batch);
        }
    }

    fn make_local_op(&mut self, payload: OpPayload, timestamp_ms: u64) -> Operation {
        let sequence = self.reconciler.next_sequence();
        Operation::new(
            self.local_user.clone(),
            sequence,
            timestamp_ms,
            payload,
            self.settings.canvas,
        )
    }

    fn save_history(&mut self, modified: ModifiedLayer, now_ms: u64, content_snapshot: bool) {
        if let Some(engine) = self.engines.get(&self.local_user) {
            self.history.save_state(
                engine.layers(),
                modified,
                now_ms,
                !content_snapshot,
                content_snapshot,
                false,
            );
        }
    }

    // --- catch-up --------------------------------------------------------

    fn begin_catchup(&mut self, now_ms: u64) {
        self.catchup = CatchupState {
            active: true,
            queue: VecDeque::new(),
            started_ms: now_ms,
            last_arrival_ms: now_ms,
            applied: 0,
            stuck_reported: false,
        };
        self.reconciler.set_catching_up(true);
        self.set_state(ConnectionState::CatchingUp);
    }

    fn drain_catchup_queue(&mut self) {
        let mut slice: Vec<InboundFrame> = self.catchup.queue.drain(..).collect();
        // server-stamped envelopes define the replay order within a slice
        if !slice.is_empty() && slice.iter().all(|f| f.server_seq.is_some()) {
            slice.sort_by_key(|f| {
                (
                    f.server_seq.unwrap_or(0),
                    f.server_timestamp_ms.unwrap_or(0),
                    f.message.sender().cloned(),
                )
            });
        }
        let total = slice.len();
        for (index, frame) in slice.into_iter().enumerate() {
            self.dispatch_frame(frame);
            self.catchup.applied += 1;
            if self.catchup.applied % CATCHUP_PROGRESS_EVERY == 0 {
                self.publish(SessionEvent::CatchupProgress {
                    applied: self.catchup.applied,
                    pending: total - index - 1,
                });
            }
        }
    }

    fn finish_catchup(&mut self, now_ms: u64) {
        self.catchup.active = false;
        self.reconciler.set_catching_up(false);
        self.reconciler.force_capture(&self.engines, now_ms);
        // the authoritative state is the undo barrier
        self.save_history(ModifiedLayer::Both, now_ms, true);
        self.present_all();
        self.publish(SessionEvent::CatchupProgress {
            applied: self.catchup.applied,
            pending: 0,
        });
        self.set_state(ConnectionState::Connected);
        info!("catch-up complete after {} frames", self.catchup.applied);
    }

    // --- inbound dispatch ------------------------------------------------

    fn dispatch_frame(&mut self, frame: InboundFrame) {
        if let Some(seq) = frame.server_seq {
            self.reconciler.observe_server_sequence(seq);
        }
        let timestamp_ms = frame
            .server_timestamp_ms
            .unwrap_or(self.last_now_ms);

        match frame.message {
            WireMessage::Join { user_id, timestamp_ms } => {
                debug!("join from {user_id}");
                if user_id != self.local_user {
                    self.ensure_engine(&user_id);
                    if !self.participants.iter().any(|p| p.user_id == user_id) {
                        self.participants.push(Participant::new(
                            user_id.clone(),
                            user_id.as_str(),
                            timestamp_ms,
                        ));
                        self.participants.sort_by_key(|p| p.joined_at_ms);
                        self.restack_surfaces();
                    }
                }
            }
            WireMessage::Leave { user_id, username, .. } => {
                debug!("{username} ({user_id}) left");
                self.participants.retain(|p| p.user_id != user_id);
                if user_id != self.local_user {
                    self.engines.remove(&user_id);
                    self.remote_drawing.remove(&user_id);
                    self.deps.surface.drop_participant(&user_id).ok();
                }
                self.restack_surfaces();
            }
            WireMessage::Chat {
                user_id,
                username,
                message,
                timestamp_ms,
            } => {
                self.publish(SessionEvent::Chat {
                    user_id,
                    username,
                    message,
                    timestamp_ms,
                });
            }
            WireMessage::Layers { participants } => {
                self.rebuild_participants(participants);
            }
            WireMessage::PointerUp { user_id } => {
                if user_id != self.local_user && self.remote_drawing.remove(&user_id) {
                    self.deps.surface.set_cursor_visible(&user_id, false).ok();
                }
            }
            WireMessage::Snapshot { user_id, layer, png } => {
                self.apply_snapshot(&user_id, layer, &png);
            }
            WireMessage::SnapshotRequest { .. } => {
                self.answer_snapshot_request();
            }
            WireMessage::EndSession { user_id, post_url } => {
                info!("session ended by {user_id}");
                self.publish(SessionEvent::SessionEnded { post_url });
                self.history.clear();
                self.set_state(ConnectionState::Disconnected);
            }
            draw @ (WireMessage::DrawLine { .. }
            | WireMessage::DrawPoint { .. }
            | WireMessage::Fill { .. }) => {
                self.dispatch_draw(&draw, frame.server_seq, timestamp_ms);
            }
        }
    }

    fn dispatch_draw(&mut self, message: &WireMessage, server_seq: Option<u64>, timestamp_ms: u64) {
        let sequence = server_seq.unwrap_or_else(|| self.reconciler.next_sequence());
        let Some(op) = message.to_operation(sequence, timestamp_ms, self.settings.canvas) else {
            warn!("draw frame without operation form");
            return;
        };
        self.ensure_engine(&op.user_id);
        if op.user_id != self.local_user
            && !matches!(op.payload, OpPayload::Fill { .. })
            && self.remote_drawing.insert(op.user_id.clone())
        {
            self.deps.surface.set_cursor_visible(&op.user_id, true).ok();
        }

        let report = if self.catchup.active {
            let mut ctx = ReconcileCtx {
                engines: &mut self.engines,
                stroke: &mut self.stroke,
                tool: &self.tool,
                local_user: &self.local_user,
                pointer_down: false,
            };
            if let Err(err) = self.reconciler.apply_catchup(&op, &mut ctx) {
                warn!("catch-up apply failed: {err}");
            }
            None
        } else {
            let pointer_down = self.router.is_pointer_down() && self.local_drawing;
            let mut ctx = ReconcileCtx {
                engines: &mut self.engines,
                stroke: &mut self.stroke,
                tool: &self.tool,
                local_user: &self.local_user,
                pointer_down,
            };
            Some(self.reconciler.handle_remote(op, &mut ctx))
        };

        if report.is_some_and(|r| r.request_snapshot) {
            self.send_message(&WireMessage::SnapshotRequest {
                timestamp_ms: self.last_now_ms,
            });
        }

        self.reconciler
            .capture_snapshot_if_due(&self.engines, self.last_now_ms);
        self.present_dirty();
    }

    fn apply_snapshot(&mut self, user_id: &UserId, layer: LayerKind, png: &[u8]) {
        let decoded = match self.deps.codec.decode_png(png) {
            Ok((size, rgba)) if size == self.settings.canvas => rgba,
            Ok((size, _)) => {
                warn!(
                    "snapshot for {user_id}/{layer} has wrong dimensions {size}, skipping"
                );
                return;
            }
            Err(err) => {
                // keep the existing pixels on decode failure
                warn!("snapshot decode failed for {user_id}/{layer}: {err}");
                return;
            }
        };

        self.ensure_engine(user_id);
        let Some(engine) = self.engines.get_mut(user_id) else {
            return;
        };
        if let Err(err) = engine.restore_layer(layer, &decoded) {
            warn!("snapshot restore failed: {err}");
            return;
        }

        if *user_id == self.local_user {
            // server state overrides any optimistic local ops
            if self.reconciler.fork_len() > 0 {
                warn!("authoritative snapshot during fork; dropping pending ops");
                self.reconciler.clear_fork();
            }
            self.save_history(ModifiedLayer::from(layer), self.last_now_ms, true);
        }
        self.reconciler.force_capture(&self.engines, self.last_now_ms);
        if !self.catchup.active {
            self.present_all();
        }
    }

    /// Flattened PNG of the full canvas: white background, then every
    /// participant layer in ascending z order. Used for post export.
    pub fn export_canvas_png(&self) -> AppResult<Vec<u8>> {
        let solo;
        let roster: &[Participant] = if self.participants.is_empty() {
            solo = [Participant::new(
                self.local_user.clone(),
                self.username.clone(),
                0,
            )];
            &solo
        } else {
            &self.participants
        };
        let order = LayerCompositor::stack_order(roster);
        let layers: Vec<&Layer> = order
            .iter()
            .filter_map(|(user, kind, _)| self.engines.get(user).map(|e| e.layer(*kind)))
            .collect();
        self.compositor.export_png(&layers, &self.deps.codec)
    }

    fn answer_snapshot_request(&mut self) {
        let Some(engine) = self.engines.get(&self.local_user) else {
            return;
        };
        for kind in LayerKind::ALL {
            let raster = engine.layer(kind);
            match self
                .deps
                .codec
                .encode_png(self.settings.canvas, raster.as_bytes())
            {
                Ok(png) => {
                    self.send_message(&WireMessage::Snapshot {
                        user_id: self.local_user.clone(),
                        layer: kind,
                        png,
                    });
                }
                Err(err) => warn!("snapshot encode failed for {kind}: {err}"),
            }
        }
    }

    // --- local drawing ---------------------------------------------------

    fn begin_stroke(&mut self, x: u16, y: u16, now_ms: u64) -> AppResult<()> {
        self.local_drawing = true;
        self.stroke.begin(&self.tool);
        self.stroke.draw_line(
            &self.brush,
            (x, y),
            (x, y),
            self.tool.size,
            self.tool.brush,
            self.tool.color,
        )?;
        let payload = OpPayload::DrawPoint {
            layer: self.tool.layer,
            x,
            y,
            size: self.tool.size,
            brush: self.tool.brush,
            color: self.tool.color,
        };
        let op = self.make_local_op(payload, now_ms);
        self.record_and_queue(&op, true, now_ms);
        Ok(())
    }

    fn continue_stroke(&mut self, from: (u16, u16), to: (u16, u16), now_ms: u64) -> AppResult<()> {
        self.stroke.ensure_active(&self.tool);
        self.stroke.draw_line(
            &self.brush,
            from,
            to,
            self.tool.size,
            self.tool.brush,
            self.tool.color,
        )?;
        let payload = OpPayload::DrawLine {
            layer: self.tool.layer,
            from_x: from.0,
            from_y: from.1,
            to_x: to.0,
            to_y: to.1,
            size: self.tool.size,
            brush: self.tool.brush,
            color: self.tool.color,
        };
        let op = self.make_local_op(payload, now_ms);
        self.record_and_queue(&op, true, now_ms);
        Ok(())
    }

    fn end_stroke(&mut self, now_ms: u64) -> AppResult<()> {
        // strict is_drawing tracking dedupes doubled pointerup signals
        if !self.local_drawing {
            return Ok(());
        }
        self.local_drawing = false;

        let target = self.stroke.target_layer();
        if let Some(engine) = self.engines.get_mut(&self.local_user) {
            self.stroke.commit(engine.layers_mut().layer_mut(target), 1.0);
            engine.queue_layer_update(target);
        }
        self.reconciler.mark_stroke_committed();

        if let Some(batch) = self.reconciler.flush_outbound_all() {
            self.send_ops(&batch);
        }
        self.send_message(&WireMessage::PointerUp {
            user_id: self.local_user.clone(),
        });

        self.save_history(ModifiedLayer::from(target), now_ms, false);
        self.reconciler
            .capture_snapshot_if_due(&self.engines, now_ms);
        self.present_dirty();
        Ok(())
    }

    fn do_fill(&mut self, x: u16, y: u16, now_ms: u64) -> AppResult<()> {
        let payload = OpPayload::Fill {
            layer: self.tool.layer,
            x,
            y,
            color: self.tool.color,
        };
        let op = self.make_local_op(payload, now_ms);
        if let Some(engine) = self.engines.get_mut(&self.local_user) {
            engine.apply_operation(&op)?;
        }
        self.record_and_queue(&op, false, now_ms);
        self.save_history(ModifiedLayer::from(self.tool.layer), now_ms, false);
        self.present_dirty();
        Ok(())
    }

    fn pan_by(&mut self, dx: f64, dy: f64) {
        if let Some(engine) = self.engines.get_mut(&self.local_user) {
            engine.update_pan_offset(dx, dy);
            let (zoom, pan_x, pan_y) = engine.transform();
            self.deps.surface.set_transform(zoom, pan_x, pan_y).ok();
        }
    }

    fn publish(&self, event: SessionEvent) {
        self.deps.events.publish(event).ok();
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.publish(SessionEvent::ConnectionChanged { state });
        }
    }
}

impl SessionInboundUseCase for SessionController {
    fn handle_open(&mut self, now_ms: u64) -> AppResult<()> {
        self.last_now_ms = now_ms;
        self.send_message(&WireMessage::Join {
            user_id: self.local_user.clone(),
            timestamp_ms: now_ms,
        });
        self.begin_catchup(now_ms);
        Ok(())
    }

    fn handle_frame(&mut self, frame: InboundFrame, now_ms: u64) -> AppResult<()> {
        self.last_now_ms = now_ms;
        if self.catchup.active {
            self.catchup.last_arrival_ms = now_ms;
            self.catchup.queue.push_back(frame);
            return Ok(());
        }
        self.dispatch_frame(frame);
        Ok(())
    }

    fn handle_quiet_tick(&mut self, now_ms: u64) -> AppResult<()> {
        self.last_now_ms = now_ms;
        if self.catchup.active {
            self.drain_catchup_queue();
            let quiet = now_ms.saturating_sub(self.catchup.last_arrival_ms);
            if self.catchup.queue.is_empty() && quiet >= self.settings.catchup_quiet_ms {
                self.finish_catchup(now_ms);
            } else if !self.catchup.stuck_reported
                && now_ms.saturating_sub(self.catchup.started_ms) >= CATCHUP_STUCK_MS
            {
                // surfaced as a reconnecting hint by the UI
                self.catchup.stuck_reported = true;
                self.publish(SessionEvent::ConnectionChanged {
                    state: ConnectionState::Connecting,
                });
            }
            return Ok(());
        }

        if let Some(batch) = self.reconciler.flush_outbound_due(now_ms) {
            self.send_ops(&batch);
        }
        self.reconciler.capture_snapshot_if_due(&self.engines, now_ms);
        self.present_dirty();
        Ok(())
    }

    fn handle_close(&mut self, reason: &str) -> AppResult<()> {
        info!("transport closed: {reason}");
        if self.local_drawing {
            // commit the in-progress stroke as-is
            self.end_stroke(self.last_now_ms)?;
        }
        self.catchup = CatchupState::idle();
        self.reconciler.set_catching_up(false);
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }
}

impl CanvasInputUseCase for SessionController {
    fn handle_pointer(&mut self, container: ContainerRect, event: PointerEvent) -> AppResult<()> {
        // the canvas is non-interactive until catch-up has finished
        if self.state != ConnectionState::Connected {
            return Ok(());
        }
        self.last_now_ms = event.timestamp_ms;
        let tool = self.tool;
        let Some(action) = self.router.route(&container, &tool, &event) else {
            return Ok(());
        };
        match action {
            RouterAction::StrokeStart { x, y } => self.begin_stroke(x, y, event.timestamp_ms),
            RouterAction::StrokeMove { from, to } => {
                self.continue_stroke(from, to, event.timestamp_ms)
            }
            RouterAction::Fill { x, y } => self.do_fill(x, y, event.timestamp_ms),
            RouterAction::PanBy { dx, dy } => {
                self.pan_by(dx, dy);
                Ok(())
            }
            RouterAction::StrokeEnd => self.end_stroke(event.timestamp_ms),
        }
    }

    fn set_tool(&mut self, tool: ToolState) {
        self.tool = tool;
    }

    fn set_zoom(&mut self, zoom: f64, focus_x: f64, focus_y: f64) -> AppResult<()> {
        if let Some(engine) = self.engines.get_mut(&self.local_user) {
            engine.adjust_pan_for_zoom(zoom, focus_x, focus_y);
            let (zoom, pan_x, pan_y) = engine.transform();
            self.deps.surface.set_transform(zoom, pan_x, pan_y).ok();
        }
        Ok(())
    }

    fn undo(&mut self) -> AppResult<bool> {
        let Some(entry) = self.history.undo() else {
            return Ok(false);
        };
        let background = entry.background.as_bytes().to_vec();
        let foreground = entry.foreground.as_bytes().to_vec();
        if let Some(engine) = self.engines.get_mut(&self.local_user) {
            engine.layers_mut().background.copy_from_bytes(&background)?;
            engine.layers_mut().foreground.copy_from_bytes(&foreground)?;
        }
        self.last_undo = true;
        self.present_dirty();
        Ok(true)
    }

    fn redo(&mut self) -> AppResult<bool> {
        let Some(entry) = self.history.redo() else {
            return Ok(false);
        };
        let background = entry.background.as_bytes().to_vec();
        let foreground = entry.foreground.as_bytes().to_vec();
        if let Some(engine) = self.engines.get_mut(&self.local_user) {
            engine.layers_mut().background.copy_from_bytes(&background)?;
            engine.layers_mut().foreground.copy_from_bytes(&foreground)?;
        }
        self.present_dirty();
        Ok(true)
    }
}

impl ChatUseCase for SessionController {
    fn send_chat(&mut self, message: &str, now_ms: u64) -> AppResult<()> {
        if message.len() > self.settings.max_chat_bytes {
            return Err(AppError::Validation {
                message: format!(
                    "chat message exceeds {} bytes",
                    self.settings.max_chat_bytes
                ),
            });
        }
        self.send_message(&WireMessage::Chat {
            user_id: self.local_user.clone(),
            username: self.username.clone(),
            message: message.to_string(),
            timestamp_ms: now_ms,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;
    use std::sync::Mutex;

    use domain::color::Rgba;
    use domain::op::BrushKind;

    use crate::contracts::input::PointerPhase;

    struct RecordingTransport {
        sent: Mutex<Vec<WireMessage>>,
    }

    impl crate::ports::outgoing::transport::TransportPort for RecordingTransport {
        fn send(&self, message: &WireMessage) -> AppResult<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        fn send_batch(&self, messages: &[WireMessage]) -> AppResult<()> {
            self.sent.lock().unwrap().extend_from_slice(messages);
            Ok(())
        }
    }

    /// Trivial raster carrier standing in for PNG: dimensions then raw
    /// RGBA bytes.
    struct RawCodec;

    impl crate::ports::outgoing::image_codec::ImageCodecPort for RawCodec {
        fn encode_png(&self, size: CanvasSize, rgba: &[u8]) -> AppResult<Vec<u8>> {
            let mut out = Vec::with_capacity(rgba.len() + 4);
            out.extend_from_slice(&size.width.to_be_bytes());
            out.extend_from_slice(&size.height.to_be_bytes());
            out.extend_from_slice(rgba);
            Ok(out)
        }

        fn decode_png(&self, png: &[u8]) -> AppResult<(CanvasSize, Vec<u8>)> {
            let width = u16::from_be_bytes([png[0], png[1]]);
            let height = u16::from_be_bytes([png[2], png[3]]);
            Ok((CanvasSize::new(width, height), png[4..].to_vec()))
        }
    }

    #[derive(Default)]
    struct RecordingSurface {
        stacks: Mutex<Vec<Vec<(UserId, LayerKind, i32)>>>,
        dropped: Mutex<Vec<UserId>>,
    }

    impl crate::ports::outgoing::surface::SurfacePort for RecordingSurface {
        fn present(&self, _user: &UserId, _kind: LayerKind, _raster: &Layer) -> AppResult<()> {
            Ok(())
        }
        fn set_stack_order(&self, order: &[(UserId, LayerKind, i32)]) -> AppResult<()> {
            self.stacks.lock().unwrap().push(order.to_vec());
            Ok(())
        }
        fn set_transform(&self, _zoom: f64, _pan_x: f64, _pan_y: f64) -> AppResult<()> {
            Ok(())
        }
        fn set_cursor_visible(&self, _user: &UserId, _visible: bool) -> AppResult<()> {
            Ok(())
        }
        fn drop_participant(&self, user: &UserId) -> AppResult<()> {
            self.dropped.lock().unwrap().push(user.clone());
            Ok(())
        }
    }

    struct RecordingEvents {
        published: Mutex<Vec<SessionEvent>>,
    }

    impl crate::ports::outgoing::events::EventsPort for RecordingEvents {
        fn publish(&self, event: SessionEvent) -> AppResult<()> {
            self.published.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct Fixture {
        controller: SessionController,
        transport: Arc<RecordingTransport>,
        surface: Arc<RecordingSurface>,
        events: Arc<RecordingEvents>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let surface = Arc::new(RecordingSurface::default());
        let events = Arc::new(RecordingEvents {
            published: Mutex::new(Vec::new()),
        });
        let transport_port: DynTransportPort = Arc::clone(&transport) as DynTransportPort;
        let surface_port: DynSurfacePort = Arc::clone(&surface) as DynSurfacePort;
        let events_port: DynEventsPort = Arc::clone(&events) as DynEventsPort;
        let controller = SessionController::new(
            SessionSettings::new(CanvasSize::new(64, 64)),
            UserId::new("me"),
            "me".to_string(),
            false,
            SessionDeps {
                transport: transport_port,
                codec: Arc::new(RawCodec),
                surface: surface_port,
                events: events_port,
            },
        );
        Fixture {
            controller,
            transport,
            surface,
            events,
        }
    }

    fn connect(f: &mut Fixture) {
        f.controller.handle_open(0).unwrap();
        f.controller.handle_quiet_tick(1500).unwrap();
    }

    #[test]
    fn open_sends_join_and_walks_through_catchup() {
        let mut f = fixture();
        f.controller.handle_open(0).unwrap();
        assert_eq!(f.controller.connection_state(), ConnectionState::CatchingUp);
        assert!(matches!(
            f.transport.sent.lock().unwrap().first(),
            Some(WireMessage::Join { .. })
        ));

        f.controller.handle_quiet_tick(1500).unwrap();
        assert_eq!(f.controller.connection_state(), ConnectionState::Connected);

        let states: Vec<ConnectionState> = f
            .events
            .published
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ConnectionChanged { state } => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![ConnectionState::CatchingUp, ConnectionState::Connected]
        );
    }

    #[test]
    fn layers_message_rebuilds_stack_in_join_order() {
        let mut f = fixture();
        connect(&mut f);
        let frame = InboundFrame::bare(WireMessage::Layers {
            participants: vec![
                Participant::new(UserId::new("late"), "late", 300),
                Participant::new(UserId::new("early"), "early", 100),
            ],
        });
        f.controller.handle_frame(frame, 2000).unwrap();
        f.controller.handle_quiet_tick(2100).unwrap();

        let stacks = f.surface.stacks.lock().unwrap();
        let latest = stacks.last().unwrap();
        // ascending z: the late joiner's layers sit below the early one's
        assert_eq!(latest[0].0, UserId::new("late"));
        assert_eq!(latest[3].0, UserId::new("early"));
        assert!(latest[3].2 > latest[0].2);
    }

    #[test]
    fn leave_drops_the_participant_cluster() {
        let mut f = fixture();
        connect(&mut f);
        let join_list = InboundFrame::bare(WireMessage::Layers {
            participants: vec![Participant::new(UserId::new("peer"), "peer", 100)],
        });
        f.controller.handle_frame(join_list, 2000).unwrap();
        assert!(
            f.controller
                .layer_of(&UserId::new("peer"), LayerKind::Foreground)
                .is_some()
        );

        let leave = InboundFrame::bare(WireMessage::Leave {
            user_id: UserId::new("peer"),
            username: "peer".to_string(),
            timestamp_ms: 3000,
        });
        f.controller.handle_frame(leave, 3000).unwrap();
        assert!(
            f.controller
                .layer_of(&UserId::new("peer"), LayerKind::Foreground)
                .is_none()
        );
        assert_eq!(
            f.surface.dropped.lock().unwrap().as_slice(),
            &[UserId::new("peer")]
        );
    }

    #[test]
    fn inbound_chat_is_published_to_the_ui() {
        let mut f = fixture();
        connect(&mut f);
        let chat = InboundFrame::bare(WireMessage::Chat {
            user_id: UserId::new("peer"),
            username: "peer".to_string(),
            message: "hi there".to_string(),
            timestamp_ms: 2500,
        });
        f.controller.handle_frame(chat, 2500).unwrap();
        assert!(f.events.published.lock().unwrap().iter().any(|e| matches!(
            e,
            SessionEvent::Chat { message, .. } if message == "hi there"
        )));
    }

    #[test]
    fn snapshot_request_is_answered_with_one_png_per_layer() {
        let mut f = fixture();
        connect(&mut f);
        f.transport.sent.lock().unwrap().clear();

        let request = InboundFrame::bare(WireMessage::SnapshotRequest { timestamp_ms: 2000 });
        f.controller.handle_frame(request, 2000).unwrap();

        let sent = f.transport.sent.lock().unwrap();
        let layers: Vec<LayerKind> = sent
            .iter()
            .filter_map(|m| match m {
                WireMessage::Snapshot { layer, .. } => Some(*layer),
                _ => None,
            })
            .collect();
        assert_eq!(layers, vec![LayerKind::Background, LayerKind::Foreground]);
    }

    #[test]
    fn pointer_input_is_ignored_until_connected() {
        let mut f = fixture();
        f.controller.handle_open(0).unwrap();
        // still catching up
        let container = ContainerRect {
            left: 0.0,
            top: 0.0,
            width: 64.0,
            height: 64.0,
        };
        let event = PointerEvent {
            pointer_id: 1,
            phase: PointerPhase::Down,
            client_x: 10.0,
            client_y: 10.0,
            timestamp_ms: 100,
        };
        f.controller.handle_pointer(container, event).unwrap();
        let fg = f.controller.local_layer(LayerKind::Foreground).unwrap();
        assert!(fg.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn server_sequence_numbers_reorder_the_catchup_slice() {
        let make = |seq: u64, color: Rgba| InboundFrame {
            message: WireMessage::DrawPoint {
                user_id: UserId::new("peer"),
                layer: LayerKind::Foreground,
                x: 7,
                y: 5,
                size: 1,
                brush: BrushKind::Solid,
                color,
            },
            server_seq: Some(seq),
            server_timestamp_ms: Some(seq * 10),
        };
        let first = make(1, Rgba::new(10, 10, 10, 128));
        let second = make(2, Rgba::new(200, 40, 40, 128));

        // one client sees the envelope order, the other the wire order
        let mut in_order = fixture();
        in_order.controller.handle_open(0).unwrap();
        in_order.controller.handle_frame(first.clone(), 100).unwrap();
        in_order.controller.handle_frame(second.clone(), 110).unwrap();
        in_order.controller.handle_quiet_tick(300).unwrap();
        in_order.controller.handle_quiet_tick(1500).unwrap();

        let mut reordered = fixture();
        reordered.controller.handle_open(0).unwrap();
        reordered.controller.handle_frame(second, 100).unwrap();
        reordered.controller.handle_frame(first, 110).unwrap();
        reordered.controller.handle_quiet_tick(300).unwrap();
        reordered.controller.handle_quiet_tick(1500).unwrap();

        let peer = UserId::new("peer");
        let bytes = |f: &Fixture| {
            f.controller
                .layer_of(&peer, LayerKind::Foreground)
                .unwrap()
                .as_bytes()
                .to_vec()
        };
        // both ops applied, in the server-assigned order on both clients
        assert!(
            in_order
                .controller
                .layer_of(&peer, LayerKind::Foreground)
                .unwrap()
                .pixel(7, 5)
                .a
                > 128
        );
        assert_eq!(bytes(&in_order), bytes(&reordered));
    }
}
