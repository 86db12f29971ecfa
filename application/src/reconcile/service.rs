use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use domain::events::{ConflictStrategy, SessionEvent};
use domain::op::{AffectedArea, Operation};
use domain::participant::UserId;

use crate::config::SessionSettings;
use crate::contracts::input::ToolState;
use crate::engine::service::DrawingEngine;
use crate::engine::stroke::StrokeBuffer;
use crate::error::{AppError, AppResult};
use crate::ports::outgoing::events::DynEventsPort;
use crate::reconcile::coalesce::CoalesceBuffer;
use crate::reconcile::fork::{LocalFork, PendingOp};
use crate::reconcile::heatmap::ActivityHeatmap;
use crate::reconcile::spatial::ConcurrencyChecker;
use crate::reconcile::strategy::AdaptiveStrategy;

/// Mutable canvas state the reconciler operates on. The engines map holds
/// every participant's layer pair, the local user's entry included.
pub struct ReconcileCtx<'a> {
    pub engines: &'a mut HashMap<UserId, DrawingEngine>,
    pub stroke: &'a mut StrokeBuffer,
    pub tool: &'a ToolState,
    pub local_user: &'a UserId,
    pub pointer_down: bool,
}

/// What the caller must do after a reconcile pass. Reconciliation itself
/// never fails; when even the full-rollback fallback cannot restore state
/// the caller is asked to fetch an authoritative snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileReport {
    pub request_snapshot: bool,
}

struct RollbackSnapshot {
    sequence: u64,
    layers: HashMap<UserId, (Vec<u8>, Vec<u8>)>,
}

/// Fork / rollback / replay reconciler. Keeps the optimistic local state
/// converged with the relay's operation stream: echoes confirm pending
/// ops, disjoint remote ops apply in place, conflicting ones trigger a
/// scoped or full rollback chosen by the adaptive strategy.
pub struct Reconciler {
    settings: SessionSettings,
    events: DynEventsPort,
    counter: u64,
    fork: Option<LocalFork>,
    history: Vec<Operation>,
    snapshots: VecDeque<RollbackSnapshot>,
    ops_since_snapshot: u64,
    last_snapshot_ms: u64,
    checker: ConcurrencyChecker,
    strategy: AdaptiveStrategy,
    heatmap: ActivityHeatmap,
    coalesce: CoalesceBuffer,
    catching_up: bool,
}

impl Reconciler {
    #[must_use]
    pub fn new(settings: SessionSettings, events: DynEventsPort) -> Self {
        let checker = ConcurrencyChecker::new(settings.rect_cache_entries);
        let strategy = AdaptiveStrategy::new(
            settings.strategy_window,
            settings.conflict_rate_timestamp,
            settings.conflict_rate_selective,
        );
        let heatmap = ActivityHeatmap::new(settings.canvas, settings.heatmap_cell_px, 8);
        let coalesce =
            CoalesceBuffer::new(settings.coalesce_window_ms, settings.coalesce_distance_px);
        Self {
            settings,
            events,
            counter: 0,
            fork: None,
            history: Vec::new(),
            snapshots: VecDeque::new(),
            ops_since_snapshot: 0,
            last_snapshot_ms: 0,
            checker,
            strategy,
            heatmap,
            coalesce,
            catching_up: false,
        }
    }

    // --- sequencing ------------------------------------------------------

    pub fn next_sequence(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Server-stamped envelopes pull the Lamport counter forward.
    pub fn observe_server_sequence(&mut self, server_seq: u64) {
        self.counter = self.counter.max(server_seq) + 1;
    }

    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.counter
    }

    pub fn set_catching_up(&mut self, catching_up: bool) {
        self.catching_up = catching_up;
    }

    // --- fork bookkeeping ------------------------------------------------

    #[must_use]
    pub fn fork_len(&self) -> usize {
        self.fork.as_ref().map_or(0, LocalFork::len)
    }

    pub fn record_local_op(&mut self, op: &Operation, buffered: bool, at_undo_point: bool) {
        let hot = self.heatmap.is_hot(&op.affected.bounds);
        let fork = self
            .fork
            .get_or_insert_with(|| LocalFork::new(op.sequence, at_undo_point));
        if hot {
            fork.conflict_map.insert(op.sequence, true);
            self.coalesce.shrink_window();
        }
        fork.push_local(op.clone(), buffered);
    }

    pub fn mark_stroke_committed(&mut self) {
        if let Some(fork) = &mut self.fork {
            fork.mark_stroke_committed();
        }
    }

    pub fn clear_fork(&mut self) {
        self.fork = None;
    }

    // --- outbound coalescing ---------------------------------------------

    pub fn queue_outbound(&mut self, op: Operation, now_ms: u64) -> Option<Vec<Operation>> {
        self.coalesce.push(op, now_ms)
    }

    pub fn flush_outbound_due(&mut self, now_ms: u64) -> Option<Vec<Operation>> {
        self.coalesce.flush_due(now_ms)
    }

    pub fn flush_outbound_all(&mut self) -> Option<Vec<Operation>> {
        self.coalesce.flush_all()
    }

    // --- history & snapshots ---------------------------------------------

    fn push_history(&mut self, op: Operation) {
        self.history.push(op);
        self.ops_since_snapshot += 1;
    }

    /// Catch-up path: ops are authoritative history, applied in queue
    /// order without fork logic.
    pub fn apply_catchup(&mut self, op: &Operation, ctx: &mut ReconcileCtx<'_>) -> AppResult<()> {
        apply_to_engines(ctx.engines, op)?;
        self.push_history(op.clone());
        Ok(())
    }

    /// Captures a rollback snapshot when the cadence is due. Snapshots are
    /// only taken on clean state (no unconfirmed local ops) so optimistic
    /// pixels never leak into them.
    pub fn capture_snapshot_if_due(
        &mut self,
        engines: &HashMap<UserId, DrawingEngine>,
        now_ms: u64,
    ) {
        if self.catching_up || self.fork.as_ref().is_some_and(|f| !f.is_empty()) {
            return;
        }
        let due_by_ops = self.ops_since_snapshot >= self.settings.snapshot_interval_ops;
        let due_by_time =
            now_ms.saturating_sub(self.last_snapshot_ms) >= self.settings.snapshot_interval_ms;
        if self.ops_since_snapshot > 0 && (due_by_ops || due_by_time) {
            self.force_capture(engines, now_ms);
        }
    }

    /// Unconditional capture; also the anchor after an authoritative
    /// snapshot restore, so a later rollback never re-decodes PNG state.
    pub fn force_capture(&mut self, engines: &HashMap<UserId, DrawingEngine>, now_ms: u64) {
        let layers = engines
            .iter()
            .map(|(user, engine)| {
                let pair = engine.layers();
                (
                    user.clone(),
                    (
                        pair.background.as_bytes().to_vec(),
                        pair.foreground.as_bytes().to_vec(),
                    ),
                )
            })
            .collect();
        self.snapshots.push_back(RollbackSnapshot {
            sequence: self.counter,
            layers,
        });
        while self.snapshots.len() > self.settings.snapshot_retain {
            self.snapshots.pop_front();
        }
        if let Some(oldest) = self.snapshots.front() {
            let keep_from = oldest.sequence;
            self.history.retain(|op| op.sequence > keep_from);
        }
        self.ops_since_snapshot = 0;
        self.last_snapshot_ms = now_ms;
        debug!(
            "rollback snapshot at seq {}, {} retained",
            self.counter,
            self.snapshots.len()
        );
    }

    // --- reconciliation --------------------------------------------------

    /// Top-level entry for a live remote operation. Never errors out to
    /// the caller: any internal failure clears the fork and falls back to
    /// a full rollback, and if even that is impossible the report asks
    /// for a fresh authoritative snapshot.
    pub fn handle_remote(&mut self, op: Operation, ctx: &mut ReconcileCtx<'_>) -> ReconcileReport {
        match self.reconcile_inner(op, ctx) {
            Ok(()) => ReconcileReport::default(),
            Err(err) => {
                warn!("reconciliation failed: {err}; forcing full rollback");
                self.publish(SessionEvent::ConflictResolved {
                    strategy: ConflictStrategy::FullRollback,
                    rolled_back_ops: self.fork_len(),
                });
                match self.full_rollback(ctx, None) {
                    Ok(()) => ReconcileReport::default(),
                    Err(rollback_err) => {
                        warn!("full rollback failed: {rollback_err}; clearing local state");
                        if let Some(engine) = ctx.engines.get_mut(ctx.local_user) {
                            engine.clear_layers();
                        }
                        self.fork = None;
                        ReconcileReport {
                            request_snapshot: true,
                        }
                    }
                }
            }
        }
    }

    fn reconcile_inner(&mut self, op: Operation, ctx: &mut ReconcileCtx<'_>) -> AppResult<()> {
        if self.catching_up {
            return self.apply_catchup(&op, ctx);
        }

        if self.fork.as_ref().is_none_or(LocalFork::is_empty) {
            self.fork = None;
            apply_to_engines(ctx.engines, &op)?;
            self.push_history(op);
            return Ok(());
        }

        if op.user_id == *ctx.local_user {
            return self.reconcile_own_echo(op, ctx);
        }

        if ctx.pointer_down {
            self.reconcile_while_drawing(op, ctx)
        } else {
            self.reconcile_idle(op, ctx)
        }
    }

    fn reconcile_own_echo(&mut self, op: Operation, ctx: &mut ReconcileCtx<'_>) -> AppResult<()> {
        let confirmed = self.fork.as_mut().is_some_and(|fork| fork.try_confirm(&op));
        if confirmed {
            debug!("confirmed local op {}", op);
            self.push_history(op);
            if self.fork.as_ref().is_some_and(LocalFork::is_empty) {
                self.fork = None;
            }
            return Ok(());
        }

        warn!("own echo mismatched fork head; rolling back");
        self.publish(SessionEvent::ConflictResolved {
            strategy: ConflictStrategy::FullRollback,
            rolled_back_ops: self.fork_len(),
        });
        // the server's version of our history wins; pending ops are dropped
        if let Some(fork) = &mut self.fork {
            fork.local_ops.clear();
        }
        self.full_rollback(ctx, Some(op))
    }

    /// A remote op landed mid-stroke. The stroke splits around the remote
    /// timestamp: the earlier half commits, the remote op applies, and the
    /// later half is re-buffered so the stroke continues seamlessly.
    fn reconcile_while_drawing(
        &mut self,
        op: Operation,
        ctx: &mut ReconcileCtx<'_>,
    ) -> AppResult<()> {
        let conflicted = self.track_conflict(&op);

        let (earlier, later): (Vec<PendingOp>, Vec<PendingOp>) = self
            .fork
            .as_ref()
            .map(|fork| {
                fork.local_ops
                    .iter()
                    .filter(|p| p.buffered)
                    .cloned()
                    .partition(|p| p.op.timestamp_ms <= op.timestamp_ms)
            })
            .unwrap_or_default();

        let table = Arc::clone(engine_for(ctx.engines, ctx.local_user)?.brush_table());

        // rebuild the buffer with only the earlier half, commit it
        ctx.stroke.abandon();
        ctx.stroke.begin(ctx.tool);
        for pending in &earlier {
            ctx.stroke.replay_op(&table, &pending.op)?;
        }
        let target = ctx.stroke.target_layer();
        let local = engine_for(ctx.engines, ctx.local_user)?;
        ctx.stroke.commit(local.layers_mut().layer_mut(target), 1.0);
        local.queue_layer_update(target);

        apply_to_engines(ctx.engines, &op)?;
        self.push_history(op.clone());

        // re-open the stroke and replay the later half into it
        ctx.stroke.begin(ctx.tool);
        for pending in &later {
            ctx.stroke.replay_op(&table, &pending.op)?;
        }

        let max_fallbehind = self.settings.max_fallbehind;
        let mut force_full = false;
        if let Some(fork) = &mut self.fork {
            let earlier_cutoff = op.timestamp_ms;
            for pending in &mut fork.local_ops {
                if pending.buffered && pending.op.timestamp_ms <= earlier_cutoff {
                    pending.buffered = false;
                }
            }
            fork.remote_ops.push(op);
            fork.fallbehind += 1;
            force_full = fork.fallbehind >= max_fallbehind;
        }
        self.strategy.record(conflicted);

        if force_full {
            warn!("fallbehind limit reached mid-stroke; full rollback");
            self.publish(SessionEvent::ConflictResolved {
                strategy: ConflictStrategy::FullRollback,
                rolled_back_ops: self.fork_len(),
            });
            return self.full_rollback(ctx, None);
        }
        Ok(())
    }

    fn reconcile_idle(&mut self, op: Operation, ctx: &mut ReconcileCtx<'_>) -> AppResult<()> {
        let conflicted = self.track_conflict(&op);
        self.strategy.record(conflicted);

        if !conflicted {
            apply_to_engines(ctx.engines, &op)?;
            self.push_history(op.clone());
            let max_fallbehind = self.settings.max_fallbehind;
            let mut force_full = false;
            if let Some(fork) = &mut self.fork {
                fork.remote_ops.push(op);
                fork.fallbehind += 1;
                force_full = fork.fallbehind >= max_fallbehind;
            }
            if force_full {
                self.publish(SessionEvent::ConflictResolved {
                    strategy: ConflictStrategy::FullRollback,
                    rolled_back_ops: self.fork_len(),
                });
                return self.full_rollback(ctx, None);
            }
            return Ok(());
        }

        let strategy = self.strategy.pick(false);
        let conflicting = self.conflicting_count(&op);
        self.publish(SessionEvent::ConflictResolved {
            strategy,
            rolled_back_ops: conflicting,
        });
        debug!("conflict with {conflicting} local ops, strategy {strategy}");

        match strategy {
            ConflictStrategy::LocalFirst => {
                // local optimistic pixels were applied first; the remote op
                // blends over the shared area
                apply_to_engines(ctx.engines, &op)?;
                self.push_history(op.clone());
                if let Some(fork) = &mut self.fork {
                    fork.remote_ops.push(op);
                    fork.fallbehind += 1;
                }
                Ok(())
            }
            ConflictStrategy::TimestampOrder => self.timestamp_rollback(op, ctx),
            _ => self.selective_rollback(op, ctx),
        }
    }

    /// Scoped rollback: the local layer returns to its fork-base state,
    /// non-conflicting local ops re-apply, the remote op lands, and the
    /// conflicting local ops re-apply on top (remote-first ordering in the
    /// contested area). All pending ops stay in the fork, in order, so
    /// confirmation matching is unaffected.
    fn selective_rollback(&mut self, op: Operation, ctx: &mut ReconcileCtx<'_>) -> AppResult<()> {
        self.restore_local_base(ctx)?;

        let flagged: Vec<(PendingOp, bool)> = {
            let pending: Vec<PendingOp> = self
                .fork
                .as_ref()
                .map(|fork| fork.local_ops.iter().cloned().collect())
                .unwrap_or_default();
            pending
                .into_iter()
                .map(|p| {
                    let conflicts = !self.checker.concurrent(&p.op.affected, &op.affected);
                    (p, conflicts)
                })
                .collect()
        };

        for (p, _) in flagged.iter().filter(|(p, c)| !c && !p.buffered) {
            apply_to_engines(ctx.engines, &p.op)?;
        }
        apply_to_engines(ctx.engines, &op)?;
        for (p, _) in flagged.iter().filter(|(p, c)| *c && !p.buffered) {
            apply_to_engines(ctx.engines, &p.op)?;
        }

        self.push_history(op.clone());
        if let Some(fork) = &mut self.fork {
            fork.remote_ops.push(op);
            fork.fallbehind = 0;
        }
        Ok(())
    }

    /// Fair ordering under heavy contention: base state, then every
    /// involved op sorted by `(timestamp, user_id)`.
    fn timestamp_rollback(&mut self, op: Operation, ctx: &mut ReconcileCtx<'_>) -> AppResult<()> {
        self.restore_local_base(ctx)?;

        let mut merged: Vec<Operation> = self
            .fork
            .as_ref()
            .map(|fork| {
                fork.local_ops
                    .iter()
                    .filter(|p| !p.buffered)
                    .map(|p| p.op.clone())
                    .collect()
            })
            .unwrap_or_default();
        merged.push(op.clone());
        merged.sort_by(|a, b| {
            a.timestamp_ms
                .cmp(&b.timestamp_ms)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        for merged_op in &merged {
            apply_to_engines(ctx.engines, merged_op)?;
        }

        self.push_history(op.clone());
        if let Some(fork) = &mut self.fork {
            fork.remote_ops.push(op);
            fork.fallbehind += 1;
        }
        Ok(())
    }

    /// Restores the local participant's layers to their confirmed state:
    /// the newest rollback snapshot plus the confirmed local history after
    /// it. Only the local user's ops ever touch the local pair, so the
    /// replay set stays small.
    fn restore_local_base(&mut self, ctx: &mut ReconcileCtx<'_>) -> AppResult<()> {
        let snapshot = self.snapshots.back();

        let local = ctx
            .engines
            .get_mut(ctx.local_user)
            .ok_or_else(|| AppError::Reconciler {
                message: format!("no engine for participant {}", ctx.local_user),
            })?;
        let snapshot_seq = match snapshot.and_then(|s| {
            s.layers
                .get(ctx.local_user)
                .map(|layers| (s.sequence, layers))
        }) {
            Some((seq, (bg, fg))) => {
                local.layers_mut().background.copy_from_bytes(bg)?;
                local.layers_mut().foreground.copy_from_bytes(fg)?;
                Some(seq)
            }
            None => {
                local.clear_layers();
                None
            }
        };

        for history_op in &self.history {
            if history_op.user_id != *ctx.local_user {
                continue;
            }
            if snapshot_seq.is_some_and(|seq| history_op.sequence <= seq) {
                continue;
            }
            apply_to_engines(ctx.engines, history_op)?;
        }
        Ok(())
    }

    /// Full rollback: nearest snapshot at or before the fork base (or
    /// blank canvas), deterministic replay of the recorded history, then
    /// the pending remote op if any. When the pointer is still down, a
    /// fresh fork is rebuilt over the current counter and the surviving
    /// local ops are replayed; otherwise the fork is dropped and the
    /// pending ops with it (their echoes will apply as plain history).
    fn full_rollback(
        &mut self,
        ctx: &mut ReconcileCtx<'_>,
        pending_remote: Option<Operation>,
    ) -> AppResult<()> {
        let fork = self.fork.take();
        let base_sequence = fork.as_ref().map_or(self.counter, |f| f.base_sequence);

        let snapshot_seq = {
            let snapshot = self
                .snapshots
                .iter()
                .rev()
                .find(|s| s.sequence < base_sequence);
            match snapshot {
                Some(snap) => {
                    for (user, engine) in &mut *ctx.engines {
                        match snap.layers.get(user) {
                            Some((bg, fg)) => {
                                engine.layers_mut().background.copy_from_bytes(bg)?;
                                engine.layers_mut().foreground.copy_from_bytes(fg)?;
                            }
                            None => engine.clear_layers(),
                        }
                    }
                    Some(snap.sequence)
                }
                None => {
                    for engine in ctx.engines.values_mut() {
                        engine.clear_layers();
                    }
                    None
                }
            }
        };

        for history_op in &self.history {
            if snapshot_seq.is_some_and(|seq| history_op.sequence <= seq) {
                continue;
            }
            apply_to_engines(ctx.engines, history_op)?;
        }

        if let Some(remote) = pending_remote {
            apply_to_engines(ctx.engines, &remote)?;
            self.push_history(remote);
        }

        if let Some(old_fork) = fork {
            if ctx.pointer_down {
                let mut new_fork = LocalFork::new(self.counter, old_fork.starts_at_undo_point);
                let table =
                    Arc::clone(engine_for(ctx.engines, ctx.local_user)?.brush_table());
                ctx.stroke.abandon();
                ctx.stroke.begin(ctx.tool);
                for pending in old_fork.local_ops {
                    if pending.buffered {
                        ctx.stroke.replay_op(&table, &pending.op)?;
                    } else {
                        apply_to_engines(ctx.engines, &pending.op)?;
                    }
                    new_fork.push_local(pending.op, pending.buffered);
                }
                self.fork = Some(new_fork);
            } else {
                debug!(
                    "full rollback dropped {} unconfirmed local ops",
                    old_fork.local_ops.len()
                );
            }
        }
        Ok(())
    }

    // --- helpers ---------------------------------------------------------

    fn track_conflict(&mut self, op: &Operation) -> bool {
        self.heatmap.record(&op.affected.bounds, op.timestamp_ms);
        if self.heatmap.is_hot(&op.affected.bounds) {
            self.coalesce.shrink_window();
            if let Some(fork) = &mut self.fork {
                let pending_seqs: Vec<u64> =
                    fork.local_ops.iter().map(|p| p.op.sequence).collect();
                for seq in pending_seqs {
                    fork.conflict_map.insert(seq, true);
                }
            }
        }
        self.conflicting_count(op) > 0
    }

    fn conflicting_count(&mut self, op: &Operation) -> usize {
        let areas: Vec<AffectedArea> = self
            .fork
            .as_ref()
            .map(|fork| {
                fork.local_ops
                    .iter()
                    .map(|p| p.op.affected.clone())
                    .collect()
            })
            .unwrap_or_default();
        areas
            .iter()
            .filter(|area| !self.checker.concurrent(area, &op.affected))
            .count()
    }

    fn publish(&self, event: SessionEvent) {
        self.events.publish(event).ok();
    }
}

fn engine_for<'a>(
    engines: &'a mut HashMap<UserId, DrawingEngine>,
    user: &UserId,
) -> AppResult<&'a mut DrawingEngine> {
    engines.get_mut(user).ok_or_else(|| AppError::Reconciler {
        message: format!("no engine for participant {user}"),
    })
}

fn apply_to_engines(engines: &mut HashMap<UserId, DrawingEngine>, op: &Operation) -> AppResult<()> {
    let engine = engine_for(engines, &op.user_id)?;
    engine.apply_operation(op)?;
    Ok(())
}
