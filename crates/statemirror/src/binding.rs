//! Per-name store binding.
//!
//! One binding exists per store name per context. It connects the
//! canonical registry slot, the channel and every store instance bound to
//! the name, and it runs the synchronization state machine.
//!
//! Local mutations go through [`Binding::commit`]. On a shared authority
//! the resulting frames are built and checked against the endpoint while
//! the slot lock is held; if any would be refused the slot is restored and
//! the revision left alone. Accepted frames are staged in the outbox in
//! revision order. Listeners fire after the slot lock is released, and the
//! outbox is only flushed to the endpoint once no commit is between those
//! two steps, so a frame never leaves before its local listeners ran.
//!
//! Inbound frames on a dependent go through the `inbound` lock, which also
//! guards state transitions. While `Syncing` they are buffered; once the
//! snapshot is reconciled the buffer is replayed against the snapshot's
//! revision.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use statemirror_core::{codec, Isolate, ReconcileError, Snapshot, SnapshotOrigin, StoreKey};
use statemirror_registry::CanonicalRegistry;
use statemirror_sync::{
    ChannelBinding, ChannelHandler, Delivery, Frame, SnapshotReply, SyncError,
};

use crate::error::{Result, StoreError};
use crate::listener::Listeners;
use crate::shape::StoreShape;
use crate::state::{SyncFailure, SyncState};

/// An inbound frame decoded but not yet applied.
enum Pending<Sh: StoreShape> {
    Delta(u64, Sh::Delta),
    Replace(u64, Snapshot<Sh::Slot>),
}

struct Inbound<Sh: StoreShape> {
    buffer: Vec<Pending<Sh>>,
}

/// Frames accepted by the endpoint check, waiting for listeners to run.
#[derive(Default)]
struct Outbox {
    frames: Vec<Frame>,
    /// Commits that staged frames and have not released yet.
    in_flight: usize,
}

/// Releases a staged commit even if a listener panics.
struct Staged<'a, Sh: StoreShape> {
    binding: &'a Binding<Sh>,
    active: bool,
}

impl<Sh: StoreShape> Staged<'_, Sh> {
    fn release(mut self) -> Result<()> {
        self.active = false;
        self.binding.release()
    }
}

impl<Sh: StoreShape> Drop for Staged<'_, Sh> {
    fn drop(&mut self) {
        if self.active {
            let _ = self.binding.release();
        }
    }
}

pub(crate) struct Binding<Sh: StoreShape> {
    key: StoreKey,
    shared: bool,
    registry: Arc<CanonicalRegistry>,
    channel: Option<ChannelBinding>,
    snapshot_timeout: Duration,
    state: watch::Sender<SyncState>,
    inbound: Mutex<Inbound<Sh>>,
    outbox: Mutex<Outbox>,
    sync_gate: tokio::sync::Mutex<()>,
    instances: Mutex<Vec<Weak<Listeners<Sh>>>>,
}

impl<Sh: StoreShape> Binding<Sh> {
    pub(crate) fn new(
        key: StoreKey,
        registry: Arc<CanonicalRegistry>,
        channel: Option<ChannelBinding>,
        snapshot_timeout: Duration,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SyncState::Uninitialized);
        Arc::new(Self {
            key,
            shared: channel.is_some(),
            registry,
            channel,
            snapshot_timeout,
            state,
            inbound: Mutex::new(Inbound { buffer: Vec::new() }),
            outbox: Mutex::new(Outbox::default()),
            sync_gate: tokio::sync::Mutex::new(()),
            instances: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn key(&self) -> &StoreKey {
        &self.key
    }

    pub(crate) fn is_shared(&self) -> bool {
        self.shared
    }

    /// Whether this binding must fetch its state from an authority.
    pub(crate) fn needs_sync(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| !channel.role().is_authority())
    }

    /// Channel to broadcast on, if this process is the shared authority.
    fn broadcaster(&self) -> Option<&ChannelBinding> {
        self.channel
            .as_ref()
            .filter(|channel| channel.role().is_authority())
    }

    /// Connect to the channel and enter the first state.
    ///
    /// Returns `true` when the caller must run [`Binding::synchronize`].
    pub(crate) fn attach(self: &Arc<Self>) -> bool {
        if let Some(channel) = &self.channel {
            let handler: Arc<dyn ChannelHandler> = Arc::clone(self) as Arc<dyn ChannelHandler>;
            channel.on_message(Arc::downgrade(&handler));
        }
        let next = if self.needs_sync() {
            SyncState::Syncing
        } else {
            SyncState::Live
        };
        tracing::debug!(key = %self.key, shared = self.shared, state = ?next, "store bound");
        self.transition(&mut self.inbound(), next);
        self.needs_sync()
    }

    pub(crate) fn add_instance(&self, listeners: &Arc<Listeners<Sh>>) {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.retain(|instance| instance.strong_count() > 0);
        instances.push(Arc::downgrade(listeners));
    }

    fn inbound(&self) -> MutexGuard<'_, Inbound<Sh>> {
        self.inbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change state. Callers hold the inbound lock.
    fn transition(&self, _inbound: &mut Inbound<Sh>, next: SyncState) {
        self.state.send_replace(next);
    }

    // ─────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Wait until the binding is `Live` or `Failed`.
    pub(crate) async fn ready(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(SyncState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => return Err(SyncError::Closed.into()),
        };
        match state {
            SyncState::Failed(failure) => Err(failure.to_error(&self.key).into()),
            _ => Ok(()),
        }
    }

    /// Fetch and reconcile the authority's snapshot.
    ///
    /// No-op unless this is a shared dependent. Only one synchronization
    /// runs at a time.
    pub(crate) async fn synchronize(&self) {
        let Some(channel) = self.channel.as_ref().filter(|_| self.needs_sync()) else {
            return;
        };
        let _gate = self.sync_gate.lock().await;

        {
            let mut inbound = self.inbound();
            inbound.buffer.clear();
            self.transition(&mut inbound, SyncState::Syncing);
        }

        let outcome = channel.request(self.snapshot_timeout).await;
        self.finish_sync(outcome);
    }

    fn finish_sync(&self, outcome: std::result::Result<SnapshotReply, SyncError>) {
        let mut inbound = self.inbound();

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "snapshot request failed");
                inbound.buffer.clear();
                let failure = SyncFailure::from_error(&e);
                self.transition(&mut inbound, SyncState::Failed(failure));
                return;
            }
        };

        let snapshot = match codec::decode::<Snapshot<Sh::Slot>>(&reply.payload) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "undecodable snapshot");
                inbound.buffer.clear();
                let failure = SyncFailure::InvalidSnapshot(e.to_string());
                self.transition(&mut inbound, SyncState::Failed(failure));
                return;
            }
        };

        let reconciled = self.registry.update(&self.key, |slot: &mut Option<Sh::Slot>, revision| {
            *revision = reply.revision;
            Sh::reconcile(slot, snapshot, SnapshotOrigin::Request)
        });
        match reconciled {
            Ok(changes) => self.dispatch(&changes),
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "snapshot could not be stored");
                inbound.buffer.clear();
                let failure = SyncFailure::InvalidSnapshot(e.to_string());
                self.transition(&mut inbound, SyncState::Failed(failure));
                return;
            }
        }

        let buffered = std::mem::take(&mut inbound.buffer);
        if !buffered.is_empty() {
            tracing::trace!(key = %self.key, count = buffered.len(), "replaying buffered frames");
        }
        for pending in buffered {
            self.apply_inbound(pending);
        }

        self.transition(&mut inbound, SyncState::Live);
        tracing::debug!(key = %self.key, revision = reply.revision, "store is live");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────

    fn receive(&self, pending: Pending<Sh>) {
        let mut inbound = self.inbound();
        let state = self.state();
        match state {
            SyncState::Syncing => inbound.buffer.push(pending),
            SyncState::Live => self.apply_inbound(pending),
            SyncState::Uninitialized | SyncState::Failed(_) => {
                tracing::debug!(key = %self.key, state = ?state, "frame dropped: store not synchronized");
            }
        }
    }

    /// Apply one inbound frame against the slot's revision. Callers hold
    /// the inbound lock.
    fn apply_inbound(&self, pending: Pending<Sh>) {
        let key = &self.key;
        let outcome = self.registry.update(key, |slot: &mut Option<Sh::Slot>, current| match pending {
            Pending::Delta(revision, delta) => {
                if revision <= *current {
                    tracing::trace!(key = %key, revision, current = *current, "duplicate delta dropped");
                    return Ok(Vec::new());
                }
                if revision > *current + 1 {
                    tracing::warn!(key = %key, expected = *current + 1, revision, "revision gap");
                }
                *current = revision;
                tracing::trace!(key = %key, revision, "delta applied");
                Sh::apply(slot, delta)
            }
            Pending::Replace(revision, snapshot) => {
                if revision < *current {
                    tracing::trace!(key = %key, revision, current = *current, "stale replacement dropped");
                    return Ok(Vec::new());
                }
                *current = revision;
                tracing::trace!(key = %key, revision, "replacement applied");
                Ok(Sh::reconcile(slot, snapshot, SnapshotOrigin::Broadcast))
            }
        });

        match outcome {
            Ok(Ok(changes)) => self.dispatch(&changes),
            Ok(Err(e)) => {
                tracing::warn!(key = %self.key, error = %e, "protocol error: delta dropped")
            }
            Err(e) => tracing::error!(key = %self.key, error = %e, "inbound frame lost"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Local mutation
    // ─────────────────────────────────────────────────────────────────────

    /// Mutate the slot and replicate each resulting change.
    ///
    /// On a shared authority the mutation is undone, and `Err` returned,
    /// when the endpoint would refuse any of its frames.
    pub(crate) fn commit(
        &self,
        mutate: impl FnOnce(&mut Option<Sh::Slot>) -> std::result::Result<Vec<Sh::Change>, ReconcileError>,
    ) -> Result<()> {
        let (changes, staged) = self.registry.update(&self.key, |slot: &mut Option<Sh::Slot>, revision: &mut u64| -> Result<_> {
            let Some(channel) = self.broadcaster() else {
                return Ok((mutate(slot)?, None));
            };
            let backup = slot.as_ref().map(Isolate::isolate);
            let changes = mutate(slot)?;
            match delta_frames::<Sh>(channel, &changes, *revision) {
                Ok(frames) => {
                    *revision += frames.len() as u64;
                    Ok((changes, Some(self.stage(frames))))
                }
                Err(e) => {
                    *slot = backup;
                    Err(e)
                }
            }
        })??;

        self.dispatch(&changes);
        match staged {
            Some(staged) => staged.release(),
            None => Ok(()),
        }
    }

    /// Replace the whole slot, reporting the minimal set of changes.
    pub(crate) fn replace(&self, content: Option<Sh::Slot>) -> Result<()> {
        let (changes, staged) = self.registry.update(&self.key, |slot: &mut Option<Sh::Slot>, revision: &mut u64| -> Result<_> {
            let Some(channel) = self.broadcaster() else {
                let changes = Sh::reconcile(slot, Snapshot::from_slot(content), SnapshotOrigin::Broadcast);
                return Ok((changes, None));
            };
            let backup = slot.as_ref().map(Isolate::isolate);
            let changes = Sh::reconcile(slot, Snapshot::from_slot(content), SnapshotOrigin::Broadcast);
            match snapshot_frame::<Sh>(channel, slot.as_ref(), *revision + 1) {
                Ok(frame) => {
                    *revision += 1;
                    Ok((changes, Some(self.stage(vec![frame]))))
                }
                Err(e) => {
                    *slot = backup;
                    Err(e)
                }
            }
        })??;

        self.dispatch(&changes);
        match staged {
            Some(staged) => staged.release(),
            None => Ok(()),
        }
    }

    /// Rebroadcast the current content to every dependent.
    pub(crate) fn publish(&self) -> Result<()> {
        let channel = self
            .broadcaster()
            .ok_or_else(|| StoreError::NotAuthoritative(self.key.clone()))?;
        let staged = self.registry.read(&self.key, |slot: Option<&Sh::Slot>, revision| {
            snapshot_frame::<Sh>(channel, slot, revision).map(|frame| self.stage(vec![frame]))
        })??;
        staged.release()
    }

    /// Queue accepted frames. Callers hold the slot lock, so the outbox is
    /// in revision order.
    fn stage(&self, frames: Vec<Frame>) -> Staged<'_, Sh> {
        let mut outbox = self.outbox();
        outbox.frames.extend(frames);
        outbox.in_flight += 1;
        Staged {
            binding: self,
            active: true,
        }
    }

    /// End one staged commit; the last one out flushes the outbox.
    fn release(&self) -> Result<()> {
        let mut outbox = self.outbox();
        outbox.in_flight = outbox.in_flight.saturating_sub(1);
        if outbox.in_flight > 0 {
            return Ok(());
        }
        let Some(channel) = self.broadcaster() else {
            outbox.frames.clear();
            return Ok(());
        };

        let mut failed = None;
        for frame in outbox.frames.drain(..) {
            if let Err(e) = channel.emit(frame, Delivery::Broadcast) {
                failed = failed.or(Some(e));
            }
        }
        match failed {
            Some(e) => {
                tracing::error!(key = %self.key, error = %e, "endpoint closed before staged frames were queued");
                Err(e.into())
            }
            None => Ok(()),
        }
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Run `f` on the slot under its lock.
    pub(crate) fn view<R: Default>(&self, f: impl FnOnce(Option<&Sh::Slot>) -> R) -> R {
        match self.registry.read(&self.key, |slot, _| f(slot)) {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "slot unreadable");
                R::default()
            }
        }
    }

    /// Isolated copy of the slot.
    pub(crate) fn copy(&self) -> Option<Sh::Slot> {
        self.view(|slot| slot.map(Isolate::isolate))
    }

    pub(crate) fn revision(&self) -> u64 {
        self.registry.revision(&self.key)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────

    fn dispatch(&self, changes: &[Sh::Change]) {
        if changes.is_empty() {
            return;
        }
        let instances: Vec<Arc<Listeners<Sh>>> = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        for change in changes {
            for instance in &instances {
                instance.notify(change);
            }
        }
    }
}

/// One `UpdateValue` per change, numbered from `revision + 1`.
fn delta_frames<Sh: StoreShape>(
    channel: &ChannelBinding,
    changes: &[Sh::Change],
    revision: u64,
) -> Result<Vec<Frame>> {
    changes
        .iter()
        .zip(revision + 1..)
        .map(|(change, revision)| -> Result<Frame> {
            let frame = Frame::UpdateValue {
                revision,
                payload: Bytes::from(Sh::encode_change(change)?),
            };
            channel.check(&frame, Delivery::Broadcast)?;
            Ok(frame)
        })
        .collect()
}

fn snapshot_frame<Sh: StoreShape>(
    channel: &ChannelBinding,
    slot: Option<&Sh::Slot>,
    revision: u64,
) -> Result<Frame> {
    let payload = codec::encode(&Snapshot::from_slot(slot))?;
    let frame = Frame::UpdateClient {
        revision,
        payload: Bytes::from(payload),
    };
    channel.check(&frame, Delivery::Broadcast)?;
    Ok(frame)
}

impl<Sh: StoreShape> ChannelHandler for Binding<Sh> {
    fn on_update(&self, revision: u64, payload: &[u8]) {
        match codec::decode::<Sh::Delta>(payload) {
            Ok(delta) => self.receive(Pending::Delta(revision, delta)),
            Err(e) => {
                tracing::warn!(key = %self.key, revision, error = %e, "undecodable delta dropped")
            }
        }
    }

    fn on_replace(&self, revision: u64, payload: &[u8]) {
        match codec::decode::<Snapshot<Sh::Slot>>(payload) {
            Ok(snapshot) => self.receive(Pending::Replace(revision, snapshot)),
            Err(e) => {
                tracing::warn!(key = %self.key, revision, error = %e, "undecodable replacement dropped")
            }
        }
    }

    fn snapshot(&self) -> statemirror_sync::Result<(u64, Vec<u8>)> {
        self.registry
            .read(&self.key, |slot: Option<&Sh::Slot>, revision| {
                codec::encode(&Snapshot::from_slot(slot)).map(|payload| (revision, payload))
            })
            .map_err(|e| SyncError::Handler(e.to_string()))?
            .map_err(SyncError::from)
    }
}
