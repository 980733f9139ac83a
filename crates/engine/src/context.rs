//! The save context: coordinated write scheduling, slot management, and the
//! deferred-completion dispatch loop.
//!
//! One thread owns the context and drives [`SaveContext::tick`]; a single
//! worker thread owns all file I/O and load-path decoding. The worker hands
//! results back exclusively through the completion queue, so every cache
//! mutation and user-visible callback runs on the owning thread.

use crate::cache::Cache;
use crate::registry::{CachedValue, Registration, Registry, erased_encode};
use crate::slot::SlotPointer;
use keepsake_codec::{CodecError, decode_payload, encode_payload};
use keepsake_common::{SaveConfig, Saveable, SlotId};
use keepsake_store::{FileStore, StoreError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

/// Completion callback for a single coordinated save.
pub type SaveCallback = Box<dyn FnOnce() + Send + 'static>;
/// Callback receiving the resolved slot once bootstrap finishes.
pub type ReadyCallback = Box<dyn FnOnce(SlotId) + Send + 'static>;

/// Work executed on the I/O worker thread.
enum Job {
    /// Bootstrap pass for one slot: load-or-create every registered type.
    Bootstrap { slot: SlotId },
    /// One write of pre-encoded bytes.
    Write {
        key: &'static str,
        slot: SlotId,
        bytes: Vec<u8>,
        origin: WriteOrigin,
    },
    /// Sequential writes of a save-all batch, in registry order.
    WriteBatch {
        slot: SlotId,
        items: Vec<(&'static str, Vec<u8>)>,
    },
}

/// Which caller a write completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOrigin {
    Coordinator,
    SlotSwitch,
}

/// Results handed back from the worker, drained by `tick` in FIFO order.
enum Completion {
    Bootstrap {
        slot: SlotId,
        entries: Vec<(&'static str, CachedValue)>,
        resolved: SlotId,
    },
    Write {
        key: &'static str,
        slot: SlotId,
        origin: WriteOrigin,
        ok: bool,
    },
    Batch {
        failed: usize,
    },
}

/// A queued save request. At most one queued request exists per key; a
/// newer submission replaces payload and callback in the same queue slot.
struct PendingRequest {
    key: &'static str,
    value: CachedValue,
    encode: fn(&CachedValue) -> Result<serde_json::Value, CodecError>,
    callback: Option<SaveCallback>,
}

/// The one save the worker is currently writing.
struct ActiveSave {
    key: &'static str,
    slot: SlotId,
    value: CachedValue,
    callback: Option<SaveCallback>,
}

/// A slot switch whose pointer write is still with the worker.
struct SwitchPending {
    value: CachedValue,
    callback: Option<SaveCallback>,
}

/// Load-path failures, unified across store and codec.
#[derive(Debug, thiserror::Error)]
enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The save system's context object. Construct once, pass to all callers.
///
/// Not `Sync`: one logical thread owns it and drives [`tick`].
///
/// [`tick`]: SaveContext::tick
pub struct SaveContext {
    config: SaveConfig,
    registry: Arc<Registry>,
    cache: Cache,
    store: FileStore,
    current_slot: SlotId,
    bootstrap_requested: bool,
    ready_slot: Option<SlotId>,
    ready_subs: Vec<ReadyCallback>,
    pending: VecDeque<PendingRequest>,
    active: Option<ActiveSave>,
    switch_in_flight: VecDeque<SwitchPending>,
    save_all_in_flight: VecDeque<SaveCallback>,
    completions: Arc<Mutex<VecDeque<Completion>>>,
    jobs: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SaveContext {
    /// Create a context and spawn its I/O worker. No files are touched
    /// until [`initialize`](Self::initialize) or the first save.
    pub fn new(config: SaveConfig, registry: Registry) -> Self {
        let registry = Arc::new(registry);
        let store = FileStore::new(&config);
        let completions = Arc::new(Mutex::new(VecDeque::new()));
        let (jobs, job_rx) = mpsc::channel();

        let worker = Worker {
            store: store.clone(),
            registry: Arc::clone(&registry),
            completions: Arc::clone(&completions),
            debug_logs: config.show_debug_logs,
        };
        let handle = std::thread::spawn(move || worker.run(job_rx));

        Self {
            config,
            registry,
            cache: Cache::new(),
            store,
            current_slot: SlotId::DEFAULT,
            bootstrap_requested: false,
            ready_slot: None,
            ready_subs: Vec::new(),
            pending: VecDeque::new(),
            active: None,
            switch_in_flight: VecDeque::new(),
            save_all_in_flight: VecDeque::new(),
            completions,
            jobs: Some(jobs),
            worker: Some(handle),
        }
    }

    /// Begin the bootstrap pass for the current slot.
    ///
    /// The ready signal fires from a later [`tick`](Self::tick) once every
    /// registered type has a cache entry and a backing file.
    pub fn initialize(&mut self) {
        if self.bootstrap_requested {
            tracing::warn!("initialize called more than once; ignoring");
            return;
        }
        self.bootstrap_requested = true;
        self.send_job(Job::Bootstrap {
            slot: self.current_slot,
        });
    }

    /// Subscribe to the one-shot ready signal. Fires immediately when the
    /// context is already initialized.
    pub fn on_ready(&mut self, callback: impl FnOnce(SlotId) + Send + 'static) {
        match self.ready_slot {
            Some(slot) => callback(slot),
            None => self.ready_subs.push(Box::new(callback)),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.ready_slot.is_some()
    }

    /// The authoritative current slot.
    pub fn current_slot(&self) -> SlotId {
        self.current_slot
    }

    /// Cached instance of `T` for the current slot, or a fresh default.
    /// Never fails.
    pub fn get_cached<T: Saveable>(&self) -> Arc<T> {
        self.cache.get::<T>(self.current_slot)
    }

    /// Administrative access to the underlying file store.
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Queue a save of `snapshot` for the current slot.
    ///
    /// The value passed in is what gets written, regardless of later caller
    /// mutation. A queued (not yet started) request for the same type is
    /// replaced in place, payload and callback both, keeping its position
    /// in the queue; a burst of rapid saves for one type collapses to a
    /// single write of the latest state. Requests behind an active save
    /// append normally.
    ///
    /// On success the cache is updated and the callback fires; a failed
    /// save logs and drops its callback.
    pub fn submit<T: Saveable>(&mut self, snapshot: T, callback: impl FnOnce() + Send + 'static) {
        let request = PendingRequest {
            key: T::KEY,
            value: Arc::new(snapshot),
            encode: erased_encode::<T>,
            callback: Some(Box::new(callback)),
        };
        if let Some(existing) = self.pending.iter_mut().find(|queued| queued.key == T::KEY) {
            *existing = request;
        } else {
            self.pending.push_back(request);
        }
    }

    /// Persist every registered type's cached value (or a fresh default)
    /// sequentially in registry order, bypassing the dedup queue.
    ///
    /// Individual failures are logged and do not abort the batch; the
    /// aggregate callback fires once all writes have been attempted.
    pub fn save_all(&mut self, callback: impl FnOnce() + Send + 'static) {
        let slot = self.current_slot;
        let mut items = Vec::with_capacity(self.registry.len());
        for reg in self.registry.iter() {
            let value = self
                .cache
                .get_raw(reg.key, slot)
                .unwrap_or_else(|| (reg.make_default)());
            match (reg.encode)(&value).and_then(encode_payload) {
                Ok(bytes) => items.push((reg.key, bytes)),
                Err(e) => {
                    tracing::error!(key = reg.key, slot = slot.0, "save-all encode failed: {e}");
                }
            }
        }
        if self.send_job(Job::WriteBatch { slot, items }) {
            self.save_all_in_flight.push_back(Box::new(callback));
        } else {
            callback();
        }
    }

    /// Switch the active slot, persisting the slot pointer immediately
    /// (outside the dedup queue). The callback fires once the pointer
    /// write has been attempted, success or not.
    pub fn switch_slot(&mut self, target: SlotId, callback: impl FnOnce() + Send + 'static) {
        self.current_slot = target;

        let mut pointer = (*self.cache.get::<SlotPointer>(target)).clone();
        pointer.current_slot = target;

        let encoded = serde_json::to_value(&pointer)
            .map_err(|e| CodecError::Serialization(e.to_string()))
            .and_then(encode_payload);
        match encoded {
            Ok(bytes) => {
                let sent = self.send_job(Job::Write {
                    key: SlotPointer::KEY,
                    slot: target,
                    bytes,
                    origin: WriteOrigin::SlotSwitch,
                });
                if sent {
                    self.switch_in_flight.push_back(SwitchPending {
                        value: Arc::new(pointer),
                        callback: Some(Box::new(callback)),
                    });
                } else {
                    callback();
                }
            }
            Err(e) => {
                tracing::error!(slot = target.0, "failed to encode slot pointer: {e}");
                callback();
            }
        }
    }

    /// Drain the deferred-completion queue once, then start the next queued
    /// save if the coordinator is idle.
    ///
    /// All cache mutation and user-visible callbacks happen here, on the
    /// calling thread, in FIFO completion order.
    pub fn tick(&mut self) {
        let drained = std::mem::take(&mut *self.completions.lock());
        for completion in drained {
            match completion {
                Completion::Bootstrap {
                    slot,
                    entries,
                    resolved,
                } => self.finish_bootstrap(slot, entries, resolved),
                Completion::Write {
                    key,
                    slot,
                    origin,
                    ok,
                } => self.finish_write(key, slot, origin, ok),
                Completion::Batch { failed } => self.finish_batch(failed),
            }
        }
        self.start_next_if_idle();
    }

    fn finish_bootstrap(
        &mut self,
        slot: SlotId,
        entries: Vec<(&'static str, CachedValue)>,
        resolved: SlotId,
    ) {
        for (key, value) in entries {
            self.cache.insert(key, slot, value);
        }
        // Pointer adoption happens only now, after the load pass already
        // ran against the previous current slot. Entries stay cached under
        // the bootstrap slot even when the pointer redirects elsewhere.
        self.current_slot = resolved;
        if self.config.show_debug_logs {
            tracing::debug!(slot = resolved.0, "save system ready");
        }
        self.ready_slot = Some(resolved);
        for callback in self.ready_subs.drain(..) {
            callback(resolved);
        }
    }

    fn finish_write(&mut self, key: &'static str, slot: SlotId, origin: WriteOrigin, ok: bool) {
        match origin {
            WriteOrigin::Coordinator => {
                let Some(active) = self.active.take() else {
                    tracing::warn!(key, "write completion without an active save");
                    return;
                };
                if ok {
                    self.cache.insert(active.key, active.slot, active.value);
                    if let Some(callback) = active.callback {
                        callback();
                    }
                }
                // A failed save drops its callback: fire-and-forget, kept
                // as the documented contract.
            }
            WriteOrigin::SlotSwitch => {
                let Some(pending) = self.switch_in_flight.pop_front() else {
                    tracing::warn!(key, "slot-switch completion without a pending switch");
                    return;
                };
                if ok {
                    self.cache.insert(key, slot, pending.value);
                }
                if let Some(callback) = pending.callback {
                    callback();
                }
            }
        }
    }

    fn finish_batch(&mut self, failed: usize) {
        if failed > 0 {
            tracing::warn!(failed, "save-all finished with failures");
        }
        match self.save_all_in_flight.pop_front() {
            Some(callback) => callback(),
            None => tracing::warn!("batch completion without a pending save-all"),
        }
    }

    /// Dequeue and dispatch the next request when no write is in flight.
    ///
    /// Encoding happens here, at dequeue time, so the bytes reflect the
    /// snapshot taken at submission. An encode failure is logged, drops
    /// the callback, and moves straight on to the next request.
    fn start_next_if_idle(&mut self) {
        while self.active.is_none() {
            let Some(mut request) = self.pending.pop_front() else {
                return;
            };
            let slot = self.current_slot;
            match (request.encode)(&request.value).and_then(encode_payload) {
                Ok(bytes) => {
                    let active = ActiveSave {
                        key: request.key,
                        slot,
                        value: Arc::clone(&request.value),
                        callback: request.callback.take(),
                    };
                    let sent = self.send_job(Job::Write {
                        key: active.key,
                        slot,
                        bytes,
                        origin: WriteOrigin::Coordinator,
                    });
                    if sent {
                        self.active = Some(active);
                    }
                }
                Err(e) => {
                    tracing::error!(key = request.key, slot = slot.0, "encode failed: {e}");
                }
            }
        }
    }

    fn send_job(&self, job: Job) -> bool {
        let Some(jobs) = &self.jobs else {
            return false;
        };
        if jobs.send(job).is_err() {
            tracing::error!("save worker is not running; dropping job");
            return false;
        }
        true
    }
}

impl Drop for SaveContext {
    fn drop(&mut self) {
        // Closing the channel stops the worker after its current job.
        self.jobs.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// The I/O worker. Owns all file access and load-path decoding; posts
/// every result to the completion queue, never touching the cache.
struct Worker {
    store: FileStore,
    registry: Arc<Registry>,
    completions: Arc<Mutex<VecDeque<Completion>>>,
    debug_logs: bool,
}

impl Worker {
    fn run(self, jobs: mpsc::Receiver<Job>) {
        while let Ok(job) = jobs.recv() {
            let completion = match job {
                Job::Bootstrap { slot } => self.bootstrap(slot),
                Job::Write {
                    key,
                    slot,
                    bytes,
                    origin,
                } => self.write(key, slot, &bytes, origin),
                Job::WriteBatch { slot, items } => self.write_batch(slot, items),
            };
            self.completions.lock().push_back(completion);
        }
    }

    fn write(&self, key: &'static str, slot: SlotId, bytes: &[u8], origin: WriteOrigin) -> Completion {
        let ok = match self.store.write(key, slot, bytes) {
            Ok(()) => {
                if self.debug_logs {
                    tracing::debug!(key, slot = slot.0, "saved");
                }
                true
            }
            Err(e) => {
                tracing::error!(key, slot = slot.0, "save failed: {e}");
                false
            }
        };
        Completion::Write {
            key,
            slot,
            origin,
            ok,
        }
    }

    fn write_batch(&self, slot: SlotId, items: Vec<(&'static str, Vec<u8>)>) -> Completion {
        let mut failed = 0;
        for (key, bytes) in items {
            match self.store.write(key, slot, &bytes) {
                Ok(()) => {
                    if self.debug_logs {
                        tracing::debug!(key, slot = slot.0, "saved");
                    }
                }
                Err(e) => {
                    tracing::error!(key, slot = slot.0, "save-all write failed: {e}");
                    failed += 1;
                }
            }
        }
        Completion::Batch { failed }
    }

    /// Load-or-create every registered type for `slot`, then resolve the
    /// slot pointer. A corrupted file for one type degrades that type to
    /// its default and never blocks the rest of the pass.
    fn bootstrap(&self, slot: SlotId) -> Completion {
        let mut entries = Vec::with_capacity(self.registry.len());
        for reg in self.registry.iter() {
            let value = if self.store.exists(reg.key, slot) {
                self.load_entry(reg, slot)
            } else {
                let value = (reg.make_default)();
                self.persist_default(reg, slot, &value);
                value
            };
            entries.push((reg.key, value));
        }

        let resolved = entries
            .iter()
            .find(|(key, _)| *key == SlotPointer::KEY)
            .and_then(|(_, value)| value.downcast_ref::<SlotPointer>())
            .map(|pointer| pointer.current_slot)
            .unwrap_or(slot);

        Completion::Bootstrap {
            slot,
            entries,
            resolved,
        }
    }

    /// Decode one existing file, degrading to a default on any failure.
    fn load_entry(&self, reg: &Registration, slot: SlotId) -> CachedValue {
        match self.try_load(reg, slot) {
            Ok(value) => {
                if self.debug_logs {
                    tracing::debug!(key = reg.key, slot = slot.0, "loaded");
                }
                value
            }
            Err(LoadError::Codec(CodecError::VersionMismatch { found, expected })) => {
                tracing::warn!(
                    key = reg.key,
                    slot = slot.0,
                    found,
                    expected,
                    "envelope version mismatch; using default"
                );
                (reg.make_default)()
            }
            Err(e) => {
                tracing::error!(key = reg.key, slot = slot.0, "load failed; using default: {e}");
                (reg.make_default)()
            }
        }
    }

    fn try_load(&self, reg: &Registration, slot: SlotId) -> Result<CachedValue, LoadError> {
        let bytes = self.store.read(reg.key, slot)?;
        let payload = decode_payload(&bytes)?;
        Ok((reg.decode)(&payload)?)
    }

    /// First-run path: the cache gets a default and the file is written
    /// eagerly, so every registered type has a backing file after bootstrap.
    fn persist_default(&self, reg: &Registration, slot: SlotId, value: &CachedValue) {
        match (reg.encode)(value).and_then(encode_payload) {
            Ok(bytes) => {
                if let Err(e) = self.store.write(reg.key, slot, &bytes) {
                    tracing::error!(key = reg.key, slot = slot.0, "failed to write default: {e}");
                }
            }
            Err(e) => {
                tracing::error!(key = reg.key, slot = slot.0, "failed to encode default: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_codec::envelope::Envelope;
    use keepsake_codec::pipeline::{compress, encrypt};
    use serde::{Deserialize, Serialize};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i32,
    }

    impl Saveable for Counter {
        const KEY: &'static str = "Counter";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        volume: f32,
    }

    impl Saveable for Profile {
        const KEY: &'static str = "Profile";
    }

    fn test_config(dir: &Path) -> SaveConfig {
        SaveConfig {
            save_path: dir.join("saves"),
            file_extension: ".sav".to_string(),
            show_debug_logs: false,
        }
    }

    fn test_registry() -> Registry {
        let mut registry = Registry::new();
        registry.register::<Counter>();
        registry.register::<Profile>();
        registry
    }

    fn context_in(dir: &Path) -> SaveContext {
        SaveContext::new(test_config(dir), test_registry())
    }

    /// Tick until `done` reports true, failing the test after a timeout.
    fn pump_until(ctx: &mut SaveContext, mut done: impl FnMut(&SaveContext) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            ctx.tick();
            if done(ctx) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for completions");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn flag() -> (Arc<AtomicBool>, impl FnOnce() + Send + 'static) {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = Arc::clone(&flag);
            move || flag.store(true, Ordering::SeqCst)
        };
        (flag, setter)
    }

    fn read_payload(ctx: &SaveContext, key: &str, slot: SlotId) -> serde_json::Value {
        let bytes = ctx.store().read(key, slot).unwrap();
        decode_payload(&bytes).unwrap()
    }

    #[test]
    fn bootstrap_creates_cache_entries_and_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());

        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        for key in [SlotPointer::KEY, Counter::KEY, Profile::KEY] {
            assert!(ctx.store().exists(key, SlotId(1)), "missing file for {key}");
        }
        assert_eq!(ctx.get_cached::<Counter>().value, 0);
        assert_eq!(ctx.get_cached::<Profile>().name, "");
    }

    #[test]
    fn ready_signal_fires_once_with_resolved_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            ctx.on_ready(move |slot| seen.lock().push(slot));
        }
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());
        assert_eq!(*seen.lock(), vec![SlotId(1)]);

        // Late subscription fires immediately.
        let (late, set_late) = flag();
        ctx.on_ready(move |_slot| set_late());
        assert!(late.load(Ordering::SeqCst));
    }

    #[test]
    fn submit_updates_cache_and_file_on_success() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        let (saved, set_saved) = flag();
        ctx.submit(Counter { value: 5 }, set_saved);
        pump_until(&mut ctx, |_| saved.load(Ordering::SeqCst));

        assert_eq!(ctx.get_cached::<Counter>().value, 5);
        let payload = read_payload(&ctx, Counter::KEY, SlotId(1));
        assert_eq!(payload["value"], 5);
    }

    #[test]
    fn rapid_submits_collapse_to_latest_state() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        let (first, set_first) = flag();
        let (second, set_second) = flag();
        ctx.submit(Counter { value: 1 }, set_first);
        ctx.submit(Counter { value: 2 }, set_second);
        pump_until(&mut ctx, |_| second.load(Ordering::SeqCst));

        // The superseded request's callback was discarded with its payload.
        assert!(!first.load(Ordering::SeqCst));
        assert_eq!(ctx.get_cached::<Counter>().value, 2);
        assert_eq!(read_payload(&ctx, Counter::KEY, SlotId(1))["value"], 2);
    }

    #[test]
    fn replacement_keeps_queue_position() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let push = |label: &'static str| {
            let order = Arc::clone(&order);
            move || order.lock().push(label)
        };

        ctx.submit(Counter { value: 1 }, push("counter-old"));
        ctx.submit(Profile::default(), push("profile"));
        // Replaces the queued Counter in place, ahead of Profile.
        ctx.submit(Counter { value: 9 }, push("counter-new"));
        pump_until(&mut ctx, |_| order.lock().len() == 2);

        assert_eq!(*order.lock(), vec!["counter-new", "profile"]);
        assert_eq!(ctx.get_cached::<Counter>().value, 9);
    }

    #[test]
    fn distinct_types_service_in_fifo_order() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let push = |label: &'static str| {
            let order = Arc::clone(&order);
            move || order.lock().push(label)
        };

        ctx.submit(Counter { value: 1 }, push("counter"));
        ctx.submit(Profile::default(), push("profile"));
        pump_until(&mut ctx, |_| order.lock().len() == 2);

        assert_eq!(*order.lock(), vec!["counter", "profile"]);
    }

    #[test]
    fn active_save_is_not_superseded() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        let (first, set_first) = flag();
        ctx.submit(Counter { value: 1 }, set_first);
        // Start the first write, then submit again while it is in flight
        // (or already completed): the new request appends normally.
        ctx.tick();
        let (second, set_second) = flag();
        ctx.submit(Counter { value: 2 }, set_second);
        pump_until(&mut ctx, |_| second.load(Ordering::SeqCst));

        assert!(first.load(Ordering::SeqCst));
        assert_eq!(ctx.get_cached::<Counter>().value, 2);
    }

    #[test]
    fn failed_write_drops_callback_and_services_next() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        // Make the counter's file unwritable by putting a directory there.
        let path = ctx.store().path_for(Counter::KEY, SlotId(1));
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let (saved, set_saved) = flag();
        ctx.submit(Counter { value: 5 }, set_saved);
        let (second, set_second) = flag();
        ctx.submit(
            Profile {
                name: "x".to_string(),
                volume: 1.0,
            },
            set_second,
        );
        pump_until(&mut ctx, |_| second.load(Ordering::SeqCst));

        // The failed save dropped its callback and left the cache alone;
        // the queue moved straight on to the next request.
        assert!(!saved.load(Ordering::SeqCst));
        assert_eq!(ctx.get_cached::<Counter>().value, 0);
        assert_eq!(ctx.get_cached::<Profile>().name, "x");
    }

    #[test]
    fn save_all_writes_every_registered_type() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        // Remove one backing file; save-all must restore it from cache.
        assert!(ctx.store().delete_exact(Profile::KEY, SlotId(1)).unwrap());

        let (done, set_done) = flag();
        ctx.save_all(set_done);
        pump_until(&mut ctx, |_| done.load(Ordering::SeqCst));

        for key in [SlotPointer::KEY, Counter::KEY, Profile::KEY] {
            assert!(ctx.store().exists(key, SlotId(1)), "missing file for {key}");
        }
    }

    #[test]
    fn switch_slot_persists_pointer_and_isolates_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        let (saved, set_saved) = flag();
        ctx.submit(Counter { value: 7 }, set_saved);
        pump_until(&mut ctx, |_| saved.load(Ordering::SeqCst));

        let (switched, set_switched) = flag();
        ctx.switch_slot(SlotId(2), set_switched);
        pump_until(&mut ctx, |_| switched.load(Ordering::SeqCst));

        assert_eq!(ctx.current_slot(), SlotId(2));
        let pointer = read_payload(&ctx, SlotPointer::KEY, SlotId(2));
        assert_eq!(pointer["current_slot"], 2);

        // Slot 2 has no counter state; slot 1's file is untouched.
        assert_eq!(ctx.get_cached::<Counter>().value, 0);
        assert_eq!(read_payload(&ctx, Counter::KEY, SlotId(1))["value"], 7);
        assert!(!ctx.store().exists(Counter::KEY, SlotId(2)));
    }

    #[test]
    fn bootstrap_adopts_persisted_slot_pointer() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut ctx = context_in(tmp.path());
            ctx.initialize();
            pump_until(&mut ctx, |c| c.is_initialized());
            let (switched, set_switched) = flag();
            ctx.switch_slot(SlotId(3), set_switched);
            pump_until(&mut ctx, |_| switched.load(Ordering::SeqCst));
        }

        // The pointer was persisted under slot 3, not the bootstrap slot,
        // so a restart boots from slot 1 again. Write the pointer under
        // slot 1 the way a host that saves before quitting would.
        let store = FileStore::new(&test_config(tmp.path()));
        let pointer = serde_json::to_value(SlotPointer {
            current_slot: SlotId(3),
        })
        .unwrap();
        store
            .write(
                SlotPointer::KEY,
                SlotId(1),
                &encode_payload(pointer).unwrap(),
            )
            .unwrap();

        let mut ctx = context_in(tmp.path());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            ctx.on_ready(move |slot| seen.lock().push(slot));
        }
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        assert_eq!(ctx.current_slot(), SlotId(3));
        assert_eq!(*seen.lock(), vec![SlotId(3)]);
    }

    #[test]
    fn corrupted_file_degrades_to_default_without_blocking_others() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut ctx = context_in(tmp.path());
            ctx.initialize();
            pump_until(&mut ctx, |c| c.is_initialized());
            let (saved, set_saved) = flag();
            ctx.submit(
                Profile {
                    name: "ada".to_string(),
                    volume: 0.8,
                },
                set_saved,
            );
            pump_until(&mut ctx, |_| saved.load(Ordering::SeqCst));
            let (saved2, set_saved2) = flag();
            ctx.submit(Counter { value: 7 }, set_saved2);
            pump_until(&mut ctx, |_| saved2.load(Ordering::SeqCst));
        }

        // Truncate the counter's file.
        let store = FileStore::new(&test_config(tmp.path()));
        let bytes = store.read(Counter::KEY, SlotId(1)).unwrap();
        store
            .write(Counter::KEY, SlotId(1), &bytes[..bytes.len() / 2])
            .unwrap();

        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        assert_eq!(ctx.get_cached::<Counter>().value, 0);
        // The corruption never touched the other type's bootstrap.
        assert_eq!(ctx.get_cached::<Profile>().name, "ada");
    }

    #[test]
    fn version_mismatch_never_updates_cache() {
        let tmp = tempfile::tempdir().unwrap();

        // Hand-craft a counter file with a future envelope version.
        let store = FileStore::new(&test_config(tmp.path()));
        let mut envelope = Envelope::new(serde_json::json!({"value": 42}));
        envelope.version = 2;
        let json = serde_json::to_vec(&envelope).unwrap();
        let bytes = encrypt(&compress(&json).unwrap()).unwrap();
        store.write(Counter::KEY, SlotId(1), &bytes).unwrap();

        let mut ctx = context_in(tmp.path());
        ctx.initialize();
        pump_until(&mut ctx, |c| c.is_initialized());

        assert_eq!(ctx.get_cached::<Counter>().value, 0);
    }

    #[test]
    fn get_cached_is_safe_before_initialization() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_in(tmp.path());
        assert_eq!(ctx.get_cached::<Counter>().value, 0);
        assert!(!ctx.is_initialized());
    }
}
