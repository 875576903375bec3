//! C ABI over the control surface.
//!
//! Every function returns a status code (`KB_OK` or a negative `KB_*` value)
//! unless stated otherwise. Entity and player ids are NUL-terminated UTF-8
//! strings; positions are passed as three floats. Callbacks receive borrowed
//! strings that are only valid for the duration of the call.
//!
//! While a surface is installed a sync worker polls the local roster at the
//! configured interval. The latest snapshot is read back as JSON with
//! `kb_latest_snapshot`, and peer commands are queued as JSON with
//! `kb_push_command`.

use std::ffi::{CStr, CString, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kenshi_bridge::bridge::{AiState, AnimationType, CharacterState, DamageType};
use kenshi_bridge::{
    BridgeConfig, CommandSource, ControlSurface, Error, InboundCommand, ShutdownSignal,
    SnapshotSink, StateBridge, SyncLoop, SyncWorker, Vec3,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

pub const KB_OK: i32 = 0;
pub const KB_NOT_INITIALIZED: i32 = -1;
pub const KB_INVALID_ARGUMENT: i32 = -2;
pub const KB_NOT_FOUND: i32 = -3;
pub const KB_ACCESS_FAULT: i32 = -4;
pub const KB_UNSUPPORTED: i32 = -5;
pub const KB_FAILED: i32 = -6;

pub type KbPlayerCallback = extern "C" fn(player: *const c_char);
pub type KbActionCallback = extern "C" fn(player: *const c_char, action: i32, data: *const c_char);
pub type KbCombatCallback =
    extern "C" fn(attacker: *const c_char, target: *const c_char, damage_type: i32, damage: f32);
pub type KbChatCallback = extern "C" fn(player: *const c_char, text: *const c_char);
/// `recipient` is null for a broadcast
pub type KbMessageCallback = extern "C" fn(recipient: *const c_char, text: *const c_char);
pub type KbSnapshotCallback = extern "C" fn(tick: u64, json: *const c_char);

/// Latest roster snapshot, serialized once per tick
#[derive(Default)]
struct SnapshotSlot {
    tick: u64,
    json: String,
}

struct SnapshotBuffer(Arc<Mutex<SnapshotSlot>>);

impl SnapshotSink for SnapshotBuffer {
    fn push(&mut self, tick: u64, characters: &[CharacterState]) -> kenshi_bridge::Result<()> {
        let json = serde_json::to_string(characters)?;
        *locked(&self.0) = SnapshotSlot { tick, json };
        Ok(())
    }
}

struct CommandQueue(Arc<Mutex<Vec<InboundCommand>>>);

impl CommandSource for CommandQueue {
    fn drain(&mut self) -> Vec<InboundCommand> {
        std::mem::take(&mut *locked(&self.0))
    }
}

/// An installed surface and the worker syncing it
struct Session {
    surface: Arc<ControlSurface>,
    snapshots: Arc<Mutex<SnapshotSlot>>,
    commands: Arc<Mutex<Vec<InboundCommand>>>,
    worker: Option<SyncWorker>,
}

impl Session {
    fn start(surface: ControlSurface, sync_interval: Duration) -> Self {
        let surface = Arc::new(surface);
        let snapshots: Arc<Mutex<SnapshotSlot>> = Arc::default();
        let commands: Arc<Mutex<Vec<InboundCommand>>> = Arc::default();
        let sync = SyncLoop::new(
            Arc::clone(surface.bridge()),
            Box::new(SnapshotBuffer(Arc::clone(&snapshots))),
            Box::new(CommandQueue(Arc::clone(&commands))),
        );
        let worker = match SyncWorker::spawn(sync, sync_interval, Arc::new(ShutdownSignal::new())) {
            Ok(worker) => Some(worker),
            Err(e) => {
                error!("Sync worker not started: {}", e);
                None
            }
        };
        Self {
            surface,
            snapshots,
            commands,
            worker,
        }
    }

    /// Stop the worker first so no tick runs against a shut down surface
    fn stop(self) {
        if let Some(worker) = self.worker {
            let ticks = worker.stop();
            info!("Sync worker ran {} ticks", ticks);
        }
        self.surface.shutdown();
    }
}

static SESSION: Mutex<Option<Session>> = Mutex::new(None);

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn slot() -> MutexGuard<'static, Option<Session>> {
    locked(&SESSION)
}

/// The installed surface, cloned so no global lock is held while it runs
fn surface() -> Option<Arc<ControlSurface>> {
    slot().as_ref().map(|session| Arc::clone(&session.surface))
}

/// Install an already built surface and start syncing it every
/// `sync_interval`, replacing any previous one.
///
/// Used by hosts that construct the bridge themselves.
pub fn install(surface: ControlSurface, sync_interval: Duration) {
    let session = Session::start(surface, sync_interval);
    let previous = slot().replace(session);
    if let Some(previous) = previous {
        previous.stop();
    }
}

/// Run an export body, turning a panic into `KB_FAILED`
fn guarded(f: impl FnOnce() -> i32) -> i32 {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!("Panic inside an exported call");
        KB_FAILED
    })
}

fn status(result: kenshi_bridge::Result<()>) -> i32 {
    match result {
        Ok(()) => KB_OK,
        Err(e) => {
            warn!("{}", e);
            match e {
                Error::NotFound { .. } => KB_NOT_FOUND,
                Error::Access(_) => KB_ACCESS_FAULT,
                Error::Unresolved(_) => KB_UNSUPPORTED,
                _ => KB_FAILED,
            }
        }
    }
}

/// Borrow a C string as UTF-8
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn text<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn c_string(value: &str) -> CString {
    CString::new(value.replace('\0', "")).unwrap_or_default()
}

/// Run `f` with the surface and a decoded id
///
/// # Safety
/// `id` must be null or point to a NUL-terminated string.
unsafe fn with_id(id: *const c_char, f: impl FnOnce(&ControlSurface, &str) -> i32) -> i32 {
    let Some(surface) = surface() else {
        return KB_NOT_INITIALIZED;
    };
    // SAFETY: forwarded from the caller
    match unsafe { text(id) } {
        Some(id) => guarded(|| f(&surface, id)),
        None => KB_INVALID_ARGUMENT,
    }
}

fn with_surface(f: impl FnOnce(&ControlSurface) -> i32) -> i32 {
    match surface() {
        Some(surface) => guarded(|| f(&surface)),
        None => KB_NOT_INITIALIZED,
    }
}

/// Write `value` through `out` on success
///
/// # Safety
/// `out` must be valid for writes; it was checked non-null by the caller.
unsafe fn write_out<T>(out: *mut T, result: kenshi_bridge::Result<T>) -> i32 {
    match result {
        Ok(value) => {
            // SAFETY: per the caller's contract
            unsafe { out.write(value) };
            KB_OK
        }
        Err(e) => status(Err(e)),
    }
}

#[cfg(target_os = "windows")]
fn attach(config: BridgeConfig) -> anyhow::Result<StateBridge> {
    use anyhow::Context;
    use kenshi_bridge::OffsetResolver;
    use kenshi_bridge::bridge::ProcessCalls;
    use kenshi_bridge::memory::LocalProcess;
    use kenshi_bridge::offset::HttpFetcher;

    let process = Arc::new(LocalProcess::attach().context("Failed to attach to the host module")?);
    let resolver = OffsetResolver::new(config.clone(), process.host())
        .with_memory(process.clone())
        .with_fetcher(Arc::new(HttpFetcher::new(config.http_timeout())));
    Ok(StateBridge::new(process.clone(), Arc::new(resolver))
        .with_native_calls(Arc::new(ProcessCalls::new(process))))
}

#[cfg(not(target_os = "windows"))]
fn attach(_config: BridgeConfig) -> anyhow::Result<StateBridge> {
    anyhow::bail!("In-process attach is only available on Windows")
}

/// Attach to the host, resolve offsets and install the surface.
/// Calling it again once initialised is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn kb_initialize() -> i32 {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "kenshi_bridge=info"
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .try_init();

    if let Some(surface) = surface() {
        if surface.is_initialized() {
            return KB_OK;
        }
        return status(surface.initialize());
    }

    let config = BridgeConfig::default();
    let window = config.interpolation_window();
    let sync_interval = config.sync_interval();
    let bridge = match attach(config) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("{:#}", e);
            return KB_UNSUPPORTED;
        }
    };

    let surface = ControlSurface::new(Arc::new(bridge), window);
    let code = status(surface.initialize());
    if code == KB_OK {
        install(surface, sync_interval);
        info!("Bridge ready");
    }
    code
}

/// Stop the sync worker, despawn remote entities, revert intercepts and drop the surface
#[unsafe(no_mangle)]
pub extern "C" fn kb_shutdown() {
    let session = slot().take();
    if let Some(session) = session {
        session.stop();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn kb_is_initialized() -> bool {
    surface().is_some_and(|s| s.is_initialized())
}

/// # Safety
/// `id` and `name` must be null or NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_spawn_entity(
    id: *const c_char,
    name: *const c_char,
    x: f32,
    y: f32,
    z: f32,
    faction_id: i32,
) -> i32 {
    // SAFETY: forwarded from the caller
    let name = unsafe { text(name) }.unwrap_or_default().to_string();
    unsafe { with_id(id, |s, id| status(s.spawn(id, &name, Vec3::new(x, y, z), faction_id))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_despawn_entity(id: *const c_char) -> i32 {
    unsafe { with_id(id, |s, id| status(s.despawn(id))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_set_position(id: *const c_char, x: f32, y: f32, z: f32) -> i32 {
    unsafe { with_id(id, |s, id| status(s.set_position(id, Vec3::new(x, y, z)))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string; `x`, `y` and `z` must be
/// null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_get_position(
    id: *const c_char,
    x: *mut f32,
    y: *mut f32,
    z: *mut f32,
) -> i32 {
    if x.is_null() || y.is_null() || z.is_null() {
        return KB_INVALID_ARGUMENT;
    }
    unsafe {
        with_id(id, |s, id| match s.get_position(id) {
            Ok(position) => {
                // SAFETY: checked non-null above, writable per the caller's contract
                *x = position.x;
                *y = position.y;
                *z = position.z;
                KB_OK
            }
            Err(e) => status(Err(e)),
        })
    }
}

/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_set_health(id: *const c_char, health: f32) -> i32 {
    unsafe { with_id(id, |s, id| status(s.set_health(id, health).map(|_| ()))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string; `health` must be null or
/// valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_get_health(id: *const c_char, health: *mut f32) -> i32 {
    if health.is_null() {
        return KB_INVALID_ARGUMENT;
    }
    unsafe {
        with_id(id, |s, id| match s.get_health(id) {
            Ok(value) => {
                *health = value;
                KB_OK
            }
            Err(e) => status(Err(e)),
        })
    }
}

/// Returns `KB_FAILED` when a non-cancellable animation is playing
///
/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_play_animation(id: *const c_char, animation: i32, looping: bool) -> i32 {
    let animation = AnimationType::from_raw(animation);
    unsafe {
        with_id(id, |s, id| match s.play_animation(id, animation, looping) {
            Ok(true) => KB_OK,
            Ok(false) => KB_FAILED,
            Err(e) => status(Err(e)),
        })
    }
}

/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_blend_animation(id: *const c_char, animation: i32) -> i32 {
    let animation = AnimationType::from_raw(animation);
    unsafe { with_id(id, |s, id| status(s.blend_animation(id, animation))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_stop_animation(id: *const c_char) -> i32 {
    unsafe { with_id(id, |s, id| status(s.stop_animation(id))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_set_combat_mode(id: *const c_char, in_combat: bool) -> i32 {
    unsafe { with_id(id, |s, id| status(s.set_combat_mode(id, in_combat))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string; `in_combat` must be null or
/// valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_is_in_combat(id: *const c_char, in_combat: *mut bool) -> i32 {
    if in_combat.is_null() {
        return KB_INVALID_ARGUMENT;
    }
    unsafe { with_id(id, |s, id| write_out(in_combat, s.is_in_combat(id))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_set_character_state(id: *const c_char, state: i32) -> i32 {
    let state = AiState::from_raw(state);
    unsafe { with_id(id, |s, id| status(s.set_character_state(id, state))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string; `state` must be null or
/// valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_get_character_state(id: *const c_char, state: *mut i32) -> i32 {
    if state.is_null() {
        return KB_INVALID_ARGUMENT;
    }
    unsafe { with_id(id, |s, id| write_out(state, s.get_character_state(id).map(i32::from))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_set_animation_speed(id: *const c_char, speed: f32) -> i32 {
    unsafe { with_id(id, |s, id| status(s.set_animation_speed(id, speed))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string; `animation` must be null or
/// valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_current_animation(id: *const c_char, animation: *mut i32) -> i32 {
    if animation.is_null() {
        return KB_INVALID_ARGUMENT;
    }
    unsafe { with_id(id, |s, id| write_out(animation, s.current_animation(id).map(i32::from))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string; `faction_id` must be null or
/// valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_get_faction(id: *const c_char, faction_id: *mut i32) -> i32 {
    if faction_id.is_null() {
        return KB_INVALID_ARGUMENT;
    }
    unsafe { with_id(id, |s, id| write_out(faction_id, s.get_faction(id))) }
}

/// # Safety
/// `id` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_set_faction(id: *const c_char, faction_id: i32) -> i32 {
    unsafe { with_id(id, |s, id| status(s.set_faction(id, faction_id))) }
}

/// # Safety
/// `value` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_get_faction_relation(from: i32, to: i32, value: *mut i32) -> i32 {
    if value.is_null() {
        return KB_INVALID_ARGUMENT;
    }
    with_surface(|s| unsafe { write_out(value, s.get_faction_relation(from, to)) })
}

/// Relation of `from` towards `to`; the reverse relation is left alone
#[unsafe(no_mangle)]
pub extern "C" fn kb_set_faction_relation(from: i32, to: i32, value: i32) -> i32 {
    with_surface(|s| status(s.set_faction_relation(from, to, value)))
}

/// Queue a peer command (JSON, tagged by `type`) for the next sync tick
///
/// # Safety
/// `json` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_push_command(json: *const c_char) -> i32 {
    let Some(json) = (unsafe { text(json) }) else {
        return KB_INVALID_ARGUMENT;
    };
    let command: InboundCommand = match serde_json::from_str(json) {
        Ok(command) => command,
        Err(e) => {
            warn!("Rejected peer command: {}", e);
            return KB_INVALID_ARGUMENT;
        }
    };
    match slot().as_ref() {
        Some(session) => {
            locked(&session.commands).push(command);
            KB_OK
        }
        None => KB_NOT_INITIALIZED,
    }
}

/// Hand the latest roster snapshot (a JSON array) to `callback`; returns its
/// sync tick, 0 before the first tick, or a negative status
#[unsafe(no_mangle)]
pub extern "C" fn kb_latest_snapshot(callback: Option<KbSnapshotCallback>) -> i64 {
    let Some(callback) = callback else {
        return KB_INVALID_ARGUMENT.into();
    };
    let snapshots = match slot().as_ref() {
        Some(session) => Arc::clone(&session.snapshots),
        None => return KB_NOT_INITIALIZED.into(),
    };
    let (tick, json) = {
        let latest = locked(&snapshots);
        (latest.tick, c_string(&latest.json))
    };
    if tick > 0 {
        callback(tick, json.as_ptr());
    }
    i64::try_from(tick).unwrap_or(i64::MAX)
}

/// # Safety
/// `text` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_broadcast(text: *const c_char) -> i32 {
    unsafe {
        with_id(text, |s, text| {
            s.broadcast(text);
            KB_OK
        })
    }
}

/// # Safety
/// `player` and `text` must be null or NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_send_to(player: *const c_char, text: *const c_char) -> i32 {
    let Some(text) = (unsafe { self::text(text) }) else {
        return KB_INVALID_ARGUMENT;
    };
    unsafe { with_id(player, |s, player| status(s.send_to(player, text))) }
}

/// Hand every queued message to `callback`, oldest first; returns the count
/// or a negative status
#[unsafe(no_mangle)]
pub extern "C" fn kb_drain_outbox(callback: Option<KbMessageCallback>) -> i32 {
    let Some(surface) = surface() else {
        return KB_NOT_INITIALIZED;
    };
    let Some(callback) = callback else {
        return KB_INVALID_ARGUMENT;
    };
    let messages = surface.drain_outbox();
    for message in &messages {
        let recipient = message.recipient.as_deref().map(c_string);
        let text = c_string(&message.text);
        callback(
            recipient.as_ref().map_or(std::ptr::null(), |r| r.as_ptr()),
            text.as_ptr(),
        );
    }
    i32::try_from(messages.len()).unwrap_or(i32::MAX)
}

/// # Safety
/// `player` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_player_joined(player: *const c_char) -> i32 {
    unsafe {
        with_id(player, |s, player| {
            s.player_joined(player);
            KB_OK
        })
    }
}

/// # Safety
/// `player` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_player_left(player: *const c_char) -> i32 {
    unsafe {
        with_id(player, |s, player| {
            s.player_left(player);
            KB_OK
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn kb_connected_player_count() -> i32 {
    surface().map_or(KB_NOT_INITIALIZED, |s| {
        i32::try_from(s.connected_player_count()).unwrap_or(i32::MAX)
    })
}

/// # Safety
/// `player` and `data` must be null or NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_report_action(player: *const c_char, action: i32, data: *const c_char) -> i32 {
    let data = unsafe { text(data) }.unwrap_or_default().to_string();
    unsafe {
        with_id(player, |s, player| {
            s.report_action(player, action, &data);
            KB_OK
        })
    }
}

/// # Safety
/// `attacker` and `target` must be null or NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_report_combat(
    attacker: *const c_char,
    target: *const c_char,
    damage_type: i32,
    damage: f32,
) -> i32 {
    let Some(target) = (unsafe { text(target) }) else {
        return KB_INVALID_ARGUMENT;
    };
    let damage_type = DamageType::from_raw(damage_type);
    unsafe {
        with_id(attacker, |s, attacker| {
            s.report_combat(attacker, target, damage_type, damage);
            KB_OK
        })
    }
}

/// # Safety
/// `player` and `text` must be null or NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kb_receive_chat(player: *const c_char, text: *const c_char) -> i32 {
    let Some(text) = (unsafe { self::text(text) }) else {
        return KB_INVALID_ARGUMENT;
    };
    unsafe {
        with_id(player, |s, player| {
            s.receive_chat(player, text);
            KB_OK
        })
    }
}

/// Advance interpolation; returns the number of host characters moved or a
/// negative status
#[unsafe(no_mangle)]
pub extern "C" fn kb_update(delta_seconds: f32) -> i32 {
    surface().map_or(KB_NOT_INITIALIZED, |s| {
        i32::try_from(s.update(delta_seconds)).unwrap_or(i32::MAX)
    })
}

/// Pass null to unregister
#[unsafe(no_mangle)]
pub extern "C" fn kb_on_player_join(callback: Option<KbPlayerCallback>) -> i32 {
    let Some(surface) = surface() else {
        return KB_NOT_INITIALIZED;
    };
    surface.set_on_join(callback.map(|cb| {
        Arc::new(move |player: &str| cb(c_string(player).as_ptr())) as kenshi_bridge::api::PlayerCallback
    }));
    KB_OK
}

#[unsafe(no_mangle)]
pub extern "C" fn kb_on_player_leave(callback: Option<KbPlayerCallback>) -> i32 {
    let Some(surface) = surface() else {
        return KB_NOT_INITIALIZED;
    };
    surface.set_on_leave(callback.map(|cb| {
        Arc::new(move |player: &str| cb(c_string(player).as_ptr())) as kenshi_bridge::api::PlayerCallback
    }));
    KB_OK
}

#[unsafe(no_mangle)]
pub extern "C" fn kb_on_action(callback: Option<KbActionCallback>) -> i32 {
    let Some(surface) = surface() else {
        return KB_NOT_INITIALIZED;
    };
    surface.set_on_action(callback.map(|cb| {
        Arc::new(move |player: &str, action: i32, data: &str| {
            cb(c_string(player).as_ptr(), action, c_string(data).as_ptr())
        }) as kenshi_bridge::api::ActionCallback
    }));
    KB_OK
}

#[unsafe(no_mangle)]
pub extern "C" fn kb_on_combat(callback: Option<KbCombatCallback>) -> i32 {
    let Some(surface) = surface() else {
        return KB_NOT_INITIALIZED;
    };
    surface.set_on_combat(callback.map(|cb| {
        Arc::new(move |attacker: &str, target: &str, damage_type: DamageType, damage: f32| {
            cb(
                c_string(attacker).as_ptr(),
                c_string(target).as_ptr(),
                damage_type.into(),
                damage,
            )
        }) as kenshi_bridge::api::PeerCombatCallback
    }));
    KB_OK
}

#[unsafe(no_mangle)]
pub extern "C" fn kb_on_chat(callback: Option<KbChatCallback>) -> i32 {
    let Some(surface) = surface() else {
        return KB_NOT_INITIALIZED;
    };
    surface.set_on_chat(callback.map(|cb| {
        Arc::new(move |player: &str, text: &str| {
            cb(c_string(player).as_ptr(), c_string(text).as_ptr())
        }) as kenshi_bridge::api::ChatCallback
    }));
    KB_OK
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    use kenshi_bridge::memory::Protection;
    use kenshi_bridge::{MemoryImage, OffsetResolver};

    use super::*;

    static CHATS: AtomicI32 = AtomicI32::new(0);
    static SNAPSHOTS: Mutex<Vec<(u64, String)>> = Mutex::new(Vec::new());
    static OUTBOX: Mutex<Vec<(Option<String>, String)>> = Mutex::new(Vec::new());

    extern "C" fn on_chat(player: *const c_char, text: *const c_char) {
        let player = unsafe { CStr::from_ptr(player) }.to_str().unwrap();
        let text = unsafe { CStr::from_ptr(text) }.to_str().unwrap();
        assert_eq!((player, text), ("alice", "hi"));
        CHATS.fetch_add(1, Ordering::SeqCst);
    }

    extern "C" fn on_message(recipient: *const c_char, text: *const c_char) {
        let recipient = (!recipient.is_null())
            .then(|| unsafe { CStr::from_ptr(recipient) }.to_str().unwrap().to_string());
        let text = unsafe { CStr::from_ptr(text) }.to_str().unwrap().to_string();
        OUTBOX.lock().unwrap().push((recipient, text));
    }

    extern "C" fn on_snapshot(tick: u64, json: *const c_char) {
        let json = unsafe { CStr::from_ptr(json) }.to_str().unwrap().to_string();
        SNAPSHOTS.lock().unwrap().push((tick, json));
    }

    fn queued_commands() -> usize {
        slot().as_ref().map_or(0, |session| locked(&session.commands).len())
    }

    fn offline_surface() -> ControlSurface {
        let image = Arc::new(MemoryImage::new().with_section(
            0x1_4000_0000,
            vec![0; 0x1000],
            Protection::ReadWrite,
        ));
        let config = BridgeConfig::builder()
            .prefer_remote(false)
            .allow_pattern_scan(false)
            .build();
        let resolver = OffsetResolver::new(config, image.host()).with_memory(image.clone());
        let bridge = StateBridge::new(image, Arc::new(resolver));
        ControlSurface::new(Arc::new(bridge), Duration::from_secs(1))
    }

    // One test drives the process-wide surface so tests cannot race on it
    #[test]
    fn test_exported_surface() {
        let peer = c"peer-1";
        assert_eq!(unsafe { kb_despawn_entity(peer.as_ptr()) }, KB_NOT_INITIALIZED);

        let surface = offline_surface();
        surface.initialize().unwrap();
        install(surface, Duration::from_millis(5));
        assert!(kb_is_initialized());
        assert_eq!(kb_initialize(), KB_OK);

        // The sync worker runs on its own
        while kb_latest_snapshot(Some(on_snapshot)) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        let (tick, json) = SNAPSHOTS.lock().unwrap()[0].clone();
        assert!(tick > 0);
        assert_eq!(json, "[]");
        assert_eq!(kb_latest_snapshot(None), i64::from(KB_INVALID_ARGUMENT));

        unsafe {
            let command = c"{\"type\": \"set_game_time\", \"hours\": 8.0}";
            assert_eq!(kb_push_command(command.as_ptr()), KB_OK);
            assert_eq!(kb_push_command(c"{\"type\": \"teleport\"}".as_ptr()), KB_INVALID_ARGUMENT);
            assert_eq!(kb_push_command(std::ptr::null()), KB_INVALID_ARGUMENT);
        }
        while queued_commands() > 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        unsafe {
            assert_eq!(kb_spawn_entity(peer.as_ptr(), c"Ruka".as_ptr(), 0.0, 0.0, 0.0, 0), KB_OK);
            assert_eq!(kb_set_position(peer.as_ptr(), 10.0, 0.0, 0.0), KB_OK);
        }
        // No host character backs the entity
        assert_eq!(kb_update(0.5), 0);

        let (mut x, mut y, mut z) = (0.0f32, 0.0f32, 0.0f32);
        unsafe {
            assert_eq!(kb_get_position(peer.as_ptr(), &mut x, &mut y, &mut z), KB_OK);
            assert!((x - 5.0).abs() < 1e-4);
            assert_eq!(
                kb_get_position(peer.as_ptr(), std::ptr::null_mut(), &mut y, &mut z),
                KB_INVALID_ARGUMENT
            );

            assert_eq!(kb_set_health(peer.as_ptr(), 40.0), KB_OK);
            let mut health = 0.0f32;
            assert_eq!(kb_get_health(peer.as_ptr(), &mut health), KB_OK);
            assert_eq!(health, 40.0);

            assert_eq!(kb_play_animation(peer.as_ptr(), 2, true), KB_OK);
            let mut animation = 0;
            assert_eq!(kb_current_animation(peer.as_ptr(), &mut animation), KB_OK);
            assert_eq!(animation, 2);
            assert_eq!(kb_set_animation_speed(peer.as_ptr(), 1.5), KB_OK);

            assert_eq!(kb_set_combat_mode(peer.as_ptr(), true), KB_OK);
            let mut in_combat = false;
            assert_eq!(kb_is_in_combat(peer.as_ptr(), &mut in_combat), KB_OK);
            assert!(in_combat);

            assert_eq!(kb_set_character_state(peer.as_ptr(), AiState::Sleeping.into()), KB_OK);
            let mut state = 0;
            assert_eq!(kb_get_character_state(peer.as_ptr(), &mut state), KB_OK);
            assert_eq!(state, i32::from(AiState::Sleeping));
            assert_eq!(
                kb_get_character_state(peer.as_ptr(), std::ptr::null_mut()),
                KB_INVALID_ARGUMENT
            );

            assert_eq!(kb_set_faction(peer.as_ptr(), 12), KB_OK);
            let mut faction = 0;
            assert_eq!(kb_get_faction(peer.as_ptr(), &mut faction), KB_OK);
            assert_eq!(faction, 12);

            // No faction table in the offline image
            let mut relation = 0;
            assert_eq!(kb_get_faction_relation(1, 2, &mut relation), KB_NOT_FOUND);
            assert_eq!(kb_set_faction_relation(1, 2, 50), KB_NOT_FOUND);

            assert_eq!(kb_get_health(c"ghost".as_ptr(), &mut health), KB_NOT_FOUND);
            assert_eq!(kb_set_health(std::ptr::null(), 1.0), KB_INVALID_ARGUMENT);
        }

        assert_eq!(kb_on_chat(Some(on_chat)), KB_OK);
        unsafe {
            assert_eq!(kb_player_joined(c"alice".as_ptr()), KB_OK);
            assert_eq!(kb_receive_chat(c"alice".as_ptr(), c"hi".as_ptr()), KB_OK);
            assert_eq!(kb_broadcast(c"welcome".as_ptr()), KB_OK);
            assert_eq!(kb_send_to(c"alice".as_ptr(), c"psst".as_ptr()), KB_OK);
            assert_eq!(kb_send_to(c"bob".as_ptr(), c"?".as_ptr()), KB_NOT_FOUND);
        }
        assert_eq!(CHATS.load(Ordering::SeqCst), 1);
        assert_eq!(kb_connected_player_count(), 1);

        assert_eq!(kb_drain_outbox(Some(on_message)), 2);
        assert_eq!(
            *OUTBOX.lock().unwrap(),
            vec![
                (None, "welcome".to_string()),
                (Some("alice".to_string()), "psst".to_string())
            ]
        );

        unsafe {
            assert_eq!(kb_despawn_entity(peer.as_ptr()), KB_OK);
            assert_eq!(kb_despawn_entity(peer.as_ptr()), KB_NOT_FOUND);
        }
        kb_shutdown();
        assert!(!kb_is_initialized());
        assert_eq!(kb_update(0.1), KB_NOT_INITIALIZED);
        assert_eq!(kb_set_faction_relation(1, 2, 50), KB_NOT_INITIALIZED);
        assert_eq!(kb_latest_snapshot(Some(on_snapshot)), i64::from(KB_NOT_INITIALIZED));
    }
}
