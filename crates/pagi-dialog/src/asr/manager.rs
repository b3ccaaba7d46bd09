use super::{AsrEngine, AsrResult, AudioFrame, DecodeCycle, EngineCatalog};
use crate::config::DialogConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{DialogError, DialogResult, HandlerError, HandlerResult};
use crate::event::{Broadcast, Event, EventKind};
use crate::language::LanguageManager;
use crate::registry::Component;
use crate::session::{DialogSession, SessionStore};
use crate::topics;
use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Operator settings that drive engine selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub configured: String,
    pub fallback: String,
    /// `keep_asr_offline` or `stay_completely_offline`.
    pub offline_only: bool,
}

impl From<&DialogConfig> for SelectionPolicy {
    fn from(config: &DialogConfig) -> Self {
        Self {
            configured: config.asr.clone(),
            fallback: config.asr_fallback.clone(),
            offline_only: config.offline_pinned(),
        }
    }
}

/// Pick the engine that should be active. The flag is true for the fallback.
///
/// An online engine is eligible only while connected and not pinned offline.
pub fn select_engine(
    policy: &SelectionPolicy,
    catalog: &EngineCatalog,
    online: bool,
) -> DialogResult<(Arc<dyn AsrEngine>, bool)> {
    let eligible = |engine: &Arc<dyn AsrEngine>| !engine.is_online() || (online && !policy.offline_only);

    match catalog.get(&policy.configured) {
        Some(engine) if eligible(&engine) => return Ok((engine, false)),
        Some(_) => {
            warn!(
                asr = %policy.configured,
                fallback = %policy.fallback,
                "ASR did not satisfy the user settings, falling back"
            );
        }
        None => warn!(asr = %policy.configured, "Unknown ASR engine, falling back"),
    }

    let fallback = catalog
        .get(&policy.fallback)
        .ok_or_else(|| DialogError::UnknownEngine(policy.fallback.clone()))?;
    if !eligible(&fallback) {
        return Err(DialogError::NoEligibleEngine(format!(
            "fallback {} needs network access",
            policy.fallback
        )));
    }
    Ok((fallback, true))
}

#[derive(Clone)]
struct ActiveEngine {
    engine: Arc<dyn AsrEngine>,
    using_fallback: bool,
}

/// Decode in progress on one device.
struct Stream {
    cycle: Arc<DecodeCycle>,
    engine: Arc<dyn AsrEngine>,
}

/// Owns the active recognition engine and runs one decode thread per listening device.
pub struct AsrManager {
    catalog: EngineCatalog,
    policy: SelectionPolicy,
    asr_timeout: Duration,
    active: RwLock<Option<ActiveEngine>>,
    online: AtomicBool,
    streams: DashMap<String, Stream>,
    /// Decodes in flight per engine name.
    in_flight: DashMap<String, usize>,
    /// Replaced engines waiting for their last decode before `on_stop`.
    retiring: Mutex<Vec<Arc<dyn AsrEngine>>>,
    store: Arc<SessionStore>,
    dispatcher: Arc<Dispatcher>,
    language: Arc<LanguageManager>,
    me: Weak<AsrManager>,
}

impl AsrManager {
    pub const NAME: &'static str = "AsrManager";

    pub fn new(
        catalog: EngineCatalog,
        config: &DialogConfig,
        online: bool,
        store: Arc<SessionStore>,
        dispatcher: Arc<Dispatcher>,
        language: Arc<LanguageManager>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            catalog,
            policy: SelectionPolicy::from(config),
            asr_timeout: config.asr_timeout(),
            active: RwLock::new(None),
            online: AtomicBool::new(online),
            streams: DashMap::new(),
            in_flight: DashMap::new(),
            retiring: Mutex::new(Vec::new()),
            store,
            dispatcher,
            language,
            me: me.clone(),
        })
    }

    fn current(&self) -> Option<ActiveEngine> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Identifier of the active engine.
    pub fn active_engine(&self) -> Option<String> {
        self.current().map(|a| a.engine.name().to_string())
    }

    pub fn using_fallback(&self) -> bool {
        self.current().is_some_and(|a| a.using_fallback)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self, site_id: &str) -> bool {
        self.streams.contains_key(site_id)
    }

    /// Start `engine`, or the fallback when it refuses to start.
    fn start_engine(&self, engine: Arc<dyn AsrEngine>, using_fallback: bool) -> DialogResult<ActiveEngine> {
        if self.take_retiring(engine.name()) {
            return Ok(ActiveEngine { engine, using_fallback });
        }
        match engine.on_start() {
            Ok(()) => Ok(ActiveEngine { engine, using_fallback }),
            Err(e) if !using_fallback => {
                warn!(asr = engine.name(), error = %e, fallback = %self.policy.fallback, "ASR failed to start, falling back");
                let fallback = self
                    .catalog
                    .get(&self.policy.fallback)
                    .ok_or_else(|| DialogError::UnknownEngine(self.policy.fallback.clone()))?;
                if fallback.name() == engine.name() {
                    return Err(e);
                }
                self.start_engine(fallback, true)
            }
            Err(e) => Err(e),
        }
    }

    /// Re-evaluate the selection policy and swap engines if needed. Decodes
    /// already running finish on the engine they started with.
    pub fn restart_engine(&self) -> DialogResult<()> {
        let (engine, using_fallback) = select_engine(&self.policy, &self.catalog, self.is_online())?;

        if self.current().is_some_and(|a| a.engine.name() == engine.name()) {
            self.set_fallback_flag(engine.name(), using_fallback);
            return Ok(());
        }

        // Starting may load a model or reach the network; readers keep the old engine meanwhile.
        let started = self.start_engine(engine, using_fallback)?;
        let previous = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            let name = started.engine.name().to_string();
            if let Some(current) = active.as_mut().filter(|a| a.engine.name() == name) {
                current.using_fallback = started.using_fallback;
                return Ok(());
            }
            info!(asr = %name, fallback = started.using_fallback, "🎙️ ASR engine active");
            active.replace(started)
        };

        if let Some(previous) = previous {
            self.retire(previous.engine);
        }
        Ok(())
    }

    fn set_fallback_flag(&self, name: &str, using_fallback: bool) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_mut().filter(|a| a.engine.name() == name) {
            current.using_fallback = using_fallback;
        }
    }

    /// Active engine with one decode already counted against it, so a
    /// concurrent swap defers its `on_stop`.
    fn acquire_active(&self) -> Option<Arc<dyn AsrEngine>> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        let engine = active.as_ref().map(|a| Arc::clone(&a.engine))?;
        self.acquire(&engine);
        Some(engine)
    }

    fn take_retiring(&self, name: &str) -> bool {
        let mut retiring = self.retiring.lock().unwrap_or_else(PoisonError::into_inner);
        let before = retiring.len();
        retiring.retain(|e| e.name() != name);
        before != retiring.len()
    }

    /// Stop a replaced engine now, or once its last decode releases it.
    fn retire(&self, engine: Arc<dyn AsrEngine>) {
        let name = engine.name().to_string();
        self.retiring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&engine));
        let busy = self.in_flight.get(&name).is_some_and(|n| *n > 0);
        if busy {
            debug!(asr = %name, "Engine busy, stop deferred");
        } else if self.take_retiring(&name) {
            engine.on_stop();
        }
    }

    fn acquire(&self, engine: &Arc<dyn AsrEngine>) {
        *self.in_flight.entry(engine.name().to_string()).or_insert(0) += 1;
    }

    fn release(&self, engine: &Arc<dyn AsrEngine>) {
        let idle = match self.in_flight.get_mut(engine.name()) {
            Some(mut n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => true,
        };
        if idle && self.take_retiring(engine.name()) {
            debug!(asr = engine.name(), "Deferred engine stop");
            engine.on_stop();
        }
    }

    pub fn on_internet_lost(&self) -> DialogResult<()> {
        self.online.store(false, Ordering::SeqCst);
        match self.current() {
            Some(active) if active.engine.is_online() => {
                info!("Internet lost, switching to offline ASR");
                self.restart_engine()
            }
            _ => Ok(()),
        }
    }

    pub fn on_internet_connected(&self) -> DialogResult<()> {
        self.online.store(true, Ordering::SeqCst);
        let Some(active) = self.current() else {
            return self.restart_engine();
        };
        if !active.using_fallback
            || self.policy.offline_only
            || self.policy.fallback.eq_ignore_ascii_case(&self.policy.configured)
        {
            return Ok(());
        }
        if !active.engine.is_online() {
            info!("Connected to internet, switching ASR");
            return self.restart_engine();
        }
        Ok(())
    }

    /// Begin a decode cycle for the session on its own thread.
    pub fn start_listening(&self, session: &DialogSession) -> DialogResult<()> {
        let site_id = session.site_id().to_string();
        if self.streams.get(&site_id).is_some_and(|s| !s.cycle.is_ended()) {
            debug!(site_id = %site_id, "Already listening");
            return Ok(());
        }
        let engine = self
            .acquire_active()
            .ok_or_else(|| DialogError::Engine("no active ASR engine".to_string()))?;

        let cycle = match DecodeCycle::begin(session, self.asr_timeout, Arc::clone(self.dispatcher.bus())) {
            Ok(cycle) => cycle,
            Err(e) => {
                self.release(&engine);
                return Err(e);
            }
        };
        self.streams.insert(
            site_id.clone(),
            Stream {
                cycle: Arc::clone(&cycle),
                engine: Arc::clone(&engine),
            },
        );

        let me = self.me.clone();
        let session = session.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("streamdecode_{site_id}"))
            .spawn(move || {
                let result = engine.decode_stream(&session, &cycle);
                cycle.end();
                if let Some(manager) = me.upgrade() {
                    manager.finish_decode(&engine, &session, &cycle, result);
                }
            });
        if let Err(e) = spawned {
            if let Some((_, stream)) = self.streams.remove(&site_id) {
                stream.cycle.end();
                self.release(&stream.engine);
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn finish_decode(
        &self,
        engine: &Arc<dyn AsrEngine>,
        session: &DialogSession,
        cycle: &Arc<DecodeCycle>,
        result: Option<AsrResult>,
    ) {
        self.streams
            .remove_if(session.site_id(), |_, s| Arc::ptr_eq(&s.cycle, cycle));
        self.release(engine);

        // A timed out cycle never yields a result.
        let result = if cycle.timed_out() { None } else { result };

        let Some(current) = self.store.get(session.session_id()) else {
            debug!(session_id = session.session_id(), "Session closed during decode, result dropped");
            return;
        };
        let session_id = current.session_id();
        let site_id = current.site_id();

        let outcome = match result.filter(|r| !r.text.trim().is_empty()) {
            Some(result) => {
                let text = self.language.sanitize_nlu_query(&result.text);
                let seconds = result.processing_time.as_secs_f64();
                info!(session_id, asr = engine.name(), text = %text, "🗣️ ASR captured");
                self.dispatcher.publish(
                    topics::STOP_LISTENING,
                    json!({"siteId": site_id, "sessionId": session_id}),
                );
                self.dispatcher.publish(
                    topics::TEXT_CAPTURED,
                    json!({
                        "sessionId": session_id,
                        "siteId": site_id,
                        "text": text,
                        "likelihood": result.likelihood,
                        "seconds": seconds,
                    }),
                );
                self.dispatcher.broadcast(
                    Broadcast::new(EventKind::Captured)
                        .excluding(Self::NAME)
                        .arg("sessionId", session_id)
                        .arg("siteId", site_id)
                        .arg("text", text)
                        .arg("likelihood", result.likelihood)
                        .arg("seconds", seconds)
                        .arg("session", current.clone()),
                )
            }
            None => {
                debug!(session_id, timed_out = cycle.timed_out(), "Nothing recognized");
                self.dispatcher.publish(
                    topics::PLAY_SOUND,
                    json!({"siteId": site_id, "sessionId": session_id, "sound": "error"}),
                );
                self.dispatcher.publish(
                    topics::INTENT_NOT_RECOGNIZED,
                    json!({"sessionId": session_id, "siteId": site_id}),
                );
                self.dispatcher.broadcast(
                    Broadcast::new(EventKind::IntentNotRecognized)
                        .excluding(Self::NAME)
                        .arg("sessionId", session_id)
                        .arg("siteId", site_id)
                        .arg("session", current.clone()),
                )
            }
        };
        if let Err(e) = outcome {
            warn!(session_id, error = %e, "Publishing decode outcome failed");
        }
    }

    fn stream_for(&self, event: &Event) -> Option<(Arc<DecodeCycle>, Arc<dyn AsrEngine>)> {
        let site_id = event.site_id()?;
        self.streams
            .get(&site_id)
            .filter(|s| s.cycle.is_capturing())
            .map(|s| (Arc::clone(&s.cycle), Arc::clone(&s.engine)))
    }

    fn end_stream(&self, event: &Event) {
        let Some(site_id) = event.site_id() else {
            return;
        };
        if let Some((_, stream)) = self.streams.remove(&site_id) {
            stream.cycle.end();
        }
    }
}

impl Component for AsrManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![
            EventKind::InternetConnected,
            EventKind::InternetLost,
            EventKind::StartListening,
            EventKind::StopListening,
            EventKind::VadUp,
            EventKind::VadDown,
            EventKind::AudioFrame,
            EventKind::SessionEnded,
            EventKind::SessionError,
        ]
    }

    fn handle(&self, event: &Event) -> HandlerResult {
        match event.kind {
            EventKind::InternetConnected => self.on_internet_connected()?,
            EventKind::InternetLost => self.on_internet_lost()?,
            EventKind::StartListening => {
                let session_id = event
                    .session_id()
                    .ok_or_else(|| HandlerError::MissingArgument("sessionId".to_string()))?;
                // The live session, not the snapshot the event carries.
                if let Some(session) = self.store.get(&session_id) {
                    self.start_listening(&session)?;
                }
            }
            EventKind::StopListening => {
                if let Some((cycle, _)) = self.stream_for(event) {
                    cycle.stop_recording();
                }
            }
            EventKind::VadUp => {
                if let Some((cycle, engine)) = self.stream_for(event) {
                    engine.on_vad_up(&cycle);
                }
            }
            EventKind::VadDown => {
                if let Some((cycle, engine)) = self.stream_for(event) {
                    engine.on_vad_down(&cycle);
                }
            }
            EventKind::AudioFrame => {
                if let Some((cycle, _)) = self.stream_for(event) {
                    let frame = event.opaque::<AudioFrame>("frame")?;
                    cycle.push_frame(frame.as_ref().clone());
                }
            }
            EventKind::SessionEnded | EventKind::SessionError => self.end_stream(event),
            _ => {}
        }
        Ok(())
    }

    fn on_start(&self) -> DialogResult<()> {
        self.restart_engine()
    }

    fn on_stop(&self) {
        for entry in self.streams.iter() {
            entry.cycle.end();
        }
        self.streams.clear();
        if let Some(active) = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            active.engine.on_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::protected::ProtectedIntents;
    use crate::registry::ComponentRegistry;
    use crate::skills::SkillRegistry;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    struct Fake {
        name: &'static str,
        online: bool,
    }

    impl AsrEngine for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn capable_of_arbitrary_capture(&self) -> bool {
            true
        }

        fn is_online(&self) -> bool {
            self.online
        }

        fn decode_stream(&self, _session: &DialogSession, _cycle: &DecodeCycle) -> Option<AsrResult> {
            None
        }
    }

    fn catalog() -> EngineCatalog {
        EngineCatalog::new()
            .with(Arc::new(Fake { name: "google", online: true }))
            .with(Arc::new(Fake { name: "vosk", online: false }))
    }

    fn policy(offline_only: bool) -> SelectionPolicy {
        SelectionPolicy {
            configured: "google".to_string(),
            fallback: "vosk".to_string(),
            offline_only,
        }
    }

    #[test]
    fn online_engine_used_when_connected() {
        let (engine, fallback) = select_engine(&policy(false), &catalog(), true).unwrap();
        assert_eq!(engine.name(), "google");
        assert!(!fallback);
    }

    #[test]
    fn offline_or_pinned_uses_fallback() {
        let (engine, fallback) = select_engine(&policy(false), &catalog(), false).unwrap();
        assert_eq!(engine.name(), "vosk");
        assert!(fallback);

        let (engine, _) = select_engine(&policy(true), &catalog(), true).unwrap();
        assert_eq!(engine.name(), "vosk");
    }

    #[test]
    fn online_fallback_is_not_eligible_offline() {
        let policy = SelectionPolicy {
            configured: "vosk-missing".to_string(),
            fallback: "google".to_string(),
            offline_only: false,
        };
        assert!(matches!(
            select_engine(&policy, &catalog(), false),
            Err(DialogError::NoEligibleEngine(_))
        ));
        let unknown = SelectionPolicy {
            configured: "x".to_string(),
            fallback: "y".to_string(),
            offline_only: false,
        };
        assert!(matches!(
            select_engine(&unknown, &catalog(), true),
            Err(DialogError::UnknownEngine(_))
        ));
    }

    /// Online engine that counts stops and can hold `on_start` until released.
    struct Counting {
        name: &'static str,
        stops: AtomicUsize,
        gate: Option<(Mutex<mpsc::Sender<()>>, Mutex<mpsc::Receiver<()>>)>,
    }

    impl Counting {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                stops: AtomicUsize::new(0),
                gate: None,
            })
        }

        /// Returns the engine, a receiver fired when `on_start` begins and a sender that lets it finish.
        fn gated(name: &'static str) -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (open_tx, open_rx) = mpsc::channel();
            let engine = Arc::new(Self {
                name,
                stops: AtomicUsize::new(0),
                gate: Some((Mutex::new(entered_tx), Mutex::new(open_rx))),
            });
            (engine, entered_rx, open_tx)
        }
    }

    impl AsrEngine for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn capable_of_arbitrary_capture(&self) -> bool {
            true
        }

        fn is_online(&self) -> bool {
            true
        }

        fn on_start(&self) -> DialogResult<()> {
            if let Some((entered, open)) = &self.gate {
                entered.lock().unwrap().send(()).unwrap();
                open.lock().unwrap().recv().unwrap();
            }
            Ok(())
        }

        fn on_stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn decode_stream(&self, _session: &DialogSession, _cycle: &DecodeCycle) -> Option<AsrResult> {
            None
        }
    }

    fn manager(catalog: EngineCatalog, online: bool) -> Arc<AsrManager> {
        let config = DialogConfig {
            asr: "google".to_string(),
            asr_fallback: "vosk".to_string(),
            ..DialogConfig::default()
        };
        let skills = Arc::new(SkillRegistry::new(Arc::new(ProtectedIntents::new())));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ComponentRegistry::new()),
            skills,
            Arc::new(MemoryBus::new()),
        ));
        AsrManager::new(
            catalog,
            &config,
            online,
            Arc::new(SessionStore::new()),
            dispatcher,
            Arc::new(LanguageManager::from_config(&config)),
        )
    }

    #[test]
    fn readers_see_old_engine_while_new_one_starts() {
        let (google, entered, open) = Counting::gated("google");
        let catalog = EngineCatalog::new()
            .with(google.clone())
            .with(Arc::new(Fake { name: "vosk", online: false }));
        let manager = manager(catalog, false);
        manager.restart_engine().unwrap();
        assert_eq!(manager.active_engine().as_deref(), Some("vosk"));

        let switching = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.on_internet_connected())
        };
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        // google is still inside on_start; the active engine stays readable.
        assert_eq!(manager.active_engine().as_deref(), Some("vosk"));
        assert!(manager.using_fallback());

        open.send(()).unwrap();
        switching.join().unwrap().unwrap();
        assert_eq!(manager.active_engine().as_deref(), Some("google"));
        assert!(!manager.using_fallback());
    }

    #[test]
    fn acquired_engine_is_stopped_only_after_release() {
        let google = Counting::new("google");
        let catalog = EngineCatalog::new()
            .with(google.clone())
            .with(Arc::new(Fake { name: "vosk", online: false }));
        let manager = manager(catalog, true);
        manager.restart_engine().unwrap();

        let engine = manager.acquire_active().unwrap();
        assert_eq!(engine.name(), "google");

        manager.on_internet_lost().unwrap();
        assert_eq!(manager.active_engine().as_deref(), Some("vosk"));
        assert_eq!(google.stops.load(Ordering::SeqCst), 0);

        manager.release(&engine);
        assert_eq!(google.stops.load(Ordering::SeqCst), 1);

        // Retiring an idle engine stops it at once.
        manager.on_internet_connected().unwrap();
        assert_eq!(manager.active_engine().as_deref(), Some("google"));
        assert_eq!(google.stops.load(Ordering::SeqCst), 1);
    }
}
