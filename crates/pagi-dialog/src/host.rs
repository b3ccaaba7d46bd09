//! The dialog host: builds the shared registries and wires the core components.

use crate::asr::{AsrManager, EngineCatalog};
use crate::bus::MessageBus;
use crate::config::DialogConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::dialog_manager::DialogManager;
use crate::dispatcher::{DispatchReport, Dispatcher, HOST_NAME};
use crate::error::DialogResult;
use crate::event::{Broadcast, EventKind};
use crate::language::LanguageManager;
use crate::message::InboundMessage;
use crate::multi_intent::MultiIntentManager;
use crate::protected::ProtectedIntents;
use crate::registry::{Component, ComponentRegistry};
use crate::router::InboundRouter;
use crate::session::SessionStore;
use crate::skills::{SkillPlugin, SkillRegistry};
use std::sync::Arc;
use tracing::info;

/// Terminated session snapshots are kept this long for revival.
const TERMINATED_RETENTION_MINUTES: i64 = 10;

/// What one housekeeping pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Housekeeping {
    pub components: usize,
    pub sessions: usize,
}

pub struct DialogHost {
    config: Arc<DialogConfig>,
    store: Arc<SessionStore>,
    protected: Arc<ProtectedIntents>,
    dispatcher: Arc<Dispatcher>,
    dialog_manager: Arc<DialogManager>,
    multi_intent: Arc<MultiIntentManager>,
    asr: Arc<AsrManager>,
    connectivity: Arc<ConnectivityMonitor>,
    router: InboundRouter,
}

impl DialogHost {
    /// Build and register the core components. Nothing runs until [`DialogHost::start`].
    pub fn new(
        config: DialogConfig,
        catalog: EngineCatalog,
        bus: Arc<dyn MessageBus>,
        online: bool,
    ) -> DialogResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let online = online && !config.stay_completely_offline;

        let store = Arc::new(SessionStore::new());
        let protected = Arc::new(ProtectedIntents::new());
        let language = Arc::new(LanguageManager::from_config(&config));
        let registry = Arc::new(ComponentRegistry::new());
        let skills = Arc::new(SkillRegistry::new(Arc::clone(&protected)));
        let dispatcher = Arc::new(Dispatcher::new(registry, skills, Arc::clone(&bus)));

        let multi_intent = Arc::new(MultiIntentManager::new(
            Arc::clone(&store),
            bus,
            Arc::clone(&language),
            Arc::clone(&protected),
            config.default_intent_filter.clone(),
        ));
        let dialog_manager = DialogManager::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&multi_intent),
            Arc::clone(&language),
            Arc::clone(&protected),
            Arc::clone(&config),
        );
        let asr = AsrManager::new(
            catalog,
            &config,
            online,
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&language),
        );
        let connectivity = Arc::new(ConnectivityMonitor::new(Arc::clone(&dispatcher), online));

        let registry = dispatcher.registry();
        registry.register(dialog_manager.clone())?;
        registry.register(multi_intent.clone())?;
        registry.register(asr.clone())?;

        let router = InboundRouter::new(Arc::clone(&dispatcher), Arc::clone(&store));

        Ok(Self {
            config,
            store,
            protected,
            dispatcher,
            dialog_manager,
            multi_intent,
            asr,
            connectivity,
            router,
        })
    }

    /// Add a component before `start`.
    pub fn register_component(&self, component: Arc<dyn Component>) -> DialogResult<()> {
        self.dispatcher.registry().register(component)
    }

    /// Load a skill and announce it.
    pub fn load_skill(&self, skill: Arc<dyn SkillPlugin>) -> DialogResult<DispatchReport> {
        let name = skill.skill_name().to_string();
        self.dispatcher.skills().register(skill);
        self.dispatcher.broadcast(
            Broadcast::new(EventKind::SkillInstalled)
                .excluding(HOST_NAME)
                .propagate_to_skills()
                .arg("skill", name),
        )
    }

    /// Start every component, then announce boot.
    pub fn start(&self) -> DialogResult<()> {
        self.dispatcher.registry().start_all()?;
        self.dispatcher.broadcast(
            Broadcast::new(EventKind::Booted)
                .excluding(HOST_NAME)
                .propagate_to_skills(),
        )?;
        info!(
            components = ?self.dispatcher.registry().names(),
            asr = ?self.asr.active_engine(),
            "🚀 Dialog host started"
        );
        Ok(())
    }

    pub fn route(&self, message: InboundMessage) -> DialogResult<Option<DispatchReport>> {
        self.router.route(message)
    }

    /// Periodic cleanup of dead components and old terminated sessions.
    pub fn housekeeping(&self) -> Housekeeping {
        Housekeeping {
            components: self.dispatcher.registry().purge_dead(),
            sessions: self
                .store
                .purge_terminated(chrono::Duration::minutes(TERMINATED_RETENTION_MINUTES)),
        }
    }

    pub fn shutdown(&self) {
        info!("Dialog host shutting down");
        self.dispatcher.shutdown();
    }

    pub fn config(&self) -> &Arc<DialogConfig> {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn protected(&self) -> &Arc<ProtectedIntents> {
        &self.protected
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn dialog_manager(&self) -> &Arc<DialogManager> {
        &self.dialog_manager
    }

    pub fn multi_intent(&self) -> &Arc<MultiIntentManager> {
        &self.multi_intent
    }

    pub fn asr(&self) -> &Arc<AsrManager> {
        &self.asr
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }
}
