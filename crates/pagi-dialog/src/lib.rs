//! # PAGI Dialog - Dialog Orchestration Core
//!
//! Coordinates a voice assistant's conversational turns: sessions per device,
//! ordered event dispatch to components and skills, compound-utterance
//! splitting, and online/offline recognition engine selection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Dialog Host                            │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐      │
//! │  │ Inbound bus  │ → │   Router     │ → │  Dispatcher  │      │
//! │  │  messages    │   │ topic→event  │   │ owner first  │      │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘      │
//! │          ┌──────────────────┬─────────────────┼──────────┐   │
//! │          ↓                  ↓                 ↓          ↓   │
//! │  ┌──────────────┐   ┌──────────────┐  ┌────────────┐ ┌──────┐│
//! │  │DialogManager │   │ MultiIntent  │  │ AsrManager │ │Skills││
//! │  │  + sessions  │   │   Manager    │  │ + engines  │ │      ││
//! │  └──────────────┘   └──────────────┘  └────────────┘ └──────┘│
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod asr;
pub mod bus;
pub mod config;
pub mod connectivity;
pub mod dialog_manager;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod host;
pub mod language;
pub mod message;
pub mod multi_intent;
pub mod protected;
pub mod registry;
pub mod router;
pub mod session;
pub mod skills;
pub mod timer;
pub mod topics;

pub use asr::{
    select_engine, AsrEngine, AsrManager, AsrResult, AudioFrame, DecodeCycle, EngineCatalog,
    SelectionPolicy,
};
pub use bus::{BroadcastBus, BusMessage, MemoryBus, MessageBus};
pub use config::DialogConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, HttpProbe};
pub use dialog_manager::DialogManager;
pub use dispatcher::{DispatchReport, Dispatcher, HOST_NAME, SESSION_OWNER};
pub use error::{DialogError, DialogResult, HandlerError, HandlerResult};
pub use event::{Broadcast, Event, EventArg, EventKind};
pub use host::{DialogHost, Housekeeping};
pub use language::LanguageManager;
pub use message::{InboundMessage, Slot};
pub use multi_intent::{decompose, MultiIntent, MultiIntentManager, GLUE_SPLITTER};
pub use protected::ProtectedIntents;
pub use registry::{Component, ComponentRegistry};
pub use router::InboundRouter;
pub use session::{DialogSession, SessionState, SessionStore};
pub use skills::{SkillPlugin, SkillRegistry};
pub use timer::Timer;
