//! Bridge facade
//!
//! Wires the pieces into the surface a game script drives: load the SDK,
//! pass the restart-environment check, stand up the event plumbing
//! (table, generated callback, registrations), open the achievement
//! session, and expose one [`update`](RailBridge::update) hook the host
//! must call once per rendered frame.
//!
//! Frame ordering matters: `update` first asks the SDK to drain its
//! internal event queue (which invokes the registered callback and fills
//! the event table), then pumps the table to handlers, then replays any
//! operations that were waiting for readiness. Delivery happens before
//! consumption within the same frame.

use crate::achievements::{AchievementSession, Phase, SessionError};
use crate::addresses::AddressTable;
use crate::dispatch::{CallDispatcher, DispatchError, NativeLibrary, SymbolResolver};
use crate::events::{
    EventError, EventPump, EventTable, EVENT_ACHIEVEMENT_RECEIVED, EVENT_ACHIEVEMENT_STORED,
    EVENT_SYSTEM_STATE_CHANGED, SUBSCRIBED_EVENTS,
};
use crate::trampoline::{Trampoline, TrampolineError};
use crate::value::Value;
use railbridge_config::BridgeConfig;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use thiserror::Error;

/// Bridge errors
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("the platform requires a restart through its client before the game can run")]
    RestartRequired,

    #[error("SDK initialization failed")]
    InitializeFailed,

    #[error("failed to register event {0} with the SDK")]
    EventRegistrationFailed(u32),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Trampoline(#[from] TrampolineError),

    #[error(transparent)]
    Events(#[from] EventError),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Where bridge milestone messages go; the host decides the sink
pub type DiagnosticSink = Box<dyn FnMut(&str)>;

/// The assembled bridge: dispatcher, emulated addresses, event plumbing
/// and achievement session behind one per-frame surface.
pub struct RailBridge<R: SymbolResolver = NativeLibrary> {
    dispatcher: CallDispatcher<R>,
    addresses: AddressTable,
    pump: EventPump,
    session: Rc<RefCell<AchievementSession>>,
    last_system_state: Rc<Cell<Option<u32>>>,
    diagnostics: Option<DiagnosticSink>,
    finalized: bool,
    // The registered callback body; dropping it would leave the SDK
    // holding a pointer into a reclaimed page
    _trampoline: Trampoline,
}

impl RailBridge<NativeLibrary> {
    /// Load the configured SDK library and bring the bridge up
    pub fn init(config: &BridgeConfig) -> BridgeResult<Self> {
        Self::init_with(config, None)
    }

    /// Like [`init`](RailBridge::init), with a diagnostic sink for
    /// milestone messages
    pub fn init_with(
        config: &BridgeConfig,
        diagnostics: Option<DiagnosticSink>,
    ) -> BridgeResult<Self> {
        let library = NativeLibrary::open(&config.sdk.library)?;
        Self::with_resolver(
            library,
            config.symbol_prefix(),
            config.game.id,
            config.sdk.debug,
            diagnostics,
        )
    }
}

impl<R: SymbolResolver> RailBridge<R> {
    /// Bring the bridge up over an explicit resolver.
    ///
    /// The production path goes through [`RailBridge::init`]; this seam
    /// exists so the full startup sequence can run against a test double.
    pub fn with_resolver(
        resolver: R,
        prefix: &str,
        game_id: u32,
        debug: bool,
        mut diagnostics: Option<DiagnosticSink>,
    ) -> BridgeResult<Self> {
        let mut dispatcher = CallDispatcher::new(resolver, prefix);

        let launch_args = if debug { "--rail_debug_mode" } else { "" };
        let restart = dispatcher.invoke(
            "NeedRestartAppForCheckingEnvironment",
            &[Value::Word(game_id), Value::text(launch_args)],
        )?;
        if restart.as_bool() {
            emit(&mut diagnostics, "[railbridge] platform requested a restart");
            return Err(BridgeError::RestartRequired);
        }

        let initialized = dispatcher.invoke("Initialize", &[])?;
        if !initialized.as_bool() {
            emit(&mut diagnostics, "[railbridge] SDK initialization failed");
            return Err(BridgeError::InitializeFailed);
        }

        let table = EventTable::new(&SUBSCRIBED_EVENTS)?;
        let trampoline = Trampoline::build(&table)?;
        for id in SUBSCRIBED_EVENTS {
            let registered = dispatcher.invoke(
                "RegisterEvent",
                &[Value::Word(id), Value::Word(trampoline.entry_word())],
            )?;
            if !registered.ok() {
                return Err(BridgeError::EventRegistrationFailed(id));
            }
        }
        let mut pump = EventPump::new(table);

        let session = Rc::new(RefCell::new(AchievementSession::open(&mut dispatcher)?));
        let last_system_state = Rc::new(Cell::new(None));

        {
            let session = session.clone();
            pump.register_handler(EVENT_ACHIEVEMENT_RECEIVED, move |_| {
                session.borrow_mut().on_achievement_received();
            });
        }
        {
            let session = session.clone();
            pump.register_handler(EVENT_ACHIEVEMENT_STORED, move |_| {
                session.borrow_mut().on_achievement_stored();
            });
        }
        {
            let state = last_system_state.clone();
            pump.register_handler(EVENT_SYSTEM_STATE_CHANGED, move |value| {
                state.set(Some(value));
            });
        }

        if session.borrow().phase() == Phase::Failed {
            emit(
                &mut diagnostics,
                "[railbridge] achievement session failed to start",
            );
        } else {
            emit(&mut diagnostics, "[railbridge] initialized");
        }

        Ok(RailBridge {
            dispatcher,
            addresses: AddressTable::new(),
            pump,
            session,
            last_system_state,
            diagnostics,
            finalized: false,
            _trampoline: trampoline,
        })
    }

    /// Per-frame hook. Drains the SDK's internal event queue into the
    /// registered callback, pumps the event table to handlers, then
    /// replays operations that were waiting for readiness.
    pub fn update(&mut self) -> BridgeResult<()> {
        self.dispatcher.invoke("FireEvents", &[])?;
        self.pump.tick();
        self.session
            .borrow_mut()
            .replay_pending(&mut self.dispatcher)?;
        Ok(())
    }

    /// Whether the achievement session is ready for direct mutating calls
    pub fn loaded(&self) -> bool {
        self.session.borrow().loaded()
    }

    /// Current session phase
    pub fn session_phase(&self) -> Phase {
        self.session.borrow().phase()
    }

    /// Trigger an achievement, or report progress when `progress` is given
    pub fn make(&mut self, name: &str, progress: Option<(u32, u32)>) -> BridgeResult<bool> {
        Ok(self
            .session
            .borrow_mut()
            .make(&mut self.dispatcher, name, progress)?)
    }

    /// Clear an achievement
    pub fn cancel(&mut self, name: &str) -> BridgeResult<bool> {
        Ok(self
            .session
            .borrow_mut()
            .cancel(&mut self.dispatcher, name)?)
    }

    /// Persist all achievement state
    pub fn save(&mut self) -> BridgeResult<bool> {
        Ok(self.session.borrow_mut().save(&mut self.dispatcher)?)
    }

    /// Whether the named achievement is already achieved
    pub fn has(&mut self, name: &str) -> BridgeResult<bool> {
        Ok(self
            .session
            .borrow()
            .has(&mut self.dispatcher, &mut self.addresses, name)?)
    }

    /// The most recent platform state word, if any was reported
    pub fn last_system_state(&self) -> Option<u32> {
        self.last_system_state.get()
    }

    /// The event pump (native code holds its table addresses)
    pub fn events(&self) -> &EventPump {
        &self.pump
    }

    /// Release SDK handles and finalize. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) -> BridgeResult<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let closed = self.session.borrow_mut().close(&mut self.dispatcher);
        let finalize = self.dispatcher.invoke("Finalize", &[]);
        emit(&mut self.diagnostics, "[railbridge] finalized");

        closed?;
        finalize?;
        Ok(())
    }
}

impl<R: SymbolResolver> Drop for RailBridge<R> {
    fn drop(&mut self) {
        if !self.finalized {
            // best effort; the process is going away with or without us
            let _ = self.shutdown();
        }
    }
}

fn emit(diagnostics: &mut Option<DiagnosticSink>, message: &str) {
    if let Some(sink) = diagnostics {
        sink(message);
    }
}
