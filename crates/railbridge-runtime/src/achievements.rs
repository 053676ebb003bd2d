//! Achievement session state machine
//!
//! Wraps the dispatcher in the handle dance the SDK requires: factory →
//! achievement helper → player-achievement handle → async request for the
//! current achievement state. The request completes out-of-band — the
//! "received" event observed through the pump moves the session from
//! pending to idle — so mutating operations issued before readiness are
//! queued and replayed, in order, exactly once, on the first update after
//! the session becomes ready.
//!
//! Setup failure is data, not a control-flow disruption: a null handle or
//! a failed request freezes the session at `Failed`, it keeps answering
//! `loaded() == false`, and retrying means constructing a new session.
//! Only low-level dispatch faults (missing symbols, unclassifiable
//! arguments) surface as errors.

use crate::addresses::{AddressError, AddressTable};
use crate::dispatch::{CallDispatcher, DispatchError, SymbolResolver};
use crate::value::{NativeValue, Value};
use std::collections::VecDeque;
use thiserror::Error;

/// Session errors: low-level faults from the layers underneath
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Address(#[from] AddressError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Construction has not completed
    Uninitialized,
    /// The initial state request is in flight
    Pending,
    /// Achievement state arrived; mutating calls go out directly
    Idle,
    /// Setup failed; terminal for this session
    Failed,
}

/// A mutating call issued before readiness, kept for replay
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    Make {
        name: String,
        progress: Option<(u32, u32)>,
    },
    Cancel {
        name: String,
    },
}

/// Async achievement session over the platform SDK.
pub struct AchievementSession {
    phase: Phase,
    player: NativeValue,
    pending: VecDeque<PendingOp>,
}

impl AchievementSession {
    /// Acquire the SDK handles and issue the initial state request.
    ///
    /// Expected SDK failures (null handles, rejected request) come back
    /// as a session frozen at `Failed`; the factory handle is released on
    /// every path, including after a dispatch fault.
    pub fn open<R: SymbolResolver>(
        dispatcher: &mut CallDispatcher<R>,
    ) -> SessionResult<AchievementSession> {
        let mut session = AchievementSession {
            phase: Phase::Uninitialized,
            player: NativeValue::NULL,
            pending: VecDeque::new(),
        };

        let factory = dispatcher.invoke("Factory", &[])?;
        if factory.is_null() {
            session.phase = Phase::Failed;
            return Ok(session);
        }

        let outcome = session.acquire_player(dispatcher, factory);
        let released = dispatcher.invoke("Release", &[factory.into()]);
        outcome?;
        released?;
        Ok(session)
    }

    fn acquire_player<R: SymbolResolver>(
        &mut self,
        dispatcher: &mut CallDispatcher<R>,
        factory: NativeValue,
    ) -> SessionResult<()> {
        let helper = dispatcher.invoke("AchievementHelper", &[factory.into()])?;
        if helper.is_null() {
            self.phase = Phase::Failed;
            return Ok(());
        }

        // Player id zero selects the logged-in player
        let player =
            dispatcher.invoke("CreatePlayerAchievement", &[helper.into(), Value::Word(0)])?;
        if player.is_null() {
            self.phase = Phase::Failed;
            return Ok(());
        }
        self.player = player;

        // Empty name requests the full achievement state
        let request =
            dispatcher.invoke("AsyncRequestAchievement", &[player.into(), Value::text("")])?;
        self.phase = if request.ok() {
            Phase::Pending
        } else {
            Phase::Failed
        };
        Ok(())
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Readiness: mutating operations go out directly rather than queue
    pub fn loaded(&self) -> bool {
        !matches!(self.phase, Phase::Pending | Phase::Failed)
    }

    /// Trigger an achievement, or report progress toward one when both
    /// `current` and `target` are given.
    ///
    /// Returns the submission result; `false` (and a queued entry) while
    /// the session is not ready.
    pub fn make<R: SymbolResolver>(
        &mut self,
        dispatcher: &mut CallDispatcher<R>,
        name: &str,
        progress: Option<(u32, u32)>,
    ) -> SessionResult<bool> {
        if !self.loaded() {
            self.pending.push_back(PendingOp::Make {
                name: name.to_string(),
                progress,
            });
            return Ok(false);
        }
        self.issue_make(dispatcher, name, progress)
    }

    /// Clear an achievement. Queued while the session is not ready.
    pub fn cancel<R: SymbolResolver>(
        &mut self,
        dispatcher: &mut CallDispatcher<R>,
        name: &str,
    ) -> SessionResult<bool> {
        if !self.loaded() {
            self.pending.push_back(PendingOp::Cancel {
                name: name.to_string(),
            });
            return Ok(false);
        }
        self.issue_cancel(dispatcher, name)
    }

    /// Ask the SDK to persist all achievement state. Completion is
    /// reported by the "stored" event and gates nothing.
    pub fn save<R: SymbolResolver>(
        &mut self,
        dispatcher: &mut CallDispatcher<R>,
    ) -> SessionResult<bool> {
        if self.player.is_null() {
            return Ok(false);
        }
        let result =
            dispatcher.invoke("AsyncStoreAchievement", &[self.player.into(), Value::text("")])?;
        Ok(result.ok())
    }

    /// Whether the named achievement is already achieved.
    ///
    /// The SDK reports the flag through an out parameter, so the query
    /// borrows a slot from the address table for the duration of the
    /// call. Answers `false` while the session is not ready.
    pub fn has<R: SymbolResolver>(
        &self,
        dispatcher: &mut CallDispatcher<R>,
        addresses: &mut AddressTable,
        name: &str,
    ) -> SessionResult<bool> {
        if !self.loaded() {
            return Ok(false);
        }

        let out = addresses.take_reference(&Value::Word(0))?;
        let result = dispatcher.invoke(
            "HasAchieved",
            &[self.player.into(), Value::text(name), out.into()],
        );
        let achieved = match &result {
            Ok(code) if code.ok() => addresses.dereference(out.raw())? != 0,
            _ => false,
        };
        addresses.release(out.raw());
        result?;
        Ok(achieved)
    }

    /// The "achievement received" event arrived: the initial fetch is
    /// complete
    pub fn on_achievement_received(&mut self) {
        if self.phase == Phase::Pending {
            self.phase = Phase::Idle;
        }
    }

    /// The "achievement stored" event arrived. Acknowledged without a
    /// transition: storage confirmation does not gate readiness, only the
    /// initial fetch does.
    pub fn on_achievement_stored(&mut self) {}

    /// Replay operations queued before readiness, oldest first.
    ///
    /// The queue is drained up front so each entry is issued exactly
    /// once; a replayed call that fails reports through its ordinary
    /// result and is not re-queued.
    pub fn replay_pending<R: SymbolResolver>(
        &mut self,
        dispatcher: &mut CallDispatcher<R>,
    ) -> SessionResult<()> {
        if !self.loaded() || self.pending.is_empty() {
            return Ok(());
        }

        let queued = std::mem::take(&mut self.pending);
        for op in queued {
            match op {
                PendingOp::Make { name, progress } => {
                    self.issue_make(dispatcher, &name, progress)?;
                }
                PendingOp::Cancel { name } => {
                    self.issue_cancel(dispatcher, &name)?;
                }
            }
        }
        Ok(())
    }

    /// Release the player-achievement handle. Further mutating calls
    /// report failure.
    pub fn close<R: SymbolResolver>(
        &mut self,
        dispatcher: &mut CallDispatcher<R>,
    ) -> SessionResult<()> {
        if !self.player.is_null() {
            dispatcher.invoke("Release", &[self.player.into()])?;
            self.player = NativeValue::NULL;
        }
        Ok(())
    }

    /// Number of operations waiting for readiness
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn issue_make<R: SymbolResolver>(
        &mut self,
        dispatcher: &mut CallDispatcher<R>,
        name: &str,
        progress: Option<(u32, u32)>,
    ) -> SessionResult<bool> {
        if self.player.is_null() {
            return Ok(false);
        }
        let result = match progress {
            Some((current, target)) => dispatcher.invoke(
                "AsyncTriggerAchievementProgress",
                &[
                    self.player.into(),
                    Value::text(name),
                    Value::Word(current),
                    Value::Word(target),
                ],
            )?,
            None => {
                dispatcher.invoke("MakeAchievement", &[self.player.into(), Value::text(name)])?
            }
        };
        Ok(result.ok())
    }

    fn issue_cancel<R: SymbolResolver>(
        &mut self,
        dispatcher: &mut CallDispatcher<R>,
        name: &str,
    ) -> SessionResult<bool> {
        if self.player.is_null() {
            return Ok(false);
        }
        let result =
            dispatcher.invoke("CancelAchievement", &[self.player.into(), Value::text(name)])?;
        Ok(result.ok())
    }
}
