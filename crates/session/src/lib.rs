#![deny(warnings)]

//! Session controller for the journey.
//!
//! `Session` owns the current view and mediates every mutation of the
//! progress and collectible stores. Transitions validate their preconditions
//! (clock gate, unlock membership, current view) and are ignored when those
//! fail; nothing here exposes a raw setter for the view.
//!
//! Accepted view changes commit immediately and open a hand-off window for
//! the renderer's animation. Navigation requested while the window is open is
//! refused with `Outcome::Busy` until `settle` is called (see
//! `handoff::play_handoff`). `reset` is always honored.

pub mod handoff;
pub mod observers;

use clock_gate::{Clock, ClockGate, CountdownObserver, GateEvent, Remaining};
use journey_core::{t, Catalog, Lang, Step, StepId, SECRET_MESSAGE_COUNT};
use persistence::{CollectibleStore, KvStore, Preferences, ProgressStore, StoreError};
use puzzle::{Puzzle, Slide};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info, warn};
use unlock::{CurrentStep, JourneyStatus};

pub use handoff::{play_handoff, HANDOFF};
pub use observers::{ObserverEvent, ScratchObserver, ShakeDetector};

/// Errors surfaced by session operations that persist state.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

/// The view currently shown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum View {
    /// Countdown screen; the only view while the clock gate is closed.
    Locked,
    /// Map of all steps.
    Overview,
    /// A single step.
    StepDetail(StepId),
    /// Ticket stubs / summary list.
    SummaryList,
}

/// What happened to a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Preconditions failed; state unchanged.
    Ignored,
    /// A previous transition is still handing off; state unchanged.
    Busy,
}

/// Signals for the rendering layer, drained with `Session::drain_events`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Unlocked,
    StepOpened(StepId),
    StepCompleted(StepId),
    /// Fired once when the last outstanding step is completed.
    JourneyComplete,
    HeartCollected(StepId),
    ScratchRevealed(StepId),
    /// Secret message shown, with its rotating index.
    SecretShown(usize),
    Reset,
}

/// Progress of the active step's quiz.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QuizState {
    #[default]
    Answering,
    Correct,
    Wrong(usize),
}

pub struct Session<K, C> {
    catalog: Catalog,
    gate: ClockGate,
    clock: C,
    progress: ProgressStore<K>,
    hearts: CollectibleStore<K>,
    prefs: Preferences<K>,
    view: View,
    locked: bool,
    in_flight: bool,
    journey_complete: bool,
    celebration: bool,
    welcome_pending: bool,
    secret: Option<usize>,
    quiz: QuizState,
    puzzle: Option<Puzzle>,
    events: Vec<SessionEvent>,
}

impl<K, C> Session<K, C>
where
    K: KvStore + Clone,
    C: Clock,
{
    /// Load persisted state and pick the initial view from the clock gate.
    pub fn start(catalog: Catalog, kv: K, gate: ClockGate, clock: C) -> Self {
        let progress = ProgressStore::load(kv.clone());
        let hearts = CollectibleStore::load(kv.clone());
        let prefs = Preferences::new(kv);
        let locked = gate.is_locked(clock.now());
        let journey_complete = unlock::is_journey_complete(&catalog, progress.ids());
        let welcome_pending = !prefs.welcomed();
        info!(
            locked,
            completed = progress.len(),
            hearts = hearts.len(),
            steps = catalog.len(),
            "session started"
        );
        Self {
            catalog,
            gate,
            clock,
            progress,
            hearts,
            prefs,
            view: if locked { View::Locked } else { View::Overview },
            locked,
            in_flight: false,
            journey_complete,
            celebration: false,
            welcome_pending,
            secret: None,
            quiz: QuizState::Answering,
            puzzle: None,
            events: Vec::new(),
        }
    }

    // ---- read accessors ----

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn gate(&self) -> ClockGate {
        self.gate
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn remaining(&self) -> Remaining {
        self.gate.remaining(self.clock.now())
    }

    /// A fresh observer for the countdown while locked.
    pub fn countdown(&self) -> CountdownObserver {
        CountdownObserver::new(self.gate)
    }

    pub fn is_transitioning(&self) -> bool {
        self.in_flight
    }

    pub fn progress(&self) -> &BTreeSet<StepId> {
        self.progress.ids()
    }

    pub fn hearts(&self) -> &BTreeSet<StepId> {
        self.hearts.ids()
    }

    pub fn unlocked(&self) -> BTreeSet<StepId> {
        unlock::unlocked_steps(&self.catalog, self.progress.ids())
    }

    pub fn current(&self) -> CurrentStep<'_> {
        let unlocked = self.unlocked();
        unlock::current_step(&self.catalog, &unlocked, self.progress.ids())
    }

    pub fn status(&self) -> JourneyStatus {
        unlock::journey_status(&self.catalog, self.progress.ids(), self.hearts.ids())
    }

    pub fn is_journey_complete(&self) -> bool {
        self.journey_complete
    }

    pub fn active_step(&self) -> Option<&Step> {
        match &self.view {
            View::StepDetail(id) => self.catalog.get(id.as_str()),
            _ => None,
        }
    }

    pub fn quiz_state(&self) -> QuizState {
        self.quiz
    }

    pub fn puzzle(&self) -> Option<&Puzzle> {
        self.puzzle.as_ref()
    }

    pub fn celebration_visible(&self) -> bool {
        self.celebration
    }

    pub fn welcome_visible(&self) -> bool {
        !self.locked && self.welcome_pending
    }

    /// Index of the secret message on screen, if any.
    pub fn secret_message(&self) -> Option<usize> {
        self.secret
    }

    /// Whether the scratch card should cover `id`'s hero photo.
    pub fn scratch_card_visible(&self, id: &str) -> bool {
        !self.progress.contains(id) && !self.prefs.scratch_revealed(&StepId::from(id))
    }

    pub fn language(&self) -> Lang {
        self.prefs.language()
    }

    /// Localized label in the persisted language.
    pub fn label(&self, key: &str, vars: &[(&str, String)]) -> String {
        t(self.language(), key, vars)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- gate ----

    /// Consume a countdown event. `Unlocked` leaves the lock screen.
    pub fn on_gate_event(&mut self, event: GateEvent) -> Outcome {
        match event {
            GateEvent::Tick(_) => Outcome::Ignored,
            GateEvent::Unlocked if self.locked => {
                self.locked = false;
                self.view = View::Overview;
                self.events.push(SessionEvent::Unlocked);
                info!("session unlocked");
                Outcome::Applied
            }
            GateEvent::Unlocked => Outcome::Ignored,
        }
    }

    // ---- navigation ----

    fn navigation_blocked(&self, request: &str) -> Option<Outcome> {
        if self.locked {
            debug!(request, "ignored while locked");
            return Some(Outcome::Ignored);
        }
        if self.in_flight {
            debug!(request, "ignored during hand-off");
            return Some(Outcome::Busy);
        }
        None
    }

    fn commit(&mut self, view: View) {
        if !matches!(view, View::StepDetail(_)) {
            self.puzzle = None;
        }
        self.quiz = QuizState::Answering;
        self.view = view;
        self.in_flight = true;
    }

    /// Overview → StepDetail(id), if `id` is unlocked.
    pub fn open_step(&mut self, id: &str) -> Outcome {
        if let Some(blocked) = self.navigation_blocked("open_step") {
            return blocked;
        }
        if self.view != View::Overview {
            debug!(step = id, view = ?self.view, "open_step outside overview");
            return Outcome::Ignored;
        }
        if !unlock::is_unlocked(&self.catalog, self.progress.ids(), id) {
            debug!(step = id, "open_step on a locked step");
            return Outcome::Ignored;
        }
        let id = StepId::from(id);
        self.commit(View::StepDetail(id.clone()));
        self.events.push(SessionEvent::StepOpened(id));
        Outcome::Applied
    }

    /// StepDetail(id) → Overview, recording `id` as completed.
    ///
    /// The journey-complete signal fires only on the completion that makes the
    /// progress set cover the whole catalog.
    pub fn complete(&mut self, id: &str) -> Result<Outcome, SessionError> {
        if let Some(blocked) = self.navigation_blocked("complete") {
            return Ok(blocked);
        }
        if !matches!(&self.view, View::StepDetail(active) if active.as_str() == id) {
            debug!(step = id, view = ?self.view, "complete for a step that is not open");
            return Ok(Outcome::Ignored);
        }
        let step_id = StepId::from(id);
        self.progress.add(&step_id)?;
        let complete_now = unlock::is_journey_complete(&self.catalog, self.progress.ids());
        self.events.push(SessionEvent::StepCompleted(step_id));
        if complete_now && !self.journey_complete {
            self.celebration = true;
            self.events.push(SessionEvent::JourneyComplete);
            info!("journey complete");
        }
        self.journey_complete = complete_now;
        info!(step = id, completed = self.progress.len(), "step completed");
        self.commit(View::Overview);
        Ok(Outcome::Applied)
    }

    /// StepDetail or SummaryList → Overview, without touching progress.
    pub fn back(&mut self) -> Outcome {
        if let Some(blocked) = self.navigation_blocked("back") {
            return blocked;
        }
        match self.view {
            View::StepDetail(_) | View::SummaryList => {
                self.commit(View::Overview);
                Outcome::Applied
            }
            _ => Outcome::Ignored,
        }
    }

    pub fn open_summary(&mut self) -> Outcome {
        if let Some(blocked) = self.navigation_blocked("open_summary") {
            return blocked;
        }
        if self.view != View::Overview {
            return Outcome::Ignored;
        }
        self.commit(View::SummaryList);
        Outcome::Applied
    }

    pub fn close_summary(&mut self) -> Outcome {
        if self.view != View::SummaryList {
            return Outcome::Ignored;
        }
        self.back()
    }

    /// Close the hand-off window opened by the last transition.
    pub fn settle(&mut self) {
        self.in_flight = false;
    }

    /// Clear progress and hearts together and return to the start.
    ///
    /// Session state is reset first. Both stores are attempted even if the
    /// first fails; the first error is returned. The terminal flag then follows
    /// whatever progress is actually left.
    pub fn reset(&mut self) -> Result<Outcome, SessionError> {
        self.celebration = false;
        self.secret = None;
        self.quiz = QuizState::Answering;
        self.puzzle = None;
        self.in_flight = false;
        self.view = if self.locked {
            View::Locked
        } else {
            View::Overview
        };
        let progress = self.progress.reset();
        let hearts = self.hearts.reset();
        self.journey_complete = unlock::is_journey_complete(&self.catalog, self.progress.ids());
        if let Err(e) = progress.and(hearts) {
            warn!(error = %e, "reset incomplete");
            return Err(e.into());
        }
        self.events.push(SessionEvent::Reset);
        info!("progress reset");
        Ok(Outcome::Applied)
    }

    // ---- step extras ----

    fn is_active(&self, id: &str) -> bool {
        matches!(&self.view, View::StepDetail(active) if active.as_str() == id)
    }

    /// Record the hidden heart of the open step.
    pub fn collect_heart(&mut self, id: &str) -> Result<Outcome, SessionError> {
        if self.locked || !self.is_active(id) {
            return Ok(Outcome::Ignored);
        }
        let step_id = StepId::from(id);
        if self.hearts.add(&step_id)? {
            info!(step = id, found = self.hearts.len(), "heart collected");
            self.events.push(SessionEvent::HeartCollected(step_id));
        }
        Ok(Outcome::Applied)
    }

    /// Remember that the scratch card of the open step was uncovered.
    pub fn reveal_scratch(&mut self, id: &str) -> Result<Outcome, SessionError> {
        if self.locked || !self.is_active(id) {
            return Ok(Outcome::Ignored);
        }
        let step_id = StepId::from(id);
        if self.prefs.scratch_revealed(&step_id) {
            return Ok(Outcome::Ignored);
        }
        self.prefs.mark_scratch_revealed(&step_id)?;
        self.events.push(SessionEvent::ScratchRevealed(step_id));
        Ok(Outcome::Applied)
    }

    /// Route an observer event to the matching operation.
    pub fn on_observer_event(&mut self, event: ObserverEvent) -> Result<Outcome, SessionError> {
        match event {
            ObserverEvent::Revealed(id) => self.reveal_scratch(id.as_str()),
            ObserverEvent::Shaken => self.show_secret(),
        }
    }

    /// Show the next rotating secret message.
    pub fn show_secret(&mut self) -> Result<Outcome, SessionError> {
        if self.locked || self.secret.is_some() {
            return Ok(Outcome::Ignored);
        }
        let index = self.prefs.next_message_index(SECRET_MESSAGE_COUNT)?;
        self.secret = Some(index);
        self.events.push(SessionEvent::SecretShown(index));
        Ok(Outcome::Applied)
    }

    pub fn dismiss_secret(&mut self) {
        self.secret = None;
    }

    pub fn dismiss_welcome(&mut self) -> Result<Outcome, SessionError> {
        if !self.welcome_visible() {
            return Ok(Outcome::Ignored);
        }
        self.prefs.mark_welcomed()?;
        self.welcome_pending = false;
        Ok(Outcome::Applied)
    }

    pub fn dismiss_celebration(&mut self) {
        self.celebration = false;
    }

    pub fn set_language(&mut self, lang: Lang) -> Result<(), SessionError> {
        self.prefs.set_language(lang)?;
        Ok(())
    }

    /// Answer the open step's quiz. Only one answer per attempt.
    pub fn answer_quiz(&mut self, index: usize) -> Outcome {
        if self.quiz != QuizState::Answering {
            return Outcome::Ignored;
        }
        let Some(step) = self.active_step() else {
            return Outcome::Ignored;
        };
        let correct = step.quiz.is_correct(index);
        self.quiz = if correct {
            QuizState::Correct
        } else {
            QuizState::Wrong(index)
        };
        Outcome::Applied
    }

    pub fn retry_quiz(&mut self) -> Outcome {
        match self.quiz {
            QuizState::Wrong(_) => {
                self.quiz = QuizState::Answering;
                Outcome::Applied
            }
            _ => Outcome::Ignored,
        }
    }

    /// Start a photo puzzle on the open step.
    pub fn start_puzzle(&mut self, seed: u64) -> Outcome {
        if self.active_step().is_none() {
            return Outcome::Ignored;
        }
        self.puzzle = Some(Puzzle::shuffled(seed));
        Outcome::Applied
    }

    pub fn slide_puzzle(&mut self, index: usize) -> Slide {
        match self.puzzle.as_mut() {
            Some(p) => p.slide(index),
            None => Slide::Ignored,
        }
    }

    pub fn close_puzzle(&mut self) {
        self.puzzle = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clock_gate::ManualClock;
    use persistence::{MemoryKv, HEARTS_KEY, PROGRESS_KEY};
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    const TARGET_MS: i64 = 1_000_000;

    fn three_steps() -> Catalog {
        let mut yaml = String::from("steps:\n");
        for (order, id) in ["one", "two", "three"].iter().enumerate() {
            yaml.push_str(&format!(
                r#"  - id: {id}
    order: {order}
    city: {{ en: "{id}", ru: "{id}" }}
    country: {{ en: "X", ru: "X" }}
    lat: 10.0
    lng: 20.0
    card_text: {{ en: "", ru: "" }}
    love_letter: {{ en: "", ru: "" }}
    quiz:
      question: {{ en: "?", ru: "?" }}
      options:
        - {{ text: {{ en: "a", ru: "a" }}, is_correct: false }}
        - {{ text: {{ en: "b", ru: "b" }}, is_correct: true }}
    photos: ["{id}.jpg"]
    hidden_heart: {{ x_percent: 50.0, y_percent: 50.0 }}
"#,
                order = order + 1
            ));
        }
        Catalog::from_yaml(&yaml).unwrap()
    }

    fn open_session(kv: MemoryKv) -> Session<MemoryKv, ManualClock> {
        let clock = ManualClock::at_millis(TARGET_MS);
        Session::start(
            three_steps(),
            kv,
            ClockGate::with_target_millis(TARGET_MS),
            clock,
        )
    }

    fn locked_session(kv: MemoryKv) -> (Session<MemoryKv, ManualClock>, ManualClock) {
        let clock = ManualClock::at_millis(TARGET_MS - 3_000);
        let session = Session::start(
            three_steps(),
            kv,
            ClockGate::with_target_millis(TARGET_MS),
            clock.clone(),
        );
        (session, clock)
    }

    fn complete_step(s: &mut Session<MemoryKv, ManualClock>, id: &str) {
        assert_eq!(s.open_step(id), Outcome::Applied);
        s.settle();
        assert_eq!(s.complete(id).unwrap(), Outcome::Applied);
        s.settle();
    }

    fn current_id(s: &Session<MemoryKv, ManualClock>) -> Option<String> {
        s.current().step().map(|st| st.id.0.clone())
    }

    fn ids(list: &[&str]) -> BTreeSet<StepId> {
        list.iter().map(|s| StepId::from(*s)).collect()
    }

    #[test]
    fn locked_session_only_shows_countdown() {
        let (mut s, clock) = locked_session(MemoryKv::new());
        assert_eq!(s.view(), &View::Locked);
        assert!(s.is_locked());
        assert!(!s.welcome_visible());
        assert_eq!(s.remaining().seconds, 3);
        assert_eq!(s.open_step("one"), Outcome::Ignored);
        assert_eq!(s.open_summary(), Outcome::Ignored);
        assert_eq!(s.show_secret().unwrap(), Outcome::Ignored);
        assert_eq!(s.view(), &View::Locked);

        let mut countdown = s.countdown();
        let tick = countdown.poll(clock.now()).unwrap();
        assert_eq!(s.on_gate_event(tick), Outcome::Ignored);
        clock.set_millis(TARGET_MS);
        let event = countdown.poll(clock.now()).unwrap();
        assert_eq!(event, GateEvent::Unlocked);
        assert_eq!(s.on_gate_event(event), Outcome::Applied);
        assert_eq!(s.view(), &View::Overview);
        assert!(s.welcome_visible());
        assert_eq!(s.drain_events(), vec![SessionEvent::Unlocked]);
        assert_eq!(s.on_gate_event(GateEvent::Unlocked), Outcome::Ignored);
    }

    #[test]
    fn override_skips_the_lock() {
        let clock = ManualClock::at_millis(0);
        let s = Session::start(
            three_steps(),
            MemoryKv::new(),
            ClockGate::with_target_millis(TARGET_MS).with_override(true),
            clock,
        );
        assert!(!s.is_locked());
        assert_eq!(s.view(), &View::Overview);
        assert_eq!(s.remaining().total_ms, TARGET_MS as u64);
    }

    #[test]
    fn walkthrough_fires_completion_once() {
        let mut s = open_session(MemoryKv::new());
        assert_eq!(s.unlocked(), ids(&["one"]));
        assert_eq!(current_id(&s).as_deref(), Some("one"));

        complete_step(&mut s, "one");
        assert_eq!(s.unlocked(), ids(&["one", "two"]));
        assert_eq!(current_id(&s).as_deref(), Some("two"));

        complete_step(&mut s, "two");
        assert_eq!(s.unlocked(), ids(&["one", "two", "three"]));
        assert_eq!(current_id(&s).as_deref(), Some("three"));
        assert!(!s.celebration_visible());

        complete_step(&mut s, "three");
        assert!(s.current().is_complete());
        assert!(s.is_journey_complete());
        assert!(s.celebration_visible());
        assert_eq!(s.view(), &View::Overview);
        assert!(s.active_step().is_none());

        // revisiting a completed step does not celebrate again
        s.dismiss_celebration();
        complete_step(&mut s, "one");
        assert!(!s.celebration_visible());

        let finished = s
            .drain_events()
            .into_iter()
            .filter(|e| *e == SessionEvent::JourneyComplete)
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn completion_seen_at_startup_does_not_refire() {
        let kv = MemoryKv::new();
        kv.set(PROGRESS_KEY, r#"["one","two","three"]"#).unwrap();
        let mut s = open_session(kv);
        assert!(s.is_journey_complete());
        complete_step(&mut s, "two");
        assert!(!s.celebration_visible());
        assert!(!s.drain_events().contains(&SessionEvent::JourneyComplete));
    }

    #[test]
    fn opening_a_locked_step_is_ignored() {
        let mut s = open_session(MemoryKv::new());
        assert_eq!(s.open_step("two"), Outcome::Ignored);
        assert_eq!(s.open_step("nowhere"), Outcome::Ignored);
        assert_eq!(s.view(), &View::Overview);
        assert!(!s.is_transitioning());
        assert!(s.drain_events().is_empty());
    }

    #[test]
    fn complete_requires_the_open_step() {
        let mut s = open_session(MemoryKv::new());
        assert_eq!(s.complete("one").unwrap(), Outcome::Ignored);
        assert!(s.progress().is_empty());
        s.open_step("one");
        s.settle();
        assert_eq!(s.complete("two").unwrap(), Outcome::Ignored);
        assert!(s.progress().is_empty());
        assert_eq!(s.back(), Outcome::Applied);
        assert!(s.progress().is_empty());
        assert_eq!(s.view(), &View::Overview);
    }

    #[test]
    fn transitions_are_serialized() {
        let mut s = open_session(MemoryKv::new());
        assert_eq!(s.open_step("one"), Outcome::Applied);
        assert!(s.is_transitioning());
        assert_eq!(s.back(), Outcome::Busy);
        assert_eq!(s.complete("one").unwrap(), Outcome::Busy);
        assert_eq!(s.view(), &View::StepDetail(StepId::from("one")));
        s.settle();
        assert_eq!(s.back(), Outcome::Applied);
        assert_eq!(s.open_summary(), Outcome::Busy);
        s.settle();
        assert_eq!(s.open_summary(), Outcome::Applied);
        s.settle();
        assert_eq!(s.view(), &View::SummaryList);
        assert_eq!(s.open_step("one"), Outcome::Ignored);
        assert_eq!(s.close_summary(), Outcome::Applied);
        assert_eq!(s.view(), &View::Overview);
    }

    #[test]
    fn reset_clears_everything_from_any_view() {
        let kv = MemoryKv::new();
        let mut s = open_session(kv.clone());
        complete_step(&mut s, "one");
        complete_step(&mut s, "two");
        s.open_step("three");
        s.settle();
        s.collect_heart("three").unwrap();
        s.complete("three").unwrap();
        assert!(s.celebration_visible());
        s.settle();
        s.open_step("two");

        // still handing off; reset is honored anyway
        assert_eq!(s.reset().unwrap(), Outcome::Applied);
        assert_eq!(s.view(), &View::Overview);
        assert!(!s.is_transitioning());
        assert!(s.progress().is_empty());
        assert!(s.hearts().is_empty());
        assert!(!s.is_journey_complete());
        assert!(!s.celebration_visible());
        assert_eq!(current_id(&s).as_deref(), Some("one"));
        assert_eq!(kv.get(PROGRESS_KEY).unwrap(), None);
        assert_eq!(kv.get(HEARTS_KEY).unwrap(), None);

        // completion fires again after a reset
        complete_step(&mut s, "one");
        complete_step(&mut s, "two");
        complete_step(&mut s, "three");
        assert!(s.celebration_visible());
    }

    #[test]
    fn reset_while_locked_stays_locked() {
        let kv = MemoryKv::new();
        kv.set(PROGRESS_KEY, r#"["one"]"#).unwrap();
        let (mut s, _clock) = locked_session(kv);
        assert_eq!(s.reset().unwrap(), Outcome::Applied);
        assert_eq!(s.view(), &View::Locked);
        assert!(s.progress().is_empty());
    }

    #[test]
    fn progress_survives_restart_and_bad_data_is_empty() {
        let kv = MemoryKv::new();
        {
            let mut s = open_session(kv.clone());
            complete_step(&mut s, "one");
        }
        let s = open_session(kv.clone());
        assert_eq!(s.progress(), &ids(&["one"]));
        assert_eq!(current_id(&s).as_deref(), Some("two"));

        kv.set(PROGRESS_KEY, "not json").unwrap();
        let s = open_session(kv);
        assert!(s.progress().is_empty());
        assert_eq!(current_id(&s).as_deref(), Some("one"));
    }

    #[test]
    fn hearts_are_independent_of_progress() {
        let mut s = open_session(MemoryKv::new());
        assert_eq!(s.collect_heart("one").unwrap(), Outcome::Ignored);
        s.open_step("one");
        s.settle();
        assert_eq!(s.collect_heart("one").unwrap(), Outcome::Applied);
        assert_eq!(s.collect_heart("one").unwrap(), Outcome::Applied);
        assert_eq!(s.hearts(), &ids(&["one"]));
        assert!(s.progress().is_empty());
        let events = s.drain_events();
        let collected = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::HeartCollected(_)))
            .count();
        assert_eq!(collected, 1);
        assert_eq!(s.status().hearts_found, 1);
        assert_eq!(s.status().completed, 0);
    }

    #[test]
    fn scratch_card_reveal_persists() {
        let kv = MemoryKv::new();
        let mut s = open_session(kv.clone());
        assert!(s.scratch_card_visible("one"));
        assert_eq!(s.reveal_scratch("one").unwrap(), Outcome::Ignored);
        s.open_step("one");
        s.settle();
        let mut obs = ScratchObserver::new(StepId::from("one"));
        assert!(obs.sample(10, 100).is_none());
        let event = obs.sample(60, 100).unwrap();
        assert_eq!(s.on_observer_event(event).unwrap(), Outcome::Applied);
        assert!(!s.scratch_card_visible("one"));
        assert_eq!(s.reveal_scratch("one").unwrap(), Outcome::Ignored);

        let s = open_session(kv);
        assert!(!s.scratch_card_visible("one"));
        assert!(s.scratch_card_visible("two"));
    }

    #[test]
    fn completed_steps_hide_the_scratch_card() {
        let mut s = open_session(MemoryKv::new());
        complete_step(&mut s, "one");
        assert!(!s.scratch_card_visible("one"));
    }

    #[test]
    fn shaking_cycles_secret_messages() {
        let mut s = open_session(MemoryKv::new());
        let mut shake = ShakeDetector::default();
        let mut shown = Vec::new();
        for i in 0..4 {
            let event = shake.sample(i * 3_000, 40.0, 0.0, 0.0).unwrap();
            assert_eq!(s.on_observer_event(event).unwrap(), Outcome::Applied);
            shown.push(s.secret_message().unwrap());
            // a second shake while the message is up changes nothing
            assert_eq!(s.show_secret().unwrap(), Outcome::Ignored);
            s.dismiss_secret();
        }
        assert_eq!(shown, vec![0, 1, 2, 0]);
    }

    #[test]
    fn quiz_flow_on_active_step() {
        let mut s = open_session(MemoryKv::new());
        assert_eq!(s.answer_quiz(1), Outcome::Ignored);
        s.open_step("one");
        s.settle();
        assert_eq!(s.answer_quiz(0), Outcome::Applied);
        assert_eq!(s.quiz_state(), QuizState::Wrong(0));
        assert_eq!(s.answer_quiz(1), Outcome::Ignored);
        assert_eq!(s.retry_quiz(), Outcome::Applied);
        assert_eq!(s.answer_quiz(1), Outcome::Applied);
        assert_eq!(s.quiz_state(), QuizState::Correct);
        assert_eq!(s.retry_quiz(), Outcome::Ignored);
        s.back();
        assert_eq!(s.quiz_state(), QuizState::Answering);
    }

    #[test]
    fn puzzle_lives_inside_the_step() {
        let mut s = open_session(MemoryKv::new());
        assert_eq!(s.start_puzzle(1), Outcome::Ignored);
        assert_eq!(s.slide_puzzle(0), Slide::Ignored);
        s.open_step("one");
        s.settle();
        assert_eq!(s.start_puzzle(1), Outcome::Applied);
        assert!(s.puzzle().is_some());
        let blank = s.puzzle().unwrap().blank_index();
        let neighbour = (0..puzzle::TOTAL)
            .find(|&i| s.puzzle().unwrap().can_move(i))
            .unwrap();
        assert_ne!(s.slide_puzzle(neighbour), Slide::Ignored);
        assert_eq!(s.puzzle().unwrap().blank_index(), neighbour);
        assert_ne!(blank, neighbour);
        s.back();
        assert!(s.puzzle().is_none());
    }

    #[test]
    fn welcome_and_language_preferences() {
        let kv = MemoryKv::new();
        let mut s = open_session(kv.clone());
        assert!(s.welcome_visible());
        assert_eq!(s.dismiss_welcome().unwrap(), Outcome::Applied);
        assert!(!s.welcome_visible());
        assert_eq!(s.dismiss_welcome().unwrap(), Outcome::Ignored);
        s.set_language(Lang::Ru).unwrap();
        assert_eq!(
            s.label("stepOf", &[("n", "1".into()), ("total", "3".into())]),
            "Шаг 1 из 3"
        );

        let s = open_session(kv);
        assert!(!s.welcome_visible());
        assert_eq!(s.language(), Lang::Ru);
    }

    #[test]
    fn reset_keeps_preferences() {
        let kv = MemoryKv::new();
        let mut s = open_session(kv.clone());
        s.dismiss_welcome().unwrap();
        s.open_step("one");
        s.settle();
        s.reveal_scratch("one").unwrap();
        s.reset().unwrap();
        let s = open_session(kv);
        assert!(!s.welcome_visible());
        assert!(!s.scratch_card_visible("one"));
    }

    /// Memory store whose writes and removals fail for selected keys.
    #[derive(Clone, Default)]
    struct FlakyKv {
        inner: MemoryKv,
        broken: Arc<Mutex<BTreeSet<String>>>,
    }

    impl FlakyKv {
        fn break_key(&self, key: &str) {
            self.broken.lock().unwrap().insert(key.to_string());
        }

        fn repair(&self) {
            self.broken.lock().unwrap().clear();
        }

        fn check(&self, key: &str) -> Result<(), StoreError> {
            if self.broken.lock().unwrap().contains(key) {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            Ok(())
        }
    }

    impl KvStore for FlakyKv {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.check(key)?;
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.check(key)?;
            self.inner.remove(key)
        }

        fn keys(&self) -> Result<Vec<String>, StoreError> {
            self.inner.keys()
        }
    }

    fn flaky_session(kv: FlakyKv) -> Session<FlakyKv, ManualClock> {
        Session::start(
            three_steps(),
            kv,
            ClockGate::with_target_millis(TARGET_MS),
            ManualClock::at_millis(TARGET_MS),
        )
    }

    #[test]
    fn failed_reset_still_leaves_a_consistent_session() {
        let kv = FlakyKv::default();
        kv.set(PROGRESS_KEY, r#"["one","two","three"]"#).unwrap();
        kv.set(HEARTS_KEY, r#"["one"]"#).unwrap();
        let mut s = flaky_session(kv.clone());
        assert!(s.is_journey_complete());
        assert_eq!(s.open_step("two"), Outcome::Applied);
        s.drain_events();

        kv.break_key(HEARTS_KEY);
        assert!(matches!(s.reset(), Err(SessionError::Store(_))));
        assert_eq!(s.view(), &View::Overview);
        assert!(!s.is_transitioning());
        assert!(s.progress().is_empty());
        assert_eq!(kv.get(PROGRESS_KEY).unwrap(), None);
        assert!(!s.is_journey_complete());
        // the failed store keeps its memory in line with disk
        assert_eq!(s.hearts(), &ids(&["one"]));
        assert!(kv.get(HEARTS_KEY).unwrap().is_some());
        assert!(s.drain_events().is_empty());

        kv.repair();
        assert_eq!(s.reset().unwrap(), Outcome::Applied);
        assert!(s.hearts().is_empty());
        assert_eq!(s.drain_events(), vec![SessionEvent::Reset]);
    }

    #[test]
    fn failed_progress_reset_keeps_terminal_flag_with_progress() {
        let kv = FlakyKv::default();
        kv.set(PROGRESS_KEY, r#"["one","two","three"]"#).unwrap();
        kv.set(HEARTS_KEY, r#"["two"]"#).unwrap();
        let mut s = flaky_session(kv.clone());
        kv.break_key(PROGRESS_KEY);
        assert!(s.reset().is_err());
        // hearts were still attempted
        assert!(s.hearts().is_empty());
        assert_eq!(kv.get(HEARTS_KEY).unwrap(), None);
        assert_eq!(s.progress().len(), 3);
        assert!(s.is_journey_complete());
        assert_eq!(s.view(), &View::Overview);
    }

    #[test]
    fn failed_completion_changes_nothing() {
        let kv = FlakyKv::default();
        let mut s = flaky_session(kv.clone());
        s.open_step("one");
        s.settle();
        s.drain_events();

        kv.break_key(PROGRESS_KEY);
        assert!(matches!(s.complete("one"), Err(SessionError::Store(_))));
        assert_eq!(s.view(), &View::StepDetail(StepId::from("one")));
        assert!(!s.is_transitioning());
        assert!(s.progress().is_empty());
        assert!(!s.is_journey_complete());
        assert_eq!(kv.get(PROGRESS_KEY).unwrap(), None);
        assert!(s.drain_events().is_empty());

        kv.repair();
        assert_eq!(s.complete("one").unwrap(), Outcome::Applied);
        assert_eq!(s.progress(), &ids(&["one"]));
    }

    #[test]
    fn failed_heart_collection_changes_nothing() {
        let kv = FlakyKv::default();
        let mut s = flaky_session(kv.clone());
        s.open_step("one");
        s.settle();
        s.drain_events();

        kv.break_key(HEARTS_KEY);
        assert!(s.collect_heart("one").is_err());
        assert!(s.hearts().is_empty());
        assert!(s.drain_events().is_empty());
        assert_eq!(s.view(), &View::StepDetail(StepId::from("one")));
    }

    #[tokio::test(start_paused = true)]
    async fn handoff_settles_after_delay() {
        let mut s = open_session(MemoryKv::new());
        assert_eq!(s.open_step("one"), Outcome::Applied);
        let started = tokio::time::Instant::now();
        play_handoff(&mut s).await;
        assert!(started.elapsed() >= HANDOFF);
        assert!(!s.is_transitioning());
        assert_eq!(s.complete("one").unwrap(), Outcome::Applied);

        play_handoff(&mut s).await;
        assert!(!s.is_transitioning());
        // nothing in flight: no wait
        let before = tokio::time::Instant::now();
        play_handoff(&mut s).await;
        assert_eq!(before.elapsed(), std::time::Duration::ZERO);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Open(usize),
        Complete(usize),
        Back,
        Summary,
        Settle,
        Reset,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4).prop_map(Op::Open),
            (0usize..4).prop_map(Op::Complete),
            Just(Op::Back),
            Just(Op::Summary),
            Just(Op::Settle),
            Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn random_operations_keep_invariants(ops in proptest::collection::vec(op(), 0..60)) {
            let names = ["one", "two", "three", "nowhere"];
            let mut s = open_session(MemoryKv::new());
            let mut celebrations = 0;
            for op in ops {
                match op {
                    Op::Open(i) => { s.open_step(names[i]); }
                    Op::Complete(i) => { s.complete(names[i]).unwrap(); }
                    Op::Back => { s.back(); }
                    Op::Summary => { s.open_summary(); }
                    Op::Settle => s.settle(),
                    Op::Reset => { s.reset().unwrap(); }
                }
                for e in s.drain_events() {
                    match e {
                        SessionEvent::JourneyComplete => celebrations += 1,
                        SessionEvent::Reset => celebrations = 0,
                        _ => {}
                    }
                }
                prop_assert!(celebrations <= 1);
                prop_assert!(s.unlocked().contains("one"));
                prop_assert_eq!(s.current().is_complete(), s.progress().len() == 3);
                prop_assert_eq!(s.is_journey_complete(), s.progress().len() == 3);
                if let View::StepDetail(id) = s.view() {
                    prop_assert!(s.unlocked().contains(id));
                }
            }
        }
    }
}
