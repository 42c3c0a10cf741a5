//! Playback controller.
//!
//! A single engine thread walks a session's program, performing each
//! descriptor transfer against the backend and pacing delays against a
//! running deadline so playback does not drift. A plain send is a program
//! of one waveform; a chain is a program of waveforms, delays and loops.
//!
//! Repeat mode links the tail descriptor back to the head. `stop` severs
//! that link and raises an abort flag under the engine state lock; the
//! engine only inspects either between descriptors, so a descriptor is
//! never interrupted.
//!
//! A sync send parks the new session until the current one reaches a
//! waveform boundary: the end of a one-shot pass, a repeat wrap, or the end
//! of a chain segment or delay.
//!
//! Lock order: engine state, then the wave store. Never the reverse.

use super::chain::{ChainOp, WaveChain};
use super::compiler::{Link, Transfer};
use super::store::WaveStore;
use crate::clock::{TickSource, sleep_until};
use crate::task::{StopToken, TaskHandle};
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::hal::GpioBackend;
use dmagpio_common::types::WaveMode;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Engine wait granularity when idle.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Lag after which the delay deadline is re-based instead of caught up.
const MAX_LAG: Duration = Duration::from_millis(250);

/// Controller state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    /// No session.
    Idle,
    /// Chain being linked for transmission.
    Loading,
    /// Engine walking one waveform.
    Transmitting(WaveMode),
    /// Engine running a chain program.
    Chaining,
}

/// Snapshot of the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackInfo {
    /// Wave being transmitted; `None` during a chain delay.
    pub wave_id: Option<u32>,
    /// Playback mode. Chains report `Repeat` when they loop forever.
    pub mode: WaveMode,
    /// True for a chain session.
    pub chained: bool,
    /// Completed passes through the program.
    pub passes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Play { wave_id: u32, head: usize },
    Delay(u32),
    Repeat { counter: usize, count: u32, to: usize },
    Forever { to: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Work {
    Descriptor(usize),
    Delay(u32),
}

#[derive(Debug, Clone, Copy)]
struct Walk {
    head: usize,
    cursor: usize,
}

#[derive(Debug)]
struct Session {
    info: PlaybackInfo,
    steps: Vec<Step>,
    pc: usize,
    counters: Vec<u32>,
    walk: Option<Walk>,
    /// Tail descriptor of a plain session and the link it gets on start.
    tail_link: Option<(usize, Link)>,
    started: bool,
}

impl Session {
    fn plain(wave_id: u32, head: usize, tail: usize, mode: WaveMode) -> Self {
        let mode = mode.unsynced();
        Self {
            info: PlaybackInfo {
                wave_id: Some(wave_id),
                mode,
                chained: false,
                passes: 0,
            },
            steps: vec![Step::Play { wave_id, head }],
            pc: 0,
            counters: Vec::new(),
            walk: None,
            tail_link: Some((
                tail,
                if mode.repeats() {
                    Link::Next(head)
                } else {
                    Link::End
                },
            )),
            started: false,
        }
    }

    fn chain(steps: Vec<Step>, counters: usize, endless: bool) -> Self {
        Self {
            info: PlaybackInfo {
                wave_id: None,
                mode: if endless {
                    WaveMode::Repeat
                } else {
                    WaveMode::OneShot
                },
                chained: true,
                passes: 0,
            },
            steps,
            pc: 0,
            counters: vec![0; counters],
            walk: None,
            tail_link: None,
            started: false,
        }
    }

    fn phase(&self) -> PlaybackPhase {
        if self.info.chained {
            PlaybackPhase::Chaining
        } else {
            PlaybackPhase::Transmitting(self.info.mode)
        }
    }

    fn uses_wave_from(&self, id: u32) -> bool {
        self.steps
            .iter()
            .any(|step| matches!(step, Step::Play { wave_id, .. } if *wave_id >= id))
    }

    /// Next unit of work, stepping through loop control. `None` once the
    /// program has run out.
    fn next_work(&mut self) -> Option<Work> {
        if let Some(walk) = self.walk {
            return Some(Work::Descriptor(walk.cursor));
        }
        while let Some(&step) = self.steps.get(self.pc) {
            match step {
                Step::Play { wave_id, head } => {
                    self.pc += 1;
                    self.walk = Some(Walk { head, cursor: head });
                    self.info.wave_id = Some(wave_id);
                    return Some(Work::Descriptor(head));
                }
                Step::Delay(micros) => {
                    self.pc += 1;
                    self.info.wave_id = None;
                    return Some(Work::Delay(micros));
                }
                Step::Repeat { counter, count, to } => {
                    let done = &mut self.counters[counter];
                    *done += 1;
                    if *done < count {
                        self.pc = to;
                    } else {
                        *done = 0;
                        self.pc += 1;
                    }
                }
                Step::Forever { to } => {
                    self.info.passes += 1;
                    self.pc = to;
                }
            }
        }
        if self.info.chained && !self.steps.is_empty() {
            self.info.passes += 1;
        }
        None
    }

    /// Move past the descriptor just executed. Returns `true` at a waveform
    /// boundary.
    fn advance(&mut self, next: Option<Link>) -> bool {
        let Some(walk) = self.walk.as_mut() else {
            return false;
        };
        match next {
            Some(Link::Next(index)) => {
                let wrapped = index == walk.head;
                if wrapped {
                    self.info.passes += 1;
                }
                walk.cursor = index;
                wrapped
            }
            _ => {
                self.walk = None;
                if !self.info.chained {
                    self.info.passes += 1;
                }
                true
            }
        }
    }
}

#[derive(Debug)]
struct EngineState {
    phase: PlaybackPhase,
    session: Option<Session>,
    pending: Option<Session>,
    abort: bool,
}

struct PlaybackShared {
    store: Arc<RwLock<WaveStore>>,
    backend: Arc<dyn GpioBackend>,
    clock: Arc<dyn TickSource>,
    state: Mutex<EngineState>,
    cond: Condvar,
}

impl PlaybackShared {
    fn begin(&self, state: &mut EngineState, session: Session) {
        if let Some((tail, link)) = session.tail_link {
            self.store.write().set_link(tail, link);
        }
        state.phase = session.phase();
        state.session = Some(session);
        state.abort = false;
        self.cond.notify_all();
    }

    fn release(&self, session: &Session) {
        if let Some((tail, Link::Next(_))) = session.tail_link {
            self.store.write().set_link(tail, Link::End);
        }
    }

    /// Replace the running session with the pending one, if any.
    fn swap(&self, state: &mut EngineState) -> bool {
        let Some(mut next) = state.pending.take() else {
            return false;
        };
        if let Some(old) = state.session.take() {
            self.release(&old);
            debug!("Playback handed over after {} passes", old.info.passes);
        }
        // Keep the running deadline across the hand-over.
        next.started = true;
        self.begin(state, next);
        true
    }

    /// The program ran out: continue with a pending session or go idle.
    fn finish(&self, state: &mut EngineState) {
        if !self.swap(state) {
            self.end_session(state);
        }
    }

    fn end_session(&self, state: &mut EngineState) {
        if let Some(session) = state.session.take() {
            self.release(&session);
            debug!(
                "Playback of {:?} ended after {} passes",
                session.info.wave_id, session.info.passes
            );
        }
        state.pending = None;
        state.abort = false;
        state.phase = PlaybackPhase::Idle;
        self.cond.notify_all();
    }
}

/// Drives the descriptor engine for one session at a time.
pub struct PlaybackController {
    shared: Arc<PlaybackShared>,
    control: Mutex<()>,
    task: Mutex<Option<TaskHandle>>,
}

impl PlaybackController {
    /// Start the engine thread.
    ///
    /// # Errors
    /// `InitFailed` if the thread cannot be spawned.
    pub fn start(
        store: Arc<RwLock<WaveStore>>,
        backend: Arc<dyn GpioBackend>,
        clock: Arc<dyn TickSource>,
    ) -> GpioResult<Self> {
        let shared = Arc::new(PlaybackShared {
            store,
            backend,
            clock,
            state: Mutex::new(EngineState {
                phase: PlaybackPhase::Idle,
                session: None,
                pending: None,
                abort: false,
            }),
            cond: Condvar::new(),
        });
        let engine = Arc::clone(&shared);
        let task = TaskHandle::spawn("dmagpio-playback", move |token| run_engine(&engine, &token))?;
        Ok(Self {
            shared,
            control: Mutex::new(()),
            task: Mutex::new(Some(task)),
        })
    }

    /// Start transmitting wave `id`.
    ///
    /// The plain modes stop any active session first. The sync modes start
    /// immediately when idle; otherwise the wave is queued behind the active
    /// session's next waveform boundary, replacing any earlier queued send.
    ///
    /// Returns the number of descriptors in the chain.
    ///
    /// # Errors
    /// `BadWaveId` if `id` is not registered.
    pub fn send(&self, id: u32, mode: WaveMode) -> GpioResult<usize> {
        let _control = self.control.lock();
        let (head, tail, count) = {
            let store = self.shared.store.read();
            let info = store.get(id).ok_or(GpioError::BadWaveId(id))?;
            (info.head, info.tail(), info.descriptors)
        };
        let session = Session::plain(id, head, tail, mode);

        if mode.is_sync() {
            let mut state = self.shared.state.lock();
            if state.session.is_some() {
                state.pending = Some(session);
                debug!("Wave {} queued ({:?}, {} descriptors)", id, mode, count);
                return Ok(count);
            }
        } else {
            self.stop_locked();
        }

        let mut state = self.shared.state.lock();
        state.phase = PlaybackPhase::Loading;
        self.shared.begin(&mut state, session);
        debug!("Wave {} sent ({:?}, {} descriptors)", id, mode, count);
        Ok(count)
    }

    /// Stop any active session and run `chain`.
    ///
    /// # Errors
    /// `BadWaveId` for the first named waveform that is not registered.
    pub fn send_chain(&self, chain: &WaveChain) -> GpioResult<()> {
        let _control = self.control.lock();
        let steps = {
            let store = self.shared.store.read();
            chain
                .ops()
                .iter()
                .map(|op| match *op {
                    ChainOp::Wave(id) => store
                        .get(id)
                        .map(|info| Step::Play {
                            wave_id: id,
                            head: info.head,
                        })
                        .ok_or(GpioError::BadWaveId(id)),
                    ChainOp::Delay(micros) => Ok(Step::Delay(micros)),
                    ChainOp::Repeat { counter, count, to } => {
                        Ok(Step::Repeat { counter, count, to })
                    }
                    ChainOp::Forever { to } => Ok(Step::Forever { to }),
                })
                .collect::<GpioResult<Vec<_>>>()?
        };
        self.stop_locked();
        if steps.is_empty() {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        state.phase = PlaybackPhase::Loading;
        let session = Session::chain(steps, chain.counters(), chain.is_endless());
        self.shared.begin(&mut state, session);
        debug!("Chain of {} ops sent", chain.ops().len());
        Ok(())
    }

    /// Stop the active session at the next descriptor boundary and wait
    /// for the engine to go idle. A queued sync send is discarded.
    pub fn stop(&self) {
        let _control = self.control.lock();
        self.stop_locked();
    }

    fn stop_locked(&self) {
        let mut state = self.shared.state.lock();
        state.pending = None;
        let Some(session) = state.session.as_ref() else {
            return;
        };
        self.shared.release(session);
        state.abort = true;
        self.shared.cond.notify_all();
        while state.session.is_some() {
            if self.engine_gone() {
                self.shared.end_session(&mut state);
                break;
            }
            self.shared.cond.wait_for(&mut state, IDLE_POLL);
        }
    }

    fn engine_gone(&self) -> bool {
        self.task
            .try_lock()
            .is_some_and(|t| t.as_ref().is_none_or(|h| h.is_finished()))
    }

    /// True while a session is active.
    pub fn busy(&self) -> bool {
        self.shared.state.lock().session.is_some()
    }

    /// Current phase.
    pub fn phase(&self) -> PlaybackPhase {
        self.shared.state.lock().phase
    }

    /// Active session, if any.
    pub fn current(&self) -> Option<PlaybackInfo> {
        self.shared.state.lock().session.as_ref().map(|s| s.info)
    }

    /// Wave being transmitted right now, if any.
    pub fn tx_at(&self) -> Option<u32> {
        self.current().and_then(|info| info.wave_id)
    }

    /// True if the active or queued session plays any wave numbered `id`
    /// or higher.
    pub fn uses_wave_from(&self, id: u32) -> bool {
        let state = self.shared.state.lock();
        state
            .session
            .iter()
            .chain(state.pending.iter())
            .any(|s| s.uses_wave_from(id))
    }

    /// Wait up to `timeout` for the engine to go idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.session.is_some() {
            if self.shared.cond.wait_until(&mut state, deadline).timed_out() {
                return state.session.is_none();
            }
        }
        true
    }

    /// Stop playback and the engine thread.
    pub fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.request_stop();
            {
                let _state = self.shared.state.lock();
                self.shared.cond.notify_all();
            }
            task.stop();
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_engine(shared: &PlaybackShared, token: &StopToken) {
    info!("Playback engine started");
    let mut deadline = Instant::now();
    loop {
        let work = {
            let mut state = shared.state.lock();
            loop {
                if token.is_stopped() {
                    shared.end_session(&mut state);
                    info!("Playback engine stopped");
                    return;
                }
                if state.abort {
                    shared.end_session(&mut state);
                    continue;
                }
                let Some(session) = state.session.as_mut() else {
                    shared.cond.wait_for(&mut state, IDLE_POLL);
                    continue;
                };
                if !session.started {
                    session.started = true;
                    deadline = Instant::now();
                }
                match session.next_work() {
                    Some(work) => break work,
                    None => shared.finish(&mut state),
                }
            }
        };

        let boundary = match work {
            Work::Descriptor(cursor) => {
                let fetched = {
                    let store = shared.store.read();
                    store.descriptor(cursor).map(|d| {
                        let word = match d.transfer {
                            Transfer::Set { ool } | Transfer::Clear { ool } => store.ool(ool),
                            _ => 0,
                        };
                        (d.transfer, word)
                    })
                };
                let Some((transfer, word)) = fetched else {
                    warn!("Playback cursor {} outside the descriptor arena", cursor);
                    shared.end_session(&mut shared.state.lock());
                    continue;
                };
                execute(shared, transfer, word, &mut deadline);
                Some(cursor)
            }
            Work::Delay(micros) => {
                pace(&mut deadline, micros);
                None
            }
        };

        let mut state = shared.state.lock();
        if state.abort {
            shared.end_session(&mut state);
            continue;
        }
        let at_boundary = match boundary {
            Some(cursor) => {
                let next = shared.store.read().descriptor(cursor).map(|d| d.next);
                state
                    .session
                    .as_mut()
                    .is_some_and(|session| session.advance(next))
            }
            None => true,
        };
        if at_boundary && state.pending.is_some() {
            shared.swap(&mut state);
        }
    }
}

fn execute(shared: &PlaybackShared, transfer: Transfer, word: u64, deadline: &mut Instant) {
    match transfer {
        Transfer::Set { .. } => shared.backend.set_levels(word),
        Transfer::Clear { .. } => shared.backend.clear_levels(word),
        Transfer::ReadLevels { ool } => {
            let levels = shared.backend.read_levels();
            shared.store.write().set_ool(ool, levels);
        }
        Transfer::ReadTick { ool } => {
            let tick = shared.clock.tick();
            shared.store.write().set_ool(ool, u64::from(tick));
        }
        Transfer::Delay { micros } => pace(deadline, micros),
    }
}

/// Advance the running deadline by `micros` and sleep until it.
fn pace(deadline: &mut Instant, micros: u32) {
    *deadline += Duration::from_micros(u64::from(micros));
    let now = Instant::now();
    if now > *deadline + MAX_LAG {
        *deadline = now;
    }
    sleep_until(*deadline);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::drivers::simulation::SimulationBackend;
    use crate::wave::compiler::compile;
    use dmagpio_common::config::WaveConfig;
    use dmagpio_common::pulse::{RawPulse, WaveFlags};

    struct Rig {
        store: Arc<RwLock<WaveStore>>,
        sim: Arc<SimulationBackend>,
        playback: PlaybackController,
    }

    fn rig() -> Rig {
        let store = Arc::new(RwLock::new(WaveStore::new(&WaveConfig {
            max_delay_micros: 1_000,
            ..WaveConfig::default()
        })));
        let sim = Arc::new(SimulationBackend::new());
        let playback = PlaybackController::start(
            Arc::clone(&store),
            sim.clone(),
            Arc::new(MonotonicClock::new()),
        )
        .unwrap();
        Rig {
            store,
            sim,
            playback,
        }
    }

    fn add(rig: &Rig, pulses: &[RawPulse]) -> u32 {
        let plan = compile(pulses, 1_000).unwrap();
        rig.store.write().insert(&plan).unwrap()
    }

    #[test]
    fn one_shot_runs_to_completion() {
        let rig = rig();
        let id = add(
            &rig,
            &[
                RawPulse::new(1 << 4, 0, 2_000, WaveFlags::empty()),
                RawPulse::new(1 << 5, 0, 100, WaveFlags::empty()),
            ],
        );
        let count = rig.playback.send(id, WaveMode::OneShot).unwrap();
        assert_eq!(count, 5);
        assert!(rig.playback.wait_idle(Duration::from_secs(5)));
        assert!(!rig.playback.busy());
        assert_eq!(rig.sim.latch() & 0b11_0000, 0b11_0000);
        assert_eq!(rig.playback.phase(), PlaybackPhase::Idle);
    }

    #[test]
    fn unknown_wave_is_rejected() {
        let rig = rig();
        assert_eq!(
            rig.playback.send(3, WaveMode::OneShot),
            Err(GpioError::BadWaveId(3))
        );
    }

    #[test]
    fn repeat_loops_until_stopped() {
        let rig = rig();
        let id = add(
            &rig,
            &[
                RawPulse::new(1, 0, 500, WaveFlags::empty()),
                RawPulse::new(0, 1, 500, WaveFlags::empty()),
            ],
        );
        rig.playback.send(id, WaveMode::Repeat).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let info = rig.playback.current().unwrap();
        assert_eq!(info.mode, WaveMode::Repeat);
        assert!(info.passes >= 2, "passes {}", info.passes);

        rig.playback.stop();
        assert!(!rig.playback.busy());
        let tail = rig.store.read().get(id).unwrap().tail();
        assert_eq!(rig.store.read().descriptor(tail).unwrap().next, Link::End);
    }

    #[test]
    fn send_replaces_active_session() {
        let rig = rig();
        let slow = add(&rig, &[RawPulse::delay(1_000)]);
        let fast = add(&rig, &[RawPulse::new(1 << 9, 0, 10, WaveFlags::empty())]);
        rig.playback.send(slow, WaveMode::Repeat).unwrap();
        rig.playback.send(fast, WaveMode::OneShot).unwrap();
        assert!(rig.playback.wait_idle(Duration::from_secs(5)));
        assert_ne!(rig.sim.latch() & (1 << 9), 0);
        let slow_tail = rig.store.read().get(slow).unwrap().tail();
        assert_eq!(
            rig.store.read().descriptor(slow_tail).unwrap().next,
            Link::End
        );
    }

    #[test]
    fn sync_send_waits_for_the_current_wave() {
        let rig = rig();
        let slow = add(&rig, &[RawPulse::delay(40_000)]);
        let fast = add(&rig, &[RawPulse::new(1 << 9, 0, 10, WaveFlags::empty())]);
        rig.playback.send(slow, WaveMode::OneShot).unwrap();
        rig.playback.send(fast, WaveMode::OneShotSync).unwrap();
        assert_eq!(rig.playback.tx_at(), Some(slow));
        assert_eq!(rig.sim.latch() & (1 << 9), 0);
        assert!(rig.playback.wait_idle(Duration::from_secs(5)));
        assert_ne!(rig.sim.latch() & (1 << 9), 0);
    }

    #[test]
    fn repeat_sync_hands_over_at_the_wrap() {
        let rig = rig();
        let slow = add(&rig, &[RawPulse::delay(5_000)]);
        let next = add(
            &rig,
            &[
                RawPulse::new(1 << 3, 0, 500, WaveFlags::empty()),
                RawPulse::new(0, 1 << 3, 500, WaveFlags::empty()),
            ],
        );
        rig.playback.send(slow, WaveMode::Repeat).unwrap();
        rig.playback.send(next, WaveMode::RepeatSync).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while rig.playback.tx_at() != Some(next) {
            assert!(Instant::now() < deadline, "never handed over");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(
            rig.playback.phase(),
            PlaybackPhase::Transmitting(WaveMode::Repeat)
        );
        let store = rig.store.read();
        let slow_tail = store.get(slow).unwrap().tail();
        let next_info = store.get(next).unwrap();
        assert_eq!(store.descriptor(slow_tail).unwrap().next, Link::End);
        assert_eq!(
            store.descriptor(next_info.tail()).unwrap().next,
            Link::Next(next_info.head)
        );
        drop(store);
        rig.playback.stop();
        assert!(!rig.playback.busy());
    }

    #[test]
    fn sync_send_when_idle_starts_at_once() {
        let rig = rig();
        let id = add(&rig, &[RawPulse::new(1 << 2, 0, 10, WaveFlags::empty())]);
        assert_eq!(rig.playback.send(id, WaveMode::OneShotSync).unwrap(), 2);
        assert!(rig.playback.wait_idle(Duration::from_secs(5)));
        assert_ne!(rig.sim.latch() & (1 << 2), 0);
    }

    fn drain(session: &mut Session, limit: usize) -> Vec<Work> {
        let mut done = Vec::new();
        while done.len() < limit {
            let Some(work) = session.next_work() else {
                break;
            };
            if let Work::Descriptor(_) = work {
                session.advance(Some(Link::End));
            }
            done.push(work);
        }
        done
    }

    #[test]
    fn counted_loop_replays_its_body() {
        let mut session = Session::chain(
            vec![
                Step::Play { wave_id: 1, head: 10 },
                Step::Play { wave_id: 2, head: 20 },
                Step::Repeat { counter: 0, count: 3, to: 1 },
                Step::Delay(50),
            ],
            1,
            false,
        );
        assert_eq!(
            drain(&mut session, 100),
            vec![
                Work::Descriptor(10),
                Work::Descriptor(20),
                Work::Descriptor(20),
                Work::Descriptor(20),
                Work::Delay(50),
            ]
        );
        assert_eq!(session.info.passes, 1);
        assert_eq!(session.counters, vec![0]);
    }

    #[test]
    fn nested_loops_inside_forever() {
        let mut session = Session::chain(
            vec![
                Step::Play { wave_id: 1, head: 10 },
                Step::Play { wave_id: 2, head: 20 },
                Step::Repeat { counter: 0, count: 2, to: 1 },
                Step::Forever { to: 0 },
            ],
            1,
            true,
        );
        let ids: Vec<usize> = drain(&mut session, 8)
            .into_iter()
            .filter_map(|w| match w {
                Work::Descriptor(head) => Some(head),
                Work::Delay(_) => None,
            })
            .collect();
        assert_eq!(ids, vec![10, 20, 20, 10, 20, 20, 10, 20]);
        assert_eq!(session.info.passes, 2);
        assert_eq!(session.info.mode, WaveMode::Repeat);
    }

    #[test]
    fn chain_plays_through_the_engine() {
        let rig = rig();
        let a = add(&rig, &[RawPulse::new(1 << 4, 0, 100, WaveFlags::empty())]);
        let b = add(&rig, &[RawPulse::new(1 << 5, 0, 100, WaveFlags::empty())]);
        let chain = WaveChain::parse(&[a as u8, 255, 0, b as u8, 255, 1, 3, 0, 255, 2, 0x10, 0x27]).unwrap();
        rig.playback.send_chain(&chain).unwrap();
        assert_eq!(rig.playback.phase(), PlaybackPhase::Chaining);
        assert!(rig.playback.wait_idle(Duration::from_secs(5)));
        assert_eq!(rig.sim.latch() & 0b11_0000, 0b11_0000);
        assert_eq!(rig.playback.tx_at(), None);

        let missing = WaveChain::parse(&[a as u8, 9]).unwrap();
        assert_eq!(rig.playback.send_chain(&missing), Err(GpioError::BadWaveId(9)));
    }

    #[test]
    fn endless_chain_runs_until_stopped() {
        let rig = rig();
        let a = add(&rig, &[RawPulse::delay(500)]);
        let chain = WaveChain::parse(&[255, 0, a as u8, 255, 3]).unwrap();
        rig.playback.send_chain(&chain).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let info = rig.playback.current().unwrap();
        assert!(info.chained);
        assert!(info.passes >= 2, "passes {}", info.passes);
        assert!(rig.playback.uses_wave_from(a));
        assert!(!rig.playback.uses_wave_from(a + 1));
        rig.playback.stop();
        assert!(!rig.playback.busy());
    }

    #[test]
    fn captures_are_written_back() {
        let rig = rig();
        rig.sim.drive(7, true);
        let id = add(&rig, &[RawPulse::new(0, 0, 10, WaveFlags::READ | WaveFlags::TICK)]);
        rig.playback.send(id, WaveMode::OneShot).unwrap();
        assert!(rig.playback.wait_idle(Duration::from_secs(5)));
        let captures = rig.store.read().captures(id).unwrap();
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[0], crate::wave::store::Capture::Levels(1 << 7));
    }
}
