//! Stored scripts and their worker threads.
//!
//! Each stored script owns a worker thread that sleeps until `run` and then
//! steps the machine. The machine sits behind a mutex taken once per
//! instruction, so `status` can snapshot the parameters at any time. Host
//! commands, delays and edge waits run with the mutex released.

use super::parse::{self, Program};
use super::vm::{Flow, Machine, ScriptHost};
use crate::clock;
use crate::task::TaskHandle;
use dmagpio_common::consts::{MAX_SCRIPT_PARAMS, MAX_SCRIPTS};
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::types::ScriptStatus;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Longest uninterrupted wait while a stop may be pending.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Delays at or below this are spun rather than slept.
const SPIN_DELAY: Duration = Duration::from_micros(100);

struct RunState {
    status: ScriptStatus,
    machine: Machine,
    run_requested: bool,
    stop_requested: bool,
    closed: bool,
}

struct ScriptSlot {
    id: u32,
    program: Program,
    state: Mutex<RunState>,
    cond: Condvar,
}

impl ScriptSlot {
    fn set_status(&self, state: &mut RunState, status: ScriptStatus) {
        state.status = status;
        self.cond.notify_all();
    }

    /// Sleep for `span` with the lock released, waking early on stop.
    /// Returns `false` if stopped.
    fn sleep(&self, span: Duration) -> bool {
        if span <= SPIN_DELAY {
            clock::delay_micros(span.as_micros() as u32);
            return !self.state.lock().stop_requested;
        }
        let deadline = Instant::now() + span;
        let mut state = self.state.lock();
        while !state.stop_requested {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return !state.stop_requested;
            }
        }
        false
    }

    fn execute(&self, host: &dyn ScriptHost) {
        loop {
            let flow = {
                let mut state = self.state.lock();
                if state.stop_requested {
                    self.set_status(&mut state, ScriptStatus::Halted);
                    return;
                }
                state.machine.step(&self.program)
            };
            match flow {
                Flow::Next => {}
                Flow::Host(command) => {
                    let result = command.execute(host);
                    self.state.lock().machine.complete(result);
                }
                Flow::Sleep(span) => {
                    self.enter_wait();
                    if self.sleep(span) {
                        self.leave_wait();
                    }
                }
                Flow::Wait(mask) => {
                    let waiter = host.edge_waiter(mask);
                    self.enter_wait();
                    let bits = loop {
                        if let Some(bits) = waiter.wait(STOP_POLL) {
                            break Some(bits);
                        }
                        if self.state.lock().stop_requested {
                            break None;
                        }
                    };
                    if let Some(bits) = bits {
                        self.state.lock().machine.complete(bits as i32);
                        self.leave_wait();
                    }
                }
                Flow::Halt => {
                    let mut state = self.state.lock();
                    self.set_status(&mut state, ScriptStatus::Halted);
                    debug!("Script {} halted", self.id);
                    return;
                }
                Flow::Fault(cause) => {
                    let mut state = self.state.lock();
                    self.set_status(&mut state, ScriptStatus::Failed);
                    error!("Script {} failed: {}", self.id, cause);
                    return;
                }
            }
        }
    }

    fn enter_wait(&self) {
        let mut state = self.state.lock();
        if state.status == ScriptStatus::Running {
            self.set_status(&mut state, ScriptStatus::Waiting);
        }
    }

    fn leave_wait(&self) {
        let mut state = self.state.lock();
        if state.status == ScriptStatus::Waiting {
            self.set_status(&mut state, ScriptStatus::Running);
        }
    }
}

fn worker(slot: Arc<ScriptSlot>, host: Arc<dyn ScriptHost>) {
    {
        let mut state = slot.state.lock();
        if state.status == ScriptStatus::Initing {
            slot.set_status(&mut state, ScriptStatus::Halted);
        }
    }
    loop {
        {
            let mut state = slot.state.lock();
            while !state.run_requested && !state.closed {
                slot.cond.wait(&mut state);
            }
            if state.closed {
                // A run accepted just before close never reached `execute`.
                if state.status.is_active() {
                    slot.set_status(&mut state, ScriptStatus::Halted);
                }
                return;
            }
            state.run_requested = false;
        }
        slot.execute(host.as_ref());
    }
}

struct Entry {
    slot: Arc<ScriptSlot>,
    _task: TaskHandle,
}

/// Fixed table of stored scripts.
pub struct ScriptRegistry {
    entries: Mutex<Vec<Option<Entry>>>,
    host: Arc<dyn ScriptHost>,
}

impl ScriptRegistry {
    /// Create an empty table whose scripts call into `host`.
    pub fn new(host: Arc<dyn ScriptHost>) -> Self {
        Self {
            entries: Mutex::new((0..MAX_SCRIPTS).map(|_| None).collect()),
            host,
        }
    }

    fn slot(&self, id: u32) -> GpioResult<Arc<ScriptSlot>> {
        self.entries
            .lock()
            .get(id as usize)
            .and_then(Option::as_ref)
            .map(|e| Arc::clone(&e.slot))
            .ok_or(GpioError::BadScriptId(id))
    }

    /// Validate `text` and store it. Returns once the script is `Halted`
    /// and ready to run.
    ///
    /// # Errors
    /// Any parse error, `NoScriptRoom` when every slot is used, or
    /// `InitFailed` if the worker cannot start.
    pub fn store(&self, text: &str) -> GpioResult<u32> {
        let program = parse::parse(text)?;
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(Option::is_none)
            .ok_or(GpioError::NoScriptRoom)?;
        let id = index as u32;
        let slot = Arc::new(ScriptSlot {
            id,
            program,
            state: Mutex::new(RunState {
                status: ScriptStatus::Initing,
                machine: Machine::default(),
                run_requested: false,
                stop_requested: false,
                closed: false,
            }),
            cond: Condvar::new(),
        });
        let worker_slot = Arc::clone(&slot);
        let host = Arc::clone(&self.host);
        let task = TaskHandle::spawn(&format!("dmagpio-script-{id}"), move |_token| {
            worker(worker_slot, host)
        })?;
        entries[index] = Some(Entry {
            slot: Arc::clone(&slot),
            _task: task,
        });
        drop(entries);

        let mut state = slot.state.lock();
        while state.status == ScriptStatus::Initing {
            slot.cond.wait(&mut state);
        }
        info!("Script {} stored ({} instructions)", id, slot.program.instrs.len());
        Ok(id)
    }

    /// Start script `id` with `params` seeded into its first variables.
    ///
    /// # Errors
    /// `BadScriptId`, `TooManyParams` (more than 10) or `NotHalted` if it
    /// is already running.
    pub fn run(&self, id: u32, params: &[i32]) -> GpioResult<()> {
        if params.len() > MAX_SCRIPT_PARAMS {
            return Err(GpioError::TooManyParams(params.len()));
        }
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        if !matches!(state.status, ScriptStatus::Halted | ScriptStatus::Failed) {
            return Err(GpioError::NotHalted(id));
        }
        state.machine.reset(params);
        state.stop_requested = false;
        state.run_requested = true;
        slot.set_status(&mut state, ScriptStatus::Running);
        debug!("Script {} run with {} params", id, params.len());
        Ok(())
    }

    /// Run state and parameters 0..10 of script `id`.
    ///
    /// # Errors
    /// `BadScriptId`.
    pub fn status(&self, id: u32) -> GpioResult<(ScriptStatus, [i32; MAX_SCRIPT_PARAMS])> {
        let slot = self.slot(id)?;
        let state = slot.state.lock();
        let mut params = [0; MAX_SCRIPT_PARAMS];
        params.copy_from_slice(&state.machine.vars()[..MAX_SCRIPT_PARAMS]);
        Ok((state.status, params))
    }

    /// Stop script `id` at its next instruction boundary and wait for it.
    ///
    /// # Errors
    /// `BadScriptId`.
    pub fn stop(&self, id: u32) -> GpioResult<()> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        if !state.status.is_active() {
            return Ok(());
        }
        state.stop_requested = true;
        slot.cond.notify_all();
        wait_inactive(&slot, &mut state);
        debug!("Script {} stopped", id);
        Ok(())
    }

    /// Remove script `id`.
    ///
    /// # Errors
    /// `BadScriptId`, or `NotHalted` while it runs.
    pub fn delete(&self, id: u32) -> GpioResult<()> {
        let entry = {
            let mut entries = self.entries.lock();
            let slot = entries
                .get(id as usize)
                .and_then(Option::as_ref)
                .ok_or(GpioError::BadScriptId(id))?;
            if slot.slot.state.lock().status.is_active() {
                return Err(GpioError::NotHalted(id));
            }
            entries[id as usize].take()
        };
        if let Some(entry) = entry {
            close(&entry.slot);
        }
        debug!("Script {} deleted", id);
        Ok(())
    }

    /// Stop and remove every script.
    pub fn shutdown(&self) {
        let entries: Vec<Entry> = self
            .entries
            .lock()
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for entry in &entries {
            close(&entry.slot);
        }
        drop(entries);
    }
}

impl Drop for ScriptRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wait_inactive(slot: &ScriptSlot, state: &mut MutexGuard<'_, RunState>) {
    while state.status.is_active() {
        slot.cond.wait_for(state, STOP_POLL);
    }
}

fn close(slot: &ScriptSlot) {
    let mut state = slot.state.lock();
    state.stop_requested = true;
    state.closed = true;
    slot.cond.notify_all();
    wait_inactive(slot, &mut state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{EdgeWaiter, DispatchEngine, NotifyRegistry};
    use dmagpio_common::types::{PinMode, Pull, WaveMode};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Host recording writes and serving edges from a private engine.
    struct FakeHost {
        writes: Mutex<Vec<(u32, u32)>>,
        tick: AtomicU32,
        dispatch: DispatchEngine,
    }

    impl FakeHost {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: Mutex::new(Vec::new()),
                tick: AtomicU32::new(0),
                dispatch: DispatchEngine::new(Arc::new(NotifyRegistry::new(4))),
            })
        }
    }

    impl ScriptHost for FakeHost {
        fn read(&self, pin: u32) -> GpioResult<u32> {
            Ok(pin % 2)
        }
        fn write(&self, pin: u32, level: u32) -> GpioResult<()> {
            self.writes.lock().push((pin, level));
            Ok(())
        }
        fn set_mode(&self, _pin: u32, _mode: PinMode) -> GpioResult<()> {
            Ok(())
        }
        fn mode(&self, _pin: u32) -> GpioResult<PinMode> {
            Ok(PinMode::Output)
        }
        fn set_pull(&self, _pin: u32, _pull: Pull) -> GpioResult<()> {
            Ok(())
        }
        fn pwm(&self, pin: u32, _duty: u32) -> GpioResult<()> {
            Err(GpioError::BadUserGpio(pin))
        }
        fn servo(&self, _pin: u32, _width: u32) -> GpioResult<()> {
            Ok(())
        }
        fn trigger(&self, _pin: u32, _len: u32, _level: u32) -> GpioResult<()> {
            Ok(())
        }
        fn watchdog(&self, _pin: u32, _millis: u32) -> GpioResult<()> {
            Ok(())
        }
        fn read_bank1(&self) -> u32 {
            0
        }
        fn read_bank2(&self) -> u32 {
            0
        }
        fn set_bank1(&self, _bits: u32) {}
        fn set_bank2(&self, _bits: u32) {}
        fn clear_bank1(&self, _bits: u32) {}
        fn clear_bank2(&self, _bits: u32) {}
        fn tick(&self) -> u32 {
            self.tick.fetch_add(1, Ordering::SeqCst)
        }
        fn wave_send(&self, id: u32, _mode: WaveMode) -> GpioResult<usize> {
            Err(GpioError::BadWaveId(id))
        }
        fn wave_stop(&self) {}
        fn wave_busy(&self) -> bool {
            false
        }
        fn edge_waiter(&self, mask: u32) -> Arc<EdgeWaiter> {
            self.dispatch.edge_waiter(mask)
        }
    }

    fn wait_for(reg: &ScriptRegistry, id: u32, want: ScriptStatus) -> [i32; MAX_SCRIPT_PARAMS] {
        for _ in 0..400 {
            let (status, params) = reg.status(id).unwrap();
            if status == want {
                return params;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("script {id} never reached {want:?}");
    }

    #[test]
    fn countdown_halts_with_zero() {
        let reg = ScriptRegistry::new(FakeHost::new());
        let id = reg.store("LD 0 5; TAG 1; DCR 0; JNZ 1; HALT").unwrap();
        assert_eq!(reg.status(id).unwrap().0, ScriptStatus::Halted);
        reg.run(id, &[]).unwrap();
        let params = wait_for(&reg, id, ScriptStatus::Halted);
        assert_eq!(params[0], 0);
    }

    #[test]
    fn store_rejects_bad_text() {
        let reg = ScriptRegistry::new(FakeHost::new());
        assert!(matches!(reg.store("JMP 9"), Err(GpioError::BadTag(9))));
        assert_eq!(reg.store("HALT").unwrap(), 0);
    }

    #[test]
    fn run_validation() {
        let reg = ScriptRegistry::new(FakeHost::new());
        assert_eq!(reg.run(3, &[]), Err(GpioError::BadScriptId(3)));
        let id = reg.store("TAG 0 MILS 10 JMP 0").unwrap();
        assert_eq!(reg.run(id, &[0; 11]), Err(GpioError::TooManyParams(11)));
        reg.run(id, &[1, 2, 3]).unwrap();
        assert_eq!(reg.run(id, &[]), Err(GpioError::NotHalted(id)));
        assert_eq!(reg.delete(id), Err(GpioError::NotHalted(id)));
        let (status, params) = reg.status(id).unwrap();
        assert!(status.is_active());
        assert_eq!(&params[..3], &[1, 2, 3]);
        reg.stop(id).unwrap();
        assert_eq!(reg.status(id).unwrap().0, ScriptStatus::Halted);
        reg.delete(id).unwrap();
        assert_eq!(reg.status(id), Err(GpioError::BadScriptId(id)));
    }

    #[test]
    fn long_delay_is_interruptible() {
        let reg = ScriptRegistry::new(FakeHost::new());
        let id = reg.store("MILS 60000").unwrap();
        reg.run(id, &[]).unwrap();
        wait_for(&reg, id, ScriptStatus::Waiting);
        let start = Instant::now();
        reg.stop(id).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn host_results_land_in_accumulator() {
        let host = FakeHost::new();
        let reg = ScriptRegistry::new(Arc::clone(&host) as Arc<dyn ScriptHost>);
        let id = reg
            .store("W 4 1 R 7 STA p0 PWM 3 10 STA p1 WVTX 2 STA p2")
            .unwrap();
        reg.run(id, &[]).unwrap();
        let params = wait_for(&reg, id, ScriptStatus::Halted);
        assert_eq!(params[0], 1);
        assert_eq!(params[1], GpioError::BadUserGpio(3).code());
        assert_eq!(params[2], GpioError::BadWaveId(2).code());
        assert_eq!(*host.writes.lock(), vec![(4, 1)]);
    }

    #[test]
    fn wait_resumes_on_edge() {
        let host = FakeHost::new();
        let reg = ScriptRegistry::new(Arc::clone(&host) as Arc<dyn ScriptHost>);
        let id = reg.store("WAIT 0x8 STA p0").unwrap();
        reg.run(id, &[]).unwrap();
        wait_for(&reg, id, ScriptStatus::Waiting);
        host.dispatch.process_batch(
            &[
                dmagpio_common::report::Sample { tick: 0, level: 0 },
                dmagpio_common::report::Sample { tick: 1, level: 0x8 },
            ],
            1,
        );
        let params = wait_for(&reg, id, ScriptStatus::Halted);
        assert_eq!(params[0], 0x8);
    }

    #[test]
    fn fault_marks_failed_and_can_rerun() {
        let reg = ScriptRegistry::new(FakeHost::new());
        let id = reg.store("LDA 1 DIV p0 STA p1").unwrap();
        reg.run(id, &[0]).unwrap();
        wait_for(&reg, id, ScriptStatus::Failed);
        reg.run(id, &[1]).unwrap();
        let params = wait_for(&reg, id, ScriptStatus::Halted);
        assert_eq!(params[1], 1);
    }

    #[test]
    fn shutdown_right_after_run_does_not_hang() {
        for _ in 0..50 {
            let reg = ScriptRegistry::new(FakeHost::new());
            let id = reg.store("TAG 0 MILS 10 JMP 0").unwrap();
            reg.run(id, &[]).unwrap();
            reg.shutdown();
            assert_eq!(reg.status(id), Err(GpioError::BadScriptId(id)));
        }
    }

    #[test]
    fn close_halts_a_run_the_worker_never_started() {
        let reg = ScriptRegistry::new(FakeHost::new());
        let id = reg.store("HALT").unwrap();
        let slot = reg.slot(id).unwrap();
        {
            // Hold the lock so the worker cannot pick the run up first.
            let mut state = slot.state.lock();
            state.run_requested = true;
            slot.set_status(&mut state, ScriptStatus::Running);
            state.stop_requested = true;
            state.closed = true;
            slot.cond.notify_all();
            wait_inactive(&slot, &mut state);
            assert_eq!(state.status, ScriptStatus::Halted);
        }
        reg.shutdown();
    }

    #[test]
    fn slots_are_bounded() {
        let reg = ScriptRegistry::new(FakeHost::new());
        for _ in 0..MAX_SCRIPTS {
            reg.store("HALT").unwrap();
        }
        assert!(matches!(reg.store("HALT"), Err(GpioError::NoScriptRoom)));
        reg.delete(7).unwrap();
        assert_eq!(reg.store("NOP").unwrap(), 7);
        reg.shutdown();
    }
}
