//! Script interpreter.
//!
//! [`Machine`] holds the register file of one script and executes a single
//! instruction per [`Machine::step`]. Instructions that touch pins,
//! waveforms or time are not executed by the machine: `step` returns them
//! as a [`Flow`] so the caller can perform them without holding the lock
//! that guards the machine, then hands the result back with
//! [`Machine::complete`].

use super::parse::{Instr, Operand, Program, Var};
use crate::dispatch::EdgeWaiter;
use dmagpio_common::consts::{
    MAX_MICS_DELAY, MAX_MILS_DELAY, MAX_SCRIPT_VARS, SCRIPT_CALL_DEPTH, SCRIPT_STACK_DEPTH,
};
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::types::{PinMode, Pull, WaveMode};
use std::sync::Arc;
use std::time::Duration;

/// Services a running script calls into.
pub trait ScriptHost: Send + Sync {
    /// Level of `pin`.
    fn read(&self, pin: u32) -> GpioResult<u32>;
    /// Drive `pin` to `level`.
    fn write(&self, pin: u32, level: u32) -> GpioResult<()>;
    /// Select the function of `pin`.
    fn set_mode(&self, pin: u32, mode: PinMode) -> GpioResult<()>;
    /// Function of `pin`.
    fn mode(&self, pin: u32) -> GpioResult<PinMode>;
    /// Configure the pull of `pin`.
    fn set_pull(&self, pin: u32, pull: Pull) -> GpioResult<()>;
    /// Start PWM on `pin`.
    fn pwm(&self, pin: u32, duty: u32) -> GpioResult<()>;
    /// Start servo pulses on `pin`.
    fn servo(&self, pin: u32, width: u32) -> GpioResult<()>;
    /// Emit a trigger pulse.
    fn trigger(&self, pin: u32, pulse_len: u32, level: u32) -> GpioResult<()>;
    /// Arm the watchdog of `pin`.
    fn watchdog(&self, pin: u32, millis: u32) -> GpioResult<()>;
    /// Levels of pins 0..=31.
    fn read_bank1(&self) -> u32;
    /// Levels of pins 32..=53.
    fn read_bank2(&self) -> u32;
    /// Drive bank 1 pins high.
    fn set_bank1(&self, bits: u32);
    /// Drive bank 2 pins high.
    fn set_bank2(&self, bits: u32);
    /// Drive bank 1 pins low.
    fn clear_bank1(&self, bits: u32);
    /// Drive bank 2 pins low.
    fn clear_bank2(&self, bits: u32);
    /// Current tick.
    fn tick(&self) -> u32;
    /// Transmit a waveform, returning its descriptor count.
    fn wave_send(&self, id: u32, mode: WaveMode) -> GpioResult<usize>;
    /// Stop waveform transmission.
    fn wave_stop(&self);
    /// True while a waveform is transmitting.
    fn wave_busy(&self) -> bool;
    /// Waiter for edges on `mask`.
    fn edge_waiter(&self, mask: u32) -> Arc<EdgeWaiter>;
}

/// Host operation requested by the program, operands already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Command {
    Read(i32),
    Write(i32, i32),
    Modes(i32, i32),
    Modeg(i32),
    Pud(i32, i32),
    Pwm(i32, i32),
    Servo(i32, i32),
    Trig(i32, i32, i32),
    Wdog(i32, i32),
    Br1,
    Br2,
    Bs1(i32),
    Bs2(i32),
    Bc1(i32),
    Bc2(i32),
    Tick,
    Wvtx(i32, WaveMode),
    Wvhlt,
    Wvbsy,
}

impl Command {
    /// Perform the command, returning the value for `A` (a negative error
    /// code on failure).
    pub fn execute(self, host: &dyn ScriptHost) -> i32 {
        fn status(r: GpioResult<()>) -> i32 {
            r.map_or_else(|e| e.code(), |()| 0)
        }
        let u = |v: i32| v as u32;
        match self {
            Self::Read(pin) => host.read(u(pin)).map_or_else(|e| e.code(), |l| l as i32),
            Self::Write(pin, level) => status(host.write(u(pin), u(level))),
            Self::Modes(pin, mode) => {
                status(PinMode::try_from(u(mode)).and_then(|m| host.set_mode(u(pin), m)))
            }
            Self::Modeg(pin) => host.mode(u(pin)).map_or_else(|e| e.code(), |m| m as i32),
            Self::Pud(pin, pud) => {
                status(Pull::try_from(u(pud)).and_then(|p| host.set_pull(u(pin), p)))
            }
            Self::Pwm(pin, duty) => status(host.pwm(u(pin), u(duty))),
            Self::Servo(pin, width) => status(host.servo(u(pin), u(width))),
            Self::Trig(pin, len, level) => status(host.trigger(u(pin), u(len), u(level))),
            Self::Wdog(pin, millis) => status(host.watchdog(u(pin), u(millis))),
            Self::Br1 => host.read_bank1() as i32,
            Self::Br2 => host.read_bank2() as i32,
            Self::Bs1(bits) => {
                host.set_bank1(u(bits));
                0
            }
            Self::Bs2(bits) => {
                host.set_bank2(u(bits));
                0
            }
            Self::Bc1(bits) => {
                host.clear_bank1(u(bits));
                0
            }
            Self::Bc2(bits) => {
                host.clear_bank2(u(bits));
                0
            }
            Self::Tick => host.tick() as i32,
            Self::Wvtx(id, mode) => host
                .wave_send(u(id), mode)
                .map_or_else(|e| e.code(), |cbs| cbs as i32),
            Self::Wvhlt => {
                host.wave_stop();
                0
            }
            Self::Wvbsy => i32::from(host.wave_busy()),
        }
    }
}

/// What the caller must do after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Step again.
    Next,
    /// Run a host command, then [`Machine::complete`] with its result.
    Host(Command),
    /// Sleep, then step again.
    Sleep(Duration),
    /// Block until an edge on the mask, then complete with the changed bits.
    Wait(u32),
    /// Program finished normally.
    Halt,
    /// Runtime fault; the script fails.
    Fault(String),
}

/// Register file and stacks of one script.
#[derive(Debug, Clone)]
pub struct Machine {
    vars: [i32; MAX_SCRIPT_VARS],
    a: i32,
    f: i32,
    pc: usize,
    stack: heapless::Vec<i32, SCRIPT_STACK_DEPTH>,
    calls: heapless::Vec<usize, SCRIPT_CALL_DEPTH>,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            vars: [0; MAX_SCRIPT_VARS],
            a: 0,
            f: 0,
            pc: 0,
            stack: heapless::Vec::new(),
            calls: heapless::Vec::new(),
        }
    }
}

impl Machine {
    /// Prepare a run: registers and stacks cleared, `params` copied into
    /// the first variables.
    pub fn reset(&mut self, params: &[i32]) {
        self.a = 0;
        self.f = 0;
        self.pc = 0;
        self.stack.clear();
        self.calls.clear();
        self.vars[..params.len()].copy_from_slice(params);
    }

    /// Variable file.
    pub fn vars(&self) -> &[i32; MAX_SCRIPT_VARS] {
        &self.vars
    }

    /// Accumulator.
    pub fn accumulator(&self) -> i32 {
        self.a
    }

    /// Store a host result in the accumulator.
    pub fn complete(&mut self, result: i32) {
        self.a = result;
        self.f = result;
    }

    fn value(&self, op: Operand) -> i32 {
        match op {
            Operand::Imm(v) => v,
            Operand::Var(v) => self.vars[usize::from(v)],
        }
    }

    fn var_mut(&mut self, v: Var) -> &mut i32 {
        &mut self.vars[usize::from(v)]
    }

    fn arith(&mut self, result: i32) -> Flow {
        self.a = result;
        self.f = result;
        Flow::Next
    }

    fn jump_if(&mut self, cond: bool, to: usize) -> Flow {
        if cond {
            self.pc = to;
        }
        Flow::Next
    }

    /// Execute the instruction at the program counter.
    pub fn step(&mut self, program: &Program) -> Flow {
        let Some(&instr) = program.instrs.get(self.pc) else {
            return Flow::Halt;
        };
        self.pc += 1;
        match instr {
            Instr::Nop => Flow::Next,
            Instr::Halt => Flow::Halt,
            Instr::Ret => match self.calls.pop() {
                Some(back) => {
                    self.pc = back;
                    Flow::Next
                }
                None => Flow::Halt,
            },
            Instr::Add(x) => self.arith(self.a.wrapping_add(self.value(x))),
            Instr::And(x) => self.arith(self.a & self.value(x)),
            Instr::Or(x) => self.arith(self.a | self.value(x)),
            Instr::Xor(x) => self.arith(self.a ^ self.value(x)),
            Instr::Sub(x) => self.arith(self.a.wrapping_sub(self.value(x))),
            Instr::Mlt(x) => self.arith(self.a.wrapping_mul(self.value(x))),
            Instr::Div(x) => match self.value(x) {
                0 => Flow::Fault("division by zero".into()),
                d => self.arith(self.a.wrapping_div(d)),
            },
            Instr::Mod(x) => match self.value(x) {
                0 => Flow::Fault("modulo by zero".into()),
                d => self.arith(self.a.wrapping_rem(d)),
            },
            Instr::Cmp(x) => {
                self.f = self.a.wrapping_sub(self.value(x));
                Flow::Next
            }
            Instr::Lda(x) => {
                self.a = self.value(x);
                Flow::Next
            }
            Instr::Sta(y) => {
                *self.var_mut(y) = self.a;
                Flow::Next
            }
            Instr::Ld(y, x) => {
                *self.var_mut(y) = self.value(x);
                Flow::Next
            }
            Instr::X(y1, y2) => {
                self.vars.swap(usize::from(y1), usize::from(y2));
                Flow::Next
            }
            Instr::Xa(y) => {
                std::mem::swap(&mut self.a, &mut self.vars[usize::from(y)]);
                Flow::Next
            }
            Instr::Dcr(y) => {
                let var = self.var_mut(y);
                *var = var.wrapping_sub(1);
                self.f = *var;
                Flow::Next
            }
            Instr::Inr(y) => {
                let var = self.var_mut(y);
                *var = var.wrapping_add(1);
                self.f = *var;
                Flow::Next
            }
            Instr::Dcra => self.arith(self.a.wrapping_sub(1)),
            Instr::Inra => self.arith(self.a.wrapping_add(1)),
            Instr::Push(y) => self.push(self.vars[usize::from(y)]),
            Instr::Pusha => self.push(self.a),
            Instr::Pop(y) => match self.stack.pop() {
                Some(value) => {
                    *self.var_mut(y) = value;
                    Flow::Next
                }
                None => Flow::Fault("stack underflow".into()),
            },
            Instr::Popa => match self.stack.pop() {
                Some(value) => {
                    self.a = value;
                    Flow::Next
                }
                None => Flow::Fault("stack underflow".into()),
            },
            Instr::Rl(y, x) => {
                let bits = self.value(x) as u32;
                let var = self.var_mut(y);
                *var = (*var as u32).rotate_left(bits % 32) as i32;
                self.f = *var;
                Flow::Next
            }
            Instr::Rr(y, x) => {
                let bits = self.value(x) as u32;
                let var = self.var_mut(y);
                *var = (*var as u32).rotate_right(bits % 32) as i32;
                self.f = *var;
                Flow::Next
            }
            Instr::Rla(x) => {
                let bits = self.value(x) as u32 % 32;
                self.arith((self.a as u32).rotate_left(bits) as i32)
            }
            Instr::Rra(x) => {
                let bits = self.value(x) as u32 % 32;
                self.arith((self.a as u32).rotate_right(bits) as i32)
            }
            Instr::Jmp(to) => self.jump_if(true, to),
            Instr::Jz(to) => self.jump_if(self.f == 0, to),
            Instr::Jnz(to) => self.jump_if(self.f != 0, to),
            Instr::Jm(to) => self.jump_if(self.f < 0, to),
            Instr::Jp(to) => self.jump_if(self.f >= 0, to),
            Instr::Call(to) => {
                if self.calls.push(self.pc).is_err() {
                    return Flow::Fault("call depth exceeded".into());
                }
                self.pc = to;
                Flow::Next
            }
            Instr::Mics(x) => {
                let n = self.value(x);
                let err = GpioError::BadMicsDelay(i64::from(n));
                delay(n, MAX_MICS_DELAY, Duration::from_micros(1), err)
                    .unwrap_or_else(|code| self.arith(code))
            }
            Instr::Mils(x) => {
                let n = self.value(x);
                let err = GpioError::BadMilsDelay(i64::from(n));
                delay(n, MAX_MILS_DELAY, Duration::from_millis(1), err)
                    .unwrap_or_else(|code| self.arith(code))
            }
            Instr::Wait(x) => Flow::Wait(self.value(x) as u32),
            Instr::Read(g) => Flow::Host(Command::Read(self.value(g))),
            Instr::Write(g, l) => Flow::Host(Command::Write(self.value(g), self.value(l))),
            Instr::Modes(g, m) => Flow::Host(Command::Modes(self.value(g), self.value(m))),
            Instr::Modeg(g) => Flow::Host(Command::Modeg(self.value(g))),
            Instr::Pud(g, p) => Flow::Host(Command::Pud(self.value(g), self.value(p))),
            Instr::Pwm(g, d) => Flow::Host(Command::Pwm(self.value(g), self.value(d))),
            Instr::Servo(g, w) => Flow::Host(Command::Servo(self.value(g), self.value(w))),
            Instr::Trig(g, len, l) => {
                Flow::Host(Command::Trig(self.value(g), self.value(len), self.value(l)))
            }
            Instr::Wdog(g, ms) => Flow::Host(Command::Wdog(self.value(g), self.value(ms))),
            Instr::Br1 => Flow::Host(Command::Br1),
            Instr::Br2 => Flow::Host(Command::Br2),
            Instr::Bs1(x) => Flow::Host(Command::Bs1(self.value(x))),
            Instr::Bs2(x) => Flow::Host(Command::Bs2(self.value(x))),
            Instr::Bc1(x) => Flow::Host(Command::Bc1(self.value(x))),
            Instr::Bc2(x) => Flow::Host(Command::Bc2(self.value(x))),
            Instr::Tick => Flow::Host(Command::Tick),
            Instr::Wvtx(w) => Flow::Host(Command::Wvtx(self.value(w), WaveMode::OneShot)),
            Instr::Wvtxr(w) => Flow::Host(Command::Wvtx(self.value(w), WaveMode::Repeat)),
            Instr::Wvhlt => Flow::Host(Command::Wvhlt),
            Instr::Wvbsy => Flow::Host(Command::Wvbsy),
        }
    }

    fn push(&mut self, value: i32) -> Flow {
        match self.stack.push(value) {
            Ok(()) => Flow::Next,
            Err(_) => Flow::Fault("stack overflow".into()),
        }
    }
}

fn delay(value: i32, max: u32, unit: Duration, err: GpioError) -> Result<Flow, i32> {
    if value < 0 || value as u32 > max {
        return Err(err.code());
    }
    Ok(Flow::Sleep(unit * value as u32))
}
