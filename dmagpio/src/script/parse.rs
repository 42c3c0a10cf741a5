//! Script text to instruction list.
//!
//! Tokens are separated by whitespace or `;`, `#` comments run to the end
//! of the line and mnemonics are case-insensitive. Each mnemonic takes a
//! fixed number of operands. Parsing runs in two passes: the first
//! collects `TAG` labels, the second builds instructions and resolves jump
//! targets to instruction indices.

use dmagpio_common::consts::{MAX_SCRIPT_PARAMS, MAX_SCRIPT_TAGS, MAX_SCRIPT_VARS};
use dmagpio_common::error::{GpioError, GpioResult};

/// Index into the variable file.
pub type Var = u8;

/// Value operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Literal.
    Imm(i32),
    /// Contents of a variable (parameters are variables 0..10).
    Var(Var),
}

/// One decoded instruction. Jump targets are instruction indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Instr {
    Nop,
    Halt,
    Ret,
    Add(Operand),
    And(Operand),
    Or(Operand),
    Xor(Operand),
    Sub(Operand),
    Mlt(Operand),
    Div(Operand),
    Mod(Operand),
    Cmp(Operand),
    Lda(Operand),
    Sta(Var),
    Ld(Var, Operand),
    X(Var, Var),
    Xa(Var),
    Dcr(Var),
    Inr(Var),
    Dcra,
    Inra,
    Push(Var),
    Pop(Var),
    Pusha,
    Popa,
    Rl(Var, Operand),
    Rr(Var, Operand),
    Rla(Operand),
    Rra(Operand),
    Jmp(usize),
    Jz(usize),
    Jnz(usize),
    Jm(usize),
    Jp(usize),
    Call(usize),
    Read(Operand),
    Write(Operand, Operand),
    Modes(Operand, Operand),
    Modeg(Operand),
    Pud(Operand, Operand),
    Pwm(Operand, Operand),
    Servo(Operand, Operand),
    Trig(Operand, Operand, Operand),
    Wdog(Operand, Operand),
    Br1,
    Br2,
    Bs1(Operand),
    Bs2(Operand),
    Bc1(Operand),
    Bc2(Operand),
    Tick,
    Mics(Operand),
    Mils(Operand),
    Wait(Operand),
    Wvtx(Operand),
    Wvtxr(Operand),
    Wvhlt,
    Wvbsy,
}

/// Label table, bounded at 50 entries.
pub type TagTable = heapless::Vec<(i32, usize), MAX_SCRIPT_TAGS>;

/// A validated program.
#[derive(Debug, Clone)]
pub struct Program {
    /// Instructions in execution order.
    pub instrs: Vec<Instr>,
    /// Label → instruction index.
    pub tags: TagTable,
}

impl Program {
    /// Instruction index of `tag`.
    pub fn tag(&self, tag: i32) -> Option<usize> {
        self.tags.iter().find(|(t, _)| *t == tag).map(|&(_, at)| at)
    }
}

/// Number of operands taken by `mnemonic` (upper case), `None` if unknown.
fn arity(mnemonic: &str) -> Option<usize> {
    Some(match mnemonic {
        "HALT" | "NOP" | "RET" | "DCRA" | "INRA" | "PUSHA" | "POPA" | "BR1" | "BR2" | "TICK"
        | "WVHLT" | "WVBSY" => 0,
        "ADD" | "AND" | "OR" | "XOR" | "SUB" | "MLT" | "DIV" | "MOD" | "CMP" | "LDA" | "STA"
        | "XA" | "DCR" | "INR" | "PUSH" | "POP" | "RLA" | "RRA" | "JMP" | "JZ" | "JNZ" | "JM"
        | "JP" | "CALL" | "TAG" | "READ" | "R" | "MODEG" | "MG" | "BS1" | "BS2" | "BC1"
        | "BC2" | "MICS" | "MILS" | "WAIT" | "WVTX" | "WVTXR" => 1,
        "LD" | "X" | "RL" | "RR" | "WRITE" | "W" | "MODES" | "M" | "PUD" | "PWM" | "P"
        | "SERVO" | "S" | "WDOG" => 2,
        "TRIG" => 3,
        _ => return None,
    })
}

struct Statement<'a> {
    mnemonic: String,
    args: Vec<&'a str>,
}

fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .flat_map(|line| line.split(|c: char| c.is_whitespace() || c == ';'))
        .filter(|tok| !tok.is_empty())
}

fn split_statements(text: &str) -> GpioResult<Vec<Statement<'_>>> {
    let mut tokens = tokenize(text);
    let mut out = Vec::new();
    while let Some(word) = tokens.next() {
        let mnemonic = word.to_ascii_uppercase();
        let n = arity(&mnemonic).ok_or_else(|| GpioError::BadScriptCmd(word.to_string()))?;
        let args: Vec<&str> = tokens.by_ref().take(n).collect();
        if args.len() != n {
            return Err(GpioError::BadScript(format!(
                "{mnemonic} expects {n} operand(s), found {}",
                args.len()
            )));
        }
        out.push(Statement { mnemonic, args });
    }
    Ok(out)
}

fn parse_int(tok: &str) -> Option<i32> {
    let (neg, body) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok),
    };
    // One optional minus only; `str::parse` would take a second sign.
    if !body.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let value = if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        if !hex.starts_with(|c: char| c.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(hex, 16).ok()? as i64
    } else {
        body.parse::<i64>().ok()?
    };
    let value = if neg { -value } else { value };
    i32::try_from(value)
        .ok()
        .or_else(|| u32::try_from(value).ok().map(|v| v as i32))
}

fn parse_operand(tok: &str) -> GpioResult<Operand> {
    let lower = tok.to_ascii_lowercase();
    if let Some(index) = lower.strip_prefix('v') {
        return Ok(Operand::Var(var_index(index, tok)?));
    }
    if let Some(index) = lower.strip_prefix('p') {
        return Ok(Operand::Var(param_index(index, tok)?));
    }
    parse_int(tok)
        .map(Operand::Imm)
        .ok_or_else(|| GpioError::BadScript(format!("bad operand '{tok}'")))
}

fn var_index(digits: &str, tok: &str) -> GpioResult<Var> {
    let n: u32 = digits
        .parse()
        .map_err(|_| GpioError::BadScript(format!("bad variable '{tok}'")))?;
    if n as usize >= MAX_SCRIPT_VARS {
        return Err(GpioError::BadVarNum(n));
    }
    Ok(n as Var)
}

fn param_index(digits: &str, tok: &str) -> GpioResult<Var> {
    let n: u32 = digits
        .parse()
        .map_err(|_| GpioError::BadScript(format!("bad parameter '{tok}'")))?;
    if n as usize >= MAX_SCRIPT_PARAMS {
        return Err(GpioError::BadParamNum(n));
    }
    Ok(n as Var)
}

/// Destination operand: `vN`, `pN` or a bare variable index.
fn parse_var(tok: &str) -> GpioResult<Var> {
    match parse_operand(tok)? {
        Operand::Var(v) => Ok(v),
        Operand::Imm(n) if n >= 0 && (n as usize) < MAX_SCRIPT_VARS => Ok(n as Var),
        Operand::Imm(n) => Err(GpioError::BadVarNum(n as u32)),
    }
}

fn parse_tag(tok: &str) -> GpioResult<i32> {
    parse_int(tok).ok_or_else(|| GpioError::BadScript(format!("bad tag '{tok}'")))
}

/// Parse and validate `text`.
///
/// # Errors
/// `BadScriptCmd` for an unknown mnemonic, `BadScript` for malformed
/// operands, `BadVarNum`/`BadParamNum` for out-of-range indices,
/// `DuplicateTag`, `TooManyTags` or `BadTag` for label problems.
pub fn parse(text: &str) -> GpioResult<Program> {
    let statements = split_statements(text)?;

    let mut tags = TagTable::new();
    let mut index = 0usize;
    for st in &statements {
        if st.mnemonic == "TAG" {
            let tag = parse_tag(st.args[0])?;
            if tags.iter().any(|(t, _)| *t == tag) {
                return Err(GpioError::DuplicateTag(tag));
            }
            tags.push((tag, index)).map_err(|_| GpioError::TooManyTags)?;
        } else {
            index += 1;
        }
    }

    let target = |tok: &str| -> GpioResult<usize> {
        let tag = parse_tag(tok)?;
        tags.iter()
            .find(|(t, _)| *t == tag)
            .map(|&(_, at)| at)
            .ok_or(GpioError::BadTag(tag))
    };

    let mut instrs = Vec::with_capacity(index);
    for st in &statements {
        let a = &st.args;
        let op = |i: usize| parse_operand(a[i]);
        let var = |i: usize| parse_var(a[i]);
        let instr = match st.mnemonic.as_str() {
            "TAG" => continue,
            "NOP" => Instr::Nop,
            "HALT" => Instr::Halt,
            "RET" => Instr::Ret,
            "ADD" => Instr::Add(op(0)?),
            "AND" => Instr::And(op(0)?),
            "OR" => Instr::Or(op(0)?),
            "XOR" => Instr::Xor(op(0)?),
            "SUB" => Instr::Sub(op(0)?),
            "MLT" => Instr::Mlt(op(0)?),
            "DIV" => Instr::Div(op(0)?),
            "MOD" => Instr::Mod(op(0)?),
            "CMP" => Instr::Cmp(op(0)?),
            "LDA" => Instr::Lda(op(0)?),
            "STA" => Instr::Sta(var(0)?),
            "LD" => Instr::Ld(var(0)?, op(1)?),
            "X" => Instr::X(var(0)?, var(1)?),
            "XA" => Instr::Xa(var(0)?),
            "DCR" => Instr::Dcr(var(0)?),
            "INR" => Instr::Inr(var(0)?),
            "DCRA" => Instr::Dcra,
            "INRA" => Instr::Inra,
            "PUSH" => Instr::Push(var(0)?),
            "POP" => Instr::Pop(var(0)?),
            "PUSHA" => Instr::Pusha,
            "POPA" => Instr::Popa,
            "RL" => Instr::Rl(var(0)?, op(1)?),
            "RR" => Instr::Rr(var(0)?, op(1)?),
            "RLA" => Instr::Rla(op(0)?),
            "RRA" => Instr::Rra(op(0)?),
            "JMP" => Instr::Jmp(target(a[0])?),
            "JZ" => Instr::Jz(target(a[0])?),
            "JNZ" => Instr::Jnz(target(a[0])?),
            "JM" => Instr::Jm(target(a[0])?),
            "JP" => Instr::Jp(target(a[0])?),
            "CALL" => Instr::Call(target(a[0])?),
            "READ" | "R" => Instr::Read(op(0)?),
            "WRITE" | "W" => Instr::Write(op(0)?, op(1)?),
            "MODES" | "M" => Instr::Modes(op(0)?, op(1)?),
            "MODEG" | "MG" => Instr::Modeg(op(0)?),
            "PUD" => Instr::Pud(op(0)?, op(1)?),
            "PWM" | "P" => Instr::Pwm(op(0)?, op(1)?),
            "SERVO" | "S" => Instr::Servo(op(0)?, op(1)?),
            "TRIG" => Instr::Trig(op(0)?, op(1)?, op(2)?),
            "WDOG" => Instr::Wdog(op(0)?, op(1)?),
            "BR1" => Instr::Br1,
            "BR2" => Instr::Br2,
            "BS1" => Instr::Bs1(op(0)?),
            "BS2" => Instr::Bs2(op(0)?),
            "BC1" => Instr::Bc1(op(0)?),
            "BC2" => Instr::Bc2(op(0)?),
            "TICK" => Instr::Tick,
            "MICS" => Instr::Mics(op(0)?),
            "MILS" => Instr::Mils(op(0)?),
            "WAIT" => Instr::Wait(op(0)?),
            "WVTX" => Instr::Wvtx(op(0)?),
            "WVTXR" => Instr::Wvtxr(op(0)?),
            "WVHLT" => Instr::Wvhlt,
            "WVBSY" => Instr::Wvbsy,
            other => return Err(GpioError::BadScriptCmd(other.to_string())),
        };
        instrs.push(instr);
    }

    Ok(Program { instrs, tags })
}
