use serde::{Deserialize, Serialize};

pub const REGISTER_COUNT: usize = 16;
pub const SYSCALL_REGISTER_COUNT: usize = 8;
/// General register that receives `cmp` results.
pub const FLAG_REGISTER: usize = 15;

/// One instruction operand. Exactly one variant is ever active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// General-purpose register `R0`..`R15`.
    Register(u8),
    /// Syscall register `S0`..`S7`.
    SyscallRegister(u8),
    /// Signed 32-bit integer immediate.
    Immediate(i32),
    /// Float immediate; its bit pattern is what lands in a register.
    Float(f32),
    /// Resolved code address (global instruction index) of a label or function.
    Target(u32),
    /// Global index into the string literal pool.
    Str(u32),
}

impl Operand {
    pub const fn type_name(&self) -> &'static str {
        match self {
            Operand::Register(_) => "register",
            Operand::SyscallRegister(_) => "syscall register",
            Operand::Immediate(_) => "integer immediate",
            Operand::Float(_) => "float immediate",
            Operand::Target(_) => "code address",
            Operand::Str(_) => "string index",
        }
    }

    /// Parses a positional operand token: `R<n>`, `S<n>`, hex, integer or float.
    pub fn parse(token: &str) -> Result<Operand, String> {
        let mut chars = token.chars();
        let head = chars
            .next()
            .ok_or_else(|| "empty operand".to_string())?;
        let rest = chars.as_str();

        match head {
            'R' | 'r' => parse_index(rest, REGISTER_COUNT)
                .map(Operand::Register)
                .ok_or_else(|| format!("register must be R0..R{}", REGISTER_COUNT - 1)),
            'S' | 's' => parse_index(rest, SYSCALL_REGISTER_COUNT)
                .map(Operand::SyscallRegister)
                .ok_or_else(|| {
                    format!("syscall register must be S0..S{}", SYSCALL_REGISTER_COUNT - 1)
                }),
            _ => parse_immediate(token),
        }
    }

    /// The 32-bit value this operand contributes when used as an immediate.
    pub fn immediate_bits(&self) -> Option<i32> {
        match self {
            Operand::Immediate(v) => Some(*v),
            Operand::Float(f) => Some(f.to_bits() as i32),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Register(r) => write!(f, "R{}", r),
            Operand::SyscallRegister(s) => write!(f, "S{}", s),
            Operand::Immediate(v) => write!(f, "{}", v),
            Operand::Float(v) => write!(f, "{:?}", v),
            Operand::Target(addr) => write!(f, "@{}", addr),
            Operand::Str(idx) => write!(f, "str#{}", idx),
        }
    }
}

fn parse_index(digits: &str, count: usize) -> Option<u8> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let n: usize = digits.parse().ok()?;
    if n < count { Some(n as u8) } else { None }
}

fn parse_immediate(token: &str) -> Result<Operand, String> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };

    if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        // Hex literals name a bit pattern, so 0xFFFFFFFF is -1.
        let bits = u32::from_str_radix(hex, 16)
            .map_err(|e| format!("invalid hex literal: {}", e))?;
        let value = bits as i32;
        return Ok(Operand::Immediate(if negative {
            value.wrapping_neg()
        } else {
            value
        }));
    }

    if token.contains('.') {
        return token
            .parse::<f32>()
            .map(Operand::Float)
            .map_err(|e| format!("invalid float literal: {}", e));
    }

    token
        .parse::<i32>()
        .map(Operand::Immediate)
        .map_err(|e| format!("invalid integer literal: {}", e))
}
