//! Memory access traces.
//!
//! A trace is a text file with one access per line:
//!
//! ```text
//! r <addr>          read one byte
//! w <addr> <byte>   write one byte
//! ```
//!
//! Numbers are decimal or `0x`-prefixed hexadecimal. Blank lines and lines starting with
//! `#` are ignored.

use std::{fmt, num::ParseIntError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read { addr: usize },
    Write { addr: usize, value: u8 },
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read { addr } => write!(f, "r {:#x}", addr),
            Access::Write { addr, value } => write!(f, "w {:#x} {:#04x}", addr, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for TraceError {}

/// Parses a whole trace.
pub fn parse(text: &str) -> Result<Vec<Access>, TraceError> {
    let mut accesses = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let access = parse_line(line).map_err(|message| TraceError {
            line: index + 1,
            message,
        })?;
        accesses.push(access);
    }
    Ok(accesses)
}

fn parse_line(line: &str) -> Result<Access, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        ["r", addr] => Ok(Access::Read {
            addr: parse_number(addr)?,
        }),
        ["w", addr, value] => {
            let value = parse_number(value)?;
            let value =
                u8::try_from(value).map_err(|_| format!("{} does not fit in a byte", value))?;
            Ok(Access::Write {
                addr: parse_number(addr)?,
                value,
            })
        }
        _ => Err(format!("expected `r <addr>` or `w <addr> <byte>`, found `{}`", line)),
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(text: &str) -> Result<usize, String> {
    let result: Result<usize, ParseIntError> = match text.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    result.map_err(|err| format!("bad number `{}`: {}", text, err))
}
