//! Flink memory sizes such as `1024m`, `2 gb` or `100` (bytes).
use std::{fmt::Display, str::FromStr};

use snafu::{OptionExt, Snafu};

#[derive(Snafu, Debug, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("memory size must not be empty"))]
    Empty,

    #[snafu(display("memory size [{text}] does not start with a number"))]
    MissingNumber { text: String },

    #[snafu(display("memory size [{text}] has an unknown unit [{unit}]"))]
    UnknownUnit { text: String, unit: String },

    #[snafu(display("memory size [{text}] does not fit into 64 bits"))]
    Overflow { text: String },
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct MemorySize {
    bytes: u64,
}

impl MemorySize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    pub const fn mebibytes(&self) -> u64 {
        self.bytes >> 20
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return EmptySnafu.fail();
        }

        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        if number.is_empty() {
            return MissingNumberSnafu { text }.fail();
        }
        let amount: u64 = number.parse().ok().context(OverflowSnafu { text })?;

        let unit = unit.trim();
        let multiplier = MemoryUnit::from_str(unit)
            .ok()
            .context(UnknownUnitSnafu { text, unit })?
            .multiplier();

        amount
            .checked_mul(multiplier)
            .map(Self::from_bytes)
            .context(OverflowSnafu { text })
    }
}

impl FromStr for MemorySize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes", self.bytes)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MemoryUnit {
    Bytes,
    Kibibytes,
    Mebibytes,
    Gibibytes,
    Tebibytes,
}

impl MemoryUnit {
    fn multiplier(&self) -> u64 {
        match self {
            MemoryUnit::Bytes => 1,
            MemoryUnit::Kibibytes => 1 << 10,
            MemoryUnit::Mebibytes => 1 << 20,
            MemoryUnit::Gibibytes => 1 << 30,
            MemoryUnit::Tebibytes => 1 << 40,
        }
    }
}

impl FromStr for MemoryUnit {
    type Err = ();

    fn from_str(unit: &str) -> Result<Self, Self::Err> {
        match unit.to_lowercase().as_str() {
            "" | "b" | "bytes" => Ok(MemoryUnit::Bytes),
            "k" | "kb" | "kibibytes" => Ok(MemoryUnit::Kibibytes),
            "m" | "mb" | "mebibytes" => Ok(MemoryUnit::Mebibytes),
            "g" | "gb" | "gibibytes" => Ok(MemoryUnit::Gibibytes),
            "t" | "tb" | "tebibytes" => Ok(MemoryUnit::Tebibytes),
            _ => Err(()),
        }
    }
}
