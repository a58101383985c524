use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Verdict for a single testcase.
///
/// Values are bit flags so a set of verdicts can be packed into one integer,
/// but each outcome carries exactly one of them. On the wire a verdict is its
/// two-letter code.
///
/// `MemoryLimit` and `CompileError` are never produced by the current worker
/// (there is no compile step and memory is not enforced); they stay in the
/// taxonomy so older and newer workers agree on the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Verdict {
    #[serde(rename = "OK")]
    Ok = 1 << 0,
    #[serde(rename = "WR")]
    Wrong = 1 << 1,
    #[serde(rename = "TL")]
    TimeLimit = 1 << 2,
    #[serde(rename = "ML")]
    MemoryLimit = 1 << 3,
    #[serde(rename = "RE")]
    RuntimeError = 1 << 4,
    #[serde(rename = "XX")]
    Unknown = 1 << 5,
    #[serde(rename = "CE")]
    CompileError = 1 << 6,
}

impl Verdict {
    pub const ALL: [Verdict; 7] = [
        Verdict::Ok,
        Verdict::Wrong,
        Verdict::TimeLimit,
        Verdict::MemoryLimit,
        Verdict::RuntimeError,
        Verdict::Unknown,
        Verdict::CompileError,
    ];

    /// Two-letter wire code
    pub fn code(self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::Wrong => "WR",
            Verdict::TimeLimit => "TL",
            Verdict::MemoryLimit => "ML",
            Verdict::RuntimeError => "RE",
            Verdict::Unknown => "XX",
            Verdict::CompileError => "CE",
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == Verdict::Ok
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown verdict code: {0:?}")]
pub struct UnknownVerdictCode(pub String);

impl FromStr for Verdict {
    type Err = UnknownVerdictCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verdict::ALL
            .into_iter()
            .find(|v| v.code() == s)
            .ok_or_else(|| UnknownVerdictCode(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_codes() {
        let codes: Vec<&str> = Verdict::ALL.iter().map(|v| v.code()).collect();
        assert_eq!(codes, vec!["OK", "WR", "TL", "ML", "RE", "XX", "CE"]);
    }

    #[test]
    fn test_verdict_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Verdict::TimeLimit).unwrap(), "\"TL\"");
        let v: Verdict = serde_json::from_str("\"XX\"").unwrap();
        assert_eq!(v, Verdict::Unknown);
        assert!(serde_json::from_str::<Verdict>("\"accepted\"").is_err());
    }

    #[test]
    fn test_verdict_bits_are_distinct_flags() {
        let mut seen = 0u8;
        for v in Verdict::ALL {
            assert_eq!(v.bits().count_ones(), 1);
            assert_eq!(seen & v.bits(), 0);
            seen |= v.bits();
        }
    }

    #[test]
    fn test_verdict_from_str() {
        assert_eq!("RE".parse::<Verdict>().unwrap(), Verdict::RuntimeError);
        assert!("ok".parse::<Verdict>().is_err());
    }
}
