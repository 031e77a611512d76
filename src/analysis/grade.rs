use serde::Serialize;
use std::fmt;

/// Letter grade for a route's observed adherence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// Grades a percentage of headways meeting the promise (0–100).
    ///
    /// | Adherence   | Grade |
    /// |-------------|-------|
    /// | >= 95 %     | A+    |
    /// | >= 90 %     | A     |
    /// | >= 80 %     | B     |
    /// | >= 65 %     | C     |
    /// | >= 40 %     | D     |
    /// | < 40 %      | F     |
    pub fn from_pct(pct: f64) -> Self {
        match pct / 100.0 {
            p if p >= 0.95 => Grade::APlus,
            p if p >= 0.90 => Grade::A,
            p if p >= 0.80 => Grade::B,
            p if p >= 0.65 => Grade::C,
            p if p >= 0.40 => Grade::D,
            _ => Grade::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(s)
    }
}
