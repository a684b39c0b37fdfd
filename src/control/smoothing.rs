use serde::{Deserialize, Serialize};

/// Smoothing mode as written in config files, on the command line and in
/// replay strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingMode {
    #[default]
    None,
    Dynamic,
    Value,
}

impl SmoothingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SmoothingMode::None => "none",
            SmoothingMode::Dynamic => "dynamic",
            SmoothingMode::Value => "value",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "none" => Some(SmoothingMode::None),
            "dynamic" => Some(SmoothingMode::Dynamic),
            "value" => Some(SmoothingMode::Value),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Smoothing {
    #[default]
    None,
    /// Average of the previous output and the new sample.
    Dynamic,
    /// Moves at most `100 / s` per tick toward the sample.
    Value(u32),
}

impl Smoothing {
    /// `Value` with a zero smoothness degrades to no smoothing.
    pub fn from_parts(mode: SmoothingMode, value: u32) -> Self {
        match mode {
            SmoothingMode::None => Smoothing::None,
            SmoothingMode::Dynamic => Smoothing::Dynamic,
            SmoothingMode::Value if value == 0 => Smoothing::None,
            SmoothingMode::Value => Smoothing::Value(value),
        }
    }
}

/// Brightness currently shown, smoothed toward each new reading.
#[derive(Clone, Debug, Default)]
pub struct ControlState {
    smoothing: Smoothing,
    current: Option<i32>,
}

impl ControlState {
    pub fn new(smoothing: Smoothing) -> Self {
        Self {
            smoothing,
            current: None,
        }
    }

    pub fn advance(&mut self, raw: i32) -> i32 {
        let next = match (self.current, self.smoothing) {
            (None, _) | (Some(_), Smoothing::None) => raw,
            (Some(current), Smoothing::Dynamic) => (current + raw) / 2,
            (Some(current), Smoothing::Value(s)) => {
                let step = (100 / s as i32).max(1);
                if raw > current {
                    (current + step).min(raw)
                } else {
                    (current - step).max(raw)
                }
            }
        };

        self.current = Some(next);
        next
    }
}
