//! Indoor air quality scoring.
//!
//! The score blends two terms, each on a 0 (dirty) to full-weight (clean) scale:
//!
//! * humidity: how close relative humidity is to the optimum, penalising deviation in either
//!   direction and saturating at 0;
//! * gas: how far gas resistance has dropped below the clean-air baseline. Resistance at or
//!   above the baseline earns the full gas weight.
//!
//! Their sum is the air quality percentage, 100 being the cleanest air. [`IaqScale`] decides
//! how that percentage is reported.

use std::fmt;

use crate::calibration::Baseline;
use crate::{Error, Result};

pub const DEFAULT_HUMIDITY_BASELINE: f64 = 40.0;
pub const DEFAULT_HUMIDITY_WEIGHT: f64 = 0.25;

/// Presentation of the final score.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum IaqScale {
    /// 0 to 100, higher is cleaner.
    #[default]
    Percent,
    /// 0 to 500, higher is dirtier, matching the usual BME680 IAQ index.
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IaqScorer {
    humidity_baseline: f64,
    humidity_weight: f64,
    scale: IaqScale,
}

impl Default for IaqScorer {
    fn default() -> Self {
        Self {
            humidity_baseline: DEFAULT_HUMIDITY_BASELINE,
            humidity_weight: DEFAULT_HUMIDITY_WEIGHT,
            scale: IaqScale::Percent,
        }
    }
}

impl IaqScorer {
    /// `humidity_baseline` must lie strictly between 0 and 100 %, `humidity_weight` within
    /// 0..=1.
    pub fn new(humidity_baseline: f64, humidity_weight: f64, scale: IaqScale) -> Result<Self> {
        if !(humidity_baseline > 0.0 && humidity_baseline < 100.0) {
            return Err(Error::config(
                "AMBIENT_HUMIDITY_BASELINE",
                format!("{} is outside 0..100 %", humidity_baseline),
            ));
        }
        if !(0.0..=1.0).contains(&humidity_weight) {
            return Err(Error::config(
                "AMBIENT_HUMIDITY_WEIGHT",
                format!("{} is outside 0..=1", humidity_weight),
            ));
        }
        Ok(Self {
            humidity_baseline,
            humidity_weight,
            scale,
        })
    }

    pub fn scale(&self) -> IaqScale {
        self.scale
    }

    fn humidity_max(&self) -> f64 {
        self.humidity_weight * 100.0
    }

    fn gas_max(&self) -> f64 {
        100.0 - self.humidity_max()
    }

    /// Humidity contribution, `0..=humidity_weight * 100`.
    pub fn humidity_score(&self, humidity: f64) -> f64 {
        let offset = humidity - self.humidity_baseline;
        let raw = if offset > 0.0 {
            let headroom = 100.0 - self.humidity_baseline;
            (headroom - offset) / headroom
        } else {
            (self.humidity_baseline + offset) / self.humidity_baseline
        };
        raw.clamp(0.0, 1.0) * self.humidity_max()
    }

    /// Gas contribution, `0..=(1 - humidity_weight) * 100`. A resistance equal to the
    /// baseline counts as clean air.
    pub fn gas_score(&self, gas_resistance: f64, baseline: Baseline) -> f64 {
        let baseline = baseline.ohms();
        if baseline - gas_resistance > 0.0 {
            let ratio = (gas_resistance / baseline).clamp(0.0, 1.0);
            ratio * self.gas_max()
        } else {
            self.gas_max()
        }
    }

    /// Combined score on the 0 (dirty) to 100 (clean) scale, before presentation.
    pub fn air_quality_percent(
        &self,
        gas_resistance: f64,
        humidity: f64,
        baseline: Baseline,
    ) -> f64 {
        self.humidity_score(humidity) + self.gas_score(gas_resistance, baseline)
    }

    pub fn score(&self, gas_resistance: f64, humidity: f64, baseline: Baseline) -> IaqScore {
        let percent = self.air_quality_percent(gas_resistance, humidity, baseline);
        IaqScore {
            percent,
            scale: self.scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IaqScore {
    percent: f64,
    scale: IaqScale,
}

impl IaqScore {
    /// The air quality percentage, 100 being the cleanest.
    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// The 0..=500 index, 0 being the cleanest.
    pub fn index(&self) -> f64 {
        (100.0 - self.percent) * 5.0
    }

    /// The score in the configured scale.
    pub fn value(&self) -> f64 {
        match self.scale {
            IaqScale::Percent => self.percent(),
            IaqScale::Index => self.index(),
        }
    }

    pub fn category(&self) -> AirQualityCategory {
        AirQualityCategory::from_index(self.index())
    }
}

impl fmt::Display for IaqScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scale {
            IaqScale::Percent => write!(f, "{:.1} %", self.value()),
            IaqScale::Index => write!(f, "{:.1}", self.value()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AirQualityCategory {
    Excellent,
    Good,
    LightlyPolluted,
    ModeratelyPolluted,
    HeavilyPolluted,
    SeverelyPolluted,
    ExtremelyPolluted,
}

impl AirQualityCategory {
    pub fn from_index(index: f64) -> Self {
        match index {
            i if i <= 50.0 => Self::Excellent,
            i if i <= 100.0 => Self::Good,
            i if i <= 150.0 => Self::LightlyPolluted,
            i if i <= 200.0 => Self::ModeratelyPolluted,
            i if i <= 250.0 => Self::HeavilyPolluted,
            i if i <= 350.0 => Self::SeverelyPolluted,
            _ => Self::ExtremelyPolluted,
        }
    }
}

impl fmt::Display for AirQualityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::LightlyPolluted => "lightly polluted",
            Self::ModeratelyPolluted => "moderately polluted",
            Self::HeavilyPolluted => "heavily polluted",
            Self::SeverelyPolluted => "severely polluted",
            Self::ExtremelyPolluted => "extremely polluted",
        })
    }
}
