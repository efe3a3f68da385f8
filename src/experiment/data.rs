use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// Load regulation mode for a discharge phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "CC")]
    Cc,
    #[serde(rename = "CV")]
    Cv,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Cc => write!(f, "CC"),
            Mode::Cv => write!(f, "CV"),
        }
    }
}

/// Setpoints and thresholds for one discharge run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DischargeParameters {
    pub cc_current: f64,      // A, constant current phase setpoint
    pub cc_end_voltage: f64,  // V, ends the CC phase and becomes the CV setpoint
    pub cv_stop_current: f64, // A, ends the CV phase
}

impl Default for DischargeParameters {
    fn default() -> Self {
        Self {
            cc_current: 0.1,
            cc_end_voltage: 1.0,
            cv_stop_current: 0.010,
        }
    }
}

impl DischargeParameters {
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("cc_current", self.cc_current),
            ("cc_end_voltage", self.cc_end_voltage),
            ("cv_stop_current", self.cv_stop_current),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{} must be a positive number, got {}", name, value));
            }
        }
        Ok(())
    }
}

/// Battery chemistries with known discharge settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatteryChemistry {
    NiMh,
    LiIon,
    PbLead,
}

impl BatteryChemistry {
    pub fn parameters(&self) -> DischargeParameters {
        let cc_end_voltage = match self {
            BatteryChemistry::NiMh => 1.0,
            BatteryChemistry::LiIon => 2.7,
            BatteryChemistry::PbLead => 1.8,
        };
        DischargeParameters {
            cc_current: 0.1,
            cc_end_voltage,
            cv_stop_current: 0.010,
        }
    }
}

impl fmt::Display for BatteryChemistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryChemistry::NiMh => write!(f, "Ni-MH"),
            BatteryChemistry::LiIon => write!(f, "Li-Ion"),
            BatteryChemistry::PbLead => write!(f, "Pb-Lead"),
        }
    }
}

impl FromStr for BatteryChemistry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "nimh" => Ok(BatteryChemistry::NiMh),
            "liion" => Ok(BatteryChemistry::LiIon),
            "pblead" => Ok(BatteryChemistry::PbLead),
            _ => Err(format!("unknown battery chemistry '{}' (expected ni-mh, li-ion or pb-lead)", s)),
        }
    }
}

/// One measurement taken during a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: f64, // seconds since the Unix epoch
    pub voltage: f64,
    pub current: f64,
    pub mode: Mode,
    pub run_start: f64, // timestamp of the first sample of the run
}

impl Sample {
    pub fn elapsed(&self) -> f64 {
        self.timestamp - self.run_start
    }
}

/// Charge drawn from the battery, accumulated from samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DischargeSummary {
    pub charge_cc_ah: f64,
    pub charge_cv_ah: f64,
    pub elapsed_s: f64,
    pub samples: usize,
    #[serde(skip)]
    last: Option<(f64, f64)>,
}

impl DischargeSummary {
    /// Adds the charge between the previous sample and `sample` to the phase `sample` belongs to.
    pub fn add(&mut self, sample: &Sample) {
        if let Some((last_time, last_current)) = self.last {
            let dt = sample.timestamp - last_time;
            if dt > 0.0 {
                let charge = (last_current + sample.current) / 2.0 * dt / 3600.0;
                match sample.mode {
                    Mode::Cc => self.charge_cc_ah += charge,
                    Mode::Cv => self.charge_cv_ah += charge,
                }
            }
        }
        self.last = Some((sample.timestamp, sample.current));
        self.elapsed_s = sample.elapsed();
        self.samples += 1;
    }

    pub fn total_ah(&self) -> f64 {
        self.charge_cc_ah + self.charge_cv_ah
    }

    pub fn total_mah(&self) -> f64 {
        self.total_ah() * 1000.0
    }
}
