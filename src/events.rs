//! Events produced by the downstream sensor stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Concentration unit reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementUnit {
    /// Milligrams per decilitre.
    MgPerDl,
    /// Millimoles per litre.
    MmolPerL,
}

impl MeasurementUnit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MgPerDl => "mg/dL",
            Self::MmolPerL => "mmol/L",
        }
    }
}

/// A single decoded reading from a peripheral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Address of the peripheral that produced the reading.
    pub peripheral: String,
    pub value: f64,
    pub unit: MeasurementUnit,
    /// Sensor-side record sequence number, when the device reports one.
    pub sequence: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    /// Value converted to mg/dL.
    #[must_use]
    pub fn value_mg_per_dl(&self) -> f64 {
        match self.unit {
            MeasurementUnit::MgPerDl => self.value,
            MeasurementUnit::MmolPerL => self.value * MG_PER_DL_PER_MMOL_PER_L,
        }
    }
}

/// Glucose molar mass factor between mmol/L and mg/dL.
const MG_PER_DL_PER_MMOL_PER_L: f64 = 18.0;

/// One unit of data forwarded to the consumer once the gate is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Measurement(Measurement),
    /// The subscription lost its peripheral. Reported by the stream handler.
    Disconnected { peripheral: String, reason: String },
}
