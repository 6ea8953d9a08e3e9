//! Wire types of the Beem cloud API.
//!
//! Telemetry records are kept as field maps: sensors address them by the
//! vendor's field names and the API adds fields without notice.

use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoxSummaryRequest {
    pub month: u32,
    pub year: i32,
}

/// Live telemetry of one battery (`/batteries/{id}/live-data`).
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatteryTelemetry(pub Map<String, Value>);

impl BatteryTelemetry {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

/// One MPPT input of a battery, as listed in the device list.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolarEquipment(pub Map<String, Value>);

impl SolarEquipment {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn mppt_id(&self) -> Option<String> {
        self.get("mpptId").and_then(identifier)
    }
}

/// A plug-and-play solar device reported next to the batteries.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeemBox(pub Map<String, Value>);

impl BeemBox {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// MAC address when reported, the numeric id otherwise.
    pub fn identifier(&self) -> Option<String> {
        self.get("macAddress")
            .and_then(identifier)
            .or_else(|| self.get("id").and_then(identifier))
    }
}

/// Monthly production record of one BeemBox (`/box/summary`).
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxSummary(pub Map<String, Value>);

impl BoxSummary {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryDevice {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub solar_equipments: Option<Vec<SolarEquipment>>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl BatteryDevice {
    pub fn solar_equipments(&self) -> &[SolarEquipment] {
        self.solar_equipments.as_deref().unwrap_or_default()
    }
}

/// `/devices` answers either with a bare battery list or with an object
/// grouping batteries and BeemBoxes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DeviceList {
    Bare(Vec<BatteryDevice>),
    Grouped { batteries: Vec<BatteryDevice> },
}

impl DeviceList {
    pub fn into_batteries(self) -> Vec<BatteryDevice> {
        match self {
            DeviceList::Bare(batteries) | DeviceList::Grouped { batteries } => batteries,
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct BoxList {
    #[serde(default)]
    pub beemboxes: Vec<BeemBox>,
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
