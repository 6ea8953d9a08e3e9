use crate::models::{BatteryTelemetry, BeemBox, SolarEquipment};
use chrono::{DateTime, Utc};
use serde_derive::Serialize;
use serde_json::{Map, Value};

pub const SOLAR_EQUIPMENTS_KEY: &str = "solarEquipments";

/// Battery telemetry with the battery's solar equipment merged in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatterySnapshot {
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(rename = "solarEquipments")]
    solar_equipments: Vec<SolarEquipment>,
}

impl BatterySnapshot {
    pub fn new(telemetry: BatteryTelemetry, solar_equipments: Vec<SolarEquipment>) -> Self {
        let mut fields = telemetry.into_fields();
        fields.remove(SOLAR_EQUIPMENTS_KEY);
        Self {
            fields,
            solar_equipments,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn solar_equipments(&self) -> &[SolarEquipment] {
        &self.solar_equipments
    }
}

/// One consistent view of battery and BeemBox telemetry, produced by a single refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatterySnapshot>,
    pub beemboxes: Vec<BeemBox>,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn battery_field(&self, key: &str) -> Option<&Value> {
        self.battery.as_ref().and_then(|battery| battery.get(key))
    }

    pub fn solar_equipments(&self) -> &[SolarEquipment] {
        self.battery
            .as_ref()
            .map(BatterySnapshot::solar_equipments)
            .unwrap_or_default()
    }

    pub fn beembox(&self, identifier: &str) -> Option<&BeemBox> {
        self.beemboxes
            .iter()
            .find(|beembox| beembox.identifier().as_deref() == Some(identifier))
    }
}
