use crate::coordinator::CoordinatorHandle;
use crate::derived::{derived_reading, numeric_reading, SplitMode};
use crate::energy_integrator::EnergyIntegrator;
use crate::snapshot::Snapshot;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

const MANUFACTURER: &str = "Beem";
const CONFIGURATION_URL: &str = "https://beem.energy/";

/// (field, unit, icon) for the battery's own telemetry.
pub const BATTERY_SENSORS: &[(&str, Option<&str>, &str)] = &[
    ("batteryPower", Some("W"), "mdi:home-battery-outline"),
    ("meterPower", Some("W"), "mdi:flash"),
    ("solarPower", Some("W"), "mdi:solar-power"),
    ("activePower", Some("W"), "mdi:power"),
    ("soc", Some("%"), "mdi:battery-charging-60"),
    ("workingModeLabel", None, "mdi:cog-outline"),
    ("lastKnownMeasureDate", None, "mdi:calendar-clock"),
    ("numberOfCycles", None, "mdi:cog-clockwise"),
    ("numberOfModules", None, "mdi:battery-high"),
    ("globalSoh", Some("%"), "mdi:battery-heart-outline"),
    ("capacityInKwh", Some("kWh"), "mdi:home-battery-outline"),
    ("maxPower", Some("W"), "mdi:speedometer"),
    ("isBatteryWorkingModeOk", None, "mdi:check-circle"),
];

pub const SOLAR_EQUIPMENT_SENSORS: &[(&str, Option<&str>, &str)] = &[
    ("mpptId", None, "mdi:identifier"),
    ("orientation", Some("°"), "mdi:compass-outline"),
    ("tilt", Some("°"), "mdi:sun-angle-outline"),
    ("peakPower", Some("W"), "mdi:solar-power"),
    ("solarPanelsInParallel", None, "mdi:equal"),
    ("solarPanelsInSeries", None, "mdi:align-vertical-bottom"),
];

pub const BEEMBOX_SENSORS: &[(&str, Option<&str>, &str)] = &[
    ("name", None, "mdi:label"),
    ("serialNumber", None, "mdi:barcode"),
    ("power", Some("W"), "mdi:solar-power"),
    ("wattHour", Some("Wh"), "mdi:counter"),
    ("totalDay", Some("Wh"), "mdi:calendar-today"),
    ("totalMonth", Some("Wh"), "mdi:calendar-month"),
    ("lastDbm", Some("dBm"), "mdi:wifi"),
    ("lastAlive", None, "mdi:clock-check"),
    ("lastProduction", None, "mdi:clock-outline"),
];

pub const DERIVED_SENSORS: &[(&str, SplitMode)] = &[
    ("batteryPower", SplitMode::Charging),
    ("batteryPower", SplitMode::Discharging),
    ("meterPower", SplitMode::MeterPos),
    ("meterPower", SplitMode::MeterNeg),
];

/// (source field, split applied before integrating, name)
pub const ENERGY_SENSORS: &[(&str, Option<SplitMode>, &str)] = &[
    ("batteryPower", Some(SplitMode::Charging), "Battery Energy Charging (kWh)"),
    ("batteryPower", Some(SplitMode::Discharging), "Battery Energy Discharging (kWh)"),
    ("solarPower", None, "Battery Solar Energy (kWh)"),
    ("meterPower", Some(SplitMode::MeterPos), "Meter Power Positive (kWh)"),
    ("meterPower", Some(SplitMode::MeterNeg), "Meter Power Negative (kWh)"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub configuration_url: &'static str,
}

impl DeviceInfo {
    fn battery(battery_id: i64) -> Self {
        Self {
            identifier: battery_id.to_string(),
            name: "Beem Battery".to_string(),
            manufacturer: MANUFACTURER,
            model: "Beem Battery",
            configuration_url: CONFIGURATION_URL,
        }
    }

    fn solar_equipment(equipment_id: &str) -> Self {
        Self {
            identifier: format!("solar_{equipment_id}"),
            name: format!("Beem Solar Equipment {equipment_id}"),
            manufacturer: MANUFACTURER,
            model: "Solar Equipment",
            configuration_url: CONFIGURATION_URL,
        }
    }

    fn beembox(box_id: &str) -> Self {
        Self {
            identifier: format!("beembox_{box_id}"),
            name: format!("BeemBox {box_id}"),
            manufacturer: MANUFACTURER,
            model: "BeemOn / PnP",
            configuration_url: CONFIGURATION_URL,
        }
    }
}

enum SensorSource {
    Battery {
        key: &'static str,
    },
    Derived {
        source: &'static str,
        mode: SplitMode,
    },
    Energy {
        integrator: Arc<Mutex<EnergyIntegrator>>,
    },
    SolarEquipment {
        index: usize,
        key: &'static str,
    },
    BeemBox {
        box_id: String,
        key: &'static str,
    },
}

/// One observable value backed by the coordinator's snapshots.
pub struct BeemSensor {
    pub unique_id: String,
    pub name: String,
    pub unit: Option<&'static str>,
    pub icon: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub device: DeviceInfo,
    source: SensorSource,
}

impl BeemSensor {
    fn plain(
        unique_id: String,
        name: String,
        unit: Option<&'static str>,
        icon: &'static str,
        device: DeviceInfo,
        source: SensorSource,
    ) -> Self {
        Self {
            unique_id,
            name,
            unit,
            icon: Some(icon),
            device_class: None,
            state_class: None,
            device,
            source,
        }
    }

    /// Current value. `None` means no reading, which is not the same as zero.
    pub fn native_value(&self, snapshot: Option<&Snapshot>) -> Option<Value> {
        match &self.source {
            SensorSource::Energy { integrator } => Some(Value::from(
                integrator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .reported_kwh(),
            )),
            SensorSource::Battery { key } => non_null(snapshot?.battery_field(key)),
            SensorSource::Derived { source, mode } => {
                derived_reading(snapshot?.battery_field(source), *mode).map(Value::from)
            }
            SensorSource::SolarEquipment { index, key } => {
                non_null(snapshot?.solar_equipments().get(*index)?.get(key))
            }
            SensorSource::BeemBox { box_id, key } => non_null(snapshot?.beembox(box_id)?.get(key)),
        }
    }

    pub fn available(&self, coordinator: &CoordinatorHandle) -> bool {
        if !coordinator.last_update_success() {
            return false;
        }
        match &self.source {
            SensorSource::SolarEquipment { index, .. } => coordinator
                .data()
                .is_some_and(|snapshot| snapshot.solar_equipments().len() > *index),
            _ => true,
        }
    }
}

fn non_null(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !v.is_null()).cloned()
}

/// Receives the sensors of one account.
pub trait EntityRegistry {
    fn add_entities(&mut self, sensors: Vec<BeemSensor>);
}

#[derive(Default)]
pub struct SensorSet {
    sensors: Vec<BeemSensor>,
}

impl SensorSet {
    pub fn sensors(&self) -> &[BeemSensor] {
        &self.sensors
    }

    pub fn get(&self, unique_id: &str) -> Option<&BeemSensor> {
        self.sensors.iter().find(|s| s.unique_id == unique_id)
    }

    pub fn into_sensors(self) -> Vec<BeemSensor> {
        self.sensors
    }
}

impl EntityRegistry for SensorSet {
    fn add_entities(&mut self, sensors: Vec<BeemSensor>) {
        self.sensors.extend(sensors);
    }
}

/// Builds the sensors for the coordinator's current snapshot.
///
/// Energy sensors subscribe to the coordinator and start integrating from
/// the current snapshot's time.
pub fn build_sensors(coordinator: &CoordinatorHandle, battery_id: Option<i64>) -> Vec<BeemSensor> {
    let snapshot = coordinator.data();
    let mut sensors = Vec::new();

    if let (Some(battery_id), Some(snapshot)) = (battery_id, snapshot.as_deref()) {
        if snapshot.battery.is_some() {
            add_battery_sensors(&mut sensors, coordinator, snapshot, battery_id);
        }
    }

    if let Some(snapshot) = snapshot.as_deref() {
        for beembox in &snapshot.beemboxes {
            let box_id = beembox.identifier().unwrap_or_else(|| "unknown".to_string());
            for &(key, unit, icon) in BEEMBOX_SENSORS {
                if !beembox.contains_key(key) {
                    continue;
                }
                sensors.push(BeemSensor::plain(
                    format!("beembox_{box_id}_{key}"),
                    format!("BeemBox {box_id} {key}"),
                    unit,
                    icon,
                    DeviceInfo::beembox(&box_id),
                    SensorSource::BeemBox {
                        box_id: box_id.clone(),
                        key,
                    },
                ));
            }
        }
    }

    debug!(count = sensors.len(), "Built Beem sensors");
    sensors
}

fn add_battery_sensors(
    sensors: &mut Vec<BeemSensor>,
    coordinator: &CoordinatorHandle,
    snapshot: &Snapshot,
    battery_id: i64,
) {
    for &(key, unit, icon) in BATTERY_SENSORS {
        sensors.push(BeemSensor::plain(
            format!("{battery_id}_{key}"),
            key.to_string(),
            unit,
            icon,
            DeviceInfo::battery(battery_id),
            SensorSource::Battery { key },
        ));
    }

    for &(source, mode) in DERIVED_SENSORS {
        sensors.push(BeemSensor {
            unique_id: format!("{battery_id}_{source}_{mode}"),
            name: format!("{source}_{mode}"),
            unit: Some("W"),
            icon: None,
            device_class: Some("power"),
            state_class: Some("measurement"),
            device: DeviceInfo::battery(battery_id),
            source: SensorSource::Derived { source, mode },
        });
    }

    for &(source, mode, name) in ENERGY_SENSORS {
        let integrator = Arc::new(Mutex::new(EnergyIntegrator::starting_at(
            snapshot.fetched_at,
        )));
        let subscribed = integrator.clone();
        coordinator.add_listener(move |snapshot| {
            let field = snapshot.battery_field(source);
            let reading = match mode {
                Some(mode) => derived_reading(field, mode),
                None => numeric_reading(field),
            };
            subscribed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(reading, snapshot.fetched_at);
        });

        sensors.push(BeemSensor {
            unique_id: format!("{battery_id}_{}", name.to_lowercase().replace(' ', "_")),
            name: name.to_string(),
            unit: Some("kWh"),
            icon: None,
            device_class: Some("energy"),
            state_class: Some("total_increasing"),
            device: DeviceInfo::battery(battery_id),
            source: SensorSource::Energy { integrator },
        });
    }

    for (index, equipment) in snapshot.solar_equipments().iter().enumerate() {
        let equipment_id = equipment
            .mppt_id()
            .unwrap_or_else(|| format!("solar_{index}"));
        for &(key, unit, icon) in SOLAR_EQUIPMENT_SENSORS {
            if !equipment.contains_key(key) {
                continue;
            }
            sensors.push(BeemSensor::plain(
                format!("solar_{equipment_id}_{key}"),
                format!("Solar Equipment {equipment_id} {key}"),
                unit,
                icon,
                DeviceInfo::solar_equipment(&equipment_id),
                SensorSource::SolarEquipment { index, key },
            ));
        }
    }
}
