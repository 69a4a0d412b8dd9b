pub const TOPIC_SENSOR_TEMP: &str = "thermostat/sensor/temperature";
pub const TOPIC_SENSOR_STATUS: &str = "thermostat/sensor/status";
