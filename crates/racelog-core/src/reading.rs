//! Telemetry readings
//!
//! A [`Reading`] is one timestamped sample from the vehicle. The set of
//! channels it carries is described by a [`Layout`]: the legacy layout has
//! the first four channels, the extended layout has all of them. Both share
//! one channel table ([`Field::ALL`]) so parsing, recording and statistics
//! are all driven by the same data instead of per-layout code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of numeric channels in the extended layout (excluding `time_ms`)
pub const CHANNEL_COUNT: usize = 17;

/// Name of the timestamp column in the wire format
pub const TIME_COLUMN: &str = "time_ms";

/// Numeric type a channel is transmitted as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Whole number (e.g. RPM)
    Integer,
    /// Floating point
    Float,
}

/// A numeric telemetry channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Vehicle speed in km/h
    Speed,
    /// Engine/motor RPM
    Rpm,
    /// Throttle position in percent
    Throttle,
    /// Battery temperature in °C
    BatteryTemp,
    /// Lateral g-force
    GForceLat,
    /// Longitudinal g-force
    GForceLong,
    /// Vertical g-force
    GForceVert,
    /// Linear acceleration, X axis (m/s²)
    AccelX,
    /// Linear acceleration, Y axis (m/s²)
    AccelY,
    /// Linear acceleration, Z axis (m/s²)
    AccelZ,
    /// GPS latitude in degrees
    GpsLat,
    /// GPS longitude in degrees
    GpsLon,
    /// GPS altitude in meters
    GpsAlt,
    /// Front left tire temperature in °C
    TireFl,
    /// Front right tire temperature in °C
    TireFr,
    /// Rear left tire temperature in °C
    TireRl,
    /// Rear right tire temperature in °C
    TireRr,
}

impl Field {
    /// All channels in wire order
    pub const ALL: [Field; CHANNEL_COUNT] = [
        Field::Speed,
        Field::Rpm,
        Field::Throttle,
        Field::BatteryTemp,
        Field::GForceLat,
        Field::GForceLong,
        Field::GForceVert,
        Field::AccelX,
        Field::AccelY,
        Field::AccelZ,
        Field::GpsLat,
        Field::GpsLon,
        Field::GpsAlt,
        Field::TireFl,
        Field::TireFr,
        Field::TireRl,
        Field::TireRr,
    ];

    /// Position of this channel in [`Field::ALL`]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Default column name in the wire header
    pub const fn column_name(self) -> &'static str {
        match self {
            Field::Speed => "speed",
            Field::Rpm => "rpm",
            Field::Throttle => "throttle",
            Field::BatteryTemp => "battery_temp",
            Field::GForceLat => "g_force_lat",
            Field::GForceLong => "g_force_long",
            Field::GForceVert => "g_force_vert",
            Field::AccelX => "accel_x",
            Field::AccelY => "accel_y",
            Field::AccelZ => "accel_z",
            Field::GpsLat => "gps_lat",
            Field::GpsLon => "gps_lon",
            Field::GpsAlt => "gps_alt",
            Field::TireFl => "tire_fl",
            Field::TireFr => "tire_fr",
            Field::TireRl => "tire_rl",
            Field::TireRr => "tire_rr",
        }
    }

    /// How the channel is encoded on the wire
    pub const fn kind(self) -> ValueKind {
        match self {
            Field::Rpm => ValueKind::Integer,
            _ => ValueKind::Float,
        }
    }

    /// Value assumed for a channel the reading's layout does not carry.
    ///
    /// A vehicle at rest still sees 1g vertically.
    pub const fn default_value(self) -> f64 {
        match self {
            Field::GForceVert => 1.0,
            _ => 0.0,
        }
    }

    /// Look a channel up by its default column name
    pub fn from_column_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.column_name() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Supported line layouts, selected by the number of fields on a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// `time_ms;speed;rpm;throttle;battery_temp`
    Legacy,
    /// All eighteen fields
    Extended,
}

impl Layout {
    /// Every supported layout, smallest first
    pub const ALL: [Layout; 2] = [Layout::Legacy, Layout::Extended];

    /// Number of fields on a line, including `time_ms`
    pub const fn field_count(self) -> usize {
        self.channel_count() + 1
    }

    /// Number of numeric channels, excluding `time_ms`
    pub const fn channel_count(self) -> usize {
        match self {
            Layout::Legacy => 4,
            Layout::Extended => CHANNEL_COUNT,
        }
    }

    /// Channels carried by this layout, in wire order
    pub fn channels(self) -> &'static [Field] {
        &Field::ALL[..self.channel_count()]
    }

    /// Whether a reading in this layout carries `field`
    pub fn contains(self, field: Field) -> bool {
        field.index() < self.channel_count()
    }

    /// Select the layout matching a line arity
    pub fn from_field_count(count: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.field_count() == count)
    }

    /// Field counts the parser accepts
    pub fn supported_field_counts() -> Vec<usize> {
        Self::ALL.iter().map(|l| l.field_count()).collect()
    }
}

/// One immutable, fully parsed telemetry sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    time_ms: u64,
    layout: Layout,
    values: [f64; CHANNEL_COUNT],
}

impl Reading {
    /// Build a reading from the channel values of `layout`, in wire order.
    ///
    /// Returns `None` if `values` does not have exactly
    /// `layout.channel_count()` entries. Channels outside the layout take
    /// their [`Field::default_value`].
    pub fn new(time_ms: u64, layout: Layout, values: &[f64]) -> Option<Self> {
        if values.len() != layout.channel_count() {
            return None;
        }

        let mut all = Field::ALL.map(Field::default_value);
        for (field, value) in layout.channels().iter().zip(values) {
            all[field.index()] = match field.kind() {
                ValueKind::Integer => value.trunc(),
                ValueKind::Float => *value,
            };
        }

        Some(Self {
            time_ms,
            layout,
            values: all,
        })
    }

    /// Build a legacy-layout reading
    pub fn legacy(time_ms: u64, speed: f64, rpm: i64, throttle: f64, battery_temp: f64) -> Self {
        let mut values = Field::ALL.map(Field::default_value);
        values[Field::Speed.index()] = speed;
        values[Field::Rpm.index()] = rpm as f64;
        values[Field::Throttle.index()] = throttle;
        values[Field::BatteryTemp.index()] = battery_temp;
        Self {
            time_ms,
            layout: Layout::Legacy,
            values,
        }
    }

    /// Build an extended-layout reading from all channel values
    pub fn extended(time_ms: u64, mut values: [f64; CHANNEL_COUNT]) -> Self {
        values[Field::Rpm.index()] = values[Field::Rpm.index()].trunc();
        Self {
            time_ms,
            layout: Layout::Extended,
            values,
        }
    }

    /// Milliseconds since the start of the run
    pub fn time_ms(&self) -> u64 {
        self.time_ms
    }

    /// Layout the reading was produced from
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Value of a channel, or `None` if the layout does not carry it
    pub fn get(&self, field: Field) -> Option<f64> {
        self.layout
            .contains(field)
            .then(|| self.values[field.index()])
    }

    /// Value of a channel, falling back to its default
    pub fn value_or_default(&self, field: Field) -> f64 {
        self.values[field.index()]
    }

    /// Channels carried by this reading, paired with their values
    pub fn channels(&self) -> impl Iterator<Item = (Field, f64)> + '_ {
        self.layout
            .channels()
            .iter()
            .map(move |f| (*f, self.values[f.index()]))
    }

    pub fn speed(&self) -> f64 {
        self.values[Field::Speed.index()]
    }

    pub fn rpm(&self) -> i64 {
        self.values[Field::Rpm.index()] as i64
    }

    pub fn throttle(&self) -> f64 {
        self.values[Field::Throttle.index()]
    }

    pub fn battery_temp(&self) -> f64 {
        self.values[Field::BatteryTemp.index()]
    }

    /// GPS position as (latitude, longitude, altitude), extended layout only
    pub fn gps(&self) -> Option<(f64, f64, f64)> {
        Some((
            self.get(Field::GpsLat)?,
            self.get(Field::GpsLon)?,
            self.get(Field::GpsAlt)?,
        ))
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time: {}ms | Speed: {:.1} km/h | RPM: {} | Throttle: {:.1}% | Temp: {:.1}°C",
            self.time_ms,
            self.speed(),
            self.rpm(),
            self.throttle(),
            self.battery_temp()
        )?;

        if self.layout == Layout::Extended {
            let v = |field: Field| self.values[field.index()];
            write!(
                f,
                " | G: L:{:.2} F:{:.2} V:{:.2} | GPS: {:.6},{:.6} | Tires: {:.1}/{:.1}/{:.1}/{:.1}",
                v(Field::GForceLat),
                v(Field::GForceLong),
                v(Field::GForceVert),
                v(Field::GpsLat),
                v(Field::GpsLon),
                v(Field::TireFl),
                v(Field::TireFr),
                v(Field::TireRl),
                v(Field::TireRr)
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_arity() {
        assert_eq!(Layout::Legacy.field_count(), 5);
        assert_eq!(Layout::Extended.field_count(), 18);
        assert_eq!(Layout::from_field_count(5), Some(Layout::Legacy));
        assert_eq!(Layout::from_field_count(18), Some(Layout::Extended));
        assert_eq!(Layout::from_field_count(4), None);
        assert_eq!(Layout::supported_field_counts(), vec![5, 18]);
    }

    #[test]
    fn test_field_table_is_in_wire_order() {
        for (i, field) in Field::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
            assert_eq!(Field::from_column_name(field.column_name()), Some(*field));
        }
        assert_eq!(Layout::Legacy.channels().last(), Some(&Field::BatteryTemp));
    }

    #[test]
    fn test_legacy_reading_hides_extended_channels() {
        let reading = Reading::legacy(100, 10.5, 2000, 25.0, 35.2);
        assert_eq!(reading.get(Field::Speed), Some(10.5));
        assert_eq!(reading.get(Field::GpsLat), None);
        assert_eq!(reading.value_or_default(Field::GForceVert), 1.0);
        assert_eq!(reading.gps(), None);
        assert_eq!(reading.channels().count(), 4);
    }

    #[test]
    fn test_new_checks_value_count() {
        assert!(Reading::new(0, Layout::Legacy, &[1.0, 2.0, 3.0]).is_none());
        let reading = Reading::new(0, Layout::Legacy, &[1.0, 2500.9, 3.0, 4.0]).unwrap();
        assert_eq!(reading.rpm(), 2500);
        assert_eq!(reading, Reading::legacy(0, 1.0, 2500, 3.0, 4.0));
    }
}
