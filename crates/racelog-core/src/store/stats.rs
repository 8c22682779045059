//! Aggregate statistics over a telemetry history
//!
//! Statistics are maintained incrementally: a running sum and count per
//! channel for the mean, and direct comparison for min/max. Folding readings
//! one at a time in history order gives exactly what
//! [`Aggregate::from_readings`] computes over the whole history.

use serde::Serialize;

use crate::reading::{Field, Reading, CHANNEL_COUNT};

/// Count, min, max and mean of one channel
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FieldStats {
    count: usize,
    min: f64,
    max: f64,
    sum: f64,
}

impl FieldStats {
    /// Fold one value in
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    /// Number of values folded in
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }
}

/// Statistics over every reading in a history
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Aggregate {
    count: usize,
    first_time_ms: Option<u64>,
    last_time_ms: Option<u64>,
    fields: [FieldStats; CHANNEL_COUNT],
}

impl Aggregate {
    /// Empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics computed by a full scan
    pub fn from_readings<'a, I>(readings: I) -> Self
    where
        I: IntoIterator<Item = &'a Reading>,
    {
        let mut aggregate = Self::new();
        for reading in readings {
            aggregate.push(reading);
        }
        aggregate
    }

    /// Fold one reading in.
    ///
    /// Only channels the reading's layout carries are counted, so legacy
    /// readings never drag extended channels toward their defaults.
    pub fn push(&mut self, reading: &Reading) {
        self.count += 1;
        self.first_time_ms.get_or_insert(reading.time_ms());
        self.last_time_ms = Some(reading.time_ms());
        for (field, value) in reading.channels() {
            self.fields[field.index()].push(value);
        }
    }

    /// Number of readings
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Statistics of one channel
    pub fn field(&self, field: Field) -> &FieldStats {
        &self.fields[field.index()]
    }

    /// Channels that have at least one value
    pub fn fields(&self) -> impl Iterator<Item = (Field, &FieldStats)> {
        Field::ALL
            .iter()
            .map(move |f| (*f, &self.fields[f.index()]))
            .filter(|(_, stats)| stats.count > 0)
    }

    /// Time covered, from the first to the last reading
    pub fn duration_ms(&self) -> u64 {
        match (self.first_time_ms, self.last_time_ms) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        }
    }

    pub fn first_time_ms(&self) -> Option<u64> {
        self.first_time_ms
    }

    pub fn last_time_ms(&self) -> Option<u64> {
        self.last_time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let stats = FieldStats::default();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.min(), None);
        assert_eq!(stats.mean(), None);
        assert!(Aggregate::new().is_empty());
    }

    #[test]
    fn test_speed_stats() {
        let readings = [
            Reading::legacy(100, 10.5, 2000, 25.0, 35.2),
            Reading::legacy(200, 15.3, 2500, 40.0, 35.5),
        ];
        let aggregate = Aggregate::from_readings(&readings);
        let speed = aggregate.field(Field::Speed);

        assert_eq!(aggregate.count(), 2);
        assert_eq!(speed.count(), 2);
        assert_eq!(speed.max(), Some(15.3));
        assert_eq!(speed.min(), Some(10.5));
        assert!((speed.mean().unwrap() - 12.9).abs() < 1e-9);
        assert_eq!(aggregate.duration_ms(), 100);
    }

    #[test]
    fn test_legacy_readings_skip_extended_channels() {
        let mut values = [0.0; CHANNEL_COUNT];
        values[Field::GpsLat.index()] = 48.85;
        let readings = [
            Reading::legacy(0, 1.0, 1000, 0.0, 20.0),
            Reading::extended(10, values),
        ];
        let aggregate = Aggregate::from_readings(&readings);
        assert_eq!(aggregate.field(Field::Speed).count(), 2);
        assert_eq!(aggregate.field(Field::GpsLat).count(), 1);
        assert_eq!(aggregate.field(Field::GpsLat).mean(), Some(48.85));
        assert_eq!(aggregate.fields().count(), CHANNEL_COUNT);
    }
}
