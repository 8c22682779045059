//! Demo Mode - simulated vehicle telemetry
//!
//! Generates plausible extended-layout readings without a vehicle attached:
//! a car idling with occasional throttle blips, speed, temperatures and
//! g-forces that follow the engine, and a GPS track drifting around a fixed
//! origin. Seeded runs are reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use crate::config::WireFormat;
use crate::parser::LineParser;
use crate::reading::{Field, Layout, Reading, CHANNEL_COUNT};
use crate::replay::Recording;
use crate::source::ByteStream;

/// Default time between samples
pub const DEFAULT_INTERVAL_MS: u64 = 50;

const IDLE_RPM: f64 = 850.0;
const RAMP_UP_MS: u64 = 300;
const HOLD_MS: u64 = 1500;
const RAMP_DOWN_MS: u64 = 1200;
const STANDARD_GRAVITY: f64 = 9.80665;
const METERS_PER_DEGREE: f64 = 111_320.0;
const ORIGIN: (f64, f64, f64) = (48.2620, 11.6670, 520.0);

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlipState {
    Idle,
    RampUp { start_ms: u64 },
    Hold { start_ms: u64 },
    RampDown { start_ms: u64 },
}

/// Synthetic telemetry generator
pub struct DemoSimulator {
    interval_ms: u64,
    time_ms: u64,
    next_blip_at_ms: u64,
    blip_state: BlipState,
    current_rpm: f64,
    blip_target_rpm: f64,
    speed_kmh: f64,
    heading_rad: f64,
    position: (f64, f64),
    rng: StdRng,
}

impl DemoSimulator {
    /// Reproducible simulator
    pub fn new(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Simulator seeded from the OS
    pub fn random() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let first_blip = rng.gen_range(2000..5000);
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            time_ms: 0,
            next_blip_at_ms: first_blip,
            blip_state: BlipState::Idle,
            current_rpm: IDLE_RPM,
            blip_target_rpm: IDLE_RPM,
            speed_kmh: 0.0,
            heading_rad: 0.0,
            position: (ORIGIN.0, ORIGIN.1),
            rng,
        }
    }

    /// Set the sample interval (at least 1ms)
    pub fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms.max(1);
        self
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Produce the reading at the current time and step forward one interval
    pub fn next_reading(&mut self) -> Reading {
        let time_ms = self.time_ms;
        let dt = self.interval_ms as f64 / 1000.0;
        let t = time_ms as f64 / 1000.0;

        self.update_blip_state(time_ms);
        let target_rpm = self.target_rpm(time_ms);
        let rpm_rate = if target_rpm > self.current_rpm { 8000.0 } else { 3000.0 };
        let max_change = rpm_rate * dt;
        self.current_rpm += (target_rpm - self.current_rpm).clamp(-max_change, max_change);
        let wobble = if self.blip_state == BlipState::Idle {
            20.0 * (t * 2.5).sin() + 10.0 * (t * 7.3).sin()
        } else {
            0.0
        };
        let rpm = (self.current_rpm + wobble).max(0.0);
        let throttle = self.throttle(t);

        // Speed follows the engine with some lag
        let target_speed = ((rpm - IDLE_RPM) / 30.0).max(0.0);
        let previous_speed = self.speed_kmh;
        self.speed_kmh += (target_speed - self.speed_kmh) * (dt * 1.5).min(1.0);
        let speed_ms = self.speed_kmh / 3.6;
        let long_g = (speed_ms - previous_speed / 3.6) / dt / STANDARD_GRAVITY;

        let yaw_rate = 0.15 * (t * 0.2).sin();
        self.heading_rad += yaw_rate * dt;
        let lat_g = speed_ms * yaw_rate / STANDARD_GRAVITY;
        let vert_g = 1.0 + self.noise(0.02);

        let distance = speed_ms * dt;
        let (lat, lon) = self.position;
        self.position = (
            lat + distance * self.heading_rad.cos() / METERS_PER_DEGREE,
            lon + distance * self.heading_rad.sin() / (METERS_PER_DEGREE * lat.to_radians().cos()),
        );
        let altitude = ORIGIN.2 + 2.0 * (t * 0.05).sin();

        let battery_temp = 25.0 + 15.0 * (1.0 - (-t / 300.0).exp());
        let tire_base = 35.0 + 0.15 * self.speed_kmh + 10.0 * (1.0 - (-t / 120.0).exp());

        let mut values = [0.0; CHANNEL_COUNT];
        values[Field::Speed.index()] = round_to(self.speed_kmh, 2);
        values[Field::Rpm.index()] = rpm.round();
        values[Field::Throttle.index()] = round_to(throttle, 1);
        values[Field::BatteryTemp.index()] = round_to(battery_temp, 2);
        values[Field::GForceLat.index()] = round_to(lat_g, 3);
        values[Field::GForceLong.index()] = round_to(long_g, 3);
        values[Field::GForceVert.index()] = round_to(vert_g, 3);
        values[Field::AccelX.index()] = round_to(long_g * STANDARD_GRAVITY, 3);
        values[Field::AccelY.index()] = round_to(lat_g * STANDARD_GRAVITY, 3);
        values[Field::AccelZ.index()] = round_to(vert_g * STANDARD_GRAVITY, 3);
        values[Field::GpsLat.index()] = round_to(self.position.0, 7);
        values[Field::GpsLon.index()] = round_to(self.position.1, 7);
        values[Field::GpsAlt.index()] = round_to(altitude, 1);
        values[Field::TireFl.index()] = round_to(tire_base + 1.5 + self.noise(0.3), 1);
        values[Field::TireFr.index()] = round_to(tire_base + 1.0 + self.noise(0.3), 1);
        values[Field::TireRl.index()] = round_to(tire_base + self.noise(0.3), 1);
        values[Field::TireRr.index()] = round_to(tire_base - 0.5 + self.noise(0.3), 1);

        self.time_ms += self.interval_ms;
        Reading::extended(time_ms, values)
    }

    /// Generate `count` consecutive readings
    pub fn take_readings(&mut self, count: usize) -> Vec<Reading> {
        (0..count).map(|_| self.next_reading()).collect()
    }

    /// Generate an in-memory recording of `count` readings
    pub fn recording(&mut self, count: usize) -> Recording {
        Recording::new(self.take_readings(count))
    }

    /// Turn the simulator into a byte stream speaking the wire format.
    ///
    /// With `paced` set, each line becomes readable only when its sample
    /// interval has elapsed in wall-clock time, like a real device.
    pub fn into_stream(self, format: &WireFormat, paced: bool) -> DemoStream {
        DemoStream {
            codec: LineParser::new(format),
            simulator: self,
            pending: VecDeque::new(),
            header_sent: false,
            paced,
            started: Instant::now(),
            timeout: Duration::from_secs(1),
        }
    }

    fn update_blip_state(&mut self, now: u64) {
        match self.blip_state {
            BlipState::Idle => {
                if now >= self.next_blip_at_ms {
                    self.blip_target_rpm = self.rng.gen_range(3000.0..6500.0);
                    self.blip_state = BlipState::RampUp { start_ms: now };
                }
            }
            BlipState::RampUp { start_ms } => {
                if now >= start_ms + RAMP_UP_MS {
                    self.blip_state = BlipState::Hold { start_ms: now };
                }
            }
            BlipState::Hold { start_ms } => {
                if now >= start_ms + HOLD_MS {
                    self.blip_state = BlipState::RampDown { start_ms: now };
                }
            }
            BlipState::RampDown { start_ms } => {
                if now >= start_ms + RAMP_DOWN_MS {
                    self.blip_state = BlipState::Idle;
                    self.next_blip_at_ms = now + self.rng.gen_range(3000..8000);
                }
            }
        }
    }

    fn target_rpm(&self, now: u64) -> f64 {
        match self.blip_state {
            BlipState::Idle => IDLE_RPM,
            BlipState::RampUp { start_ms } => {
                let progress = ((now - start_ms) as f64 / RAMP_UP_MS as f64).min(1.0);
                IDLE_RPM + (self.blip_target_rpm - IDLE_RPM) * progress
            }
            BlipState::Hold { .. } => self.blip_target_rpm,
            BlipState::RampDown { start_ms } => {
                let progress = ((now - start_ms) as f64 / RAMP_DOWN_MS as f64).min(1.0);
                self.blip_target_rpm + (IDLE_RPM - self.blip_target_rpm) * progress
            }
        }
    }

    fn throttle(&self, t: f64) -> f64 {
        let progress = if self.blip_target_rpm > IDLE_RPM {
            ((self.current_rpm - IDLE_RPM) / (self.blip_target_rpm - IDLE_RPM)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let throttle = match self.blip_state {
            BlipState::Idle => 1.5 + (t * 0.3).sin().abs(),
            BlipState::RampUp { .. } => 2.0 + progress * 75.0,
            BlipState::Hold { .. } => 75.0 + 10.0 * (t * 3.0).sin(),
            BlipState::RampDown { .. } => 2.0 + progress * 40.0,
        };
        throttle.clamp(0.0, 100.0)
    }

    fn noise(&mut self, amplitude: f64) -> f64 {
        self.rng.gen_range(-amplitude..=amplitude)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Wire-format byte stream backed by a [`DemoSimulator`]
pub struct DemoStream {
    codec: LineParser,
    simulator: DemoSimulator,
    pending: VecDeque<u8>,
    header_sent: bool,
    paced: bool,
    started: Instant,
    timeout: Duration,
}

impl DemoStream {
    fn refill(&mut self) -> io::Result<()> {
        if !self.header_sent {
            self.header_sent = true;
            self.started = Instant::now();
            self.push_line(self.codec.header(Layout::Extended).to_string());
            return Ok(());
        }

        if self.paced {
            let due = self.started + Duration::from_millis(self.simulator.time_ms);
            let wait = due.saturating_duration_since(Instant::now());
            if wait > self.timeout {
                std::thread::sleep(self.timeout);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no sample due yet"));
            }
            std::thread::sleep(wait);
        }

        let reading = self.simulator.next_reading();
        let line = self.codec.format_line(&reading, Layout::Extended);
        self.push_line(line);
        Ok(())
    }

    fn push_line(&mut self, line: String) {
        self.pending.extend(line.into_bytes());
        self.pending.push_back(b'\n');
    }
}

impl Read for DemoStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            self.refill()?;
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl ByteStream for DemoStream {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationPolicy;
    use crate::validate::RangeValidator;

    #[test]
    fn test_same_seed_same_run() {
        let a = DemoSimulator::new(7).take_readings(200);
        let b = DemoSimulator::new(7).take_readings(200);
        assert_eq!(a, b);
        assert_ne!(a, DemoSimulator::new(8).take_readings(200));
    }

    #[test]
    fn test_timestamps_follow_interval() {
        let readings = DemoSimulator::new(1).with_interval(20).take_readings(5);
        let times: Vec<u64> = readings.iter().map(|r| r.time_ms()).collect();
        assert_eq!(times, vec![0, 20, 40, 60, 80]);
        assert!(readings.iter().all(|r| r.layout() == Layout::Extended));
    }

    #[test]
    fn test_idle_rpm_range() {
        let mut sim = DemoSimulator::new(3);
        // The first blip is at least two seconds in
        for reading in sim.take_readings(30) {
            let rpm = reading.rpm();
            assert!(rpm > 700 && rpm < 1000, "RPM {} out of idle range", rpm);
        }
    }

    #[test]
    fn test_values_pass_validation() {
        let mut validator = RangeValidator::new(ValidationPolicy::Reject);
        for reading in DemoSimulator::new(11).take_readings(2000) {
            validator.check(&reading).unwrap();
        }
    }

    #[test]
    fn test_stream_emits_header_then_lines() {
        let format = WireFormat::default();
        let parser = LineParser::new(&format);
        let mut stream = DemoSimulator::new(5).into_stream(&format, false);

        let mut text = Vec::new();
        let mut buf = [0u8; 64];
        while text.iter().filter(|&&b| b == b'\n').count() < 4 {
            let n = stream.read(&mut buf).unwrap();
            text.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8(text).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(parser.header(Layout::Extended)));
        let first = parser.parse_reading(lines.next().unwrap()).unwrap().unwrap();
        assert_eq!(first.time_ms(), 0);
    }
}
