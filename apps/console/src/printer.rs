use std::io::{self, Write};

use forza_ingest_udp::{IngestError, ListenerError, SledData, TelemetryEvent, TelemetryListener, TelemetrySample};
use parking_lot::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Summary,
    Json,
}

/// Lit once current rpm reaches `threshold` of max rpm.
#[derive(Debug, Clone, Copy)]
pub struct ShiftLight {
    threshold: f32,
}

impl ShiftLight {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn is_lit(&self, sled: &SledData) -> bool {
        sled.is_race_on() && sled.rpm_fraction() >= self.threshold
    }
}

struct PrinterState<W> {
    out: W,
    shift_lit: bool,
}

/// Writes one line per sample.
pub struct ConsoleListener<W> {
    format: OutputFormat,
    shift: ShiftLight,
    state: Mutex<PrinterState<W>>,
}

impl ConsoleListener<io::Stdout> {
    pub fn stdout(format: OutputFormat, shift: ShiftLight) -> Self {
        Self::new(io::stdout(), format, shift)
    }
}

impl<W: Write + Send> ConsoleListener<W> {
    pub fn new(out: W, format: OutputFormat, shift: ShiftLight) -> Self {
        Self { format, shift, state: Mutex::new(PrinterState { out, shift_lit: false }) }
    }

    fn summary(&self, sample: &TelemetrySample) -> String {
        let Some(sled) = sample.sled.as_ref() else {
            return "UNKNOWN PROTOCOL".to_string();
        };
        let mut line = format!(
            "RPM: {} / {} / SHIFT: {}",
            sled.current_engine_rpm as i32,
            sled.engine_max_rpm as i32,
            self.shift.is_lit(sled)
        );
        if let Some(dash) = sample.car_dash.as_ref() {
            line.push_str(&format!(" / GEAR: {}", dash.gear()));
        }
        line
    }

    fn write_line(&self, line: &str) -> Result<(), ListenerError> {
        let mut state = self.state.lock();
        writeln!(state.out, "{line}").map_err(|e| ListenerError::Failed(format!("write output: {e}")))
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.state.into_inner().out
    }
}

impl<W: Write + Send> TelemetryListener for ConsoleListener<W> {
    fn on_next(&self, sample: &TelemetrySample) -> Result<(), ListenerError> {
        if let Some(sled) = sample.sled.as_ref() {
            let lit = self.shift.is_lit(sled);
            let mut state = self.state.lock();
            if lit != state.shift_lit {
                state.shift_lit = lit;
                info!(lit, rpm = sled.current_engine_rpm, "shift light changed");
            }
        }

        let line = match self.format {
            OutputFormat::Summary => self.summary(sample),
            OutputFormat::Json => serde_json::to_string(&TelemetryEvent::Sample(*sample))
                .map_err(|e| ListenerError::Failed(format!("encode sample: {e}")))?,
        };
        self.write_line(&line)
    }

    fn on_completed(&self) -> Result<(), ListenerError> {
        match self.format {
            OutputFormat::Summary => self.write_line("Finished listening"),
            OutputFormat::Json => {
                let line = serde_json::to_string(&TelemetryEvent::Completed)
                    .map_err(|e| ListenerError::Failed(format!("encode completion: {e}")))?;
                self.write_line(&line)
            }
        }
    }

    fn on_error(&self, error: &IngestError) {
        eprintln!("Error occurred: {error}");
    }

    fn name(&self) -> &str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forza_ingest_udp::{CarDashData, ProtocolVariant};

    fn racing(rpm: f32, max: f32) -> SledData {
        SledData { is_race_on: 1, current_engine_rpm: rpm, engine_max_rpm: max, ..Default::default() }
    }

    fn printed(format: OutputFormat, samples: &[TelemetrySample]) -> String {
        let printer = ConsoleListener::new(Vec::new(), format, ShiftLight::new(0.8));
        for s in samples {
            printer.on_next(s).expect("write to vec");
        }
        printer.on_completed().expect("write to vec");
        String::from_utf8(printer.into_inner()).expect("utf8")
    }

    #[test]
    fn shift_light_threshold() {
        let light = ShiftLight::new(0.8);
        assert!(light.is_lit(&racing(5600.0, 7000.0)));
        assert!(!light.is_lit(&racing(5500.0, 7000.0)));
        assert!(!light.is_lit(&SledData { is_race_on: 0, ..racing(6900.0, 7000.0) }));
    }

    #[test]
    fn summary_includes_gear_only_with_dash() {
        let sled_only = TelemetrySample::decoded(ProtocolVariant::Sled, racing(6500.0, 7000.0), None);
        let dash = CarDashData { gear: 4, ..Default::default() };
        let with_dash = TelemetrySample::decoded(ProtocolVariant::CarDash, racing(3000.0, 7000.0), Some(dash));

        let out = printed(OutputFormat::Summary, &[sled_only, with_dash, TelemetrySample::unknown()]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "RPM: 6500 / 7000 / SHIFT: true",
                "RPM: 3000 / 7000 / SHIFT: false / GEAR: 4",
                "UNKNOWN PROTOCOL",
                "Finished listening",
            ]
        );
    }

    #[test]
    fn json_lines_round_trip() {
        let sample = TelemetrySample::decoded(ProtocolVariant::Sled, racing(1000.0, 7000.0), None);
        let out = printed(OutputFormat::Json, &[sample]);
        let mut lines = out.lines();
        let first: TelemetryEvent = serde_json::from_str(lines.next().expect("sample line")).expect("json");
        assert_eq!(first, TelemetryEvent::Sample(sample));
        let last: TelemetryEvent = serde_json::from_str(lines.next().expect("completion line")).expect("json");
        assert_eq!(last, TelemetryEvent::Completed);
    }
}
