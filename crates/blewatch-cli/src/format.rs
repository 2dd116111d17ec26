//! Output formatting for text, JSON, and CSV output.

use std::collections::BTreeMap;

use anyhow::Result;
use blewatch_core::{ReplaySession, SensorFrame};
use blewatch_types::{DeviceRecord, hex};
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool, compact: bool) -> Self {
        Self { no_color, compact }
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }
}

/// Escape a value for CSV output.
///
/// Wraps the value in quotes if it contains commas, quotes, or newlines.
/// Double quotes are escaped by doubling them.
#[must_use]
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.unix_timestamp().to_string())
}

fn clock(t: OffsetDateTime) -> String {
    format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second())
}

/// RSSI colored by strength.
#[must_use]
pub fn format_rssi(rssi: i16, no_color: bool) -> String {
    let text = format!("{} dBm", rssi);
    if no_color {
        text
    } else if rssi >= -60 {
        format!("{}", text.green())
    } else if rssi >= -80 {
        format!("{}", text.yellow())
    } else {
        format!("{}", text.red())
    }
}

/// Latest battery sample, `-` if none.
#[must_use]
pub fn format_battery(record: &DeviceRecord) -> String {
    match record.decoded.battery.back() {
        Some(sample) => format!("{} mV ({:.0}%)", sample.mv, sample.percent),
        None => "-".to_string(),
    }
}

/// Latest motion sample, `-` if none.
#[must_use]
pub fn format_motion(record: &DeviceRecord, no_color: bool) -> String {
    match record.decoded.motion.back() {
        Some(sample) if sample.active => {
            let text = format!("active ({}s)", sample.countdown);
            if no_color {
                text
            } else {
                format!("{}", text.yellow())
            }
        }
        Some(_) => "idle".to_string(),
        None => "-".to_string(),
    }
}

// ============================================================================
// Device snapshots
// ============================================================================

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "RSSI")]
    rssi: String,
    #[tabled(rename = "Range")]
    range: String,
    #[tabled(rename = "Total")]
    total: u64,
    #[tabled(rename = "Rate")]
    rate: u32,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Motion")]
    motion: String,
    #[tabled(rename = "Last seen")]
    last_seen: String,
}

/// Format devices as a table.
#[must_use]
pub fn format_devices_text(devices: &[DeviceRecord], opts: &FormatOptions) -> String {
    if devices.is_empty() {
        return "No devices match.\n".to_string();
    }

    let rows: Vec<DeviceRow> = devices
        .iter()
        .map(|record| DeviceRow {
            name: if opts.no_color || record.has_unknown_name() {
                record.name.clone()
            } else {
                format!("{}", record.name.cyan())
            },
            id: record.id.clone(),
            rssi: format_rssi(record.rssi, opts.no_color),
            range: format!(
                "{}..{} ({})",
                record.stats.rssi_min,
                record.stats.rssi_max,
                record.stats.rssi_delta()
            ),
            total: record.stats.total,
            rate: record.stats.rate,
            battery: format_battery(record),
            motion: format_motion(record, opts.no_color),
            last_seen: clock(record.last_seen),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());

    let count = if opts.no_color {
        devices.len().to_string()
    } else {
        format!("{}", devices.len().to_string().green().bold())
    };
    format!("{} device(s)\n\n{}\n", count, table)
}

/// Format devices as CSV.
#[must_use]
pub fn format_devices_csv(devices: &[DeviceRecord]) -> String {
    let mut output =
        "id,name,rssi,rssi_min,rssi_max,total,rate,battery_mv,battery_percent,motion_active,uptime,last_seen\n"
            .to_string();
    for record in devices {
        let battery = record.decoded.battery.back();
        let motion = record.decoded.motion.back();
        output.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}\n",
            csv_escape(&record.id),
            csv_escape(&record.name),
            record.rssi,
            record.stats.rssi_min,
            record.stats.rssi_max,
            record.stats.total,
            record.stats.rate,
            battery.map(|b| b.mv.to_string()).unwrap_or_default(),
            battery.map(|b| format!("{:.1}", b.percent)).unwrap_or_default(),
            motion.map(|m| m.active.to_string()).unwrap_or_default(),
            record.decoded.uptime.map(|u| u.to_string()).unwrap_or_default(),
            rfc3339(record.last_seen),
        ));
    }
    output
}

/// Format devices as JSON.
pub fn format_devices_json(devices: &[DeviceRecord], opts: &FormatOptions) -> Result<String> {
    opts.as_json(devices)
}

/// One line per store update, for `--follow`.
#[must_use]
pub fn format_update_line(record: &DeviceRecord, opts: &FormatOptions) -> String {
    let mut line = format!(
        "{} {} {} {}",
        clock(record.last_seen),
        record.id,
        record.name,
        format_rssi(record.rssi, opts.no_color)
    );
    if !record.decoded.battery.is_empty() {
        line.push_str(&format!(" battery={}", format_battery(record)));
    }
    if !record.decoded.motion.is_empty() {
        line.push_str(&format!(" motion={}", format_motion(record, opts.no_color)));
    }
    line
}

// ============================================================================
// Sessions
// ============================================================================

/// Per-device counts within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDevice {
    pub id: String,
    pub name: Option<String>,
    pub packets: usize,
    pub rssi_min: i16,
    pub rssi_max: i16,
}

/// Summary of a session file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub created: String,
    pub version: u32,
    pub packets: usize,
    pub duration_ms: u64,
    /// Packets without a device id; the store ignores these.
    pub anonymous: usize,
    pub devices: Vec<SessionDevice>,
}

impl SessionSummary {
    pub fn from_session(session: &ReplaySession) -> Self {
        let meta = session.meta();
        let created = OffsetDateTime::from_unix_timestamp_nanos(i128::from(meta.created) * 1_000_000)
            .map(rfc3339)
            .unwrap_or_else(|_| meta.created.to_string());

        let mut devices: BTreeMap<&str, SessionDevice> = BTreeMap::new();
        let mut anonymous = 0;
        for entry in session.packets() {
            let packet = &entry.packet;
            let Some(id) = packet.device_id() else {
                anonymous += 1;
                continue;
            };
            let device = devices.entry(id).or_insert_with(|| SessionDevice {
                id: id.to_string(),
                name: None,
                packets: 0,
                rssi_min: packet.rssi,
                rssi_max: packet.rssi,
            });
            device.packets += 1;
            device.rssi_min = device.rssi_min.min(packet.rssi);
            device.rssi_max = device.rssi_max.max(packet.rssi);
            if let Some(name) = packet.device.name.as_deref().filter(|n| !n.is_empty()) {
                device.name = Some(name.to_string());
            }
        }

        Self {
            name: meta.name.clone(),
            created,
            version: meta.version,
            packets: session.len(),
            duration_ms: u64::try_from(session.duration().as_millis()).unwrap_or(u64::MAX),
            anonymous,
            devices: devices.into_values().collect(),
        }
    }
}

#[derive(Tabled)]
struct SessionDeviceRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Packets")]
    packets: usize,
    #[tabled(rename = "RSSI range")]
    range: String,
}

/// Format a session summary as text.
#[must_use]
pub fn format_session_text(summary: &SessionSummary, opts: &FormatOptions) -> String {
    let title = if opts.no_color {
        summary.name.clone()
    } else {
        format!("{}", summary.name.bold())
    };
    let mut output = format!(
        "Session:  {}\nCreated:  {}\nVersion:  {}\nPackets:  {}\nDuration: {:.1}s\n",
        title,
        summary.created,
        summary.version,
        summary.packets,
        summary.duration_ms as f64 / 1000.0
    );
    if summary.anonymous > 0 {
        output.push_str(&format!("Anonymous packets: {}\n", summary.anonymous));
    }

    let rows: Vec<SessionDeviceRow> = summary
        .devices
        .iter()
        .map(|d| SessionDeviceRow {
            id: d.id.clone(),
            name: d.name.clone().unwrap_or_else(|| "-".to_string()),
            packets: d.packets,
            range: format!("{}..{}", d.rssi_min, d.rssi_max),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    output.push_str(&format!("\n{} device(s)\n{}\n", summary.devices.len(), table));
    output
}

/// Format a session summary as CSV, one row per device.
#[must_use]
pub fn format_session_csv(summary: &SessionSummary) -> String {
    let mut output = "id,name,packets,rssi_min,rssi_max\n".to_string();
    for d in &summary.devices {
        output.push_str(&format!(
            "{},{},{},{},{}\n",
            csv_escape(&d.id),
            csv_escape(d.name.as_deref().unwrap_or("")),
            d.packets,
            d.rssi_min,
            d.rssi_max
        ));
    }
    output
}

// ============================================================================
// Frames
// ============================================================================

/// Format a decoded frame as text.
#[must_use]
pub fn format_frame_text(frame: &SensorFrame, raw: &[u8], opts: &FormatOptions) -> String {
    let mut output = format!("Frame:    {} ({} bytes)\n", frame.format, raw.len());
    output.push_str(&format!("Bytes:    {}\n", hex::encode(raw)));
    if let Some(battery) = &frame.battery {
        output.push_str(&format!(
            "Battery:  {} mV ({:.1}%)\n",
            battery.mv, battery.percent
        ));
    }
    if let Some(uptime) = frame.uptime {
        output.push_str(&format!("Uptime:   {} s\n", uptime));
    }
    if let Some(motion) = &frame.motion {
        let state = if motion.active {
            let text = format!("active, {} s remaining", motion.countdown);
            if opts.no_color {
                text
            } else {
                format!("{}", text.yellow())
            }
        } else {
            "idle".to_string()
        };
        output.push_str(&format!("Motion:   {}\n", state));
    }
    output
}

/// Format a decoded frame as CSV.
#[must_use]
pub fn format_frame_csv(frame: &SensorFrame) -> String {
    format!(
        "format,battery_mv,battery_percent,uptime,motion_active,motion_countdown\n{},{},{},{},{},{}\n",
        frame.format,
        frame.battery.map(|b| b.mv.to_string()).unwrap_or_default(),
        frame.battery.map(|b| format!("{:.1}", b.percent)).unwrap_or_default(),
        frame.uptime.map(|u| u.to_string()).unwrap_or_default(),
        frame.motion.map(|m| m.active.to_string()).unwrap_or_default(),
        frame.motion.map(|m| m.countdown.to_string()).unwrap_or_default(),
    )
}
