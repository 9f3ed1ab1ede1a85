//! Systemd control module.
//!
//! This module maps processes to the units that own them and stops units.
//! Queries go through `busctl` against the systemd manager; stopping uses
//! `systemctl`.

use std::process::Command;

use serde::Deserialize;

use crate::error::{Error, IoResultExt, Result};
use crate::executor::ExecutionContext;

const SYSTEMD_SERVICE: &str = "org.freedesktop.systemd1";
const SYSTEMD_MANAGER_PATH: &str = "/org/freedesktop/systemd1";
const SYSTEMD_MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";
const SYSTEMD_UNIT_INTERFACE: &str = "org.freedesktop.systemd1.Unit";

/// Identity of a unit as reported to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub id: String,
    pub description: String,
}

/// Service manager queries needed to attribute processes to units.
pub trait UnitResolver {
    /// Returns an opaque handle (the D-Bus object path) of the unit owning
    /// `pid`. Equal handles denote the same unit.
    fn unit_by_pid(&self, pid: u32) -> Result<String>;

    /// Fetches id and description of a unit handle.
    fn describe_unit(&self, unit: &str) -> Result<UnitInfo>;
}

impl<R: UnitResolver + ?Sized> UnitResolver for &R {
    fn unit_by_pid(&self, pid: u32) -> Result<String> {
        (**self).unit_by_pid(pid)
    }

    fn describe_unit(&self, unit: &str) -> Result<UnitInfo> {
        (**self).describe_unit(unit)
    }
}

/// [`UnitResolver`] talking to the system manager via `busctl`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemdUnits;

impl UnitResolver for SystemdUnits {
    fn unit_by_pid(&self, pid: u32) -> Result<String> {
        let pid = pid.to_string();
        run_busctl(&[
            "call",
            SYSTEMD_SERVICE,
            SYSTEMD_MANAGER_PATH,
            SYSTEMD_MANAGER_INTERFACE,
            "GetUnitByPID",
            "u",
            &pid,
        ])
    }

    fn describe_unit(&self, unit: &str) -> Result<UnitInfo> {
        Ok(UnitInfo {
            id: unit_property(unit, "Id")?,
            description: unit_property(unit, "Description")?,
        })
    }
}

fn unit_property(unit: &str, property: &str) -> Result<String> {
    run_busctl(&[
        "get-property",
        SYSTEMD_SERVICE,
        unit,
        SYSTEMD_UNIT_INTERFACE,
        property,
    ])
}

/// Runs busctl in JSON mode and decodes its single-value reply.
fn run_busctl(args: &[&str]) -> Result<String> {
    let output = Command::new("busctl")
        .arg("--json=short")
        .args(args)
        .output()
        .command_context(format!("busctl --json=short {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::Systemd { message: stderr });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    decode_busctl_reply(&stdout).ok_or_else(|| Error::Systemd {
        message: format!("unexpected busctl reply: {}", stdout.trim()),
    })
}

/// A busctl JSON reply, e.g. `{"type":"s","data":"Network File Share"}`.
#[derive(Debug, Deserialize)]
struct BusctlReply {
    #[serde(rename = "type")]
    signature: String,
    data: BusctlData,
}

/// `get-property` replies carry the value itself, `call` replies the list
/// of returned values.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BusctlData {
    Value(String),
    Values(Vec<String>),
}

/// Extracts the single string or object path of a busctl JSON reply.
fn decode_busctl_reply(reply: &str) -> Option<String> {
    let reply: BusctlReply = serde_json::from_str(reply.trim()).ok()?;
    if !matches!(reply.signature.as_str(), "s" | "o") {
        return None;
    }

    match reply.data {
        BusctlData::Value(value) => Some(value),
        BusctlData::Values(values) => {
            let [value]: [String; 1] = values.try_into().ok()?;
            Some(value)
        }
    }
}

/// Stops a unit, waiting for the job to finish.
///
/// # Arguments
/// * `unit_name` - The name of the unit, e.g. `backup.service`
pub fn stop_unit(ctx: &ExecutionContext, unit_name: &str) -> Result<()> {
    ctx.run_privileged_checked("systemctl", &["stop", unit_name])
}

/// Stops all given units in order.
pub fn stop_units<S: AsRef<str>>(ctx: &ExecutionContext, units: &[S]) -> Result<()> {
    for unit in units {
        stop_unit(ctx, unit.as_ref())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_call_reply() {
        assert_eq!(
            decode_busctl_reply(
                "{\"type\":\"o\",\"data\":[\"/org/freedesktop/systemd1/unit/cron_2eservice\"]}\n"
            )
            .unwrap(),
            "/org/freedesktop/systemd1/unit/cron_2eservice"
        );
    }

    #[test]
    fn test_decode_property_reply_keeps_text_intact() {
        assert_eq!(
            decode_busctl_reply(r#"{"type":"s","data":"Caf\u00e9 share"}"#).unwrap(),
            "Caf\u{e9} share"
        );
        assert_eq!(
            decode_busctl_reply(r#"{"type":"s","data":"line\nbreak \"quoted\""}"#).unwrap(),
            "line\nbreak \"quoted\""
        );
        assert_eq!(decode_busctl_reply(r#"{"type":"s","data":""}"#).unwrap(), "");
    }

    #[test]
    fn test_decode_rejects_other_replies() {
        assert!(decode_busctl_reply(r#"{"type":"u","data":42}"#).is_none());
        assert!(decode_busctl_reply(r#"{"type":"o","data":["/a","/b"]}"#).is_none());
        assert!(decode_busctl_reply(r#"s "text format""#).is_none());
        assert!(decode_busctl_reply("").is_none());
    }
}
