//! Optical code decoding and multi-part fragment reassembly.
//!
//! Meters with a display can export results as scanned codes. Two payload
//! shapes exist:
//!
//! - a self-contained JSON array of measurement points, accepted whole;
//! - a fragment `G<group>[<part>/<total>]:<entries>` of a larger export,
//!   collected per group until every part has arrived, then parsed as
//!   `;`-separated point entries `P<id>=<resistance>[m],<current>[,DDMMYY,HHmm]`.
//!
//! Fragments of different groups may interleave; parts of one group may
//! arrive in any order, and scanning the same part twice is a no-op.

use crate::error::{Error, Result};
use crate::measurement::MeasurementPoint;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, trace};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Fragment header: `G<group>[<part>/<total>]:<rest>`.
static FRAGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^G(\d+)\[(\d+)/(\d+)\]:(.*)$").expect("fragment pattern is valid")
});

/// Point entry: `P<id>=<resistance>[m],<current>[,DDMMYY,HHmm]`.
/// The resistance may use a decimal comma; a trailing `m` means milliohms.
static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(\d+)=(\d+(?:[.,]\d+)?)(m?),(\d+(?:[.,]\d+)?)(?:,(\d{6}),(\d{4}))?$")
        .expect("entry pattern is valid")
});

/// Parts collected so far for one export group.
#[derive(Debug)]
struct ScanGroup {
    total_parts: usize,
    parts: BTreeMap<usize, String>,
}

/// Result of feeding one scanned code to the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// A full set of points was decoded.
    Complete(Vec<MeasurementPoint>),
    /// The fragment was stored; more parts of its group are outstanding.
    Partial {
        /// Export group the fragment belongs to.
        group: u32,
        /// Parts received so far.
        received: usize,
        /// Parts the group announces in total.
        total: usize,
    },
    /// This exact part was already scanned; nothing changed.
    DuplicatePart {
        /// Export group the fragment belongs to.
        group: u32,
        /// The repeated part index.
        part: usize,
    },
}

/// Stateful reassembler for scanned optical codes.
#[derive(Debug, Default)]
pub struct OpticalDecoder {
    groups: HashMap<u32, ScanGroup>,
}

impl OpticalDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one scanned code.
    ///
    /// Returns [`Error::Decode`] for payloads that are neither a JSON point
    /// list nor a well-formed fragment, and for groups whose assembled text
    /// fails to parse. A group's state is discarded on completion and on
    /// parse failure.
    pub fn feed(&mut self, text: &str) -> Result<ScanOutcome> {
        let trimmed = text.trim();

        // Self-contained JSON export
        if trimmed.starts_with('[') {
            let points: Vec<MeasurementPoint> = serde_json::from_str(trimmed)
                .map_err(|e| Error::Decode(format!("invalid JSON point list: {e}")))?;
            debug!("Decoded self-contained optical code: {} points", points.len());
            return Ok(ScanOutcome::Complete(points));
        }

        if let Some(caps) = FRAGMENT_RE.captures(trimmed) {
            return self.feed_fragment(&caps);
        }

        Err(Error::Decode("unrecognized optical payload".into()))
    }

    /// Groups with outstanding parts.
    pub fn pending_groups(&self) -> impl Iterator<Item = u32> + '_ {
        self.groups.keys().copied()
    }

    fn feed_fragment(&mut self, caps: &regex::Captures<'_>) -> Result<ScanOutcome> {
        let group_id: u32 = parse_capture(caps, 1, "group id")?;
        let part: usize = parse_capture(caps, 2, "part index")?;
        let total: usize = parse_capture(caps, 3, "total parts")?;
        let rest = &caps[4];

        if total == 0 || part == 0 || part > total {
            return Err(Error::Decode(format!(
                "fragment {part}/{total} of group {group_id} is out of range"
            )));
        }

        let group = self.groups.entry(group_id).or_insert_with(|| ScanGroup {
            total_parts: total,
            parts: BTreeMap::new(),
        });

        if group.total_parts != total {
            // Conflicting totals mean the scans mix two different exports
            let previous = group.total_parts;
            self.groups.remove(&group_id);
            return Err(Error::Decode(format!(
                "group {group_id} announced {total} parts after {previous} previously"
            )));
        }

        if group.parts.contains_key(&part) {
            trace!("Duplicate part {part}/{total} for group {group_id}");
            return Ok(ScanOutcome::DuplicatePart { group: group_id, part });
        }

        group.parts.insert(part, rest.to_string());
        let received = group.parts.len();
        trace!("Stored part {part}/{total} for group {group_id} ({received} so far)");

        if received < total {
            return Ok(ScanOutcome::Partial {
                group: group_id,
                received,
                total,
            });
        }

        // All parts present: assemble in ascending part order and parse
        let group = self
            .groups
            .remove(&group_id)
            .ok_or_else(|| Error::Decode(format!("group {group_id} vanished")))?;
        let assembled: String = group.parts.into_values().collect();
        let points = parse_entries(group_id, &assembled)?;
        debug!(
            "Group {group_id} complete: {} points from {total} parts",
            points.len()
        );
        Ok(ScanOutcome::Complete(points))
    }
}

/// Parse the assembled `;`-separated entry list of one group.
fn parse_entries(group_id: u32, assembled: &str) -> Result<Vec<MeasurementPoint>> {
    let mut points = Vec::new();

    for entry in assembled.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let caps = ENTRY_RE.captures(entry).ok_or_else(|| {
            Error::Decode(format!("malformed point entry in group {group_id}: {entry:?}"))
        })?;

        let point: u32 = parse_capture(&caps, 1, "point id")?;
        let mut resistance = parse_decimal(&caps[2])?;
        if !caps[3].is_empty() {
            resistance /= 1000.0;
        }
        let current = parse_decimal(&caps[4])?;

        let timestamp = match (caps.get(5), caps.get(6)) {
            (Some(date), Some(time)) => Some(parse_timestamp(date.as_str(), time.as_str())?),
            _ => None,
        };

        points.push(MeasurementPoint {
            group: group_id,
            point,
            resistance,
            current,
            timestamp,
        });
    }

    Ok(points)
}

fn parse_capture<T: std::str::FromStr>(
    caps: &regex::Captures<'_>,
    index: usize,
    what: &str,
) -> Result<T> {
    caps[index]
        .parse()
        .map_err(|_| Error::Decode(format!("invalid {what}: {:?}", &caps[index])))
}

/// Parse a number that may use a decimal comma.
fn parse_decimal(text: &str) -> Result<f64> {
    text.replace(',', ".")
        .parse()
        .map_err(|_| Error::Decode(format!("invalid decimal value: {text:?}")))
}

/// Expand `DDMMYY` + `HHmm` into a timestamp; years count from 2000.
fn parse_timestamp(date: &str, time: &str) -> Result<NaiveDateTime> {
    let bad = || Error::Decode(format!("invalid timestamp: {date:?} {time:?}"));

    let day: u32 = date[0..2].parse().map_err(|_| bad())?;
    let month: u32 = date[2..4].parse().map_err(|_| bad())?;
    let year: i32 = date[4..6].parse().map_err(|_| bad())?;
    let hour: u32 = time[0..2].parse().map_err(|_| bad())?;
    let minute: u32 = time[2..4].parse().map_err(|_| bad())?;

    NaiveDate::from_ymd_opt(2000 + year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or_else(bad)
}
