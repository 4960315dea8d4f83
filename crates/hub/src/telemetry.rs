use paddy_advisor::{parse_timestamp, Reading, WeatherSnapshot};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use time::UtcOffset;

// ---------------------------------------------------------------------------
// Sheet row + push payload
// ---------------------------------------------------------------------------

/// One row of the telemetry sheet.  Cells arrive as strings or numbers
/// depending on how the sheet formatted them, so every field is lenient.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TelemetryRow {
    #[serde(rename = "Device ID", default, deserialize_with = "lenient_string")]
    pub(crate) device_id: Option<String>,
    #[serde(rename = "Transmitter Data", default, deserialize_with = "lenient_f64")]
    pub(crate) transmitter_data: Option<f64>,
    #[serde(rename = "Gateway Received Time", default, deserialize_with = "lenient_string")]
    pub(crate) gateway_received_time: Option<String>,
    #[serde(rename = "Batch Upload Time", default, deserialize_with = "lenient_string")]
    pub(crate) batch_upload_time: Option<String>,
    #[serde(rename = "Network", default, deserialize_with = "lenient_string")]
    pub(crate) network: Option<String>,
    #[serde(rename = "SIM Operator", default, deserialize_with = "lenient_string")]
    pub(crate) sim_operator: Option<String>,
    #[serde(rename = "WiFi Strength (dBm)", default, deserialize_with = "lenient_f64")]
    pub(crate) wifi_dbm: Option<f64>,
    #[serde(rename = "GSM Strength (RSSI)", default, deserialize_with = "lenient_f64")]
    pub(crate) gsm_rssi: Option<f64>,
    #[serde(rename = "SD Free (MB)", default, deserialize_with = "lenient_f64")]
    pub(crate) sd_free_mb: Option<f64>,
}

/// Body of `POST /api/telemetry`: one poll of the sheet and weather provider.
#[derive(Debug, Deserialize)]
pub(crate) struct TelemetryPush {
    /// Increases with every poll the caller starts and must never go back,
    /// even across poller restarts; the hub drops any push at or below the
    /// last one applied until the hub itself restarts.  Use the poll start
    /// time in epoch milliseconds rather than a counter from 1.
    pub(crate) seq: u64,
    #[serde(default)]
    pub(crate) rows: Vec<TelemetryRow>,
    #[serde(default)]
    pub(crate) weather: Option<WeatherSnapshot>,
}

/// Gateway link and storage status, taken from a device's newest row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GatewayHealth {
    pub network: Option<String>,
    pub sim_operator: Option<String>,
    pub wifi_dbm: Option<f64>,
    pub gsm_rssi: Option<f64>,
    pub sd_free_mb: Option<f64>,
}

/// Everything one push carried for a single device.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeviceBatch {
    pub(crate) readings: Vec<Reading>,
    pub(crate) gateway: Option<GatewayHealth>,
}

impl TelemetryRow {
    /// Gateway receipt time, falling back to the batch upload time.
    pub(crate) fn raw_timestamp(&self) -> &str {
        self.gateway_received_time
            .as_deref()
            .or(self.batch_upload_time.as_deref())
            .unwrap_or("")
    }

    /// `None` when the row carries no level.  Rows with unusable timestamps
    /// are kept; the series selector drops them.
    pub(crate) fn reading(&self) -> Option<Reading> {
        self.transmitter_data
            .map(|level| Reading::new(self.raw_timestamp(), level))
    }

    pub(crate) fn gateway(&self) -> GatewayHealth {
        GatewayHealth {
            network: self.network.clone(),
            sim_operator: self.sim_operator.clone(),
            wifi_dbm: self.wifi_dbm,
            gsm_rssi: self.gsm_rssi,
            sd_free_mb: self.sd_free_mb,
        }
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Split a flat row list into per-device batches.  Rows without a device id
/// are skipped; rows without a level still count toward gateway health.
pub(crate) fn group_by_device(
    rows: &[TelemetryRow],
    offset: UtcOffset,
) -> HashMap<String, DeviceBatch> {
    let mut batches: HashMap<String, DeviceBatch> = HashMap::new();
    let mut newest: HashMap<String, i64> = HashMap::new();

    for row in rows {
        let Some(device_id) = row.device_id.as_deref() else {
            continue;
        };
        let batch = batches.entry(device_id.to_string()).or_default();

        if let Some(reading) = row.reading() {
            batch.readings.push(reading);
        }

        // Newest parseable row wins; with no parseable rows the last one does.
        let ts = parse_timestamp(row.raw_timestamp(), offset);
        let seen = newest.entry(device_id.to_string()).or_insert(i64::MIN);
        if batch.gateway.is_none() || ts >= *seen {
            *seen = ts.max(*seen);
            batch.gateway = Some(row.gateway());
        }
    }

    batches
}

// ---------------------------------------------------------------------------
// Lenient cell decoding
// ---------------------------------------------------------------------------

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(json: &str) -> TelemetryRow {
        serde_json::from_str(json).unwrap()
    }

    // -- Row decoding -------------------------------------------------------

    #[test]
    fn row_with_string_cells() {
        let r = row(
            r#"{"Device ID":"101","Transmitter Data":"17.5",
                "Gateway Received Time":"2024-05-01T12:00:00Z",
                "Network":"GSM","SIM Operator":"Airtel",
                "WiFi Strength (dBm)":"","GSM Strength (RSSI)":"21","SD Free (MB)":"1520"}"#,
        );
        assert_eq!(r.device_id.as_deref(), Some("101"));
        assert_eq!(r.transmitter_data, Some(17.5));
        assert_eq!(r.network.as_deref(), Some("GSM"));
        assert_eq!(r.wifi_dbm, None);
        assert_eq!(r.gsm_rssi, Some(21.0));
        assert_eq!(r.sd_free_mb, Some(1520.0));
    }

    #[test]
    fn row_with_numeric_cells() {
        let r = row(r#"{"Device ID":101,"Transmitter Data":9,"Gateway Received Time":45413.5}"#);
        assert_eq!(r.device_id.as_deref(), Some("101"));
        assert_eq!(r.transmitter_data, Some(9.0));
        assert_eq!(r.raw_timestamp(), "45413.5");
    }

    #[test]
    fn row_missing_and_null_cells_are_none() {
        let r = row(r#"{"Device ID":"7","Transmitter Data":null,"Extra Column":"x"}"#);
        assert_eq!(r.transmitter_data, None);
        assert_eq!(r.gateway_received_time, None);
        assert!(r.reading().is_none());
    }

    #[test]
    fn non_numeric_level_is_none() {
        let r = row(r#"{"Device ID":"7","Transmitter Data":"ERR"}"#);
        assert_eq!(r.transmitter_data, None);
    }

    #[test]
    fn timestamp_falls_back_to_batch_upload_time() {
        let r = row(
            r#"{"Device ID":"7","Transmitter Data":3,"Gateway Received Time":" ",
                "Batch Upload Time":"05/01/2024 10:00:00"}"#,
        );
        assert_eq!(r.reading().unwrap().raw_timestamp, "05/01/2024 10:00:00");
    }

    #[test]
    fn row_without_any_timestamp_keeps_empty_raw() {
        let r = row(r#"{"Device ID":"7","Transmitter Data":3}"#);
        assert_eq!(r.reading().unwrap().raw_timestamp, "");
    }

    #[test]
    fn push_deserializes_with_optional_weather() {
        let push: TelemetryPush = serde_json::from_str(
            r#"{"seq":4,"rows":[{"Device ID":"1","Transmitter Data":10}],
                "weather":{"temp":31.5,"rain_chance":70,"rain_forecast_24h":2.0}}"#,
        )
        .unwrap();
        assert_eq!(push.seq, 4);
        assert_eq!(push.rows.len(), 1);
        assert_eq!(push.weather.unwrap().rain_chance, 70.0);

        let bare: TelemetryPush = serde_json::from_str(r#"{"seq":5}"#).unwrap();
        assert!(bare.rows.is_empty());
        assert!(bare.weather.is_none());
    }

    #[test]
    fn push_without_seq_fails() {
        assert!(serde_json::from_str::<TelemetryPush>(r#"{"rows":[]}"#).is_err());
    }

    // -- Grouping -----------------------------------------------------------

    #[test]
    fn group_splits_devices_and_skips_anonymous_rows() {
        let rows = vec![
            row(r#"{"Device ID":"A","Transmitter Data":1,"Gateway Received Time":"2024-05-01T10:00:00Z"}"#),
            row(r#"{"Device ID":"B","Transmitter Data":2,"Gateway Received Time":"2024-05-01T10:00:00Z"}"#),
            row(r#"{"Device ID":"A","Transmitter Data":3,"Gateway Received Time":"2024-05-01T11:00:00Z"}"#),
            row(r#"{"Transmitter Data":4}"#),
        ];
        let batches = group_by_device(&rows, UtcOffset::UTC);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches["A"].readings.len(), 2);
        assert_eq!(batches["B"].readings.len(), 1);
    }

    #[test]
    fn gateway_health_comes_from_newest_row() {
        let rows = vec![
            row(r#"{"Device ID":"A","Transmitter Data":1,"Network":"WiFi","Gateway Received Time":"2024-05-01T12:00:00Z"}"#),
            row(r#"{"Device ID":"A","Transmitter Data":1,"Network":"GSM","Gateway Received Time":"2024-05-01T09:00:00Z"}"#),
        ];
        let batches = group_by_device(&rows, UtcOffset::UTC);
        let gw = batches["A"].gateway.clone().unwrap();
        assert_eq!(gw.network.as_deref(), Some("WiFi"));
    }

    #[test]
    fn row_without_level_still_reports_gateway() {
        let rows = vec![row(r#"{"Device ID":"A","SD Free (MB)":"800"}"#)];
        let batches = group_by_device(&rows, UtcOffset::UTC);
        assert!(batches["A"].readings.is_empty());
        assert_eq!(batches["A"].gateway.as_ref().unwrap().sd_free_mb, Some(800.0));
    }
}
