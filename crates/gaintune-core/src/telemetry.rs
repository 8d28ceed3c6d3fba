//! Telemetry wire format of the testbench experiment.
//!
//! The remote program prints one record per control period:
//!
//! ```text
//! v_a,v_b,v_c,i_a,i_b,i_c,i_d,i_q,i_0,phase,
//! ```
//!
//! i.e. 11 comma-separated tokens, the last one being the empty artifact of
//! the trailing comma. Anything else on stdout is log output of the remote
//! program.

use std::io::Write;

use crate::error::{TestbenchError, TestbenchResult};

/// Tokens per valid record, trailing artifact included.
pub const RECORD_TOKENS: usize = 11;
/// Numeric fields per record.
pub const FIELDS: usize = 10;

pub const COL_V_ABC: [usize; 3] = [0, 1, 2];
pub const COL_I_ABC: [usize; 3] = [3, 4, 5];
pub const COL_I_DQ0: [usize; 3] = [6, 7, 8];
pub const COL_PHASE: usize = 9;

pub const COLUMN_NAMES: [&str; FIELDS] = [
    "v_a", "v_b", "v_c", "i_a", "i_b", "i_c", "i_d", "i_q", "i_0", "phase",
];

/// One decoded control period.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetryRow(pub [f64; FIELDS]);

impl TelemetryRow {
    fn pick(&self, cols: [usize; 3]) -> [f64; 3] {
        [self.0[cols[0]], self.0[cols[1]], self.0[cols[2]]]
    }

    pub fn v_abc(&self) -> [f64; 3] {
        self.pick(COL_V_ABC)
    }

    pub fn i_abc(&self) -> [f64; 3] {
        self.pick(COL_I_ABC)
    }

    pub fn i_dq0(&self) -> [f64; 3] {
        self.pick(COL_I_DQ0)
    }

    pub fn phase(&self) -> f64 {
        self.0[COL_PHASE]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Time-ordered telemetry of one episode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Telemetry {
    rows: Vec<TelemetryRow>,
}

impl Telemetry {
    pub fn new(rows: Vec<TelemetryRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&TelemetryRow> {
        self.rows.get(idx)
    }

    pub fn rows(&self) -> &[TelemetryRow] {
        &self.rows
    }

    /// One column as a series.
    pub fn column(&self, col: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r.0[col]).collect()
    }

    /// Write as CSV with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> TestbenchResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(COLUMN_NAMES)?;
        for row in &self.rows {
            wtr.write_record(row.0.iter().map(|v| v.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Decoder output: the data rows plus the log lines that were skipped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedTelemetry {
    pub telemetry: Telemetry,
    pub diagnostics: Vec<String>,
}

/// Decode raw stdout bytes of the remote experiment.
pub fn decode_bytes(raw: &[u8]) -> TestbenchResult<DecodedTelemetry> {
    let text = std::str::from_utf8(raw).map_err(|e| {
        let line = raw[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count() + 1;
        TestbenchError::Decode {
            line,
            message: format!("output is not valid UTF-8: {e}"),
        }
    })?;
    decode(text)
}

/// Decode telemetry text.
///
/// - 11 tokens: the last token is dropped, the other 10 must parse as `f64`.
/// - 1 token (blank lines included): ignored.
/// - anything else: remote log output, kept in `diagnostics`.
pub fn decode(text: &str) -> TestbenchResult<DecodedTelemetry> {
    let mut rows = Vec::new();
    let mut diagnostics = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split(',').collect();
        match tokens.len() {
            RECORD_TOKENS => {
                let mut fields = [0.0; FIELDS];
                for (slot, token) in fields.iter_mut().zip(&tokens[..FIELDS]) {
                    *slot = token.trim().parse::<f64>().map_err(|e| TestbenchError::Decode {
                        line: idx + 1,
                        message: format!("invalid number {token:?}: {e}"),
                    })?;
                }
                rows.push(TelemetryRow(fields));
            }
            1 => {}
            n => {
                tracing::info!(line = idx + 1, tokens = n, "remote: {}", line);
                diagnostics.push(line.to_string());
            }
        }
    }

    tracing::debug!(rows = rows.len(), diagnostics = diagnostics.len(), "decoded telemetry");
    Ok(DecodedTelemetry {
        telemetry: Telemetry::new(rows),
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROW: &str = "1,2,3,4,5,6,7,8,9,0.5,";

    #[test]
    fn eleven_tokens_decode_to_ten_fields() {
        let out = decode(ROW).unwrap();
        assert_eq!(out.telemetry.len(), 1);
        let row = out.telemetry.get(0).unwrap();
        assert_eq!(row.0, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 0.5]);
        assert_eq!(row.v_abc(), [1.0, 2.0, 3.0]);
        assert_eq!(row.i_abc(), [4.0, 5.0, 6.0]);
        assert_eq!(row.i_dq0(), [7.0, 8.0, 9.0]);
        assert_eq!(row.phase(), 0.5);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn trailing_token_is_dropped_even_if_numeric() {
        let out = decode("1,2,3,4,5,6,7,8,9,10,99").unwrap();
        assert_eq!(out.telemetry.get(0).unwrap().phase(), 10.0);
    }

    #[test]
    fn other_multi_token_lines_are_diagnostics() {
        let text = format!("PWM enabled, kp=0.01\n{ROW}\n1,2,3,4,5,6,7,8,9,10,11,12\n");
        let out = decode(&text).unwrap();
        assert_eq!(out.telemetry.len(), 1);
        assert_eq!(
            out.diagnostics,
            vec![
                "PWM enabled, kp=0.01".to_string(),
                "1,2,3,4,5,6,7,8,9,10,11,12".to_string()
            ]
        );
    }

    #[test]
    fn single_token_lines_are_silently_ignored() {
        let text = format!("starting\n\n{ROW}\ndone\n");
        let out = decode(&text).unwrap();
        assert_eq!(out.telemetry.len(), 1);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn malformed_number_is_fatal_with_line() {
        let text = format!("{ROW}\n1,2,x,4,5,6,7,8,9,10,\n");
        match decode(&text).unwrap_err() {
            TestbenchError::Decode { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("\"x\""), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn crlf_and_padded_tokens_decode() {
        let out = decode("1, 2,3,4,5,6,7,8,9, 10 ,\r\n").unwrap();
        assert_eq!(out.telemetry.get(0).unwrap().phase(), 10.0);
        assert_eq!(out.telemetry.get(0).unwrap().v_abc()[1], 2.0);
    }

    #[test]
    fn empty_output_gives_empty_table() {
        let out = decode("").unwrap();
        assert!(out.telemetry.is_empty());
    }

    #[test]
    fn decoding_is_idempotent() {
        let text = format!("hello, world\n{ROW}\n{ROW}\n");
        assert_eq!(decode(&text).unwrap(), decode(&text).unwrap());
    }

    #[test]
    fn invalid_utf8_reports_line() {
        let mut raw = format!("{ROW}\n").into_bytes();
        raw.extend_from_slice(&[0xff, 0xfe]);
        match decode_bytes(&raw).unwrap_err() {
            TestbenchError::Decode { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn csv_output_has_header_and_rows() {
        let out = decode(&format!("{ROW}\n{ROW}\n")).unwrap();
        let mut buf = Vec::new();
        out.telemetry.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "v_a,v_b,v_c,i_a,i_b,i_c,i_d,i_q,i_0,phase");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1,2,3,4,5,6,7,8,9,0.5");
    }
}
