//! Plain-text storage of a baked response.
//!
//! One line per code: `code v0 v1 ...`, one value per channel. Blank lines
//! and lines starting with `#` are ignored.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::{info, instrument};

use crate::image_pipeline::common::{CODE_LEVELS, HdrError, Result};
use crate::image_pipeline::response::types::{InverseCrf, ResponseLut};

/// Renders the response baked into `channels` tables.
pub fn format_response(curve: &InverseCrf, channels: usize) -> String {
    let luts = curve.baked_luts(channels);
    let mut out = String::with_capacity(CODE_LEVELS * 16 * luts.len());
    let _ = writeln!(out, "# inverse camera response: code, then one value per channel");
    for code in 0..CODE_LEVELS {
        let _ = write!(out, "{}", code);
        for lut in &luts {
            let _ = write!(out, " {}", lut.values()[code]);
        }
        out.push('\n');
    }
    out
}

/// Parses the output of [`format_response`] into a lookup-table response.
pub fn parse_response(text: &str) -> Result<InverseCrf> {
    let mut rows: Vec<Option<Vec<f32>>> = vec![None; CODE_LEVELS];
    let mut channels = None;

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let bad = |what: &str| HdrError::InvalidResponseFile(format!("line {}: {}", number + 1, what));

        let mut fields = line.split_whitespace();
        let code: usize = fields
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| bad("expected an integer code"))?;
        if code >= CODE_LEVELS {
            return Err(bad("code out of range"));
        }
        let values = fields
            .map(|f| f.parse::<f32>().map_err(|_| bad("expected a number")))
            .collect::<Result<Vec<_>>>()?;
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return Err(bad("expected finite channel values"));
        }
        match channels {
            None => channels = Some(values.len()),
            Some(n) if n != values.len() => return Err(bad("channel count changes")),
            Some(_) => {}
        }
        if rows[code].replace(values).is_some() {
            return Err(bad("duplicate code"));
        }
    }

    let channels = channels.ok_or_else(|| HdrError::InvalidResponseFile("no response rows".to_string()))?;
    if let Some(missing) = rows.iter().position(Option::is_none) {
        return Err(HdrError::InvalidResponseFile(format!("missing code {}", missing)));
    }
    let rows: Vec<Vec<f32>> = rows.into_iter().flatten().collect();
    let luts = (0..channels)
        .map(|channel| ResponseLut::from_fn(|code| rows[code][channel]))
        .collect();
    Ok(InverseCrf::Lut(luts))
}

#[instrument(skip(curve), fields(path = %path.as_ref().display()))]
pub fn write_response<P: AsRef<Path>>(curve: &InverseCrf, channels: usize, path: P) -> Result<()> {
    fs::write(path.as_ref(), format_response(curve, channels))
        .map_err(|e| HdrError::OutputWriteError(format!("{}: {}", path.as_ref().display(), e)))?;
    info!(channels = curve.baked_luts(channels).len(), "Saved camera response");
    Ok(())
}

#[instrument(fields(path = %path.as_ref().display()))]
pub fn read_response<P: AsRef<Path>>(path: P) -> Result<InverseCrf> {
    let text = fs::read_to_string(path.as_ref())
        .map_err(|e| HdrError::InputReadError(format!("{}: {}", path.as_ref().display(), e)))?;
    let curve = parse_response(&text)?;
    info!(channels = curve.channels(), "Loaded camera response");
    Ok(curve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_round_trip() {
        let curve = InverseCrf::Lut(vec![
            ResponseLut::from_fn(|c| (c as f32 / 255.0).powf(2.2)),
            ResponseLut::from_fn(|c| c as f32 * 0.5),
        ]);
        let dir = tempdir().unwrap();
        let path = dir.path().join("response.txt");

        write_response(&curve, 2, &path).unwrap();
        let loaded = read_response(&path).unwrap();
        assert_eq!(loaded, curve);
    }

    #[test]
    fn test_gamma_is_baked_per_channel() {
        let text = format_response(&InverseCrf::Gamma(2.2), 3);
        let loaded = parse_response(&text).unwrap();
        assert_eq!(loaded.channels(), 3);
        assert!((loaded.remove(1.0, 2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_code_is_rejected() {
        let text: String = (0..255).map(|c| format!("{} {}\n", c, c)).collect();
        let err = parse_response(&text).unwrap_err();
        assert!(matches!(err, HdrError::InvalidResponseFile(ref m) if m.contains("255")));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let text = "0 1.0 2.0\n1 1.0\n";
        assert!(matches!(
            parse_response(text),
            Err(HdrError::InvalidResponseFile(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_response("").is_err());
        assert!(parse_response("zero 1.0\n").is_err());
        assert!(parse_response("0 one\n").is_err());
        assert!(parse_response("300 1.0\n").is_err());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempdir().unwrap();
        let err = read_response(dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, HdrError::InputReadError(_)));
    }
}
