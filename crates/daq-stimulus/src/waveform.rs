//! Immutable pre-rendered waveforms.

use std::time::Duration;

use ndarray::Array2;

use daq_core::{DaqError, Result};

/// A pre-rendered stimulus waveform: samples × channels, produced ahead
/// of a run and immutable for its lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    data: Array2<f64>,
}

impl Waveform {
    /// Wrap a samples-by-channels array. Empty arrays are rejected: an
    /// empty chunk would defeat the trigger-arming guarantee downstream.
    pub fn new(data: Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(DaqError::Stimulus(format!(
                "waveform must be non-empty, got {}x{}",
                data.nrows(),
                data.ncols()
            )));
        }
        Ok(Self { data })
    }

    /// Build from row-major nested vectors (the wire representation).
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != ncols) {
            return Err(DaqError::Stimulus(
                "waveform rows have inconsistent channel counts".into(),
            ));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((nrows, ncols), flat)
            .map_err(|e| DaqError::Stimulus(e.to_string()))?;
        Self::new(data)
    }

    /// Number of samples per channel.
    pub fn samples(&self) -> usize {
        self.data.nrows()
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.data.ncols()
    }

    /// Shape as (samples, channels).
    pub fn shape(&self) -> (usize, usize) {
        (self.data.nrows(), self.data.ncols())
    }

    /// Playback duration at the given sample rate.
    pub fn duration(&self, sample_rate: f64) -> Duration {
        Duration::from_secs_f64(self.samples() as f64 / sample_rate)
    }

    /// Borrow the underlying array.
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rejects_empty_waveforms() {
        assert!(Waveform::new(Array2::zeros((0, 2))).is_err());
        assert!(Waveform::new(Array2::zeros((16, 0))).is_err());
    }

    #[test]
    fn duration_scales_with_rate() {
        let wf = Waveform::new(Array2::zeros((1000, 2))).unwrap();
        assert_eq!(wf.duration(1000.0), Duration::from_secs(1));
        assert_eq!(wf.duration(500.0), Duration::from_secs(2));
    }

    #[test]
    fn from_rows_checks_consistency() {
        let wf = Waveform::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(wf.shape(), (2, 2));
        assert_eq!(wf.data(), &array![[1.0, 2.0], [3.0, 4.0]]);

        assert!(Waveform::from_rows(vec![vec![1.0], vec![2.0, 3.0]]).is_err());
        assert!(Waveform::from_rows(vec![]).is_err());
    }
}
