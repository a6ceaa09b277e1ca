use log::warn;
use num_complex::Complex32;

const COMPLEX64_BYTES: usize = 8;

/// Decodes a CSI frame: packed little-endian complex64 values.
///
/// Empty or truncated frames carry no usable measurement.
pub fn decode_csi(frame: &[u8]) -> Option<Vec<Complex32>> {
    if frame.is_empty() || frame.len() % COMPLEX64_BYTES != 0 {
        warn!(
            "Dropping malformed CSI frame of {} bytes (expected a multiple of {})",
            frame.len(),
            COMPLEX64_BYTES
        );
        return None;
    }
    Some(
        frame
            .chunks_exact(COMPLEX64_BYTES)
            .map(|chunk| {
                let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let im = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                Complex32::new(re, im)
            })
            .collect(),
    )
}

/// Magnitude of the arithmetic mean of the sub-carrier values.
pub fn mean_magnitude(csi: &[Complex32]) -> Option<f64> {
    if csi.is_empty() {
        return None;
    }
    let sum = csi
        .iter()
        .fold(num_complex::Complex64::new(0.0, 0.0), |acc, c| {
            acc + num_complex::Complex64::new(c.re as f64, c.im as f64)
        });
    Some((sum / csi.len() as f64).norm())
}

#[cfg(test)]
pub(crate) fn encode_csi(values: &[Complex32]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|c| c.re.to_le_bytes().into_iter().chain(c.im.to_le_bytes()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_packed_complex_values() {
        let values = vec![Complex32::new(0.5, -0.25), Complex32::new(-1.0, 2.0)];
        assert_eq!(decode_csi(&encode_csi(&values)), Some(values));
    }

    #[test]
    fn rejects_empty_and_truncated_frames() {
        assert_eq!(decode_csi(&[]), None);
        let mut frame = encode_csi(&[Complex32::new(1.0, 1.0)]);
        frame.pop();
        assert_eq!(decode_csi(&frame), None);
    }

    #[test]
    fn magnitude_is_taken_after_averaging() {
        // Opposite phases cancel in the mean.
        let csi = [Complex32::new(1.0, 0.0), Complex32::new(-1.0, 0.0)];
        assert_eq!(mean_magnitude(&csi), Some(0.0));

        let csi = [Complex32::new(3.0, 4.0), Complex32::new(3.0, 4.0)];
        assert!((mean_magnitude(&csi).unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(mean_magnitude(&[]), None);
    }
}
