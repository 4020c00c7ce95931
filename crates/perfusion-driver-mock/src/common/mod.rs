//! Helpers shared by the mock sources.

pub mod rng;

pub use rng::MockRng;

use perfusion_core::{DataType, SampleBuffer};

/// Convert generated `f64` values to the configured element type.
///
/// Integer types round to nearest and saturate at the type's bounds, which is
/// what an ADC does with an out-of-range input.
pub fn quantize(dtype: DataType, values: &[f64]) -> SampleBuffer {
    match dtype {
        DataType::I16 => SampleBuffer::I16(values.iter().map(|v| v.round() as i16).collect()),
        DataType::U16 => SampleBuffer::U16(values.iter().map(|v| v.round() as u16).collect()),
        DataType::I32 => SampleBuffer::I32(values.iter().map(|v| v.round() as i32).collect()),
        DataType::F32 => SampleBuffer::F32(values.iter().map(|&v| v as f32).collect()),
        DataType::F64 => SampleBuffer::F64(values.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_saturates_integers() {
        assert_eq!(
            quantize(DataType::U16, &[-3.0, 1.6, 70000.0]),
            SampleBuffer::U16(vec![0, 2, 65535])
        );
        assert_eq!(
            quantize(DataType::F32, &[0.5]),
            SampleBuffer::F32(vec![0.5])
        );
    }
}
