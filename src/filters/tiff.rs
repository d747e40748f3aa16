use crate::error::DecompressError;

/// Reverses TIFF predictor 2 (horizontal differencing) for 8 and 16 bit components.
pub fn decode_frame(
    content: &[u8], colors: usize, bits_per_component: usize, columns: usize,
) -> Result<Vec<u8>, DecompressError> {
    let (_, bytes_per_row) = super::row_layout(colors, bits_per_component, columns, content.len())?;
    let mut decoded = content.to_vec();
    if bytes_per_row == 0 {
        return Ok(decoded);
    }

    for row in decoded.chunks_mut(bytes_per_row) {
        if row.len() != bytes_per_row {
            return Err(DecompressError::TruncatedRow {
                expected: bytes_per_row,
                actual: row.len(),
            });
        }
        match bits_per_component {
            8 => {
                for i in colors..row.len() {
                    row[i] = row[i].wrapping_add(row[i - colors]);
                }
            }
            16 => {
                let stride = colors * 2;
                for i in (stride..row.len()).step_by(2) {
                    let left = u16::from_be_bytes([row[i - stride], row[i - stride + 1]]);
                    let delta = u16::from_be_bytes([row[i], row[i + 1]]);
                    row[i..i + 2].copy_from_slice(&left.wrapping_add(delta).to_be_bytes());
                }
            }
            _ => return Err(DecompressError::UnsupportedBitDepth(bits_per_component)),
        }
    }
    Ok(decoded)
}
