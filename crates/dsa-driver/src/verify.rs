//! Post-hoc checks of destination buffers

use crate::error::{DsaError, Result};

/// Largest write chunk reported by [`write_chunk_size`].
pub const MAX_WRITE_CHUNK: u32 = 64 * 1024;

/// Check that `dst` holds `pattern` repeated from offset 0.
///
/// # Errors
///
/// Returns `ContentMismatch` at the first differing byte.
pub fn verify_fill(dst: &[u8], pattern: u64) -> Result<()> {
    let expected = pattern.to_ne_bytes();
    match dst
        .iter()
        .zip(expected.iter().cycle())
        .position(|(found, want)| found != want)
    {
        None => Ok(()),
        Some(offset) => Err(DsaError::ContentMismatch {
            offset,
            expected: expected[offset % 8],
            found: dst[offset],
        }),
    }
}

/// Check that `dst` equals `src`.
///
/// # Errors
///
/// Returns `ContentMismatch` at the first differing byte (or at the end of
/// the shorter slice if the lengths differ).
pub fn verify_move(src: &[u8], dst: &[u8]) -> Result<()> {
    if let Some(offset) = src.iter().zip(dst).position(|(a, b)| a != b) {
        return Err(DsaError::ContentMismatch {
            offset,
            expected: src[offset],
            found: dst[offset],
        });
    }
    if src.len() != dst.len() {
        let offset = src.len().min(dst.len());
        return Err(DsaError::ContentMismatch {
            offset,
            expected: src.get(offset).copied().unwrap_or_default(),
            found: dst.get(offset).copied().unwrap_or_default(),
        });
    }
    Ok(())
}

/// Guess the device's write granularity from a partial completion: the
/// largest power of two up to 64 KiB that divides `bytes_completed`.
///
/// `None` for zero, or when a 128 KiB chunk would also divide it.
#[must_use]
pub fn write_chunk_size(bytes_completed: u32) -> Option<u32> {
    if bytes_completed == 0 {
        return None;
    }
    let chunk = 1u32 << bytes_completed.trailing_zeros();
    (chunk <= MAX_WRITE_CHUNK).then_some(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_mismatch_reports_first_offset() {
        let mut buf = vec![0xffu8; 256];
        assert!(verify_fill(&buf, u64::MAX).is_ok());

        buf[100] = 0;
        buf[200] = 0;
        match verify_fill(&buf, u64::MAX) {
            Err(DsaError::ContentMismatch {
                offset,
                expected,
                found,
            }) => {
                assert_eq!(offset, 100);
                assert_eq!(expected, 0xff);
                assert_eq!(found, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fill_checks_pattern_phase() {
        let pattern = u64::from_ne_bytes([1, 2, 3, 4, 5, 6, 7, 8]);
        let buf: Vec<u8> = (0..20).map(|i| (i % 8) as u8 + 1).collect();
        assert!(verify_fill(&buf, pattern).is_ok());
    }

    #[test]
    fn move_mismatch_and_length() {
        let src = [0xaau8; 32];
        let mut dst = [0xaau8; 32];
        assert!(verify_move(&src, &dst).is_ok());

        dst[31] = 0;
        assert!(matches!(
            verify_move(&src, &dst),
            Err(DsaError::ContentMismatch { offset: 31, .. })
        ));
        assert!(matches!(
            verify_move(&src, &src[..16]),
            Err(DsaError::ContentMismatch { offset: 16, .. })
        ));
    }

    #[test]
    fn chunk_inference() {
        assert_eq!(write_chunk_size(0), None);
        assert_eq!(write_chunk_size(1), Some(1));
        assert_eq!(write_chunk_size(4096 * 3), Some(4096));
        assert_eq!(write_chunk_size(65536 * 3), Some(65536));
        assert_eq!(write_chunk_size(131_072), None);
    }
}
