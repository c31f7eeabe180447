use std::io::Read;

use crate::XlsxError;

/// Default maximum uncompressed size permitted for any single ZIP part inflated into memory.
///
/// Guards against ZIP bombs (tiny compressed size, huge uncompressed size) and forged
/// `uncompressed_size` metadata.
pub const MAX_XLSX_PACKAGE_PART_BYTES: u64 = 256 * 1024 * 1024; // 256 MiB

/// Default maximum total uncompressed bytes across every part of one package.
pub const MAX_XLSX_PACKAGE_TOTAL_BYTES: u64 = 512 * 1024 * 1024; // 512 MiB

/// Running total of inflated bytes for one package load.
#[derive(Debug)]
pub(crate) struct ZipInflateBudget {
    max_total_bytes: u64,
    used_bytes: u64,
}

impl ZipInflateBudget {
    pub(crate) fn new(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes,
            used_bytes: 0,
        }
    }

    fn remaining_bytes(&self) -> u64 {
        self.max_total_bytes.saturating_sub(self.used_bytes)
    }

    fn consume(&mut self, bytes: u64) -> Result<(), XlsxError> {
        self.used_bytes = self.used_bytes.saturating_add(bytes);
        if self.used_bytes > self.max_total_bytes {
            return Err(XlsxError::PackageTooLarge {
                total: self.used_bytes,
                max: self.max_total_bytes,
            });
        }
        Ok(())
    }
}

/// Inflate one ZIP entry, enforcing both the per-part limit and the shared budget.
///
/// `declared_size` is the entry's advertised uncompressed size; it is used for a fast
/// rejection but never trusted on its own.
pub(crate) fn read_entry_with_budget<R: Read>(
    entry: R,
    part: &str,
    declared_size: u64,
    max_part_bytes: u64,
    budget: &mut ZipInflateBudget,
) -> Result<Vec<u8>, XlsxError> {
    if declared_size > max_part_bytes {
        return Err(XlsxError::PartTooLarge {
            part: part.to_string(),
            size: declared_size,
            max: max_part_bytes,
        });
    }

    let remaining = budget.remaining_bytes();
    if declared_size > remaining {
        return Err(XlsxError::PackageTooLarge {
            total: budget.used_bytes.saturating_add(declared_size),
            max: budget.max_total_bytes,
        });
    }

    let effective_max = max_part_bytes.min(remaining);
    let mut buf = Vec::with_capacity(declared_size.min(effective_max) as usize);
    entry
        .take(effective_max.saturating_add(1))
        .read_to_end(&mut buf)?;

    let observed = buf.len() as u64;
    if observed > max_part_bytes {
        return Err(XlsxError::PartTooLarge {
            part: part.to_string(),
            size: observed,
            max: max_part_bytes,
        });
    }
    budget.consume(observed)?;
    Ok(buf)
}

/// Compare OPC part names the way Excel resolves them: ASCII case-insensitive,
/// `\` treated as `/`, leading separators ignored.
pub(crate) fn part_names_equivalent(a: &str, b: &str) -> bool {
    fn normalized(s: &str) -> impl Iterator<Item = u8> + '_ {
        s.trim_start_matches(['/', '\\'])
            .bytes()
            .map(|b| if b == b'\\' { b'/' } else { b.to_ascii_lowercase() })
    }
    normalized(a).eq(normalized(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_handles_case_separators_and_leading_slashes() {
        assert!(part_names_equivalent("XL\\Workbook.xml", "xl/workbook.xml"));
        assert!(part_names_equivalent("/xl/workbook.xml", "xl/workbook.xml"));
        assert!(part_names_equivalent("\\xl\\workbook.xml", "xl/workbook.xml"));
        assert!(!part_names_equivalent("xl/workbook.xml", "xl/workbook2.xml"));
    }

    #[test]
    fn read_allows_within_limit() {
        let mut budget = ZipInflateBudget::new(100);
        let data = b"hello world";
        let out = read_entry_with_budget(&data[..], "a.txt", 11, 11, &mut budget).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn read_rejects_forged_declared_size() {
        let mut budget = ZipInflateBudget::new(100);
        let data = b"hello world";
        let err = read_entry_with_budget(&data[..], "a.txt", 1, 10, &mut budget).unwrap_err();
        match err {
            XlsxError::PartTooLarge { part, size, .. } => {
                assert_eq!(part, "a.txt");
                assert_eq!(size, 11);
            }
            other => panic!("expected PartTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn budget_spans_parts() {
        let mut budget = ZipInflateBudget::new(15);
        read_entry_with_budget(&b"0123456789"[..], "a", 10, 100, &mut budget).unwrap();
        let err = read_entry_with_budget(&b"0123456789"[..], "b", 10, 100, &mut budget)
            .unwrap_err();
        assert!(matches!(err, XlsxError::PackageTooLarge { max: 15, .. }));
    }
}
