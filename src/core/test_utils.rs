use crate::{
    constants::{FIXED_COLUMNS, FORMAT_COLUMN},
    core::header::VcfHeader,
};

/// Build a header from metaheader text and a sample list, appending the
/// FORMAT column whenever samples are present.
pub fn header_with_samples(meta: &str, samples: &[&str]) -> VcfHeader {
    let meta_lines: Vec<String> = meta
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    let mut columns: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    if !samples.is_empty() {
        columns.push(FORMAT_COLUMN.to_string());
        columns.extend(samples.iter().map(|s| s.to_string()));
    }
    match VcfHeader::new(meta_lines, columns) {
        Ok(header) => header,
        Err(err) => panic!("fixture header failed to parse: {err}"),
    }
}
