/// Single-character marker for a missing value in any column or field.
pub const MISSING_VALUE: &str = ".";

/// The eight mandatory columns, in the only order the header may declare them.
pub const FIXED_COLUMNS: [&str; 8] = [
    "#CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO",
];

/// Name the ninth column must carry when per-sample columns are present.
pub const FORMAT_COLUMN: &str = "FORMAT";

/// Number of leading columns before sample columns start.
pub const SAMPLE_COLUMN_OFFSET: usize = 9;

/// FORMAT fields used by the physical-phasing comparator.
pub const PHASE_ID_FIELD: &str = "PID";
pub const PHASE_GT_FIELD: &str = "PGT";
