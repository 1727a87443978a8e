/// Name of the CSV column holding the product SKU (matched case-insensitively)
pub(crate) static SKU_FIELD: &str = "sku";

/// Name of the CSV column holding the new stock quantity (matched
/// case-insensitively)
pub(crate) static QTY_FIELD: &str = "qty";

/// Minimum number of non-empty cells a data row must have to be considered
/// for an update
pub(crate) const REQUIRED_COLUMNS: usize = 2;

/// Maximum length in bytes of a single CSV data record
pub(crate) const MAX_RECORD_LEN: usize = 2000;

/// Config file read when `--config` is not given
pub(crate) static DEFAULT_CONFIG_PATH: &str = "config.json";
