use crate::consts::{QTY_FIELD, SKU_FIELD};
use csv::StringRecord;
use thiserror::Error;

/// Zero-based positions of the required columns in a stock file's header
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct HeaderIndex {
    pub(crate) sku: usize,
    pub(crate) qty: usize,
}

/// Locate the required columns in `header`.  Header cells are lowercased and
/// must equal a field name exactly.
pub(crate) fn resolve(header: &StringRecord) -> Result<HeaderIndex, HeaderError> {
    let names = header
        .iter()
        .map(str::to_lowercase)
        .collect::<Vec<_>>();
    Ok(HeaderIndex {
        sku: position(&names, SKU_FIELD)?,
        qty: position(&names, QTY_FIELD)?,
    })
}

fn position(names: &[String], field: &'static str) -> Result<usize, HeaderError> {
    let mut matches = names
        .iter()
        .enumerate()
        .filter(|(_, name)| *name == field)
        .map(|(i, _)| i);
    let Some(i) = matches.next() else {
        return Err(HeaderError::Missing { field });
    };
    if matches.next().is_some() {
        return Err(HeaderError::Duplicate { field });
    }
    Ok(i)
}

#[derive(Debug, Error)]
pub(crate) enum HeaderError {
    #[error("stock file header could not be parsed as CSV")]
    Unparsable { source: csv::Error },
    #[error("stock file is missing the {field} header")]
    Missing { field: &'static str },
    #[error("stock file names the {field} header more than once")]
    Duplicate { field: &'static str },
}
