use crate::error::UploadError;
use crate::layout::{self, SheetKind};
use crate::workbook::{Sheet, Workbook};

/// Every problem found in the workbook, one line each, in sheet order.
///
/// A row without a language gets one line and is otherwise skipped. Fully
/// blank rows are ignored.
pub fn validation_errors(workbook: &Workbook) -> Vec<String> {
    let mut errors = Vec::new();
    for kind in SheetKind::ALL {
        match workbook.sheet(kind.accepted_names()) {
            Some(sheet) => validate_sheet(sheet, &mut errors),
            None => errors.push(format!("Sheet {kind} is missing")),
        }
    }
    errors
}

/// Validate a decoded workbook; problems are joined into a single
/// `FileValidation` message.
pub fn validate(workbook: &Workbook) -> Result<(), UploadError> {
    let errors = validation_errors(workbook);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(UploadError::FileValidation(errors.join("\n")))
    }
}

fn validate_sheet(sheet: &Sheet, errors: &mut Vec<String>) {
    for (line, row) in sheet.data_rows() {
        if row.is_blank() {
            continue;
        }
        if row.cell(layout::LANGUAGE).is_none() {
            errors.push(format!("Sheet {}, line {line}, missing language", sheet.name));
            continue;
        }
        if row.cell(layout::NAME_PARTS[0]).is_none() {
            errors.push(format!("Sheet {}, line {line}, missing name", sheet.name));
        }
        if row.cell(layout::VALUE).is_none() {
            errors.push(format!("Sheet {}, line {line}, missing value", sheet.name));
        }
    }
}
