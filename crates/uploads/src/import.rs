use std::collections::HashMap;

use babel_terms::{Family, TranslationDraft};

use crate::error::UploadError;
use crate::layout::{self, SheetKind};
use crate::workbook::{Row, Sheet, Workbook};

/// One term to create, assembled from all rows sharing its dotted name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedTerm {
    pub family: Family,
    pub name: String,
    /// Taken from the first row of the group.
    pub category: Option<String>,
    pub translations: Vec<TranslationDraft>,
}

/// Group the rows of every sheet into create payloads.
///
/// Terms are returned per sheet in order of first appearance. When a name
/// repeats a language, the later row replaces the earlier one.
pub fn plan_import(workbook: &Workbook) -> Result<Vec<ImportedTerm>, UploadError> {
    let mut planned = Vec::new();
    for kind in SheetKind::ALL {
        let sheet = workbook
            .sheet(kind.accepted_names())
            .ok_or_else(|| UploadError::Import(format!("Sheet {kind} is missing")))?;
        planned.extend(plan_sheet(kind, sheet));
    }
    Ok(planned)
}

/// `Name0[.Name1[.Name2[.Name3[.Name4]]]]`, blank parts skipped.
pub fn dotted_name(row: &Row) -> Option<String> {
    let head = row.cell(layout::NAME_PARTS[0])?;
    let mut name = head.to_string();
    for idx in &layout::NAME_PARTS[1..] {
        if let Some(part) = row.cell(*idx) {
            name.push('.');
            name.push_str(part);
        }
    }
    Some(name)
}

fn plan_sheet(kind: SheetKind, sheet: &Sheet) -> Vec<ImportedTerm> {
    let mut terms: Vec<ImportedTerm> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for (_, row) in sheet.data_rows() {
        let (Some(name), Some(language)) = (dotted_name(row), row.cell(layout::LANGUAGE)) else {
            continue;
        };

        let idx = *by_name.entry(name.clone()).or_insert_with(|| {
            terms.push(ImportedTerm {
                family: kind.family(),
                name,
                category: row.cell(layout::CATEGORY).map(str::to_string),
                translations: Vec::new(),
            });
            terms.len() - 1
        });

        let mut draft = TranslationDraft::new(language, row.cell(layout::VALUE).unwrap_or(""));
        if kind.has_tooltip() {
            if let Some(tooltip) = row.cell(layout::TOOLTIP) {
                draft = draft.with_tooltip(tooltip);
            }
        }

        let translations = &mut terms[idx].translations;
        match translations.iter_mut().find(|t| t.language == draft.language) {
            Some(existing) => *existing = draft,
            None => translations.push(draft),
        }
    }

    terms
}
