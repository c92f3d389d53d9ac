use babel_terms::Family;

use crate::layout::{self, SheetKind};
use crate::workbook::{Row, Sheet, Workbook};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTranslation {
    pub language: String,
    pub value: String,
    pub tooltip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTerm {
    pub family: Family,
    pub name: String,
    pub category: Option<String>,
    pub translations: Vec<ExportTranslation>,
}

/// Build a translator workbook: one row per term and language.
///
/// Every term gets a row for each of `languages`; languages the term lacks
/// are written with an empty value so they can be filled in and re-uploaded.
pub fn build_workbook(terms: &[ExportTerm], languages: &[String]) -> Workbook {
    let sheets = SheetKind::ALL
        .into_iter()
        .map(|kind| {
            let mut members: Vec<&ExportTerm> =
                terms.iter().filter(|t| t.family == kind.family()).collect();
            members.sort_by(|a, b| a.name.cmp(&b.name));

            let mut rows = vec![Row::from_values(kind.header().iter().copied())];
            for term in members {
                for language in languages {
                    rows.push(export_row(kind, term, language));
                }
            }
            Sheet::new(kind.canonical_name(), rows)
        })
        .collect();

    Workbook::new(sheets)
}

fn export_row(kind: SheetKind, term: &ExportTerm, language: &str) -> Row {
    let width = kind.header().len();
    let mut cells: Vec<Option<String>> = vec![None; width];

    cells[layout::CATEGORY] = term.category.clone();
    for (slot, part) in layout::NAME_PARTS.iter().zip(split_name(&term.name)) {
        cells[*slot] = Some(part);
    }
    cells[layout::LANGUAGE] = Some(language.to_string());

    if let Some(t) = term.translations.iter().find(|t| t.language == language) {
        cells[layout::VALUE] = Some(t.value.clone());
        if kind.has_tooltip() {
            cells[layout::TOOLTIP] = t.tooltip.clone();
        }
    }

    Row::new(cells)
}

/// Split a dotted name over the five name columns; the last one takes the rest.
fn split_name(name: &str) -> Vec<String> {
    let last = layout::NAME_PARTS.len() - 1;
    let mut parts: Vec<String> = name.splitn(last + 1, '.').map(str::to_string).collect();
    parts.retain(|p| !p.is_empty());
    parts
}
