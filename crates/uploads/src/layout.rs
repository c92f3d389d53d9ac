//! Fixed cell layout of translation workbooks.
//!
//! `Cat | Name0 | Name1 | Name2 | Name3 | Name4 | Language | Value | Tooltip`
//!
//! The message sheet has no tooltip column.

use babel_terms::Family;

pub const CATEGORY: usize = 0;
pub const NAME_PARTS: [usize; 5] = [1, 2, 3, 4, 5];
pub const LANGUAGE: usize = 6;
pub const VALUE: usize = 7;
pub const TOOLTIP: usize = 8;

const HEADER: [&str; 9] = [
    "Cat", "Name0", "Name1", "Name2", "Name3", "Name4", "Language", "Value", "Tooltip",
];

/// One section of the workbook, one per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SheetKind {
    Labels,
    Actions,
    Messages,
}

impl SheetKind {
    pub const ALL: [SheetKind; 3] = [SheetKind::Labels, SheetKind::Actions, SheetKind::Messages];

    pub fn for_family(family: Family) -> Self {
        match family {
            Family::Label => SheetKind::Labels,
            Family::Action => SheetKind::Actions,
            Family::Message => SheetKind::Messages,
        }
    }

    pub fn family(self) -> Family {
        match self {
            SheetKind::Labels => Family::Label,
            SheetKind::Actions => Family::Action,
            SheetKind::Messages => Family::Message,
        }
    }

    /// Name written on export and used in error lines for absent sheets.
    pub fn canonical_name(self) -> &'static str {
        match self {
            SheetKind::Labels => "Labels",
            SheetKind::Actions => "Actions",
            SheetKind::Messages => "Messages",
        }
    }

    /// Accepted spellings, in lookup order. Labels were once called elements.
    pub fn accepted_names(self) -> &'static [&'static str] {
        match self {
            SheetKind::Labels => &["Labels", "labels", "Elements", "elements"],
            SheetKind::Actions => &["Actions", "actions"],
            SheetKind::Messages => &["Messages", "messages"],
        }
    }

    pub fn has_tooltip(self) -> bool {
        self.family().supports_tooltip()
    }

    pub fn header(self) -> &'static [&'static str] {
        if self.has_tooltip() {
            &HEADER
        } else {
            &HEADER[..TOOLTIP]
        }
    }
}

impl core::fmt::Display for SheetKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.canonical_name())
    }
}
