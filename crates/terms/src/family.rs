use serde::{Deserialize, Serialize};

/// The three parallel catalog families.
///
/// Each family is its own aggregate type with its own uniqueness scope and
/// processing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Short UI labels (buttons, captions, field names).
    Label,
    /// User actions (menu entries, commands).
    Action,
    /// System messages (notifications, errors).
    Message,
}

/// Stable event type identifiers of one family.
#[derive(Debug)]
pub struct EventNames {
    pub created: &'static str,
    pub updated: &'static str,
    pub deleted: &'static str,
    pub translation_created: &'static str,
    pub translation_updated: &'static str,
    pub translation_deleted: &'static str,
}

const LABEL_EVENTS: EventNames = EventNames {
    created: "catalog.label.created",
    updated: "catalog.label.updated",
    deleted: "catalog.label.deleted",
    translation_created: "catalog.label.translation_created",
    translation_updated: "catalog.label.translation_updated",
    translation_deleted: "catalog.label.translation_deleted",
};

const ACTION_EVENTS: EventNames = EventNames {
    created: "catalog.action.created",
    updated: "catalog.action.updated",
    deleted: "catalog.action.deleted",
    translation_created: "catalog.action.translation_created",
    translation_updated: "catalog.action.translation_updated",
    translation_deleted: "catalog.action.translation_deleted",
};

const MESSAGE_EVENTS: EventNames = EventNames {
    created: "catalog.message.created",
    updated: "catalog.message.updated",
    deleted: "catalog.message.deleted",
    translation_created: "catalog.message.translation_created",
    translation_updated: "catalog.message.translation_updated",
    translation_deleted: "catalog.message.translation_deleted",
};

impl Family {
    pub const ALL: [Family; 3] = [Family::Label, Family::Action, Family::Message];

    /// Aggregate type used for event streams of this family.
    pub fn aggregate_type(self) -> &'static str {
        match self {
            Family::Label => "catalog.label",
            Family::Action => "catalog.action",
            Family::Message => "catalog.message",
        }
    }

    pub fn from_aggregate_type(aggregate_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.aggregate_type() == aggregate_type)
    }

    /// Name of the ordered processing group that owns this family's projections.
    pub fn processing_group(self) -> &'static str {
        match self {
            Family::Label => "label-group",
            Family::Action => "action-group",
            Family::Message => "message-group",
        }
    }

    /// Human readable singular name, used in error messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Family::Label => "Label",
            Family::Action => "Action",
            Family::Message => "Message",
        }
    }

    /// Messages are plain text; labels and actions may carry a tooltip.
    pub fn supports_tooltip(self) -> bool {
        !matches!(self, Family::Message)
    }

    pub fn event_names(self) -> &'static EventNames {
        match self {
            Family::Label => &LABEL_EVENTS,
            Family::Action => &ACTION_EVENTS,
            Family::Message => &MESSAGE_EVENTS,
        }
    }
}

impl core::fmt::Display for Family {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.display_name())
    }
}
