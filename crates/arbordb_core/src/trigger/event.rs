//! Lifecycle event and phase taxonomy.

use arbordb_storage::Mutation;
use std::fmt;
use std::str::FromStr;

/// A structural change a trigger can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleEvent {
    /// A collection was created.
    CreateCollection,
    /// A collection's metadata changed.
    UpdateCollection,
    /// A collection subtree was copied.
    CopyCollection,
    /// A collection subtree was moved.
    MoveCollection,
    /// A collection subtree was deleted.
    DeleteCollection,
    /// A document was stored.
    CreateDocument,
    /// A document was replaced.
    UpdateDocument,
    /// A document was copied.
    CopyDocument,
    /// A document was moved.
    MoveDocument,
    /// A document was deleted.
    DeleteDocument,
}

impl LifecycleEvent {
    /// Every event, collection events first.
    pub const ALL: [Self; 10] = [
        Self::CreateCollection,
        Self::UpdateCollection,
        Self::CopyCollection,
        Self::MoveCollection,
        Self::DeleteCollection,
        Self::CreateDocument,
        Self::UpdateDocument,
        Self::CopyDocument,
        Self::MoveDocument,
        Self::DeleteDocument,
    ];

    /// Returns the canonical configuration name, e.g. `create-document`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateCollection => "create-collection",
            Self::UpdateCollection => "update-collection",
            Self::CopyCollection => "copy-collection",
            Self::MoveCollection => "move-collection",
            Self::DeleteCollection => "delete-collection",
            Self::CreateDocument => "create-document",
            Self::UpdateDocument => "update-document",
            Self::CopyDocument => "copy-document",
            Self::MoveDocument => "move-document",
            Self::DeleteDocument => "delete-document",
        }
    }

    /// Returns true for events on collections.
    #[must_use]
    pub const fn is_collection_event(self) -> bool {
        matches!(
            self,
            Self::CreateCollection
                | Self::UpdateCollection
                | Self::CopyCollection
                | Self::MoveCollection
                | Self::DeleteCollection
        )
    }

    /// Returns true for copy and move events.
    #[must_use]
    pub const fn has_destination(self) -> bool {
        matches!(
            self,
            Self::CopyCollection | Self::MoveCollection | Self::CopyDocument | Self::MoveDocument
        )
    }

    /// Returns the event a mutation fires.
    #[must_use]
    pub const fn of(mutation: &Mutation) -> Self {
        match mutation {
            Mutation::CreateCollection { .. } => Self::CreateCollection,
            Mutation::UpdateCollection { .. } => Self::UpdateCollection,
            Mutation::CopyCollection { .. } => Self::CopyCollection,
            Mutation::MoveCollection { .. } => Self::MoveCollection,
            Mutation::DeleteCollection { .. } => Self::DeleteCollection,
            Mutation::CreateDocument { .. } => Self::CreateDocument,
            Mutation::UpdateDocument { .. } => Self::UpdateDocument,
            Mutation::CopyDocument { .. } => Self::CopyDocument,
            Mutation::MoveDocument { .. } => Self::MoveDocument,
            Mutation::DeleteDocument { .. } => Self::DeleteDocument,
        }
    }

    /// Parses an `event` parameter value.
    ///
    /// The value lists one or more event names separated by commas or
    /// whitespace. Names are case-insensitive; the legacy names `store`,
    /// `update` and `remove` map to the document create, update and delete
    /// events.
    ///
    /// # Errors
    ///
    /// Returns the first unknown name.
    pub fn parse_list(value: &str) -> Result<Vec<Self>, String> {
        value
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|name| !name.is_empty())
            .map(str::parse::<Self>)
            .collect()
    }
}

impl FromStr for LifecycleEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "store" => return Ok(Self::CreateDocument),
            "update" => return Ok(Self::UpdateDocument),
            "remove" => return Ok(Self::DeleteDocument),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|event| event.name() == lower)
            .ok_or_else(|| s.trim().to_owned())
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// When a hook runs relative to the physical change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before the change; failure vetoes it.
    Before,
    /// After the change; failure is reported but never vetoes.
    After,
}

impl Phase {
    /// Returns the hook-visible phase name: `prepare` or `finish`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Before => "prepare",
            Self::After => "finish",
        }
    }

    /// Returns the prefix of the per-event function name.
    #[must_use]
    pub const fn function_prefix(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbordb_storage::DbPath;

    #[test]
    fn names_round_trip() {
        for event in LifecycleEvent::ALL {
            assert_eq!(event.name().parse::<LifecycleEvent>(), Ok(event));
        }
    }

    #[test]
    fn legacy_names_map_to_document_events() {
        assert_eq!("STORE".parse::<LifecycleEvent>(), Ok(LifecycleEvent::CreateDocument));
        assert_eq!("update".parse::<LifecycleEvent>(), Ok(LifecycleEvent::UpdateDocument));
        assert_eq!("Remove".parse::<LifecycleEvent>(), Ok(LifecycleEvent::DeleteDocument));
    }

    #[test]
    fn parse_list_accepts_commas_and_whitespace() {
        let events = LifecycleEvent::parse_list("create-document, update-document delete-collection")
            .unwrap();
        assert_eq!(
            events,
            vec![
                LifecycleEvent::CreateDocument,
                LifecycleEvent::UpdateDocument,
                LifecycleEvent::DeleteCollection,
            ]
        );
        assert_eq!(
            LifecycleEvent::parse_list("create-document,bogus"),
            Err("bogus".to_owned())
        );
    }

    #[test]
    fn flags() {
        assert!(LifecycleEvent::MoveCollection.is_collection_event());
        assert!(LifecycleEvent::MoveCollection.has_destination());
        assert!(!LifecycleEvent::DeleteDocument.is_collection_event());
        assert!(!LifecycleEvent::DeleteDocument.has_destination());
    }

    #[test]
    fn event_of_mutation() {
        let m = Mutation::CopyDocument {
            source: DbPath::parse("/db/a.xml").unwrap(),
            destination: DbPath::parse("/db/b.xml").unwrap(),
        };
        assert_eq!(LifecycleEvent::of(&m), LifecycleEvent::CopyDocument);
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::Before.to_string(), "prepare");
        assert_eq!(Phase::After.function_prefix(), "after");
    }
}
