//! Error types for model edits.

use crate::element::{ElementId, KindTag};

/// Errors that can occur while editing the model arena.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("element {0} not found")]
    NotFound(ElementId),

    #[error("duplicate {kind} name '{name}' under element {parent}")]
    DuplicateName {
        parent: ElementId,
        kind: KindTag,
        name: String,
    },

    #[error("a {parent} cannot contain a {child}")]
    InvalidContainment { parent: KindTag, child: KindTag },

    #[error("root elements must be namespaces, found {0}")]
    InvalidRoot(KindTag),

    #[error("moving element {element} under {target} would make it its own ancestor")]
    CyclicMove {
        element: ElementId,
        target: ElementId,
    },

    #[error("cycle detected in the element hierarchy involving element {0}")]
    CyclicHierarchy(ElementId),

    #[error("element {0} owns no expression or statement text")]
    NoSlot(ElementId),

    #[error("invalid name '{0}'")]
    InvalidName(String),
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn error_display() {
        let err = ModelError::NotFound(Uuid::nil());
        assert!(err.to_string().contains("not found"));

        let err = ModelError::InvalidContainment {
            parent: KindTag::Enum,
            child: KindTag::Variable,
        };
        assert_eq!(err.to_string(), "a Enum cannot contain a Variable");
    }
}
