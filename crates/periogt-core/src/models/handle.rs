//! Loaded model handles.

use std::path::PathBuf;
use std::sync::Arc;

use super::backbone::Backbone;
use super::head::PropertyHead;

/// A finetuned head bound to the shared backbone.
pub struct PropertyModel {
    pub property: String,
    pub label: String,
    pub units: String,
    pub checkpoint: PathBuf,
    pub backbone: Arc<Backbone>,
    pub head: PropertyHead,
}

/// Either the embedding-only backbone or a property predictor; both share
/// one backbone instance.
pub enum ModelHandle {
    Embedding {
        backbone: Arc<Backbone>,
        checkpoint: PathBuf,
    },
    Property(PropertyModel),
}

impl ModelHandle {
    pub fn backbone(&self) -> &Arc<Backbone> {
        match self {
            ModelHandle::Embedding { backbone, .. } => backbone,
            ModelHandle::Property(model) => &model.backbone,
        }
    }

    pub fn checkpoint(&self) -> &PathBuf {
        match self {
            ModelHandle::Embedding { checkpoint, .. } => checkpoint,
            ModelHandle::Property(model) => &model.checkpoint,
        }
    }

    pub fn property(&self) -> Option<&PropertyModel> {
        match self {
            ModelHandle::Property(model) => Some(model),
            ModelHandle::Embedding { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModelHandle::Embedding { .. } => "embedding",
            ModelHandle::Property(_) => "property",
        }
    }
}
