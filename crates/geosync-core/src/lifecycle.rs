use crate::CopyError;
use serde::Serialize;
use std::fmt;

/// Progress of one copy request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyState {
    Init,
    MetadataFetched,
    ResourcesResolved,
    PrerequisitesChecked,
    StylesCopied,
    LayersCopied,
    MetadataTransformed,
    MetadataUploaded,
    Done,
    Failed,
}

impl fmt::Display for CopyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::MetadataFetched => "metadata_fetched",
            Self::ResourcesResolved => "resources_resolved",
            Self::PrerequisitesChecked => "prerequisites_checked",
            Self::StylesCopied => "styles_copied",
            Self::LayersCopied => "layers_copied",
            Self::MetadataTransformed => "metadata_transformed",
            Self::MetadataUploaded => "metadata_uploaded",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The resolve / check / styles / layers block repeats once per source
/// map-service, so the copied states may loop back to `ResourcesResolved`.
pub fn validate_transition(from: CopyState, to: CopyState) -> Result<(), CopyError> {
    use CopyState::{
        Done, Failed, Init, LayersCopied, MetadataFetched, MetadataTransformed, MetadataUploaded,
        PrerequisitesChecked, ResourcesResolved, StylesCopied,
    };

    let valid = matches!(
        (from, to),
        (Init, MetadataFetched | Done)
            | (
                MetadataFetched | StylesCopied | LayersCopied,
                ResourcesResolved | MetadataTransformed | Done
            )
            | (ResourcesResolved, PrerequisitesChecked)
            | (PrerequisitesChecked, StylesCopied | LayersCopied)
            | (StylesCopied, LayersCopied)
            | (MetadataTransformed, MetadataUploaded)
            | (MetadataUploaded, Done)
    ) || (to == Failed && !matches!(from, Done | Failed));

    if valid {
        Ok(())
    } else {
        Err(CopyError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
