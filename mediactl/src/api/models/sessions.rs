use crate::session::{ModalEvent, ModalOptions, SessionView};
use crate::types::SessionId;
use serde::{Deserialize, Serialize};

/// Body of `POST /sessions`. Unset fields take the configured modal defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionCreate {
    /// Editor field the media will be inserted into
    pub field_id: Option<String>,
    pub disk: Option<String>,
    pub directory: Option<String>,
    pub accepted_file_types: Option<Vec<String>>,
    pub max_file_size_kb: Option<u64>,
}

impl SessionCreate {
    /// Overlay the requested overrides on the defaults
    pub fn apply_to(&self, mut options: ModalOptions) -> ModalOptions {
        if let Some(disk) = &self.disk {
            options.disk = disk.clone();
        }
        if let Some(directory) = &self.directory {
            options.directory = directory.clone();
        }
        if let Some(types) = &self.accepted_file_types {
            options.accepted_file_types = types.clone();
        }
        if let Some(kb) = self.max_file_size_kb {
            options.max_file_size_kb = kb;
        }
        options
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: SessionId,
    #[serde(flatten)]
    pub session: SessionView,
}

/// Body of `POST /sessions/{id}/existing`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SelectExisting {
    pub key: String,
}

/// Events for the editor, in dispatch order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsResponse {
    pub events: Vec<ModalEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_only_when_set() {
        let defaults = ModalOptions {
            modal_id: "m".to_string(),
            disk: "public".to_string(),
            directory: "media".to_string(),
            accepted_file_types: vec!["image/*".to_string()],
            max_file_size_kb: 100,
        };

        let request: SessionCreate = serde_json::from_value(serde_json::json!({
            "field_id": "body",
            "directory": "docs",
        }))
        .unwrap();
        let options = request.apply_to(defaults.clone());

        assert_eq!(options.directory, "docs");
        assert_eq!(options.disk, "public");
        assert_eq!(options.max_file_size_kb, 100);
        assert_eq!(options.modal_id, "m");

        assert!(serde_json::from_value::<SessionCreate>(serde_json::json!({ "modal_id": "x" })).is_err());
    }
}
