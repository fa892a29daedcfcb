use serde::{Deserialize, Serialize};

use super::{Entity, Key};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
}

impl Restaurant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cuisine: None,
            address: None,
            rating: None,
        }
    }

    pub fn display_rating(&self) -> String {
        match self.rating {
            Some(rating) => format!("{:.1}/5", rating),
            None => "Unrated".to_string(),
        }
    }
}

impl Entity for Restaurant {
    fn key(&self) -> Key {
        Key::new(self.id.clone())
    }
}
