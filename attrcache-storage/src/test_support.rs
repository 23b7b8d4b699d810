//! Record type shared by this crate's unit tests.

use attrcache_core::{
    AttrCacheResult, AttributeMap, AttributeValue, ConfigError, FieldReader, RecordSchema,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Member {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub org: Option<i64>,
}

impl Member {
    pub fn new(id: i64, email: &str, name: &str) -> Self {
        Self {
            id,
            email: email.to_string(),
            name: name.to_string(),
            org: None,
        }
    }
}

impl FieldReader for Member {
    fn field(&self, name: &str) -> Option<AttributeValue> {
        match name {
            "id" => Some(self.id.into()),
            "email" => Some(self.email.as_str().into()),
            "name" => Some(self.name.as_str().into()),
            "org" => Some(self.org.into()),
            _ => None,
        }
    }
}

impl RecordSchema for Member {
    const RECORD_TYPE: &'static str = "member";

    fn attribute_names() -> &'static [&'static str] {
        &["id", "email", "name", "org"]
    }

    fn identity_attributes() -> &'static [&'static str] {
        &["id"]
    }

    fn from_attributes(attributes: &AttributeMap) -> AttrCacheResult<Self> {
        let id = match attributes.get("id") {
            Some(AttributeValue::Int(id)) => *id,
            _ => {
                return Err(ConfigError::MissingRequired {
                    field: "id".to_string(),
                }
                .into())
            }
        };
        let text = |name: &str| match attributes.get(name) {
            Some(AttributeValue::Text(s)) => s.clone(),
            _ => String::new(),
        };
        let org = match attributes.get("org") {
            Some(AttributeValue::Int(org)) => Some(*org),
            _ => None,
        };
        Ok(Self {
            id,
            email: text("email"),
            name: text("name"),
            org,
        })
    }
}
