use std::collections::HashMap;
use std::path::Path;

use crate::config::UNKNOWN_SELLER;
use crate::error::Result;

/// Seller id → display name, loaded from a flat JSON object.
#[derive(Debug, Clone, Default)]
pub struct SellerDirectory {
    names: HashMap<String, String>,
}

impl SellerDirectory {
    pub fn from_json(raw: &str) -> Result<Self> {
        let names: HashMap<String, String> = serde_json::from_str(raw)?;
        Ok(Self { names })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn name_for(&self, seller_id: &str) -> String {
        self.names
            .get(seller_id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_SELLER.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_and_unknown_ids() {
        let dir = SellerDirectory::from_json(r#"{"19": "Seattle Goodwill", "198": "Portland"}"#).unwrap();
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.name_for("19"), "Seattle Goodwill");
        assert_eq!(dir.name_for("7"), UNKNOWN_SELLER);
    }

    #[test]
    fn rejects_non_object_json() {
        assert!(SellerDirectory::from_json("[1, 2]").is_err());
    }
}
