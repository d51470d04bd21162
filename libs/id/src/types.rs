//! Typed ID definitions.

use crate::define_id;

define_id!(
    /// Identity of a single pooled item. Immutable for the item's lifetime.
    ItemId,
    "item"
);

define_id!(
    /// Identity of a pool instance, used to label its logs.
    PoolId,
    "pool"
);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_item_id_roundtrip() {
        let id = ItemId::new();
        let parsed: ItemId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("item_"));
    }

    #[test]
    fn test_item_id_rejects_pool_prefix() {
        let pool_id = PoolId::new().to_string();
        let err = pool_id.parse::<ItemId>().unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_item_id_missing_separator() {
        let result: Result<ItemId, _> = "item01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(result, Err(crate::IdError::MissingSeparator)));
    }

    #[test]
    fn test_item_id_empty() {
        let result: Result<ItemId, _> = "".parse();
        assert!(matches!(result, Err(crate::IdError::Empty)));
    }

    #[test]
    fn test_item_id_invalid_ulid() {
        let result: Result<ItemId, _> = "item_invalid".parse();
        assert!(matches!(result, Err(crate::IdError::InvalidUlid(_))));
    }

    #[test]
    fn test_item_id_json_is_prefixed_string() {
        let id = ItemId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ItemId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_item_ids_sortable() {
        let id1 = ItemId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = ItemId::new();
        assert!(id1 < id2);
    }

    proptest! {
        #[test]
        fn parse_never_panics(s in ".*") {
            let _ = ItemId::parse(&s);
        }

        #[test]
        fn parse_accepts_any_ulid(raw in any::<u128>()) {
            let text = format!("item_{}", crate::Ulid::from(raw));
            let id = ItemId::parse(&text).unwrap();
            prop_assert_eq!(id.to_string(), text);
        }
    }
}
