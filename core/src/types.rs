//! Domain types for the GLPI REST API.
//!
//! # Design
//! Items belong to the remote service, so they stay opaque `Document`s.
//! Only the envelopes GLPI wraps around them (session token, create and
//! update/delete results) and the query knobs the gateway forwards get
//! concrete types.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// An arbitrary JSON object owned by the remote service.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_LIMIT: u32 = 50;

/// Opaque credential returned by `initSession`.
///
/// `Debug` is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

/// Body of a successful `initSession` answer.
#[derive(Debug, Clone, Deserialize)]
pub struct InitSession {
    pub session_token: SessionToken,
}

/// Offset/limit window, sent to GLPI as an inclusive `range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Pagination {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    /// `"{offset}-{offset + limit - 1}"`; a zero limit has no valid range.
    pub fn range(&self) -> Result<String, ApiError> {
        if self.limit == 0 {
            return Err(ApiError::InvalidInput("limit must be at least 1".to_string()));
        }
        let end = u64::from(self.offset) + u64::from(self.limit) - 1;
        Ok(format!("{}-{end}", self.offset))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "ASC", alias = "asc")]
    Asc,
    #[serde(rename = "DESC", alias = "desc")]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Sort column (search option id or field name) and direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            field: "1".to_string(),
            order: SortOrder::Asc,
        }
    }
}

impl Sort {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }
}

/// Optional flags forwarded on item reads.
///
/// Only flags that are set are sent; GLPI treats absence as `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ItemOptions {
    pub expand_dropdowns: bool,
    pub with_logs: bool,
    pub only_id: bool,
}

/// One search filter, forwarded verbatim as `criteria[i][key]=value`.
///
/// Keys keep insertion order so the outbound query is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Criterion {
    pairs: Vec<(String, String)>,
}

impl Criterion {
    pub fn new() -> Self {
        Self::default()
    }

    /// `field` matched against `value` with GLPI's `contains` search type.
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new()
            .with("field", field)
            .with("searchtype", "contains")
            .with("value", value)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace `key`, keeping the position of an existing key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Everything a `/search/{itemtype}` call can carry besides the itemtype.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub criteria: Vec<Criterion>,
    pub pagination: Pagination,
    pub sort: Sort,
    pub forcedisplay: Vec<String>,
}

/// The `input` of a create call: one object or a batch of objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemInput {
    One(Document),
    Many(Vec<Document>),
}

impl ItemInput {
    /// Reject inputs GLPI would refuse anyway (nothing to write).
    pub fn validate(&self) -> Result<(), ApiError> {
        match self {
            ItemInput::One(fields) if fields.is_empty() => {
                Err(ApiError::InvalidInput("input must not be an empty object".to_string()))
            }
            ItemInput::Many(items) if items.is_empty() => {
                Err(ApiError::InvalidInput("input must not be an empty list".to_string()))
            }
            ItemInput::Many(items) if items.iter().any(|i| i.is_empty()) => Err(
                ApiError::InvalidInput("input list must not contain empty objects".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Result of creating one item. `id` is `None` when GLPI refused it, which
/// it reports as `"id": false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedItem {
    #[serde(with = "id_or_false")]
    pub id: Option<u64>,
    #[serde(default)]
    pub message: String,
}

mod id_or_false {
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};

    pub fn serialize<S: Serializer>(id: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_u64(*id),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(u64),
            Flag(bool),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Id(id) => Ok(Some(id)),
            Raw::Flag(false) => Ok(None),
            Raw::Flag(true) => Err(de::Error::custom("`id: true` is not a valid created id")),
        }
    }
}

/// GLPI answers a single create with an object and a batch with a list.
///
/// A batch where only some items were created comes back (HTTP 207) as
/// `["ERROR_GLPI_PARTIAL_ADD", [...]]`; it is kept in that shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Created {
    One(CreatedItem),
    Many(Vec<CreatedItem>),
    Partial(String, Vec<CreatedItem>),
}

impl Created {
    pub fn items(&self) -> &[CreatedItem] {
        match self {
            Created::One(item) => std::slice::from_ref(item),
            Created::Many(items) | Created::Partial(_, items) => items,
        }
    }

    /// Ids of the items that were actually created.
    pub fn ids(&self) -> Vec<u64> {
        self.items().iter().filter_map(|i| i.id).collect()
    }
}

/// Per-item result of an update or delete.
///
/// On the wire this is `{"<id>": true, "message": ""}`; it is serialized
/// back in the same shape so the gateway relays it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub id: u64,
    pub ok: bool,
    pub message: String,
}

impl Serialize for ItemOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(&self.id.to_string(), &self.ok)?;
        map.serialize_entry("message", &self.message)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ItemOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Document::deserialize(deserializer)?;
        let mut id = None;
        let mut ok = false;
        let mut message = String::new();
        for (key, value) in raw {
            if key == "message" {
                message = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                continue;
            }
            let parsed = key
                .parse::<u64>()
                .map_err(|_| de::Error::custom(format!("unexpected key `{key}` in item outcome")))?;
            ok = match value {
                serde_json::Value::Bool(b) => b,
                serde_json::Value::Number(n) => n.as_u64() == Some(1),
                other => return Err(de::Error::custom(format!("non-boolean outcome {other}"))),
            };
            id = Some(parsed);
        }
        let id = id.ok_or_else(|| de::Error::custom("item outcome without an id"))?;
        Ok(ItemOutcome { id, ok, message })
    }
}

/// Answer to an update or delete.
///
/// GLPI normally sends a list of `ItemOutcome`s. When only some of them
/// succeeded it answers 207 with `["ERROR_GLPI_PARTIAL_UPDATE", [...]]`
/// (or `_DELETE`), which is kept as `Partial`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcomes {
    All(Vec<ItemOutcome>),
    Partial(String, Vec<ItemOutcome>),
}

impl Outcomes {
    pub fn items(&self) -> &[ItemOutcome] {
        match self {
            Outcomes::All(items) | Outcomes::Partial(_, items) => items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pagination_is_first_fifty() {
        assert_eq!(Pagination::default().range().unwrap(), "0-49");
    }

    #[test]
    fn pagination_range_is_inclusive() {
        assert_eq!(Pagination::new(10, 5).range().unwrap(), "10-14");
        assert_eq!(Pagination::new(7, 1).range().unwrap(), "7-7");
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = Pagination::new(3, 0).range().unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn pagination_range_does_not_overflow() {
        let p = Pagination::new(u32::MAX, 2);
        assert_eq!(p.range().unwrap(), format!("{}-{}", u32::MAX, u64::from(u32::MAX) + 1));
    }

    #[test]
    fn sort_order_accepts_lowercase() {
        let order: SortOrder = serde_json::from_str(r#""desc""#).unwrap();
        assert_eq!(order, SortOrder::Desc);
        assert_eq!(order.as_str(), "DESC");
    }

    #[test]
    fn criterion_set_replaces_in_place() {
        let mut c = Criterion::contains("1", "pc");
        c.set("field", "2");
        assert_eq!(
            c.pairs(),
            &[
                ("field".to_string(), "2".to_string()),
                ("searchtype".to_string(), "contains".to_string()),
                ("value".to_string(), "pc".to_string()),
            ]
        );
    }

    #[test]
    fn session_token_debug_is_redacted() {
        let token = SessionToken::new("secret");
        assert_eq!(format!("{token:?}"), "SessionToken(***)");
    }

    #[test]
    fn item_input_accepts_object_or_list() {
        let one: ItemInput = serde_json::from_str(r#"{"name":"pc-1"}"#).unwrap();
        assert!(matches!(one, ItemInput::One(_)));
        let many: ItemInput = serde_json::from_str(r#"[{"name":"a"},{"name":"b"}]"#).unwrap();
        assert!(matches!(many, ItemInput::Many(ref v) if v.len() == 2));
    }

    #[test]
    fn empty_item_input_fails_validation() {
        let empty: ItemInput = serde_json::from_str("{}").unwrap();
        assert!(empty.validate().is_err());
        let none: ItemInput = serde_json::from_str("[]").unwrap();
        assert!(none.validate().is_err());
        let hollow: ItemInput = serde_json::from_str(r#"[{"name":"a"},{}]"#).unwrap();
        assert!(hollow.validate().is_err());
    }

    #[test]
    fn item_outcome_keeps_wire_shape() {
        let outcome: ItemOutcome = serde_json::from_str(r#"{"11":true,"message":""}"#).unwrap();
        assert_eq!(
            outcome,
            ItemOutcome {
                id: 11,
                ok: true,
                message: String::new()
            }
        );
        let back = serde_json::to_value(&outcome).unwrap();
        assert_eq!(back, serde_json::json!({"11": true, "message": ""}));
    }

    #[test]
    fn item_outcome_without_id_is_an_error() {
        let result: Result<ItemOutcome, _> = serde_json::from_str(r#"{"message":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn created_lists_ids() {
        let many: Created = serde_json::from_str(r#"[{"id":4,"message":""},{"id":5}]"#).unwrap();
        assert_eq!(many.ids(), vec![4, 5]);
        let one: Created = serde_json::from_str(r#"{"id":9,"message":"ok"}"#).unwrap();
        assert_eq!(one.ids(), vec![9]);
    }

    #[test]
    fn partial_create_keeps_refused_items() {
        let raw = r#"["ERROR_GLPI_PARTIAL_ADD",[{"id":5,"message":""},{"id":false,"message":"duplicate serial"}]]"#;
        let created: Created = serde_json::from_str(raw).unwrap();
        assert!(matches!(created, Created::Partial(ref code, _) if code == "ERROR_GLPI_PARTIAL_ADD"));
        assert_eq!(created.ids(), vec![5]);
        assert_eq!(created.items()[1].message, "duplicate serial");
        let back = serde_json::to_string(&created).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn created_id_true_is_rejected() {
        let result: Result<CreatedItem, _> = serde_json::from_str(r#"{"id":true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn partial_update_keeps_code_and_outcomes() {
        let raw = r#"["ERROR_GLPI_PARTIAL_UPDATE",[{"3":true,"message":""},{"4":false,"message":"locked"}]]"#;
        let outcomes: Outcomes = serde_json::from_str(raw).unwrap();
        assert!(matches!(outcomes, Outcomes::Partial(ref code, _) if code == "ERROR_GLPI_PARTIAL_UPDATE"));
        assert!(!outcomes.items()[1].ok);
        assert_eq!(serde_json::to_value(&outcomes).unwrap(), serde_json::from_str::<serde_json::Value>(raw).unwrap());
    }
}
