//! Inbound query parameters and their mapping onto `glpi_core` types.
//!
//! Names match GLPI's own parameters one to one, except that the window is
//! expressed as `offset`/`limit` instead of GLPI's inclusive `range`.

use std::collections::BTreeMap;

use glpi_core::{Criterion, ItemOptions, Pagination, SearchQuery, Sort, SortOrder, DEFAULT_LIMIT};
use serde::Deserialize;

use crate::error::GatewayError;

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

fn default_sort() -> String {
    "1".to_string()
}

/// `GET /glpi/items/{itemtype}`
#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub expand_dropdowns: bool,
    #[serde(default)]
    pub only_id: bool,
}

impl ListParams {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.offset, self.limit)
    }

    pub fn sort(&self) -> Sort {
        Sort::new(self.sort.clone(), self.order)
    }

    pub fn options(&self) -> ItemOptions {
        ItemOptions {
            expand_dropdowns: self.expand_dropdowns,
            only_id: self.only_id,
            ..ItemOptions::default()
        }
    }
}

/// `GET /glpi/items/{itemtype}/{id}`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ItemParams {
    pub expand_dropdowns: bool,
    pub with_logs: bool,
}

impl ItemParams {
    pub fn options(&self) -> ItemOptions {
        ItemOptions {
            expand_dropdowns: self.expand_dropdowns,
            with_logs: self.with_logs,
            ..ItemOptions::default()
        }
    }
}

/// `GET /glpi/items/{itemtype}/{id}/{sub_itemtype}`
#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl PageParams {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.offset, self.limit)
    }
}

/// `DELETE /glpi/items/{itemtype}/{id}`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeleteParams {
    pub force_purge: bool,
}

/// `GET /glpi/entities`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EntitiesParams {
    pub is_recursive: bool,
}

/// Build a `SearchQuery` from the raw pairs of `GET /glpi/search/{itemtype}`.
///
/// `criteria[i][key]` and `forcedisplay[i]` keys are regrouped by index and
/// re-numbered densely in index order, so `criteria[3]` alone becomes the
/// first criterion. `forcedisplay[]` appends a column after the indexed
/// ones. Any other key under `criteria[` or `forcedisplay[` is rejected,
/// since it cannot be placed; keys outside those families are ignored.
pub fn search_query(pairs: Vec<(String, String)>) -> Result<SearchQuery, GatewayError> {
    let mut query = SearchQuery::default();
    let mut criteria: BTreeMap<usize, Criterion> = BTreeMap::new();
    let mut columns: BTreeMap<usize, String> = BTreeMap::new();
    let mut appended = Vec::new();

    for (key, value) in pairs {
        match key.as_str() {
            "offset" => query.pagination.offset = number(&key, &value)?,
            "limit" => query.pagination.limit = number(&key, &value)?,
            "sort" => query.sort.field = value,
            "order" => query.sort.order = order(&value)?,
            "forcedisplay[]" => appended.push(value),
            _ if key.starts_with("criteria[") => match indexed(&key, "criteria") {
                Some((index, Some(field))) => criteria.entry(index).or_default().set(field, value),
                Some((_, None)) => {
                    return Err(GatewayError::Validation(format!("`{key}` is missing the criterion key")))
                }
                None => return Err(unplaced(&key)),
            },
            _ if key.starts_with("forcedisplay[") => match indexed(&key, "forcedisplay") {
                Some((index, None)) => {
                    columns.insert(index, value);
                }
                _ => return Err(unplaced(&key)),
            },
            _ => {}
        }
    }

    query.criteria = criteria.into_values().collect();
    query.forcedisplay = columns.into_values().chain(appended).collect();
    Ok(query)
}

fn unplaced(key: &str) -> GatewayError {
    GatewayError::Validation(format!("`{key}` needs a numeric index, e.g. `criteria[0][field]`"))
}

fn number(key: &str, value: &str) -> Result<u32, GatewayError> {
    value
        .parse()
        .map_err(|_| GatewayError::Validation(format!("`{key}` must be a non-negative integer, got `{value}`")))
}

fn order(value: &str) -> Result<SortOrder, GatewayError> {
    match value.to_ascii_uppercase().as_str() {
        "ASC" => Ok(SortOrder::Asc),
        "DESC" => Ok(SortOrder::Desc),
        _ => Err(GatewayError::Validation(format!("`order` must be ASC or DESC, got `{value}`"))),
    }
}

/// Split `prefix[index]` or `prefix[index][field]`.
fn indexed<'a>(key: &'a str, prefix: &str) -> Option<(usize, Option<&'a str>)> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('[')?;
    let (index, rest) = rest.split_once(']')?;
    let index = index.parse().ok()?;
    if rest.is_empty() {
        return Some((index, None));
    }
    let field = rest.strip_prefix('[')?.strip_suffix(']')?;
    (!field.is_empty()).then_some((index, Some(field)))
}
