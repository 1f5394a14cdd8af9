//! Query description shared by every store backend

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::Value;

use super::Document;

/// A `field = value` condition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    /// Evaluate the filter against a document; a missing field never matches
    pub fn matches(&self, doc: &Document) -> bool {
        doc.value(&self.field).map_or(false, |actual| actual == self.value)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// Ordering clause
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortOrder,
}

/// Filtered, ordered read over one collection
///
/// Results are always totally ordered: after the explicit `order` clauses,
/// documents are ordered by key ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    collection: String,
    filters: Vec<Filter>,
    order: Vec<OrderBy>,
}

impl Query {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            filters: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Add a filter condition
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq<T: Into<Value>>(self, field: &str, value: T) -> Self {
        self.filter(Filter {
            field: field.to_string(),
            value: value.into(),
        })
    }

    /// Order the results by a field
    pub fn order(mut self, field: &str, direction: SortOrder) -> Self {
        self.order.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    /// Whether a document of this collection belongs to the result set
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Sort documents by the order clauses, then by key
    pub fn sort(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| {
            for clause in &self.order {
                let ord = compare_field(a, b, &clause.field);
                let ord = match clause.direction {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.id.cmp(&b.id)
        });
    }

    /// Filter and sort a set of documents
    pub fn apply<'a, I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut out: Vec<Document> = docs
            .into_iter()
            .filter(|d| self.matches(d))
            .cloned()
            .collect();
        self.sort(&mut out);
        out
    }
}

fn compare_field(a: &Document, b: &Document, field: &str) -> Ordering {
    match field {
        "created_at" => a.created_at.cmp(&b.created_at),
        "id" => a.id.cmp(&b.id),
        _ => match (a.fields.get(field), b.fields.get(field)) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            // missing values sort first
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn doc(id: &str, offset_secs: i64, fields: Value) -> Document {
        Document {
            id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn eq_filter_selects_owner() {
        let q = Query::new("projects").eq("owner_id", "u1");
        assert!(q.matches(&doc("a", 0, json!({ "owner_id": "u1" }))));
        assert!(!q.matches(&doc("b", 0, json!({ "owner_id": "u2" }))));
        assert!(!q.matches(&doc("c", 0, json!({}))));
    }

    #[test]
    fn eq_filters_combine() {
        let q = Query::new("items").eq("name", "Caderno").eq("needed", 10);
        assert!(q.matches(&doc("a", 0, json!({ "name": "Caderno", "needed": 10 }))));
        assert!(!q.matches(&doc("b", 0, json!({ "name": "Caderno", "needed": 9 }))));
        assert!(!q.matches(&doc("c", 0, json!({ "name": "Caderno", "needed": "10" }))));
    }

    #[test]
    fn sorts_by_plain_field_with_missing_first() {
        let docs = vec![
            doc("a", 0, json!({ "title": "Horta" })),
            doc("b", 0, json!({})),
            doc("c", 0, json!({ "title": "Arte" })),
        ];
        let q = Query::new("projects").order("title", SortOrder::Ascending);
        let ids: Vec<_> = q.apply(docs.iter()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn newest_first_with_key_tiebreak() {
        let docs = vec![
            doc("b", 5, json!({})),
            doc("a", 5, json!({})),
            doc("c", 1, json!({})),
            doc("d", 9, json!({})),
        ];
        let q = Query::new("projects").order("created_at", SortOrder::Descending);
        let ids: Vec<_> = q.apply(docs.iter()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn ascending_creation_order() {
        let docs = vec![doc("x", 3, json!({})), doc("y", 1, json!({}))];
        let q = Query::new("projects/p/items").order("created_at", SortOrder::Ascending);
        let ids: Vec<_> = q.apply(docs.iter()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["y", "x"]);
    }
}
