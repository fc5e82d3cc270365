//! Structured predicates and the query assembler turning request state into a `Query`.
//!
//! Nothing here touches storage and nothing here fails: malformed pagination coerces to 0,
//! unknown sort directions to ascending. Field names are checked later, when a store
//! compiles the query.

use crate::config::ResolvedResource;
use crate::context::RequestContext;
use crate::error::AppError;
use serde_json::{Map, Value};

/// Query-string keys that never become equality filters.
pub const RESERVED_PARAMS: [&str; 4] = ["skip", "take", "withDeleted", "orderBy"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// A condition tree. Fields are base-table columns or `relation.column`.
/// Comparing with JSON null means IS NULL (or IS NOT NULL for `Ne`).
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare { field: String, op: CompareOp, value: Value },
    In { field: String, values: Vec<Value> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::Eq, Value::Null)
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In {
            field: field.into(),
            values,
        }
    }

    /// AND-combine, flattening nested conjunctions.
    pub fn and(self, other: Predicate) -> Predicate {
        let mut parts = match self {
            Predicate::And(v) => v,
            p => vec![p],
        };
        match other {
            Predicate::And(v) => parts.extend(v),
            p => parts.push(p),
        }
        Predicate::And(parts)
    }

    /// Equality conjunction from a JSON object; nested objects address relation columns
    /// (`{"owner": {"id": 1}}` -> `owner.id = 1`). Empty objects yield `None`.
    pub fn from_object(obj: &Map<String, Value>) -> Option<Predicate> {
        let mut parts = Vec::new();
        collect_equalities("", obj, &mut parts);
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Predicate::And(parts)),
        }
    }

    /// A body `search` payload: an object is a conjunction, an array of objects is an OR of
    /// conjunctions. Anything else is ignored.
    pub fn from_search(search: &Value) -> Option<Predicate> {
        match search {
            Value::Object(obj) => Predicate::from_object(obj),
            Value::Array(items) => {
                let branches: Vec<Predicate> = items
                    .iter()
                    .filter_map(|v| v.as_object().and_then(Predicate::from_object))
                    .collect();
                match branches.len() {
                    0 => None,
                    1 => branches.into_iter().next(),
                    _ => Some(Predicate::Or(branches)),
                }
            }
            _ => None,
        }
    }
}

fn collect_equalities(prefix: &str, obj: &Map<String, Value>, out: &mut Vec<Predicate>) {
    for (k, v) in obj {
        let field = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{}.{}", prefix, k)
        };
        match v {
            Value::Object(nested) => collect_equalities(&field, nested, out),
            Value::Array(values) => out.push(Predicate::is_in(field, values.clone())),
            _ => out.push(Predicate::eq(field, v.clone())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Case-insensitive; anything other than "desc" sorts ascending.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A fully configured, not yet executed read or write target.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Predicate>,
    pub order_by: Vec<(String, SortDirection)>,
    pub skip: u64,
    /// 0 means no limit.
    pub take: u64,
    pub with_deleted: bool,
}

impl Query {
    /// Primary filter AND base restriction; either alone when the other is absent.
    pub fn filtered(primary: Option<Predicate>, base: Option<Predicate>) -> Self {
        let filter = match (primary, base) {
            (Some(p), Some(b)) => Some(p.and(b)),
            (p, b) => p.or(b),
        };
        Query {
            filter,
            ..Query::default()
        }
    }
}

/// "field:direction,field:direction" -> ordered pairs. Empty fields are skipped.
pub fn parse_order_by(s: &str) -> Vec<(String, SortDirection)> {
    s.split(',')
        .filter_map(|part| {
            let mut it = part.splitn(2, ':');
            let field = it.next()?.trim();
            if field.is_empty() {
                return None;
            }
            let dir = it.next().map(SortDirection::parse).unwrap_or(SortDirection::Asc);
            Some((field.to_string(), dir))
        })
        .collect()
}

fn order_from_body(v: &Value) -> Option<Vec<(String, SortDirection)>> {
    match v {
        Value::Object(obj) if !obj.is_empty() => Some(
            obj.iter()
                .map(|(k, d)| (k.clone(), SortDirection::parse(d.as_str().unwrap_or("asc"))))
                .collect(),
        ),
        Value::String(s) if !s.is_empty() => Some(parse_order_by(s)),
        _ => None,
    }
}

/// Number(x) || 0 semantics: non-numeric, negative or non-finite input becomes 0.
pub fn coerce_count(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n.floor() as u64)
        .unwrap_or(0)
}

/// Presence flag: any non-empty value is on.
pub fn flag(raw: Option<&str>) -> bool {
    raw.map(str::trim).is_some_and(|s| !s.is_empty())
}

/// Build the `find` query: filter (body search first, else non-reserved query fields),
/// AND base restriction, order, pagination and soft-delete visibility.
pub fn assemble_find(req: &RequestContext, base: Option<Predicate>) -> Query {
    let search = req.body_field("search").filter(|v| !v.is_null());
    let primary = match search {
        Some(search) => Predicate::from_search(search),
        None => query_filters(req),
    };
    let mut query = Query::filtered(primary, base);

    query.order_by = req
        .body_field("orderBy")
        .and_then(order_from_body)
        .or_else(|| req.query_param("orderBy").map(parse_order_by))
        .unwrap_or_default();
    query.with_deleted = flag(req.query_param("withDeleted"));
    query.skip = coerce_count(req.query_param("skip"));
    query.take = coerce_count(req.query_param("take"));
    query
}

fn query_filters(req: &RequestContext) -> Option<Predicate> {
    let mut parts: Vec<Predicate> = req
        .query
        .iter()
        .filter(|(k, _)| !RESERVED_PARAMS.contains(&k.as_str()))
        .map(|(k, v)| {
            let value = if v == "null" {
                Value::Null
            } else {
                Value::String(v.clone())
            };
            Predicate::eq(k.clone(), value)
        })
        .collect();
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Predicate::And(parts)),
    }
}

/// Validate the id path parameters and turn them into a structured predicate.
/// Every parameter named in the template must be numeric. A lone parameter addresses the
/// primary key; several address the columns they are named after.
pub fn single_record_predicate(resource: &ResolvedResource, req: &RequestContext) -> Result<Predicate, AppError> {
    let mut parts = Vec::with_capacity(resource.id_params.len());
    for name in &resource.id_params {
        let raw = req.params.get(name).ok_or_else(AppError::invalid_id)?;
        let value = parse_numeric_id(raw).ok_or_else(AppError::invalid_id)?;
        let field = match resource.id_params.len() {
            1 => resource.primary_key.clone(),
            _ => name.clone(),
        };
        parts.push(Predicate::eq(field, value));
    }
    Ok(match parts.len() {
        1 => parts.remove(0),
        _ => Predicate::And(parts),
    })
}

fn parse_numeric_id(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Some(Value::from(n));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Query for a single-record action: id predicate AND base restriction.
pub fn assemble_single(id: Predicate, base: Option<Predicate>, with_deleted: bool) -> Query {
    let mut query = Query::filtered(Some(id), base);
    query.with_deleted = with_deleted;
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, ResourceConfig};
    use serde_json::json;

    #[test]
    fn query_string_fields_become_equalities() {
        let req = RequestContext::get("/widgets?skip=2&take=5&title=t&owner_id=null&orderBy=title:desc,id");
        let q = assemble_find(&req, None);
        assert_eq!(
            q.filter,
            Some(Predicate::And(vec![
                Predicate::eq("title", "t"),
                Predicate::is_null("owner_id"),
            ]))
        );
        assert_eq!(q.skip, 2);
        assert_eq!(q.take, 5);
        assert_eq!(
            q.order_by,
            vec![("title".to_string(), SortDirection::Desc), ("id".to_string(), SortDirection::Asc)]
        );
        assert!(!q.with_deleted);
    }

    #[test]
    fn body_search_takes_precedence() {
        let req = RequestContext::get("/widgets?title=ignored")
            .with_body(json!({ "search": { "title": "t", "owner": { "id": 3 } }, "orderBy": { "id": "DESC" } }));
        let q = assemble_find(&req, None);
        assert_eq!(
            q.filter,
            Some(Predicate::And(vec![Predicate::eq("title", "t"), Predicate::eq("owner.id", 3)]))
        );
        assert_eq!(q.order_by, vec![("id".to_string(), SortDirection::Desc)]);
    }

    #[test]
    fn search_array_is_a_disjunction() {
        let p = Predicate::from_search(&json!([{ "id": 1 }, { "id": 2 }])).unwrap();
        assert_eq!(p, Predicate::Or(vec![Predicate::eq("id", 1), Predicate::eq("id", 2)]));
        assert!(Predicate::from_search(&json!({})).is_none());
        assert!(Predicate::from_search(&json!("x")).is_none());
    }

    #[test]
    fn base_restriction_is_always_combined() {
        let base = Some(Predicate::eq("tenant_id", 7));
        let with_filter = assemble_find(&RequestContext::get("/widgets?title=t"), base.clone());
        assert_eq!(
            with_filter.filter,
            Some(Predicate::And(vec![Predicate::eq("title", "t"), Predicate::eq("tenant_id", 7)]))
        );
        let alone = assemble_find(&RequestContext::get("/widgets?orderBy=id"), base.clone());
        assert_eq!(alone.filter, base);
    }

    #[test]
    fn malformed_numbers_coerce_to_zero() {
        assert_eq!(coerce_count(Some("abc")), 0);
        assert_eq!(coerce_count(Some("-3")), 0);
        assert_eq!(coerce_count(Some("2.9")), 2);
        assert_eq!(coerce_count(None), 0);
        let q = assemble_find(&RequestContext::get("/widgets?skip=x&take="), None);
        assert_eq!((q.skip, q.take), (0, 0));
    }

    #[test]
    fn with_deleted_flag() {
        assert!(flag(Some("true")));
        assert!(flag(Some("1")));
        assert!(flag(Some("false")));
        assert!(flag(Some("0")));
        assert!(!flag(Some("")));
        assert!(!flag(Some("  ")));
        assert!(!flag(None));
        assert!(assemble_find(&RequestContext::get("/widgets?withDeleted=true"), None).with_deleted);
        assert!(assemble_find(&RequestContext::get("/widgets?withDeleted=false"), None).with_deleted);
        assert!(!assemble_find(&RequestContext::get("/widgets?withDeleted="), None).with_deleted);
    }

    #[test]
    fn ids_must_be_numeric() {
        let r = resolve(&ResourceConfig::named("widget")).unwrap();
        let ok = RequestContext::get("/widget/4").with_param("id", "4");
        assert_eq!(single_record_predicate(&r, &ok).unwrap(), Predicate::eq("id", 4));

        let bad = RequestContext::get("/widget/abc").with_param("id", "abc");
        let err = single_record_predicate(&r, &bad).unwrap_err();
        assert_eq!(err.to_string(), "ID is not valid");
    }

    #[test]
    fn composite_id_templates() {
        let mut config = ResourceConfig::named("widget");
        config.id_path = ":orgId/:id".into();
        let r = resolve(&config).unwrap();
        let req = RequestContext::get("/widget/1/2").with_param("orgId", "1").with_param("id", "2");
        assert_eq!(
            single_record_predicate(&r, &req).unwrap(),
            Predicate::And(vec![Predicate::eq("orgId", 1), Predicate::eq("id", 2)])
        );
        let q = assemble_single(Predicate::eq("id", 2), Some(Predicate::eq("tenant_id", 1)), true);
        assert!(q.with_deleted);
        assert_eq!(q.take, 0);
    }
}
