//! Query feature pipeline: turns a flat query-string map into a typed
//! descriptor (filter, projection, sort, pagination) and folds it into a
//! store query. Pure; no I/O happens here.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Query parameters that drive paging, sorting and projection instead of
/// filtering.
pub const RESERVED_PARAMS: [&str; 4] = ["limit", "page", "sort", "fields"];

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 100;
pub const DEFAULT_SORT: &str = "-createdAt";
pub const ID_FIELD: &str = "id";

/// Raw query-string parameters as handed over by a controller.
pub type RawQuery = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("malformed filter key `{key}`")]
    MalformedKey { key: String },
    #[error("unsupported operator `{operator}` on `{field}`")]
    UnsupportedOperator { field: String, operator: String },
    #[error("invalid field name `{field}`")]
    InvalidField { field: String },
    #[error("projection cannot mix included and excluded fields")]
    MixedProjection,
}

// ============================================================================
// Field paths and predicates
// ============================================================================

/// Dotted path into a document (`startLocation.address`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(String);

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let invalid = || QueryError::InvalidField {
            field: raw.to_string(),
        };
        let mut segments = raw.split('.');
        let first = segments.next().ok_or_else(invalid)?;
        if !first
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            return Err(invalid());
        }
        for segment in raw.split('.') {
            if segment.is_empty()
                || !segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(invalid());
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// Build a path from a trusted, compile-time field name.
    pub fn from_static(raw: &'static str) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Resolve the path inside a JSON document. Numeric segments index arrays.
    pub fn lookup<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.segments().try_fold(doc, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl TryFrom<String> for FieldPath {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(value: FieldPath) -> Self {
        value.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    /// Internal scopes only; never produced from a query string.
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "gte" => Some(CompareOp::Gte),
            "gt" => Some(CompareOp::Gt),
            "lte" => Some(CompareOp::Lte),
            "lt" => Some(CompareOp::Lt),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
        }
    }

    /// SQL operator used by relational adapters.
    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "IS DISTINCT FROM",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: FieldPath,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(field: FieldPath, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &'static str, value: impl Into<Value>) -> Self {
        Self::new(FieldPath::from_static(field), CompareOp::Eq, value)
    }

    pub fn ne(field: &'static str, value: impl Into<Value>) -> Self {
        Self::new(FieldPath::from_static(field), CompareOp::Ne, value)
    }

    pub fn gte(field: &'static str, value: impl Into<Value>) -> Self {
        Self::new(FieldPath::from_static(field), CompareOp::Gte, value)
    }

    /// Evaluate the predicate against a document. Arrays match when any
    /// element satisfies the comparison; a missing field only satisfies `Ne`.
    pub fn matches(&self, doc: &Value) -> bool {
        match self.field.lookup(doc) {
            None | Some(Value::Null) => match self.op {
                CompareOp::Ne => !self.value.is_null(),
                CompareOp::Eq => self.value.is_null(),
                _ => false,
            },
            Some(Value::Array(items)) if !self.value.is_array() => match self.op {
                CompareOp::Ne => !items.iter().any(|item| self.compare(item)),
                _ => items.iter().any(|item| self.compare(item)),
            },
            Some(found) => match self.op {
                CompareOp::Ne => !values_equal(found, &self.value),
                _ => self.compare(found),
            },
        }
    }

    fn compare(&self, found: &Value) -> bool {
        match self.op {
            CompareOp::Eq | CompareOp::Ne => values_equal(found, &self.value),
            CompareOp::Gt => compare_values(found, &self.value) == Some(Ordering::Greater),
            CompareOp::Gte => matches!(
                compare_values(found, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CompareOp::Lt => compare_values(found, &self.value) == Some(Ordering::Less),
            CompareOp::Lte => matches!(
                compare_values(found, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }

    fn fragment(&self) -> String {
        format!("{}:{}:{}", self.field, self.op.as_str(), self.value)
    }
}

/// Order two JSON scalars of the same type. Values of different types are
/// incomparable.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    compare_values(left, right) == Some(Ordering::Equal) || left == right
}

/// Type a raw query-string value: numbers and booleans are recognised,
/// everything else stays a string.
pub fn parse_scalar(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>()
        && let Some(number) = Number::from_f64(float)
    {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}

// ============================================================================
// Projection and sort
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Every field of the record; store metadata is never part of a record.
    #[default]
    All,
    Include(Vec<FieldPath>),
    Exclude(Vec<FieldPath>),
}

impl Projection {
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.strip_prefix('-') {
                Some(field) => exclude.push(FieldPath::parse(field)?),
                None => include.push(FieldPath::parse(part)?),
            }
        }
        match (include.is_empty(), exclude.is_empty()) {
            (true, true) => Ok(Projection::All),
            (false, true) => Ok(Projection::Include(include)),
            (true, false) => Ok(Projection::Exclude(exclude)),
            (false, false) => Err(QueryError::MixedProjection),
        }
    }

    /// Shape a serialized record. Included projections always keep the id.
    pub fn apply(&self, doc: Value) -> Value {
        match self {
            Projection::All => doc,
            Projection::Include(fields) => {
                let mut paths: Vec<Vec<&str>> =
                    fields.iter().map(|f| f.segments().collect()).collect();
                paths.push(vec![ID_FIELD]);
                include_paths(doc, &paths)
            }
            Projection::Exclude(fields) => {
                let mut doc = doc;
                for field in fields {
                    let segments: Vec<&str> = field.segments().collect();
                    remove_path(&mut doc, &segments);
                }
                doc
            }
        }
    }

    fn fragment(&self) -> String {
        let join = |fields: &[FieldPath], prefix: &str| {
            let mut names: Vec<String> = fields.iter().map(|f| format!("{prefix}{f}")).collect();
            names.sort();
            names.dedup();
            names.join(",")
        };
        match self {
            Projection::All => String::from("*"),
            Projection::Include(fields) => join(fields, ""),
            Projection::Exclude(fields) => join(fields, "-"),
        }
    }
}

fn include_paths(doc: Value, paths: &[Vec<&str>]) -> Value {
    let Value::Object(map) = doc else {
        return doc;
    };
    let mut out = Map::new();
    for (key, value) in map {
        let nested: Vec<Vec<&str>> = paths
            .iter()
            .filter(|path| path.first() == Some(&key.as_str()))
            .map(|path| path[1..].to_vec())
            .collect();
        if nested.is_empty() {
            continue;
        }
        if nested.iter().any(Vec::is_empty) {
            out.insert(key, value);
        } else {
            out.insert(key, include_paths(value, &nested));
        }
    }
    Value::Object(out)
}

fn remove_path(doc: &mut Value, segments: &[&str]) {
    let Value::Object(map) = doc else {
        return;
    };
    match segments {
        [] => {}
        [last] => {
            map.remove(*last);
        }
        [head, rest @ ..] => {
            if let Some(child) = map.get_mut(*head) {
                remove_path(child, rest);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub field: FieldPath,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn parse_list(raw: &str) -> Result<Vec<SortKey>, QueryError> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| match part.strip_prefix('-') {
                Some(field) => Ok(SortKey {
                    field: FieldPath::parse(field)?,
                    direction: SortDirection::Desc,
                }),
                None => Ok(SortKey {
                    field: FieldPath::parse(part.trim_start_matches('+'))?,
                    direction: SortDirection::Asc,
                }),
            })
            .collect()
    }

    fn fragment(&self) -> String {
        match self.direction {
            SortDirection::Asc => self.field.to_string(),
            SortDirection::Desc => format!("-{}", self.field),
        }
    }
}

/// Compare two documents along an ordered list of sort keys.
pub fn compare_documents(left: &Value, right: &Value, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = match (key.field.lookup(left), key.field.lookup(right)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
        };
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

// ============================================================================
// Descriptor and pipeline
// ============================================================================

/// Parsed, validated form of a list request. Built per request, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub filter: Vec<Predicate>,
    pub projection: Projection,
    pub sort: Vec<SortKey>,
    pub page: u32,
    pub limit: u32,
}

impl QueryDescriptor {
    pub fn skip(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Canonical, order-independent rendering used inside list cache keys.
    pub fn cache_fragment(&self) -> String {
        self.cache_fragment_within(&[])
    }

    /// Cache fragment for a list read narrowed by a caller-supplied base
    /// filter (e.g. the reviews of one tour).
    pub fn cache_fragment_within(&self, base: &[Predicate]) -> String {
        let render = |predicates: &[Predicate]| {
            let mut rendered: Vec<String> = predicates.iter().map(Predicate::fragment).collect();
            rendered.sort();
            rendered.join(",")
        };
        let sort: Vec<String> = self.sort.iter().map(SortKey::fragment).collect();
        format!(
            "base={}&filter={}&fields={}&sort={}&page={}&limit={}",
            render(base),
            render(&self.filter),
            self.projection.fragment(),
            sort.join(","),
            self.page,
            self.limit
        )
    }
}

/// Store-facing query after the descriptor has been folded into a base filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreQuery {
    pub filter: Vec<Predicate>,
    pub sort: Vec<SortKey>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl StoreQuery {
    pub fn filtered(filter: Vec<Predicate>) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.filter.iter().all(|predicate| predicate.matches(doc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPipeline {
    max_limit: Option<u32>,
}

impl Default for QueryPipeline {
    fn default() -> Self {
        Self::new(None)
    }
}

impl QueryPipeline {
    pub fn new(max_limit: Option<u32>) -> Self {
        Self { max_limit }
    }

    /// Parse raw query parameters into a descriptor.
    pub fn build(&self, raw: &RawQuery) -> Result<QueryDescriptor, QueryError> {
        let mut filter = Vec::new();
        for (key, value) in raw {
            if RESERVED_PARAMS.contains(&key.as_str()) {
                continue;
            }
            let (field, op) = parse_filter_key(key)?;
            filter.push(Predicate::new(field, op, parse_scalar(value)));
        }

        let projection = match raw.get("fields") {
            Some(fields) => Projection::parse(fields)?,
            None => Projection::All,
        };

        let mut sort = match raw.get("sort") {
            Some(sort) => SortKey::parse_list(sort)?,
            None => Vec::new(),
        };
        if sort.is_empty() {
            sort = SortKey::parse_list(DEFAULT_SORT)?;
        }

        let page = positive_or(raw.get("page"), DEFAULT_PAGE);
        let mut limit = positive_or(raw.get("limit"), DEFAULT_LIMIT);
        if let Some(max) = self.max_limit {
            limit = limit.min(max.max(1));
        }

        Ok(QueryDescriptor {
            filter,
            projection,
            sort,
            page,
            limit,
        })
    }

    /// Fold a descriptor into a base query (resource scope, nested-route
    /// filters), adding an id tie-break so paging is deterministic.
    pub fn apply(&self, base: StoreQuery, descriptor: &QueryDescriptor) -> StoreQuery {
        let mut filter = base.filter;
        filter.extend(descriptor.filter.iter().cloned());

        let mut sort = descriptor.sort.clone();
        if !sort.iter().any(|key| key.field.as_str() == ID_FIELD) {
            sort.push(SortKey {
                field: FieldPath::from_static(ID_FIELD),
                direction: SortDirection::Asc,
            });
        }

        StoreQuery {
            filter,
            sort,
            skip: descriptor.skip(),
            limit: Some(u64::from(descriptor.limit)),
        }
    }
}

fn parse_filter_key(key: &str) -> Result<(FieldPath, CompareOp), QueryError> {
    match key.split_once('[') {
        None => Ok((FieldPath::parse(key)?, CompareOp::Eq)),
        Some((field, rest)) => {
            let operator = rest.strip_suffix(']').ok_or_else(|| QueryError::MalformedKey {
                key: key.to_string(),
            })?;
            if operator.contains('[') || operator.contains(']') {
                return Err(QueryError::MalformedKey {
                    key: key.to_string(),
                });
            }
            let field = FieldPath::parse(field)?;
            let op = CompareOp::from_suffix(operator).ok_or_else(|| {
                QueryError::UnsupportedOperator {
                    field: field.to_string(),
                    operator: operator.to_string(),
                }
            })?;
            Ok((field, op))
        }
    }
}

fn positive_or(raw: Option<&String>, default: u32) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value >= 1)
        .unwrap_or(default)
}

/// The "top five cheap" alias preset.
pub fn top_five_cheap() -> RawQuery {
    RawQuery::from([
        ("sort".to_string(), "-ratingsAverage,price".to_string()),
        ("limit".to_string(), "5".to_string()),
        (
            "fields".to_string(),
            "name,price,ratingsAverage,summary,difficulty".to_string(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> RawQuery {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reserved_keys_never_become_predicates() {
        let descriptor = QueryPipeline::default()
            .build(&raw(&[
                ("page", "2"),
                ("limit", "10"),
                ("sort", "price"),
                ("fields", "name"),
                ("difficulty", "easy"),
            ]))
            .expect("descriptor");
        assert_eq!(descriptor.filter.len(), 1);
        assert!(
            descriptor
                .filter
                .iter()
                .all(|p| !RESERVED_PARAMS.contains(&p.field.as_str()))
        );
        assert_eq!(descriptor.filter[0].op, CompareOp::Eq);
        assert_eq!(descriptor.filter[0].value, json!("easy"));
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn field_name() -> impl Strategy<Value = String> {
            "[a-z][a-zA-Z0-9_]{0,10}"
        }

        fn reserved_param() -> impl Strategy<Value = String> {
            prop::sample::select(RESERVED_PARAMS.to_vec()).prop_map(str::to_string)
        }

        proptest! {
            #[test]
            fn only_unreserved_keys_become_predicates(
                params in prop::collection::btree_map(
                    prop_oneof![field_name(), reserved_param()],
                    "[a-z][a-z0-9]{0,7}",
                    0..12,
                ),
            ) {
                let descriptor = QueryPipeline::default().build(&params).expect("descriptor");
                let unreserved = params
                    .keys()
                    .filter(|key| !RESERVED_PARAMS.contains(&key.as_str()))
                    .count();
                prop_assert_eq!(descriptor.filter.len(), unreserved);
                for predicate in &descriptor.filter {
                    prop_assert!(!RESERVED_PARAMS.contains(&predicate.field.as_str()));
                    prop_assert_eq!(predicate.op, CompareOp::Eq);
                }
            }

            #[test]
            fn gte_suffix_parses_to_gte(field in field_name(), bound in any::<i64>()) {
                prop_assume!(!RESERVED_PARAMS.contains(&field.as_str()));
                let mut params = RawQuery::new();
                params.insert(format!("{field}[gte]"), bound.to_string());

                let descriptor = QueryPipeline::default().build(&params).expect("descriptor");
                prop_assert_eq!(descriptor.filter.len(), 1);
                prop_assert_eq!(descriptor.filter[0].field.as_str(), field.as_str());
                prop_assert_eq!(descriptor.filter[0].op, CompareOp::Gte);
                prop_assert_eq!(&descriptor.filter[0].value, &json!(bound));
            }
        }
    }

    #[test]
    fn comparison_suffixes_map_to_operators() {
        let descriptor = QueryPipeline::default()
            .build(&raw(&[
                ("price[gte]", "100"),
                ("duration[lt]", "7"),
                ("ratingsAverage[gt]", "4.5"),
                ("maxGroupSize[lte]", "10"),
            ]))
            .expect("descriptor");
        let ops: BTreeMap<&str, (CompareOp, Value)> = descriptor
            .filter
            .iter()
            .map(|p| (p.field.as_str(), (p.op, p.value.clone())))
            .collect();
        assert_eq!(ops["price"], (CompareOp::Gte, json!(100)));
        assert_eq!(ops["duration"], (CompareOp::Lt, json!(7)));
        assert_eq!(ops["ratingsAverage"], (CompareOp::Gt, json!(4.5)));
        assert_eq!(ops["maxGroupSize"], (CompareOp::Lte, json!(10)));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = QueryPipeline::default()
            .build(&raw(&[("name[regex]", "^The")]))
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator { .. }));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for key in ["price[gte", "price[gte]]", "$where", "price..x", "9lives"] {
            let result = QueryPipeline::default().build(&raw(&[(key, "1")]));
            assert!(result.is_err(), "`{key}` should be rejected");
        }
    }

    #[test]
    fn pagination_computes_skip() {
        let descriptor = QueryPipeline::default()
            .build(&raw(&[("page", "2"), ("limit", "10")]))
            .expect("descriptor");
        assert_eq!(descriptor.skip(), 10);
    }

    #[test]
    fn pagination_defaults_when_absent_or_non_numeric() {
        let pipeline = QueryPipeline::default();
        for query in [
            raw(&[]),
            raw(&[("page", "abc"), ("limit", "many")]),
            raw(&[("page", "0"), ("limit", "-4")]),
        ] {
            let descriptor = pipeline.build(&query).expect("descriptor");
            assert_eq!(descriptor.page, 1);
            assert_eq!(descriptor.limit, 100);
            assert_eq!(descriptor.skip(), 0);
        }
    }

    #[test]
    fn configured_max_limit_clamps() {
        let descriptor = QueryPipeline::new(Some(50))
            .build(&raw(&[("limit", "500")]))
            .expect("descriptor");
        assert_eq!(descriptor.limit, 50);
    }

    #[test]
    fn sort_defaults_to_newest_first() {
        let descriptor = QueryPipeline::default().build(&raw(&[])).expect("descriptor");
        assert_eq!(
            descriptor.sort,
            vec![SortKey {
                field: FieldPath::from_static("createdAt"),
                direction: SortDirection::Desc,
            }]
        );

        let descriptor = QueryPipeline::default()
            .build(&raw(&[("sort", "-price,ratingsAverage")]))
            .expect("descriptor");
        assert_eq!(descriptor.sort.len(), 2);
        assert_eq!(descriptor.sort[0].direction, SortDirection::Desc);
        assert_eq!(descriptor.sort[1].direction, SortDirection::Asc);
    }

    #[test]
    fn projection_include_keeps_id() {
        let projection = Projection::parse("name,price").expect("projection");
        let shaped = projection.apply(json!({
            "id": "a", "name": "n", "price": 1, "summary": "s"
        }));
        assert_eq!(shaped, json!({ "id": "a", "name": "n", "price": 1 }));
    }

    #[test]
    fn projection_exclude_and_nested() {
        let projection = Projection::parse("-images,-startLocation.address").expect("projection");
        let shaped = projection.apply(json!({
            "id": "a",
            "images": [],
            "startLocation": { "coordinates": [1, 2], "address": "x" }
        }));
        assert_eq!(
            shaped,
            json!({ "id": "a", "startLocation": { "coordinates": [1, 2] } })
        );

        let nested = Projection::parse("startLocation.address").expect("projection");
        assert_eq!(
            nested.apply(json!({
                "id": "a",
                "name": "n",
                "startLocation": { "coordinates": [1, 2], "address": "x" }
            })),
            json!({ "id": "a", "startLocation": { "address": "x" } })
        );
    }

    #[test]
    fn mixed_projection_is_rejected() {
        assert_eq!(
            Projection::parse("name,-price").unwrap_err(),
            QueryError::MixedProjection
        );
    }

    #[test]
    fn predicates_match_documents() {
        let doc = json!({ "price": 397, "difficulty": "easy", "guides": ["g1", "g2"] });
        assert!(Predicate::gte("price", 100).matches(&doc));
        assert!(!Predicate::gte("price", 400).matches(&doc));
        assert!(Predicate::eq("difficulty", "easy").matches(&doc));
        assert!(Predicate::eq("guides", "g2").matches(&doc));
        assert!(Predicate::ne("secretTour", true).matches(&doc));
        assert!(!Predicate::eq("secretTour", true).matches(&doc));
        assert!(!Predicate::gte("difficulty", 1).matches(&doc));
    }

    #[test]
    fn cache_fragment_is_order_independent() {
        let pipeline = QueryPipeline::default();
        let a = pipeline
            .build(&raw(&[("price[gte]", "100"), ("difficulty", "easy")]))
            .expect("a");
        let b = pipeline
            .build(&raw(&[("difficulty", "easy"), ("price[gte]", "100")]))
            .expect("b");
        assert_eq!(a.cache_fragment(), b.cache_fragment());

        let c = pipeline
            .build(&raw(&[("difficulty", "easy"), ("page", "2")]))
            .expect("c");
        assert_ne!(a.cache_fragment(), c.cache_fragment());

        let scoped = a.cache_fragment_within(&[Predicate::eq("tour", "t1")]);
        assert_ne!(a.cache_fragment(), scoped);
    }

    #[test]
    fn apply_merges_base_filter_and_adds_tie_break() {
        let pipeline = QueryPipeline::default();
        let descriptor = pipeline
            .build(&raw(&[("rating[gte]", "4"), ("page", "3"), ("limit", "5")]))
            .expect("descriptor");
        let query = pipeline.apply(
            StoreQuery::filtered(vec![Predicate::eq("tour", "t1")]),
            &descriptor,
        );
        assert_eq!(query.filter.len(), 2);
        assert_eq!(query.skip, 10);
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.sort.last().map(|k| k.field.as_str()), Some(ID_FIELD));
    }

    #[test]
    fn documents_sort_by_keys() {
        let keys = SortKey::parse_list("-price,name").expect("keys");
        let a = json!({ "price": 10, "name": "b" });
        let b = json!({ "price": 10, "name": "a" });
        let c = json!({ "price": 20, "name": "c" });
        let mut docs = [a.clone(), b.clone(), c.clone()];
        docs.sort_by(|l, r| compare_documents(l, r, &keys));
        assert_eq!(docs, [c, b, a]);
    }
}
